//! Triple-pattern expansion
//!
//! Replaces every raw triple pattern by the union of the restricted patterns
//! that could produce its matches, and consumes `GRAPH` nodes by pushing
//! their graph term into the restricted patterns.

use crate::mapping::{Mapping, MappingCombination, ResolvedObject, TermMap, TermValuation};
use crate::rdf::{vocab, xsd, RdfTerm, TermKind};
use crate::sparql::algebra::{AlgebraNode, RestrictedTriplePattern, TermPattern, TriplePattern};

/// Datatypes a column-valued literal map without `rr:datatype` can produce
const NATURAL_DATATYPES: &[&str] = &[
    xsd::STRING,
    xsd::INTEGER,
    xsd::DOUBLE,
    xsd::BOOLEAN,
    xsd::DATE_TIME,
];

/// Expand every triple pattern of the tree
pub fn expand(node: &AlgebraNode, mapping: &Mapping) -> AlgebraNode {
    let combinations = mapping.combinations();
    Expander {
        mapping,
        combinations: &combinations,
    }
    .expand(node, None)
}

struct Expander<'m> {
    mapping: &'m Mapping,
    combinations: &'m [MappingCombination],
}

impl Expander<'_> {
    fn expand(&self, node: &AlgebraNode, graph: Option<&TermPattern>) -> AlgebraNode {
        let boxed = |inner: &AlgebraNode| Box::new(self.expand(inner, graph));
        match node {
            AlgebraNode::Empty | AlgebraNode::NotMatching | AlgebraNode::Restricted(_) => {
                node.clone()
            }
            AlgebraNode::TriplePattern(pattern) => self.expand_pattern(pattern, graph),
            AlgebraNode::Graph { name, inner } => self.expand(inner, Some(name)),
            AlgebraNode::Join(nodes) => {
                AlgebraNode::Join(nodes.iter().map(|n| self.expand(n, graph)).collect())
            }
            AlgebraNode::Union(nodes) => {
                AlgebraNode::Union(nodes.iter().map(|n| self.expand(n, graph)).collect())
            }
            AlgebraNode::LeftJoin {
                left,
                right,
                expression,
            } => AlgebraNode::LeftJoin {
                left: boxed(left),
                right: boxed(right),
                expression: expression.clone(),
            },
            AlgebraNode::Minus { left, right } => AlgebraNode::Minus {
                left: boxed(left),
                right: boxed(right),
            },
            AlgebraNode::Filter { expression, inner } => AlgebraNode::Filter {
                expression: expression.clone(),
                inner: boxed(inner),
            },
            AlgebraNode::Extend {
                inner,
                variable,
                expression,
            } => AlgebraNode::Extend {
                inner: boxed(inner),
                variable: variable.clone(),
                expression: expression.clone(),
            },
            AlgebraNode::Project { inner, variables } => AlgebraNode::Project {
                inner: boxed(inner),
                variables: variables.clone(),
            },
            AlgebraNode::OrderBy { inner, conditions } => AlgebraNode::OrderBy {
                inner: boxed(inner),
                conditions: conditions.clone(),
            },
            AlgebraNode::Slice {
                inner,
                offset,
                limit,
            } => AlgebraNode::Slice {
                inner: boxed(inner),
                offset: *offset,
                limit: *limit,
            },
            AlgebraNode::Distinct(inner) => AlgebraNode::Distinct(boxed(inner)),
        }
    }

    fn expand_pattern(&self, pattern: &TriplePattern, graph: Option<&TermPattern>) -> AlgebraNode {
        let mut restricted: Vec<AlgebraNode> = self
            .combinations
            .iter()
            .filter(|c| self.may_match(pattern, graph, c))
            .map(|c| {
                AlgebraNode::Restricted(RestrictedTriplePattern {
                    pattern: pattern.clone(),
                    graph: graph.cloned(),
                    combination: *c,
                })
            })
            .collect();
        match restricted.len() {
            0 => AlgebraNode::NotMatching,
            1 => restricted.remove(0),
            _ => AlgebraNode::Union(restricted),
        }
    }

    fn may_match(
        &self,
        pattern: &TriplePattern,
        graph: Option<&TermPattern>,
        combination: &MappingCombination,
    ) -> bool {
        let resolved = match self.mapping.resolve(combination) {
            Some(r) => r,
            None => return false,
        };
        if !position_may_match(resolved.subject, &pattern.subject)
            || !position_may_match(resolved.predicate, &pattern.predicate)
        {
            return false;
        }
        let object_ok = match resolved.object {
            ResolvedObject::Term(term_map) => position_may_match(term_map, &pattern.object),
            ResolvedObject::Reference { parent, .. } => {
                position_may_match(&parent.subject_map.term_map, &pattern.object)
            }
        };
        if !object_ok {
            return false;
        }
        match graph {
            // The default graph is the union of all graphs.
            None => true,
            Some(graph) => match resolved.graph {
                None => false,
                Some(graph_map) if is_default_graph(graph_map) => false,
                Some(graph_map) => position_may_match(graph_map, graph),
            },
        }
    }
}

fn is_default_graph(graph_map: &TermMap) -> bool {
    matches!(
        graph_map.constant_term(),
        Some(RdfTerm::NamedNode(n)) if n.as_str() == vocab::R2RML_DEFAULT_GRAPH
    )
}

fn position_may_match(term_map: &TermMap, pattern: &TermPattern) -> bool {
    match pattern {
        TermPattern::Variable(_) => true,
        TermPattern::Term(term) => term_map_may_produce(term_map, term),
    }
}

/// False only if `term_map` provably never produces `term`
pub fn term_map_may_produce(term_map: &TermMap, term: &RdfTerm) -> bool {
    if term.kind() != term_map.term_kind {
        return false;
    }
    if let Some(constant) = term_map.constant_term() {
        return &constant == term;
    }
    if let RdfTerm::Literal(literal) = term {
        match (literal.language(), term_map.language.as_deref()) {
            (Some(a), Some(b)) if !a.eq_ignore_ascii_case(b) => return false,
            (Some(_), None) | (None, Some(_)) => return false,
            (Some(_), Some(_)) => {}
            (None, None) => {
                let datatype = literal.datatype();
                let datatype_ok = match (&term_map.datatype, &term_map.valuation) {
                    (Some(declared), _) => declared == datatype,
                    (None, TermValuation::Template(_)) => datatype == xsd::STRING,
                    (None, _) => NATURAL_DATATYPES.contains(&datatype),
                };
                if !datatype_ok {
                    return false;
                }
            }
        }
    }
    match &term_map.valuation {
        TermValuation::Template(template) => {
            let escaped = term_map.term_kind == TermKind::Iri;
            let text = term.lexical();
            if template.can_produce(text, escaped) {
                return true;
            }
            // Relative IRIs are resolved against the base IRI.
            match (&term_map.base_iri, escaped) {
                (Some(base), true) => text
                    .strip_prefix(base.as_str())
                    .map_or(false, |rest| template.can_produce(rest, true)),
                _ => false,
            }
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{
        LogicalTable, ObjectMap, PredicateObjectMap, SubjectMap, TriplesMap,
    };
    use crate::rdf::Literal;

    fn mapping() -> Mapping {
        let people = TriplesMap::new(
            "people",
            LogicalTable::Table("people".to_string()),
            SubjectMap::new(TermMap::template("http://s.com/{id}", TermKind::Iri).unwrap())
                .with_class("http://ex.org/Person"),
        )
        .with_predicate_object_map(PredicateObjectMap::new(
            TermMap::constant_iri("http://ex.org/name"),
            ObjectMap::Term(TermMap::column("name", TermKind::Literal)),
        ))
        .with_predicate_object_map(
            PredicateObjectMap::new(
                TermMap::constant_iri("http://ex.org/age"),
                ObjectMap::Term(
                    TermMap::column("age", TermKind::Literal).with_datatype(xsd::INTEGER),
                ),
            )
            .with_graph(TermMap::constant_iri("http://g.com/ages")),
        );
        Mapping::new(vec![people]).unwrap()
    }

    fn triple(s: TermPattern, p: TermPattern, o: TermPattern) -> AlgebraNode {
        AlgebraNode::TriplePattern(TriplePattern::new(s, p, o))
    }

    fn count_restricted(node: &AlgebraNode) -> usize {
        match node {
            AlgebraNode::Restricted(_) => 1,
            AlgebraNode::Union(nodes) => nodes.iter().map(count_restricted).sum(),
            _ => 0,
        }
    }

    #[test]
    fn test_constant_predicate_prunes_other_predicates() {
        let m = mapping();
        let node = triple(
            TermPattern::var("s"),
            TermPattern::iri("http://ex.org/name"),
            TermPattern::var("o"),
        );
        match expand(&node, &m) {
            AlgebraNode::Restricted(r) => {
                let resolved = m.resolve(&r.combination).unwrap();
                assert_eq!(
                    resolved.predicate.constant_term(),
                    Some(RdfTerm::iri("http://ex.org/name").unwrap())
                );
            }
            other => panic!("Expected one restricted pattern, got {}", other),
        }
    }

    #[test]
    fn test_unknown_predicate_is_not_matching() {
        let node = triple(
            TermPattern::var("s"),
            TermPattern::iri("http://ex.org/unknown"),
            TermPattern::var("o"),
        );
        assert_eq!(expand(&node, &mapping()), AlgebraNode::NotMatching);
    }

    #[test]
    fn test_variable_predicate_keeps_all() {
        let node = triple(
            TermPattern::var("s"),
            TermPattern::var("p"),
            TermPattern::var("o"),
        );
        assert_eq!(count_restricted(&expand(&node, &mapping())), 3);
    }

    #[test]
    fn test_template_prefix_mismatch() {
        let node = triple(
            TermPattern::iri("http://x.com/1"),
            TermPattern::var("p"),
            TermPattern::var("o"),
        );
        assert_eq!(expand(&node, &mapping()), AlgebraNode::NotMatching);
        let node = triple(
            TermPattern::iri("http://s.com/1"),
            TermPattern::var("p"),
            TermPattern::var("o"),
        );
        assert_eq!(count_restricted(&expand(&node, &mapping())), 3);
    }

    #[test]
    fn test_literal_datatype_mismatch() {
        let typed = RdfTerm::Literal(Literal::new_typed_literal(
            "12",
            crate::rdf::NamedNode::new(xsd::INTEGER).unwrap(),
        ));
        let node = triple(
            TermPattern::var("s"),
            TermPattern::var("p"),
            TermPattern::Term(typed),
        );
        // name has no declared datatype but may be an integer column
        assert_eq!(count_restricted(&expand(&node, &mapping())), 2);

        let tagged = RdfTerm::Literal(Literal::new_language_tagged_literal("x", "en").unwrap());
        let node = triple(
            TermPattern::var("s"),
            TermPattern::var("p"),
            TermPattern::Term(tagged),
        );
        assert_eq!(expand(&node, &mapping()), AlgebraNode::NotMatching);
    }

    #[test]
    fn test_graph_context() {
        let inner = triple(
            TermPattern::var("s"),
            TermPattern::var("p"),
            TermPattern::var("o"),
        );
        let named = AlgebraNode::Graph {
            name: TermPattern::var("g"),
            inner: Box::new(inner.clone()),
        };
        match expand(&named, &mapping()) {
            AlgebraNode::Restricted(r) => {
                assert_eq!(r.graph, Some(TermPattern::var("g")));
            }
            other => panic!("Expected one restricted pattern, got {}", other),
        }
        let other_graph = AlgebraNode::Graph {
            name: TermPattern::iri("http://g.com/other"),
            inner: Box::new(inner),
        };
        assert_eq!(expand(&other_graph, &mapping()), AlgebraNode::NotMatching);
    }

    #[test]
    fn test_expansion_is_idempotent() {
        let node = AlgebraNode::join(
            triple(
                TermPattern::var("s"),
                TermPattern::var("p"),
                TermPattern::var("o"),
            ),
            triple(
                TermPattern::var("s"),
                TermPattern::iri("http://ex.org/name"),
                TermPattern::var("n"),
            ),
        );
        let once = expand(&node, &mapping());
        assert_eq!(expand(&once, &mapping()), once);
    }
}
