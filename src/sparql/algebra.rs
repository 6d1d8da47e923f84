//! SPARQL algebra
//!
//! Closed set of node kinds the compiler works on. Raw triple patterns and
//! `Graph` nodes only exist before triple-pattern expansion; afterwards every
//! leaf is `Empty`, `NotMatching` or a restricted triple pattern.

use super::expression::SparqlExpression;
use crate::mapping::MappingCombination;
use crate::rdf::RdfTerm;
use std::collections::BTreeSet;
use std::fmt;

/// A position of a triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TermPattern {
    Variable(String),
    Term(RdfTerm),
}

impl TermPattern {
    /// Variable pattern
    pub fn var(name: &str) -> Self {
        TermPattern::Variable(name.to_string())
    }

    /// IRI pattern. Panics on invalid IRIs, so only use with literals known
    /// to be valid.
    #[cfg(test)]
    pub fn iri(iri: &str) -> Self {
        TermPattern::Term(RdfTerm::iri(iri).expect("valid IRI"))
    }

    /// The variable name if this is a variable
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            TermPattern::Variable(v) => Some(v),
            TermPattern::Term(_) => None,
        }
    }
}

impl fmt::Display for TermPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermPattern::Variable(v) => write!(f, "?{}", v),
            TermPattern::Term(t) => write!(f, "{}", t),
        }
    }
}

/// A triple pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: TermPattern,
    pub predicate: TermPattern,
    pub object: TermPattern,
}

impl TriplePattern {
    /// Create a triple pattern
    pub fn new(subject: TermPattern, predicate: TermPattern, object: TermPattern) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// Variables in subject, predicate, object order
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(|p| p.as_variable())
    }
}

impl fmt::Display for TriplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// A triple pattern paired with the one mapping combination that produces
/// its matches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestrictedTriplePattern {
    pub pattern: TriplePattern,
    /// Graph term of the enclosing `GRAPH`, if any
    pub graph: Option<TermPattern>,
    pub combination: MappingCombination,
}

/// `ORDER BY` condition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderCondition {
    pub expression: SparqlExpression,
    pub descending: bool,
}

/// SPARQL algebra node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlgebraNode {
    /// One solution binding nothing (the join unit)
    Empty,
    /// No solutions
    NotMatching,
    TriplePattern(TriplePattern),
    Restricted(RestrictedTriplePattern),
    Join(Vec<AlgebraNode>),
    LeftJoin {
        left: Box<AlgebraNode>,
        right: Box<AlgebraNode>,
        expression: Option<SparqlExpression>,
    },
    Union(Vec<AlgebraNode>),
    Minus {
        left: Box<AlgebraNode>,
        right: Box<AlgebraNode>,
    },
    Filter {
        expression: SparqlExpression,
        inner: Box<AlgebraNode>,
    },
    Graph {
        name: TermPattern,
        inner: Box<AlgebraNode>,
    },
    /// `BIND(expression AS ?variable)`
    Extend {
        inner: Box<AlgebraNode>,
        variable: String,
        expression: SparqlExpression,
    },
    Project {
        inner: Box<AlgebraNode>,
        variables: Vec<String>,
    },
    OrderBy {
        inner: Box<AlgebraNode>,
        conditions: Vec<OrderCondition>,
    },
    Slice {
        inner: Box<AlgebraNode>,
        offset: usize,
        limit: Option<usize>,
    },
    Distinct(Box<AlgebraNode>),
}

impl AlgebraNode {
    /// Binary join
    pub fn join(left: AlgebraNode, right: AlgebraNode) -> Self {
        AlgebraNode::Join(vec![left, right])
    }

    /// Binary union
    pub fn union(left: AlgebraNode, right: AlgebraNode) -> Self {
        AlgebraNode::Union(vec![left, right])
    }

    /// Variables that may be bound by the node's solutions
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut out);
        out
    }

    fn collect_free(&self, out: &mut BTreeSet<String>) {
        match self {
            AlgebraNode::Empty | AlgebraNode::NotMatching => {}
            AlgebraNode::TriplePattern(p) => out.extend(p.variables().map(str::to_string)),
            AlgebraNode::Restricted(r) => {
                out.extend(r.pattern.variables().map(str::to_string));
                if let Some(TermPattern::Variable(g)) = &r.graph {
                    out.insert(g.clone());
                }
            }
            AlgebraNode::Join(nodes) | AlgebraNode::Union(nodes) => {
                for n in nodes {
                    n.collect_free(out);
                }
            }
            AlgebraNode::LeftJoin { left, right, .. } => {
                left.collect_free(out);
                right.collect_free(out);
            }
            AlgebraNode::Minus { left, .. } => left.collect_free(out),
            AlgebraNode::Filter { inner, .. }
            | AlgebraNode::OrderBy { inner, .. }
            | AlgebraNode::Slice { inner, .. }
            | AlgebraNode::Distinct(inner) => inner.collect_free(out),
            AlgebraNode::Graph { name, inner } => {
                if let TermPattern::Variable(g) = name {
                    out.insert(g.clone());
                }
                inner.collect_free(out);
            }
            AlgebraNode::Extend {
                inner, variable, ..
            } => {
                inner.collect_free(out);
                out.insert(variable.clone());
            }
            AlgebraNode::Project { inner, variables } => {
                let inner = inner.free_variables();
                out.extend(variables.iter().filter(|v| inner.contains(*v)).cloned());
            }
        }
    }

    /// Variables bound in every solution. Always a subset of
    /// [`free_variables`](Self::free_variables).
    pub fn always_bound_variables(&self) -> BTreeSet<String> {
        match self {
            AlgebraNode::Empty | AlgebraNode::NotMatching => BTreeSet::new(),
            AlgebraNode::TriplePattern(_) | AlgebraNode::Restricted(_) => self.free_variables(),
            AlgebraNode::Join(nodes) => nodes
                .iter()
                .flat_map(|n| n.always_bound_variables())
                .collect(),
            AlgebraNode::Union(nodes) => {
                let mut iter = nodes.iter().map(|n| n.always_bound_variables());
                let first = iter.next().unwrap_or_default();
                iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
            }
            AlgebraNode::LeftJoin { left, .. } | AlgebraNode::Minus { left, .. } => {
                left.always_bound_variables()
            }
            AlgebraNode::Filter { inner, .. }
            | AlgebraNode::OrderBy { inner, .. }
            | AlgebraNode::Slice { inner, .. }
            | AlgebraNode::Distinct(inner)
            | AlgebraNode::Extend { inner, .. } => inner.always_bound_variables(),
            AlgebraNode::Graph { name, inner } => {
                let mut out = inner.always_bound_variables();
                // Only the triple patterns inside bind the graph variable.
                if let (TermPattern::Variable(g), false) = (name, out.is_empty()) {
                    out.insert(g.clone());
                }
                out
            }
            AlgebraNode::Project { inner, variables } => {
                let inner = inner.always_bound_variables();
                variables
                    .iter()
                    .filter(|v| inner.contains(*v))
                    .cloned()
                    .collect()
            }
        }
    }
}

impl fmt::Display for AlgebraNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgebraNode::Empty => write!(f, "Empty"),
            AlgebraNode::NotMatching => write!(f, "NotMatching"),
            AlgebraNode::TriplePattern(p) => write!(f, "Triple({})", p),
            AlgebraNode::Restricted(r) => write!(
                f,
                "Restricted({} @ map {} pom {})",
                r.pattern, r.combination.triples_map, r.combination.predicate_object_map
            ),
            AlgebraNode::Join(nodes) => write_nodes(f, "Join", nodes),
            AlgebraNode::Union(nodes) => write_nodes(f, "Union", nodes),
            AlgebraNode::LeftJoin { left, right, .. } => {
                write!(f, "LeftJoin({}, {})", left, right)
            }
            AlgebraNode::Minus { left, right } => write!(f, "Minus({}, {})", left, right),
            AlgebraNode::Filter { expression, inner } => {
                write!(f, "Filter({}, {})", expression, inner)
            }
            AlgebraNode::Graph { name, inner } => write!(f, "Graph({}, {})", name, inner),
            AlgebraNode::Extend {
                inner,
                variable,
                expression,
            } => write!(f, "Extend({}, ?{} := {})", inner, variable, expression),
            AlgebraNode::Project { inner, variables } => {
                write!(f, "Project({:?}, {})", variables, inner)
            }
            AlgebraNode::OrderBy { inner, .. } => write!(f, "OrderBy({})", inner),
            AlgebraNode::Slice {
                inner,
                offset,
                limit,
            } => write!(f, "Slice({}, {:?}, {})", offset, limit, inner),
            AlgebraNode::Distinct(inner) => write!(f, "Distinct({})", inner),
        }
    }
}

fn write_nodes(f: &mut fmt::Formatter<'_>, name: &str, nodes: &[AlgebraNode]) -> fmt::Result {
    write!(f, "{}(", name)?;
    for (i, n) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", n)?;
    }
    write!(f, ")")
}
