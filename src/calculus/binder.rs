//! Value binders: how one SPARQL variable is read back from a result row

use super::expression_set::ExpressionSet;
use super::model::VarId;
use super::types::{type_ids, SqlType, TypeKey, TypeRegistry, Value};
use super::Row;
use crate::mapping::TermMap;
use crate::rdf::{BlankNode, Literal, NamedNode, RdfTerm};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Reconstructs the RDF term of one SPARQL variable from a row
#[derive(Debug, Clone, PartialEq)]
pub enum ValueBinder {
    /// Term generated by a term map from column variables
    Base {
        term_map: TermMap,
        /// Column name to the variable holding its value
        columns: IndexMap<String, VarId>,
    },
    /// Always unbound
    Empty,
    /// First alternative producing a term wins
    Coalesce(Vec<ValueBinder>),
    /// The case whose tag equals the discriminator value; unbound if none
    Switch {
        discriminator: VarId,
        cases: Vec<(i64, ValueBinder)>,
    },
    /// Term encoded as an expression set
    ExpressionSet(ExpressionSet),
}

impl ValueBinder {
    /// Base binder over the given column variables
    pub fn base(term_map: TermMap, columns: IndexMap<String, VarId>) -> Self {
        ValueBinder::Base { term_map, columns }
    }

    /// Visit every variable the binder reads
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        match self {
            ValueBinder::Base { columns, .. } => {
                for v in columns.values() {
                    f(*v);
                }
            }
            ValueBinder::Empty => {}
            ValueBinder::Coalesce(alternatives) => {
                for a in alternatives {
                    a.for_each_variable(f);
                }
            }
            ValueBinder::Switch {
                discriminator,
                cases,
            } => {
                f(*discriminator);
                for (_, case) in cases {
                    case.for_each_variable(f);
                }
            }
            ValueBinder::ExpressionSet(set) => set.for_each_variable(f),
        }
    }

    /// Variables the binder reads, sorted and without duplicates
    pub fn variables(&self) -> Vec<VarId> {
        let mut vars = Vec::new();
        self.for_each_variable(&mut |v| vars.push(v));
        vars.sort();
        vars.dedup();
        vars
    }

    /// True if the binder reads as unbound whenever all the variables it
    /// reads are null. Only such binders can be combined with coalesce.
    pub fn is_column_guarded(&self) -> bool {
        match self {
            ValueBinder::Base { columns, .. } => !columns.is_empty(),
            ValueBinder::Empty => true,
            ValueBinder::Coalesce(alternatives) => alternatives.iter().all(|a| a.is_column_guarded()),
            ValueBinder::Switch { .. } => true,
            ValueBinder::ExpressionSet(set) => matches!(
                set.string,
                super::Expression::Column { .. } | super::Expression::Null(_)
            ),
        }
    }

    /// True if the binder is bound on every row where `not_null` variables
    /// are non-null
    pub fn is_always_bound(&self, not_null: &FxHashSet<VarId>) -> bool {
        match self {
            ValueBinder::Base { columns, .. } => columns.values().all(|v| not_null.contains(v)),
            ValueBinder::Empty => false,
            ValueBinder::Coalesce(alternatives) => {
                alternatives.iter().any(|a| a.is_always_bound(not_null))
            }
            ValueBinder::Switch { .. } | ValueBinder::ExpressionSet(_) => false,
        }
    }

    /// Replace variables according to `renames`
    pub fn rename(&self, renames: &FxHashMap<VarId, VarId>) -> Self {
        let r = |v: &VarId| *renames.get(v).unwrap_or(v);
        match self {
            ValueBinder::Base { term_map, columns } => ValueBinder::Base {
                term_map: term_map.clone(),
                columns: columns.iter().map(|(c, v)| (c.clone(), r(v))).collect(),
            },
            ValueBinder::Empty => ValueBinder::Empty,
            ValueBinder::Coalesce(alternatives) => {
                ValueBinder::Coalesce(alternatives.iter().map(|a| a.rename(renames)).collect())
            }
            ValueBinder::Switch {
                discriminator,
                cases,
            } => ValueBinder::Switch {
                discriminator: r(discriminator),
                cases: cases.iter().map(|(t, c)| (*t, c.rename(renames))).collect(),
            },
            ValueBinder::ExpressionSet(set) => {
                let mut set = set.clone();
                for component in set.components_mut() {
                    *component = super::rewrite::rename_expression(component, renames);
                }
                set.is_not_error = super::rewrite::rename_condition(&set.is_not_error, renames);
                ValueBinder::ExpressionSet(set)
            }
        }
    }

    /// Convert to an expression set. `None` if a base binder column has no
    /// variable, which is a translation defect.
    pub fn to_expression_set(
        &self,
        var_types: &FxHashMap<VarId, SqlType>,
        types: &TypeRegistry,
    ) -> Option<ExpressionSet> {
        match self {
            ValueBinder::Base { term_map, columns } => {
                ExpressionSet::from_term_map(term_map, columns, var_types, types)
            }
            ValueBinder::Empty => Some(ExpressionSet::unbound()),
            ValueBinder::Coalesce(alternatives) => {
                let sets = alternatives
                    .iter()
                    .map(|a| a.to_expression_set(var_types, types))
                    .collect::<Option<Vec<_>>>()?;
                Some(ExpressionSet::coalesce(sets))
            }
            ValueBinder::Switch {
                discriminator,
                cases,
            } => {
                let cases = cases
                    .iter()
                    .map(|(tag, c)| c.to_expression_set(var_types, types).map(|s| (*tag, s)))
                    .collect::<Option<Vec<_>>>()?;
                Some(ExpressionSet::switch(*discriminator, cases))
            }
            ValueBinder::ExpressionSet(set) => Some(set.clone()),
        }
    }

    /// Read the term from a row. Rows whose values cannot form a term are
    /// logged and read as unbound.
    pub fn read(&self, row: &Row, types: &TypeRegistry) -> Option<RdfTerm> {
        match self {
            ValueBinder::Base { term_map, columns } => {
                let lookup = |column: &str| columns.get(column).map(|v| row.get(*v));
                match term_map.generate(lookup) {
                    Ok(term) => term,
                    Err(e) => {
                        warn!("Cannot generate term from row: {}", e);
                        None
                    }
                }
            }
            ValueBinder::Empty => None,
            ValueBinder::Coalesce(alternatives) => {
                alternatives.iter().find_map(|a| a.read(row, types))
            }
            ValueBinder::Switch {
                discriminator,
                cases,
            } => match row.get(*discriminator) {
                Value::Integer(tag) => cases
                    .iter()
                    .find(|(t, _)| t == tag)
                    .and_then(|(_, c)| c.read(row, types)),
                _ => None,
            },
            ValueBinder::ExpressionSet(set) => read_expression_set(set, row, types),
        }
    }
}

fn read_expression_set(set: &ExpressionSet, row: &Row, types: &TypeRegistry) -> Option<RdfTerm> {
    let lexical = crate::eval::evaluate_expression(&set.string, row).ok()?.lexical()?;
    let type_id = match crate::eval::evaluate_expression(&set.type_id, row).ok()? {
        Value::Integer(id) => id,
        other => {
            warn!("Expression set type id is not an integer: {}", other);
            return None;
        }
    };
    let term = match types.key(type_id) {
        Some(TypeKey::Iri) => NamedNode::new(&lexical).map(RdfTerm::NamedNode),
        Some(TypeKey::BlankNode) => BlankNode::from_row_value(&lexical).map(RdfTerm::BlankNode),
        Some(TypeKey::SimpleLiteral) => Ok(RdfTerm::string(lexical)),
        Some(TypeKey::Datatype(dt)) => NamedNode::new(&dt)
            .map(|dt| RdfTerm::Literal(Literal::new_typed_literal(lexical, dt))),
        Some(TypeKey::Language(lang)) => {
            Literal::new_language_tagged_literal(lexical, lang).map(RdfTerm::Literal)
        }
        None => {
            warn!("Unknown type id {} in row", type_id);
            return None;
        }
    };
    match term {
        Ok(term) => Some(term),
        Err(e) => {
            if type_id == type_ids::IRI {
                warn!("Invalid IRI in row: {}", e);
            } else {
                warn!("Invalid term in row: {}", e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculus::types::TypeCategory;
    use crate::calculus::Expression;
    use crate::rdf::TermKind;

    fn template_binder() -> ValueBinder {
        let mut columns = IndexMap::new();
        columns.insert("col1".to_string(), VarId(0));
        ValueBinder::base(
            TermMap::template("http://s.com/{col1}", TermKind::Iri).unwrap(),
            columns,
        )
    }

    #[test]
    fn test_base_round_trip() {
        let types = TypeRegistry::new();
        let row = Row::from_pairs(vec![(VarId(0), Value::String("12".to_string()))]);
        assert_eq!(
            template_binder().read(&row, &types),
            Some(RdfTerm::iri("http://s.com/12").unwrap())
        );
        assert_eq!(template_binder().read(&Row::new(), &types), None);
    }

    #[test]
    fn test_coalesce_and_switch() {
        let types = TypeRegistry::new();
        let constant = ValueBinder::base(TermMap::constant_iri("http://c"), IndexMap::new());
        let coalesce = ValueBinder::Coalesce(vec![template_binder(), constant.clone()]);
        assert_eq!(
            coalesce.read(&Row::new(), &types),
            Some(RdfTerm::iri("http://c").unwrap())
        );

        let switch = ValueBinder::Switch {
            discriminator: VarId(9),
            cases: vec![(1, constant)],
        };
        assert_eq!(switch.read(&Row::new(), &types), None);
        let row = Row::from_pairs(vec![(VarId(9), Value::Integer(1))]);
        assert_eq!(
            switch.read(&row, &types),
            Some(RdfTerm::iri("http://c").unwrap())
        );
    }

    #[test]
    fn test_expression_set_readback_matches_base() {
        let types = TypeRegistry::new();
        let binder = template_binder();
        let mut var_types = FxHashMap::default();
        var_types.insert(VarId(0), SqlType::String);
        let set = binder.to_expression_set(&var_types, &types).unwrap();
        let as_set = ValueBinder::ExpressionSet(set);
        let row = Row::from_pairs(vec![(VarId(0), Value::String("a b".to_string()))]);
        assert_eq!(as_set.read(&row, &types), binder.read(&row, &types));
        assert_eq!(
            as_set.read(&row, &types),
            Some(RdfTerm::iri("http://s.com/a%20b").unwrap())
        );
    }

    #[test]
    fn test_guarded_binders() {
        assert!(template_binder().is_column_guarded());
        let constant = ValueBinder::base(TermMap::constant_iri("http://c"), IndexMap::new());
        assert!(!constant.is_column_guarded());
        let mut set = ExpressionSet::unbound();
        set.string = Expression::string("x");
        set.category = Expression::integer(TypeCategory::SimpleLiteral.code());
        assert!(!ValueBinder::ExpressionSet(set).is_column_guarded());
    }

    #[test]
    fn test_rename() {
        let mut renames = FxHashMap::default();
        renames.insert(VarId(0), VarId(5));
        assert_eq!(template_binder().rename(&renames).variables(), vec![VarId(5)]);
    }
}
