//! Self-join elimination
//!
//! Two tuples of the same table in one model whose primary key columns are
//! proven equal by the model's filters read the same row. The second tuple is
//! merged into the first and its variables are renamed throughout the query.
//! Nested model sources are separate scopes and are left alone.

use super::Pass;
use crate::calculus::rewrite::{rewrite_query, walk_condition, Renamer, Rewriter};
use crate::calculus::{
    CalculusModel, CompareOp, Expression, FilterCondition, ModifiedModel, RelationalQuery,
    Source, SourceCondition, SqlType, VarId,
};
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use tracing::debug;

/// Self-join elimination pass
pub struct SelfJoinElimination;

impl Pass for SelfJoinElimination {
    fn name(&self) -> &'static str {
        "self-join elimination"
    }

    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery> {
        let mut base = query.model.base.clone();
        let mut renames = FxHashMap::default();
        merge_model(&mut base, &mut renames);
        if renames.is_empty() {
            return Cow::Borrowed(query);
        }
        debug!("Merged {} self-joined columns", renames.len());

        let merged = RelationalQuery {
            model: ModifiedModel {
                base,
                ..query.model.clone()
            },
            binders: query.binders.clone(),
        };
        let renamed = rewrite_query(&Renamer { renames: &renames }, &merged).into_owned();
        let var_types = renamed.model.base.variable_types();
        let cleaned = rewrite_query(&Reflexive { var_types: &var_types }, &renamed).into_owned();
        Cow::Owned(cleaned)
    }
}

/// Union-find over variables proven equal
#[derive(Debug, Clone, Default)]
struct Equalities {
    parent: FxHashMap<VarId, VarId>,
}

impl Equalities {
    fn find(&self, mut v: VarId) -> VarId {
        while let Some(&p) = self.parent.get(&v) {
            if p == v {
                break;
            }
            v = p;
        }
        v
    }

    fn union(&mut self, a: VarId, b: VarId) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }

    fn connected(&self, a: VarId, b: VarId) -> bool {
        a == b || self.find(a) == self.find(b)
    }

    fn variables(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = self
            .parent
            .iter()
            .flat_map(|(a, b)| [*a, *b])
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Equalities that hold on every row where the condition holds
    fn of(condition: &FilterCondition) -> Self {
        let mut eq = Self::default();
        match condition {
            FilterCondition::EqualVariables(a, b) => eq.union(*a, *b),
            FilterCondition::Comparison {
                op: CompareOp::Eq,
                left:
                    Expression::Column {
                        variable: a,
                        sql_type: ta,
                        escape_iri: false,
                    },
                right:
                    Expression::Column {
                        variable: b,
                        sql_type: tb,
                        escape_iri: false,
                    },
            } if ta == tb => eq.union(*a, *b),
            FilterCondition::And(cs) => {
                for c in cs {
                    eq.absorb(&Self::of(c));
                }
            }
            FilterCondition::Or(cs) => {
                let alternatives: Vec<Self> = cs.iter().map(Self::of).collect();
                if let Some((first, rest)) = alternatives.split_first() {
                    let vars = first.variables();
                    for (i, a) in vars.iter().enumerate() {
                        for b in &vars[i + 1..] {
                            if first.connected(*a, *b) && rest.iter().all(|r| r.connected(*a, *b)) {
                                eq.union(*a, *b);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
        eq
    }

    fn absorb(&mut self, other: &Self) {
        for (a, b) in &other.parent {
            self.union(*a, *b);
        }
    }
}

/// Merge self-joins in a model and the scopes below it
fn merge_model(model: &mut CalculusModel, renames: &mut FxHashMap<VarId, VarId>) {
    for source in &mut model.sources {
        match source {
            SourceCondition::UnionedSources { branches, .. } => {
                for branch in branches {
                    merge_model(&mut branch.model, renames);
                }
            }
            SourceCondition::LeftJoin { model, .. } => merge_model(model, renames),
            SourceCondition::TupleFromSource { .. } => {}
        }
    }
    for filter in &mut model.filters {
        merge_condition(filter, renames);
    }

    let mut equalities = Equalities::default();
    for filter in &model.filters {
        equalities.absorb(&Equalities::of(filter));
    }

    let mut i = 0;
    while i < model.sources.len() {
        let mut j = i + 1;
        while j < model.sources.len() {
            if same_row(&model.sources[i], &model.sources[j], &equalities) {
                let removed = model.sources.remove(j);
                absorb_tuple(&mut model.sources[i], removed, renames);
            } else {
                j += 1;
            }
        }
        i += 1;
    }
}

fn merge_condition(condition: &mut FilterCondition, renames: &mut FxHashMap<VarId, VarId>) {
    match condition {
        FilterCondition::NotExists(model) => merge_model(model, renames),
        FilterCondition::And(cs) | FilterCondition::Or(cs) => {
            for c in cs {
                merge_condition(c, renames);
            }
        }
        FilterCondition::Not(c) => merge_condition(c, renames),
        _ => {}
    }
}

/// True if both tuples read the same keyed table and every key column is
/// proven equal
fn same_row(a: &SourceCondition, b: &SourceCondition, equalities: &Equalities) -> bool {
    let (
        SourceCondition::TupleFromSource {
            source:
                Source::Table {
                    name: table_a,
                    primary_key,
                },
            bindings: bindings_a,
        },
        SourceCondition::TupleFromSource {
            source: Source::Table { name: table_b, .. },
            bindings: bindings_b,
        },
    ) = (a, b)
    else {
        return false;
    };
    if table_a != table_b || primary_key.is_empty() {
        return false;
    }
    primary_key.iter().all(|column| {
        let va = bindings_a.iter().find(|b| &b.column == column);
        let vb = bindings_b.iter().find(|b| &b.column == column);
        match (va, vb) {
            (Some(va), Some(vb)) => equalities.connected(va.variable, vb.variable),
            _ => false,
        }
    })
}

/// Move the bindings of `removed` into `target`, renaming duplicated columns
fn absorb_tuple(
    target: &mut SourceCondition,
    removed: SourceCondition,
    renames: &mut FxHashMap<VarId, VarId>,
) {
    let (
        SourceCondition::TupleFromSource {
            bindings: target_bindings,
            ..
        },
        SourceCondition::TupleFromSource { bindings, .. },
    ) = (target, removed)
    else {
        return;
    };
    for binding in bindings {
        match target_bindings.iter().find(|b| b.column == binding.column) {
            Some(existing) => {
                renames.insert(binding.variable, existing.variable);
            }
            None => target_bindings.push(binding),
        }
    }
}

/// `v = v` after renaming only says that `v` is not null
struct Reflexive<'t> {
    var_types: &'t FxHashMap<VarId, SqlType>,
}

impl Rewriter for Reflexive<'_> {
    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        let reflexive = match condition {
            FilterCondition::EqualVariables(a, b) if a == b => Some(*a),
            FilterCondition::Comparison {
                op: CompareOp::Eq,
                left:
                    Expression::Column {
                        variable: a,
                        escape_iri: false,
                        ..
                    },
                right:
                    Expression::Column {
                        variable: b,
                        escape_iri: false,
                        ..
                    },
            } if a == b => Some(*a),
            _ => None,
        };
        match reflexive {
            Some(v) => {
                let sql_type = self.var_types.get(&v).copied().unwrap_or(SqlType::String);
                Cow::Owned(FilterCondition::not_null(Expression::column(v, sql_type)))
            }
            None => walk_condition(self, condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculus::{ColumnBinding, ValueBinder};
    use crate::mapping::TermMap;
    use crate::rdf::TermKind;
    use indexmap::IndexMap;

    fn tuple(table: &str, key: &[&str], columns: &[(&str, usize)]) -> SourceCondition {
        SourceCondition::TupleFromSource {
            source: Source::Table {
                name: table.to_string(),
                primary_key: key.iter().map(|k| k.to_string()).collect(),
            },
            bindings: columns
                .iter()
                .map(|(c, v)| ColumnBinding {
                    variable: VarId(*v),
                    column: c.to_string(),
                    sql_type: SqlType::String,
                    nullable: false,
                })
                .collect(),
        }
    }

    fn query(sources: Vec<SourceCondition>, filters: Vec<FilterCondition>) -> RelationalQuery {
        let mut columns = IndexMap::new();
        columns.insert("col2".to_string(), VarId(3));
        let mut binders = IndexMap::new();
        binders.insert(
            "o".to_string(),
            ValueBinder::base(TermMap::column("col2", TermKind::Literal), columns),
        );
        RelationalQuery {
            model: ModifiedModel::new(CalculusModel {
                sources,
                filters,
                assignments: Vec::new(),
            }),
            binders,
        }
    }

    #[test]
    fn test_key_equal_tuples_merge() {
        let q = query(
            vec![
                tuple("dummy", &["col1"], &[("col1", 0), ("col2", 1)]),
                tuple("dummy", &["col1"], &[("col1", 2), ("col2", 3)]),
            ],
            vec![FilterCondition::EqualVariables(VarId(0), VarId(2))],
        );
        let out = SelfJoinElimination.apply(&q).into_owned();
        assert_eq!(out.model.base.sources.len(), 1);
        // v3 now reads v1
        assert_eq!(out.binders["o"].variables(), vec![VarId(1)]);
        assert_eq!(
            out.model.base.filters,
            vec![FilterCondition::not_null(Expression::column(
                VarId(0),
                SqlType::String
            ))]
        );
        assert!(out.unbound_references().is_empty());
        assert!(matches!(SelfJoinElimination.apply(&out), Cow::Borrowed(_)));
    }

    #[test]
    fn test_non_key_equality_does_not_merge() {
        let q = query(
            vec![
                tuple("dummy", &["col1"], &[("col1", 0), ("col2", 1)]),
                tuple("dummy", &["col1"], &[("col1", 2), ("col2", 3)]),
            ],
            vec![FilterCondition::EqualVariables(VarId(1), VarId(3))],
        );
        assert!(matches!(SelfJoinElimination.apply(&q), Cow::Borrowed(_)));
    }

    #[test]
    fn test_table_without_key_does_not_merge() {
        let q = query(
            vec![
                tuple("dummy", &[], &[("col1", 0), ("col2", 1)]),
                tuple("dummy", &[], &[("col1", 2), ("col2", 3)]),
            ],
            vec![FilterCondition::EqualVariables(VarId(0), VarId(2))],
        );
        assert!(matches!(SelfJoinElimination.apply(&q), Cow::Borrowed(_)));
    }

    #[test]
    fn test_disjunction_needs_equality_in_every_branch() {
        let both = FilterCondition::Or(vec![
            FilterCondition::And(vec![
                FilterCondition::EqualVariables(VarId(0), VarId(2)),
                FilterCondition::IsNull(Expression::column(VarId(1), SqlType::String)),
            ]),
            FilterCondition::EqualVariables(VarId(0), VarId(2)),
        ]);
        assert!(Equalities::of(&both).connected(VarId(0), VarId(2)));
        let one = FilterCondition::Or(vec![
            FilterCondition::EqualVariables(VarId(0), VarId(2)),
            FilterCondition::IsNull(Expression::column(VarId(1), SqlType::String)),
        ]);
        assert!(!Equalities::of(&one).connected(VarId(0), VarId(2)));
    }

    #[test]
    fn test_transitive_key_equality() {
        let eq = Equalities::of(&FilterCondition::And(vec![
            FilterCondition::EqualVariables(VarId(0), VarId(5)),
            FilterCondition::EqualVariables(VarId(5), VarId(2)),
        ]));
        assert!(eq.connected(VarId(0), VarId(2)));
    }
}
