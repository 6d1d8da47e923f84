//! Dead-branch elimination
//!
//! Union branches and left-join models that can never produce a row are
//! dropped. Their variables are null on every row afterwards, so references
//! to them become null constants and binders reading them become empty.

use super::Pass;
use crate::calculus::rewrite::{
    rewrite_all, rewrite_query, walk_binder, walk_condition, walk_expression, Rewriter,
};
use crate::calculus::{
    CalculusModel, CompareOp, Expression, FilterCondition, RelationalQuery, SourceCondition,
    SqlType, ValueBinder, VarId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use tracing::debug;

/// Dead-branch elimination pass
pub struct DeadBranchElimination;

impl Pass for DeadBranchElimination {
    fn name(&self) -> &'static str {
        "dead-branch elimination"
    }

    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery> {
        let mut base = query.model.base.clone();
        let var_types = base.variable_types();
        let mut removed = FxHashSet::default();
        if !prune_model(&mut base, &mut removed) {
            return Cow::Borrowed(query);
        }
        debug!("Pruned dead branches binding {} variables", removed.len());

        let mut pruned = query.clone();
        pruned.model.base = base;
        if removed.is_empty() {
            return Cow::Owned(pruned);
        }
        let nullifier = Nullifier {
            removed: &removed,
            var_types: &var_types,
        };
        let nullified = rewrite_query(&nullifier, &pruned).into_owned();
        Cow::Owned(nullified)
    }
}

/// Drop dead branches in a model and the scopes below it, collecting the
/// variables they bound. Returns true if anything was dropped.
fn prune_model(model: &mut CalculusModel, removed: &mut FxHashSet<VarId>) -> bool {
    let mut changed = false;
    let mut unsatisfiable = false;

    for source in &mut model.sources {
        match source {
            SourceCondition::UnionedSources { branches, .. } => {
                for branch in branches.iter_mut() {
                    changed |= prune_model(&mut branch.model, removed);
                }
                if branches.iter().all(|b| b.model.is_unsatisfiable()) {
                    unsatisfiable = true;
                    continue;
                }
                let before = branches.len();
                branches.retain(|b| {
                    if b.model.is_unsatisfiable() {
                        removed.extend(b.model.bound_variables());
                        false
                    } else {
                        true
                    }
                });
                changed |= branches.len() != before;
            }
            SourceCondition::LeftJoin { model, .. } => {
                changed |= prune_model(model, removed);
            }
            SourceCondition::TupleFromSource { .. } => {}
        }
    }

    let before = model.sources.len();
    model.sources.retain(|source| match source {
        SourceCondition::LeftJoin { model, condition }
            if model.is_unsatisfiable() || *condition == FilterCondition::AlwaysFalse =>
        {
            removed.extend(model.bound_variables());
            false
        }
        _ => true,
    });
    changed |= model.sources.len() != before;

    for filter in &mut model.filters {
        changed |= prune_condition(filter, removed);
    }

    if unsatisfiable && !model.is_unsatisfiable() {
        model.filters.push(FilterCondition::AlwaysFalse);
        changed = true;
    }
    changed
}

fn prune_condition(condition: &mut FilterCondition, removed: &mut FxHashSet<VarId>) -> bool {
    match condition {
        FilterCondition::NotExists(model) => prune_model(model, removed),
        FilterCondition::And(cs) | FilterCondition::Or(cs) => {
            let mut changed = false;
            for c in cs {
                changed |= prune_condition(c, removed);
            }
            changed
        }
        FilterCondition::Not(c) => prune_condition(c, removed),
        _ => false,
    }
}

/// Replaces references to variables of dropped branches by nulls
struct Nullifier<'r> {
    removed: &'r FxHashSet<VarId>,
    var_types: &'r FxHashMap<VarId, SqlType>,
}

impl Nullifier<'_> {
    fn null(&self, v: VarId) -> Expression {
        Expression::Null(self.var_types.get(&v).copied().unwrap_or(SqlType::String))
    }
}

impl Rewriter for Nullifier<'_> {
    fn rewrite_expression<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        match expression {
            Expression::Column { variable, .. } if self.removed.contains(variable) => {
                Cow::Owned(self.null(*variable))
            }
            _ => walk_expression(self, expression),
        }
    }

    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        match condition {
            FilterCondition::EqualVariables(a, b)
                if self.removed.contains(a) || self.removed.contains(b) =>
            {
                let side = |v: &VarId| {
                    if self.removed.contains(v) {
                        self.null(*v)
                    } else {
                        Expression::column(*v, self.var_types.get(v).copied().unwrap_or(SqlType::String))
                    }
                };
                Cow::Owned(FilterCondition::Comparison {
                    op: CompareOp::Eq,
                    left: side(a),
                    right: side(b),
                })
            }
            _ => walk_condition(self, condition),
        }
    }

    fn rewrite_binder<'a>(&self, binder: &'a ValueBinder) -> Cow<'a, ValueBinder> {
        match binder {
            ValueBinder::Base { columns, .. }
                if columns.values().any(|v| self.removed.contains(v)) =>
            {
                Cow::Owned(ValueBinder::Empty)
            }
            ValueBinder::Coalesce(alternatives) => {
                let walked = rewrite_all(alternatives, |a| self.rewrite_binder(a));
                let live: Vec<&ValueBinder> = walked
                    .iter()
                    .filter(|a| **a != ValueBinder::Empty)
                    .collect();
                if live.len() == walked.len() && matches!(walked, Cow::Borrowed(_)) {
                    return Cow::Borrowed(binder);
                }
                Cow::Owned(match live.as_slice() {
                    [] => ValueBinder::Empty,
                    [single] => (*single).clone(),
                    _ => ValueBinder::Coalesce(live.into_iter().cloned().collect()),
                })
            }
            ValueBinder::Switch {
                discriminator,
                cases,
            } => {
                if self.removed.contains(discriminator) {
                    return Cow::Owned(ValueBinder::Empty);
                }
                let walked = rewrite_all(cases, |entry| match self.rewrite_binder(&entry.1) {
                    Cow::Borrowed(_) => Cow::Borrowed(entry),
                    Cow::Owned(case) => Cow::Owned((entry.0, case)),
                });
                let live: Vec<(i64, ValueBinder)> = walked
                    .iter()
                    .filter(|(_, case)| *case != ValueBinder::Empty)
                    .cloned()
                    .collect();
                if live.len() == walked.len() && matches!(walked, Cow::Borrowed(_)) {
                    return Cow::Borrowed(binder);
                }
                Cow::Owned(if live.is_empty() {
                    ValueBinder::Empty
                } else {
                    ValueBinder::Switch {
                        discriminator: *discriminator,
                        cases: live,
                    }
                })
            }
            _ => walk_binder(self, binder),
        }
    }
}
