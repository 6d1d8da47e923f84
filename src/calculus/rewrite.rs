//! Shared rewrite traversal over calculus models
//!
//! Every rewrite returns `Cow::Borrowed` when nothing below the node changed,
//! so an ancestor of an unchanged subtree is never rebuilt and a pass can
//! tell whether it reached a fixpoint.

use super::binder::ValueBinder;
use super::expression::{CaseBranch, Expression, FilterCondition};
use super::model::{
    Assignment, CalculusModel, ModifiedModel, OrderKey, RelationalQuery, Source, SourceCondition,
    UnionBranch, VarId,
};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::borrow::Cow;

/// A bottom-up rewrite. Override the hooks for the node kinds a pass
/// changes and call the matching `walk_*` function to recurse.
pub trait Rewriter {
    fn rewrite_expression<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        walk_expression(self, expression)
    }

    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        walk_condition(self, condition)
    }

    fn rewrite_source<'a>(&self, source: &'a SourceCondition) -> Cow<'a, SourceCondition> {
        walk_source(self, source)
    }

    fn rewrite_model<'a>(&self, model: &'a CalculusModel) -> Cow<'a, CalculusModel> {
        walk_model(self, model)
    }

    fn rewrite_modified<'a>(&self, model: &'a ModifiedModel) -> Cow<'a, ModifiedModel> {
        walk_modified(self, model)
    }

    fn rewrite_binder<'a>(&self, binder: &'a ValueBinder) -> Cow<'a, ValueBinder> {
        walk_binder(self, binder)
    }
}

/// Rewrite each item, copying the list only if some item changed
#[allow(clippy::ptr_arg)]
pub fn rewrite_all<'a, T: Clone>(
    items: &'a Vec<T>,
    mut f: impl FnMut(&'a T) -> Cow<'a, T>,
) -> Cow<'a, Vec<T>> {
    let mut out: Option<Vec<T>> = None;
    for (i, item) in items.iter().enumerate() {
        match f(item) {
            Cow::Borrowed(_) => {
                if let Some(out) = out.as_mut() {
                    out.push(item.clone());
                }
            }
            Cow::Owned(new) => {
                out.get_or_insert_with(|| items[..i].to_vec()).push(new);
            }
        }
    }
    match out {
        Some(v) => Cow::Owned(v),
        None => Cow::Borrowed(items),
    }
}

fn rebuild<'a, T: Clone, C: Clone>(
    original: &'a T,
    child: Cow<'_, C>,
    build: impl FnOnce(C) -> T,
) -> Cow<'a, T> {
    match child {
        Cow::Borrowed(_) => Cow::Borrowed(original),
        Cow::Owned(c) => Cow::Owned(build(c)),
    }
}

pub fn walk_expression<'a, R: Rewriter + ?Sized>(
    r: &R,
    expression: &'a Expression,
) -> Cow<'a, Expression> {
    match expression {
        Expression::Column { .. } | Expression::Constant(_) | Expression::Null(_) => {
            Cow::Borrowed(expression)
        }
        Expression::Concat(parts) => rebuild(
            expression,
            rewrite_all(parts, |p| r.rewrite_expression(p)),
            Expression::Concat,
        ),
        Expression::Coalesce(parts) => rebuild(
            expression,
            rewrite_all(parts, |p| r.rewrite_expression(p)),
            Expression::Coalesce,
        ),
        Expression::Case { branches, sql_type } => rebuild(
            expression,
            rewrite_all(branches, |b| {
                let condition = r.rewrite_condition(&b.condition);
                let value = r.rewrite_expression(&b.value);
                if matches!((&condition, &value), (Cow::Borrowed(_), Cow::Borrowed(_))) {
                    Cow::Borrowed(b)
                } else {
                    Cow::Owned(CaseBranch {
                        condition: condition.into_owned(),
                        value: value.into_owned(),
                    })
                }
            }),
            |branches| Expression::Case {
                branches,
                sql_type: *sql_type,
            },
        ),
    }
}

pub fn walk_condition<'a, R: Rewriter + ?Sized>(
    r: &R,
    condition: &'a FilterCondition,
) -> Cow<'a, FilterCondition> {
    match condition {
        FilterCondition::AlwaysTrue
        | FilterCondition::AlwaysFalse
        | FilterCondition::EqualVariables(_, _) => Cow::Borrowed(condition),
        FilterCondition::And(cs) => rebuild(
            condition,
            rewrite_all(cs, |c| r.rewrite_condition(c)),
            FilterCondition::And,
        ),
        FilterCondition::Or(cs) => rebuild(
            condition,
            rewrite_all(cs, |c| r.rewrite_condition(c)),
            FilterCondition::Or,
        ),
        FilterCondition::Not(c) => rebuild(condition, r.rewrite_condition(c), |c| {
            FilterCondition::Not(Box::new(c))
        }),
        FilterCondition::Comparison { op, left, right } => {
            let l = r.rewrite_expression(left);
            let rr = r.rewrite_expression(right);
            if matches!((&l, &rr), (Cow::Borrowed(_), Cow::Borrowed(_))) {
                Cow::Borrowed(condition)
            } else {
                Cow::Owned(FilterCondition::Comparison {
                    op: *op,
                    left: l.into_owned(),
                    right: rr.into_owned(),
                })
            }
        }
        FilterCondition::IsNull(e) => {
            rebuild(condition, r.rewrite_expression(e), FilterCondition::IsNull)
        }
        FilterCondition::NotExists(model) => rebuild(condition, r.rewrite_model(model), |m| {
            FilterCondition::NotExists(Box::new(m))
        }),
    }
}

pub fn walk_source<'a, R: Rewriter + ?Sized>(
    r: &R,
    source: &'a SourceCondition,
) -> Cow<'a, SourceCondition> {
    match source {
        SourceCondition::TupleFromSource {
            source: Source::Model(inner),
            bindings,
        } => rebuild(source, r.rewrite_modified(inner), |m| {
            SourceCondition::TupleFromSource {
                source: Source::Model(Box::new(m)),
                bindings: bindings.clone(),
            }
        }),
        SourceCondition::TupleFromSource { .. } => Cow::Borrowed(source),
        SourceCondition::UnionedSources {
            discriminator,
            branches,
        } => rebuild(
            source,
            rewrite_all(branches, |b| {
                rebuild(b, r.rewrite_model(&b.model), |model| UnionBranch {
                    tag: b.tag,
                    model,
                })
            }),
            |branches| SourceCondition::UnionedSources {
                discriminator: *discriminator,
                branches,
            },
        ),
        SourceCondition::LeftJoin { model, condition } => {
            let m = r.rewrite_model(model);
            let c = r.rewrite_condition(condition);
            if matches!((&m, &c), (Cow::Borrowed(_), Cow::Borrowed(_))) {
                Cow::Borrowed(source)
            } else {
                Cow::Owned(SourceCondition::LeftJoin {
                    model: Box::new(m.into_owned()),
                    condition: c.into_owned(),
                })
            }
        }
    }
}

pub fn walk_model<'a, R: Rewriter + ?Sized>(
    r: &R,
    model: &'a CalculusModel,
) -> Cow<'a, CalculusModel> {
    let sources = rewrite_all(&model.sources, |s| r.rewrite_source(s));
    let filters = rewrite_all(&model.filters, |c| r.rewrite_condition(c));
    let assignments = rewrite_all(&model.assignments, |a| {
        rebuild(a, r.rewrite_expression(&a.expression), |expression| {
            Assignment {
                variable: a.variable,
                expression,
            }
        })
    });
    if matches!(
        (&sources, &filters, &assignments),
        (Cow::Borrowed(_), Cow::Borrowed(_), Cow::Borrowed(_))
    ) {
        return Cow::Borrowed(model);
    }
    Cow::Owned(CalculusModel {
        sources: sources.into_owned(),
        filters: filters.into_owned(),
        assignments: assignments.into_owned(),
    })
}

pub fn walk_modified<'a, R: Rewriter + ?Sized>(
    r: &R,
    model: &'a ModifiedModel,
) -> Cow<'a, ModifiedModel> {
    let base = r.rewrite_model(&model.base);
    let order = rewrite_all(&model.order, |k| {
        rebuild(k, r.rewrite_expression(&k.expression), |expression| OrderKey {
            expression,
            descending: k.descending,
        })
    });
    if matches!((&base, &order), (Cow::Borrowed(_), Cow::Borrowed(_))) {
        return Cow::Borrowed(model);
    }
    Cow::Owned(ModifiedModel {
        base: base.into_owned(),
        order: order.into_owned(),
        select: model.select.clone(),
        limit: model.limit,
        offset: model.offset,
        distinct: model.distinct,
    })
}

pub fn walk_binder<'a, R: Rewriter + ?Sized>(
    r: &R,
    binder: &'a ValueBinder,
) -> Cow<'a, ValueBinder> {
    match binder {
        ValueBinder::Base { .. } | ValueBinder::Empty => Cow::Borrowed(binder),
        ValueBinder::Coalesce(alternatives) => rebuild(
            binder,
            rewrite_all(alternatives, |a| r.rewrite_binder(a)),
            ValueBinder::Coalesce,
        ),
        ValueBinder::Switch {
            discriminator,
            cases,
        } => rebuild(
            binder,
            rewrite_all(cases, |entry| match r.rewrite_binder(&entry.1) {
                Cow::Borrowed(_) => Cow::Borrowed(entry),
                Cow::Owned(case) => Cow::Owned((entry.0, case)),
            }),
            |cases| ValueBinder::Switch {
                discriminator: *discriminator,
                cases,
            },
        ),
        ValueBinder::ExpressionSet(set) => {
            let mut changed = false;
            let mut new_set = set.clone();
            for component in new_set.components_mut() {
                if let Cow::Owned(e) = r.rewrite_expression(component) {
                    *component = e;
                    changed = true;
                }
            }
            if let Cow::Owned(c) = r.rewrite_condition(&set.is_not_error) {
                new_set.is_not_error = c;
                changed = true;
            }
            if changed {
                Cow::Owned(ValueBinder::ExpressionSet(new_set))
            } else {
                Cow::Borrowed(binder)
            }
        }
    }
}

/// Apply a rewriter to a whole query
pub fn rewrite_query<'a, R: Rewriter + ?Sized>(
    r: &R,
    query: &'a RelationalQuery,
) -> Cow<'a, RelationalQuery> {
    let model = r.rewrite_modified(&query.model);
    let mut binders: Option<IndexMap<String, ValueBinder>> = None;
    for (i, (name, binder)) in query.binders.iter().enumerate() {
        match r.rewrite_binder(binder) {
            Cow::Borrowed(_) => {
                if let Some(b) = binders.as_mut() {
                    b.insert(name.clone(), binder.clone());
                }
            }
            Cow::Owned(new) => {
                let b = binders.get_or_insert_with(|| {
                    query
                        .binders
                        .iter()
                        .take(i)
                        .map(|(n, b)| (n.clone(), b.clone()))
                        .collect::<IndexMap<_, _>>()
                });
                b.insert(name.clone(), new);
            }
        }
    }
    if matches!(model, Cow::Borrowed(_)) && binders.is_none() {
        return Cow::Borrowed(query);
    }
    Cow::Owned(RelationalQuery {
        model: model.into_owned(),
        binders: binders.unwrap_or_else(|| query.binders.clone()),
    })
}

/// Replaces variables everywhere they are referenced or bound
pub struct Renamer<'m> {
    pub renames: &'m FxHashMap<VarId, VarId>,
}

impl Renamer<'_> {
    fn var(&self, v: VarId) -> VarId {
        *self.renames.get(&v).unwrap_or(&v)
    }
}

impl Rewriter for Renamer<'_> {
    fn rewrite_expression<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        match expression {
            Expression::Column {
                variable,
                sql_type,
                escape_iri,
            } if self.renames.contains_key(variable) => Cow::Owned(Expression::Column {
                variable: self.var(*variable),
                sql_type: *sql_type,
                escape_iri: *escape_iri,
            }),
            _ => walk_expression(self, expression),
        }
    }

    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        match condition {
            FilterCondition::EqualVariables(a, b)
                if self.renames.contains_key(a) || self.renames.contains_key(b) =>
            {
                Cow::Owned(FilterCondition::EqualVariables(self.var(*a), self.var(*b)))
            }
            _ => walk_condition(self, condition),
        }
    }

    fn rewrite_source<'a>(&self, source: &'a SourceCondition) -> Cow<'a, SourceCondition> {
        let walked = walk_source(self, source);
        let renamed = |s: &SourceCondition| -> Option<SourceCondition> {
            match s {
                SourceCondition::TupleFromSource { source, bindings }
                    if bindings.iter().any(|b| self.renames.contains_key(&b.variable)) =>
                {
                    Some(SourceCondition::TupleFromSource {
                        source: source.clone(),
                        bindings: bindings
                            .iter()
                            .map(|b| {
                                let mut b = b.clone();
                                b.variable = self.var(b.variable);
                                b
                            })
                            .collect(),
                    })
                }
                SourceCondition::UnionedSources {
                    discriminator,
                    branches,
                } if self.renames.contains_key(discriminator) => {
                    Some(SourceCondition::UnionedSources {
                        discriminator: self.var(*discriminator),
                        branches: branches.clone(),
                    })
                }
                _ => None,
            }
        };
        match renamed(&walked) {
            Some(s) => Cow::Owned(s),
            None => walked,
        }
    }

    fn rewrite_model<'a>(&self, model: &'a CalculusModel) -> Cow<'a, CalculusModel> {
        let walked = walk_model(self, model);
        if walked
            .assignments
            .iter()
            .any(|a| self.renames.contains_key(&a.variable))
        {
            let mut m = walked.into_owned();
            for a in &mut m.assignments {
                a.variable = self.var(a.variable);
            }
            return Cow::Owned(m);
        }
        walked
    }

    fn rewrite_modified<'a>(&self, model: &'a ModifiedModel) -> Cow<'a, ModifiedModel> {
        let walked = walk_modified(self, model);
        if walked.select.iter().any(|v| self.renames.contains_key(v)) {
            let mut m = walked.into_owned();
            for v in &mut m.select {
                *v = self.var(*v);
            }
            let mut seen = rustc_hash::FxHashSet::default();
            m.select.retain(|v| seen.insert(*v));
            return Cow::Owned(m);
        }
        walked
    }

    fn rewrite_binder<'a>(&self, binder: &'a ValueBinder) -> Cow<'a, ValueBinder> {
        let mut touched = false;
        binder.for_each_variable(&mut |v| touched |= self.renames.contains_key(&v));
        if touched {
            Cow::Owned(binder.rename(self.renames))
        } else {
            Cow::Borrowed(binder)
        }
    }
}

/// Rename variables in an expression
pub fn rename_expression(expression: &Expression, renames: &FxHashMap<VarId, VarId>) -> Expression {
    Renamer { renames }.rewrite_expression(expression).into_owned()
}

/// Rename variables in a condition
pub fn rename_condition(
    condition: &FilterCondition,
    renames: &FxHashMap<VarId, VarId>,
) -> FilterCondition {
    Renamer { renames }.rewrite_condition(condition).into_owned()
}
