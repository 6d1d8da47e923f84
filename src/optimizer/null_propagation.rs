//! Null propagation
//!
//! Collects which variables are provably non-null (non-nullable columns,
//! union discriminators, `IS NOT NULL` and comparison filters) or provably
//! null (`IS NULL` filters) and simplifies null tests, coalesce expressions
//! and binders with them.
//!
//! Facts learned from a model's filters are used inside the model's sources
//! and by the binders, but never to simplify those same filters. Facts about
//! the variables a scope binds itself never flow into that scope.

use super::Pass;
use crate::calculus::rewrite::{
    rewrite_all, walk_binder, walk_condition, walk_expression, walk_source, Rewriter,
};
use crate::calculus::{
    Assignment, CalculusModel, Expression, FilterCondition, RelationalQuery, Source,
    SourceCondition, ValueBinder, VarId,
};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::borrow::Cow;

/// Null propagation pass
pub struct NullPropagation;

impl Pass for NullPropagation {
    fn name(&self) -> &'static str {
        "null propagation"
    }

    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery> {
        let model = Propagator::default().rewrite_modified(&query.model);

        let base = &query.model.base;
        let mut facts = Facts::default();
        facts.learn_sources(base);
        facts.learn_filters(&base.filters);
        let top = Propagator { facts };

        let mut binders: Option<IndexMap<String, ValueBinder>> = None;
        for (i, (name, binder)) in query.binders.iter().enumerate() {
            match top.rewrite_binder(binder) {
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
                            .collect()
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
}

/// Variables known to be null or non-null on every row of a scope
#[derive(Debug, Clone, Default)]
struct Facts {
    not_null: FxHashSet<VarId>,
    null: FxHashSet<VarId>,
}

impl Facts {
    /// Facts that stay valid inside a scope binding `bound`
    fn without(&self, bound: &[VarId]) -> Self {
        let mut facts = self.clone();
        for v in bound {
            facts.not_null.remove(v);
            facts.null.remove(v);
        }
        facts
    }

    /// Facts every row of the model's sources satisfies
    fn learn_sources(&mut self, model: &CalculusModel) {
        for source in &model.sources {
            match source {
                SourceCondition::TupleFromSource {
                    source: Source::Table { .. } | Source::SqlQuery(_),
                    bindings,
                } => {
                    self.not_null
                        .extend(bindings.iter().filter(|b| !b.nullable).map(|b| b.variable));
                }
                SourceCondition::UnionedSources { discriminator, .. } => {
                    self.not_null.insert(*discriminator);
                }
                _ => {}
            }
        }
        for assignment in &model.assignments {
            match assignment.expression {
                Expression::Constant(_) => {
                    self.not_null.insert(assignment.variable);
                }
                Expression::Null(_) => {
                    self.null.insert(assignment.variable);
                }
                _ => {}
            }
        }
    }

    /// Facts every row passing the conjunction of `filters` satisfies
    fn learn_filters(&mut self, filters: &[FilterCondition]) {
        for filter in filters {
            match filter {
                FilterCondition::And(cs) => self.learn_filters(cs),
                FilterCondition::Not(inner) => {
                    if let FilterCondition::IsNull(Expression::Column { variable, .. }) =
                        inner.as_ref()
                    {
                        self.not_null.insert(*variable);
                    }
                }
                FilterCondition::IsNull(Expression::Column { variable, .. }) => {
                    self.null.insert(*variable);
                }
                FilterCondition::EqualVariables(a, b) => {
                    self.not_null.insert(*a);
                    self.not_null.insert(*b);
                }
                // a comparison with a null operand is never true
                FilterCondition::Comparison { left, right, .. } => {
                    for operand in [left, right] {
                        if let Expression::Column { variable, .. } = operand {
                            self.not_null.insert(*variable);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

#[derive(Default)]
struct Propagator {
    facts: Facts,
}

impl Propagator {
    fn scoped(facts: Facts) -> Self {
        Self { facts }
    }
}

impl Rewriter for Propagator {
    fn rewrite_expression<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        match expression {
            Expression::Column { variable, .. } if self.facts.null.contains(variable) => {
                Cow::Owned(Expression::Null(expression.sql_type()))
            }
            Expression::Coalesce(_) => {
                let walked = walk_expression(self, expression);
                let truncated = match walked.as_ref() {
                    Expression::Coalesce(parts) => parts
                        .iter()
                        .position(|p| {
                            matches!(p, Expression::Column { variable, .. }
                                if self.facts.not_null.contains(variable))
                        })
                        .filter(|i| i + 1 < parts.len())
                        .map(|i| match i {
                            0 => parts[0].clone(),
                            _ => Expression::Coalesce(parts[..=i].to_vec()),
                        }),
                    _ => None,
                };
                match truncated {
                    Some(e) => Cow::Owned(e),
                    None => walked,
                }
            }
            _ => walk_expression(self, expression),
        }
    }

    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        match condition {
            FilterCondition::IsNull(Expression::Column { variable, .. }) => {
                if self.facts.not_null.contains(variable) {
                    Cow::Owned(FilterCondition::AlwaysFalse)
                } else if self.facts.null.contains(variable) {
                    Cow::Owned(FilterCondition::AlwaysTrue)
                } else {
                    Cow::Borrowed(condition)
                }
            }
            _ => walk_condition(self, condition),
        }
    }

    fn rewrite_source<'a>(&self, source: &'a SourceCondition) -> Cow<'a, SourceCondition> {
        match source {
            // a nested model is its own scope
            SourceCondition::TupleFromSource {
                source: Source::Model(inner),
                bindings,
            } => match Propagator::default().rewrite_modified(inner) {
                Cow::Borrowed(_) => Cow::Borrowed(source),
                Cow::Owned(m) => Cow::Owned(SourceCondition::TupleFromSource {
                    source: Source::Model(Box::new(m)),
                    bindings: bindings.clone(),
                }),
            },
            SourceCondition::LeftJoin { model, condition } => {
                let mut facts = self.facts.without(&model.bound_variables());
                facts.learn_sources(model);
                let m = self.rewrite_model(model);
                let c = Propagator::scoped(facts).rewrite_condition(condition);
                if matches!((&m, &c), (Cow::Borrowed(_), Cow::Borrowed(_))) {
                    Cow::Borrowed(source)
                } else {
                    Cow::Owned(SourceCondition::LeftJoin {
                        model: Box::new(m.into_owned()),
                        condition: c.into_owned(),
                    })
                }
            }
            _ => walk_source(self, source),
        }
    }

    fn rewrite_model<'a>(&self, model: &'a CalculusModel) -> Cow<'a, CalculusModel> {
        let mut local = self.facts.without(&model.bound_variables());
        local.learn_sources(model);
        let mut full = local.clone();
        full.learn_filters(&model.filters);
        let (local, inner) = (Propagator::scoped(local), Propagator::scoped(full));

        let sources = rewrite_all(&model.sources, |s| inner.rewrite_source(s));
        let filters = rewrite_all(&model.filters, |c| local.rewrite_condition(c));
        let assignments = rewrite_all(&model.assignments, |a| {
            match inner.rewrite_expression(&a.expression) {
                Cow::Borrowed(_) => Cow::Borrowed(a),
                Cow::Owned(expression) => Cow::Owned(Assignment {
                    variable: a.variable,
                    expression,
                }),
            }
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

    fn rewrite_binder<'a>(&self, binder: &'a ValueBinder) -> Cow<'a, ValueBinder> {
        match binder {
            ValueBinder::Base { columns, .. }
                if columns.values().any(|v| self.facts.null.contains(v)) =>
            {
                Cow::Owned(ValueBinder::Empty)
            }
            ValueBinder::Switch { discriminator, .. }
                if self.facts.null.contains(discriminator) =>
            {
                Cow::Owned(ValueBinder::Empty)
            }
            ValueBinder::Coalesce(alternatives) => {
                let walked = rewrite_all(alternatives, |a| self.rewrite_binder(a));
                let mut live: Vec<ValueBinder> = Vec::with_capacity(walked.len());
                for alternative in walked.iter() {
                    if *alternative == ValueBinder::Empty {
                        continue;
                    }
                    live.push(alternative.clone());
                    if alternative.is_always_bound(&self.facts.not_null) {
                        break;
                    }
                }
                if live.len() == alternatives.len() && matches!(walked, Cow::Borrowed(_)) {
                    return Cow::Borrowed(binder);
                }
                Cow::Owned(match live.len() {
                    0 => ValueBinder::Empty,
                    1 => live.remove(0),
                    _ => ValueBinder::Coalesce(live),
                })
            }
            _ => walk_binder(self, binder),
        }
    }
}
