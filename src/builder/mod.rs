//! Builder: translates optimized SPARQL algebra into the relational calculus
//!
//! Each algebra node becomes a [`BuiltPattern`]: a calculus model plus one
//! value binder per SPARQL variable in scope. Binders are combined
//! structurally (coalesce for joins, switch on a discriminator for unions and
//! optional parts) so the value of every variable can be rebuilt from a
//! result row.

mod expression;
mod pattern;

pub use expression::{
    compatible, guard_errors, materialize, term_equal, Condition, ExpressionTranslator,
};

use crate::calculus::{
    Assignment, CalculusModel, ColumnBinding, Expression, FilterCondition, ModifiedModel,
    OrderKey, RelationalQuery, Source, SourceCondition, SqlType, UnionBranch, ValueBinder, VarGen,
    VarId,
};
use crate::session::{SchemaError, Session};
use crate::sparql::{AlgebraNode, OrderCondition, SparqlExpression};
use expression::encode;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Translation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The input violated an invariant the optimizers establish
    #[error("Translation defect: {0}")]
    Defect(String),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// A translated algebra node
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPattern {
    pub model: CalculusModel,
    pub binders: IndexMap<String, ValueBinder>,
    /// Variables bound on every solution
    pub always_bound: BTreeSet<String>,
}

impl BuiltPattern {
    /// One solution with no bindings
    pub fn unit() -> Self {
        Self {
            model: CalculusModel::unit(),
            binders: IndexMap::new(),
            always_bound: BTreeSet::new(),
        }
    }

    /// No solutions
    pub fn unsatisfiable() -> Self {
        Self {
            model: CalculusModel::unsatisfiable(),
            ..Self::unit()
        }
    }
}

/// Modified model with the binders and always-bound set of its pattern
struct BuiltModified {
    model: ModifiedModel,
    binders: IndexMap<String, ValueBinder>,
    always_bound: BTreeSet<String>,
}

/// Algebra to calculus translator. One builder compiles one query; it owns
/// the query's variable generator.
pub struct Builder<'s> {
    session: &'s Session,
    vars: VarGen,
}

impl<'s> Builder<'s> {
    /// Create a new builder
    pub fn new(session: &'s Session) -> Self {
        Self {
            session,
            vars: VarGen::new(),
        }
    }

    /// Translate a query tree whose solutions are projected onto `output`
    pub fn build_query(
        &mut self,
        node: &AlgebraNode,
        output: &[String],
    ) -> BuildResult<RelationalQuery> {
        let built = self.build_modified(node)?;
        let binders = output
            .iter()
            .map(|name| {
                let binder = built
                    .binders
                    .get(name)
                    .cloned()
                    .unwrap_or(ValueBinder::Empty);
                (name.clone(), binder)
            })
            .collect();
        debug!(
            "Built relational query with {} table sources",
            built.model.base.reachable_table_sources()
        );
        Ok(RelationalQuery {
            model: built.model,
            binders,
        })
    }

    /// Translate one algebra node
    pub fn build(&mut self, node: &AlgebraNode) -> BuildResult<BuiltPattern> {
        match node {
            AlgebraNode::Empty => Ok(BuiltPattern::unit()),
            AlgebraNode::NotMatching => Ok(BuiltPattern::unsatisfiable()),
            AlgebraNode::TriplePattern(p) => Err(BuildError::Defect(format!(
                "unexpanded triple pattern {}",
                p
            ))),
            AlgebraNode::Graph { .. } => Err(BuildError::Defect(
                "GRAPH node left after expansion".to_string(),
            )),
            AlgebraNode::Restricted(r) => self.restricted(r),
            AlgebraNode::Join(nodes) => {
                let mut acc = BuiltPattern::unit();
                for node in nodes {
                    let right = self.build(node)?;
                    acc = self.join(acc, right)?;
                }
                Ok(acc)
            }
            AlgebraNode::LeftJoin {
                left,
                right,
                expression,
            } => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                self.left_join(left, right, expression.as_ref())
            }
            AlgebraNode::Union(nodes) => {
                let branches = nodes
                    .iter()
                    .map(|n| self.build(n))
                    .collect::<BuildResult<Vec<_>>>()?;
                Ok(self.union(branches))
            }
            AlgebraNode::Minus { left, right } => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                self.minus(left, right)
            }
            AlgebraNode::Filter { expression, inner } => {
                let mut built = self.build(inner)?;
                let var_types = built.model.variable_types();
                let condition = ExpressionTranslator::new(
                    &built.binders,
                    &var_types,
                    self.session.types(),
                )
                .condition(expression)?;
                built.model.filters.push(condition.holds);
                Ok(built)
            }
            AlgebraNode::Extend {
                inner,
                variable,
                expression,
            } => {
                let built = self.build(inner)?;
                self.extend(built, variable, expression)
            }
            AlgebraNode::Project { .. }
            | AlgebraNode::OrderBy { .. }
            | AlgebraNode::Slice { .. }
            | AlgebraNode::Distinct(_) => self.nested(node),
        }
    }

    fn join(&mut self, left: BuiltPattern, right: BuiltPattern) -> BuildResult<BuiltPattern> {
        let BuiltPattern {
            mut model,
            mut binders,
            mut always_bound,
        } = left;
        model.merge(right.model);
        let var_types = model.variable_types();
        let types = self.session.types();

        for (name, right_binder) in right.binders {
            let left_binder = match binders.get(&name) {
                Some(b) => b.clone(),
                None => {
                    binders.insert(name, right_binder);
                    continue;
                }
            };
            let left_always = always_bound.contains(&name);
            let right_always = right.always_bound.contains(&name);
            let a = encode(&left_binder, &var_types, types, &name)?;
            let b = encode(&right_binder, &var_types, types, &name)?;
            model.filters.push(if left_always && right_always {
                term_equal(&a, &b)
            } else {
                compatible(&a, &b)
            });
            let merged = if left_always {
                left_binder
            } else if right_always {
                right_binder
            } else {
                coalesce(left_binder, right_binder)
            };
            binders.insert(name, merged);
        }
        always_bound.extend(right.always_bound);
        Ok(BuiltPattern {
            model,
            binders,
            always_bound,
        })
    }

    fn left_join(
        &mut self,
        left: BuiltPattern,
        mut right: BuiltPattern,
        expression: Option<&SparqlExpression>,
    ) -> BuildResult<BuiltPattern> {
        let mut var_types = left.model.variable_types();
        var_types.extend(right.model.variable_types());
        let types = self.session.types();

        // Right binders that would read as bound on unmatched rows are
        // switched on a marker the right side sets
        let needs_marker = right.binders.iter().any(|(name, b)| {
            !b.is_column_guarded() && !left.always_bound.contains(name)
        });
        let marker = if needs_marker {
            let marker = self.vars.fresh();
            right.model.assignments.push(Assignment {
                variable: marker,
                expression: Expression::integer(1),
            });
            var_types.insert(marker, SqlType::Integer);
            Some(marker)
        } else {
            None
        };
        let guard = |binder: ValueBinder| match marker {
            Some(discriminator) if !binder.is_column_guarded() => ValueBinder::Switch {
                discriminator,
                cases: vec![(1, binder)],
            },
            _ => binder,
        };

        let mut conditions = Vec::new();
        let mut binders = left.binders.clone();
        // Binders of a matched row, for the left join expression
        let mut scope = left.binders.clone();
        for (name, right_binder) in &right.binders {
            match left.binders.get(name) {
                None => {
                    binders.insert(name.clone(), guard(right_binder.clone()));
                    scope.insert(name.clone(), right_binder.clone());
                }
                Some(left_binder) => {
                    let left_always = left.always_bound.contains(name);
                    let right_always = right.always_bound.contains(name);
                    let a = encode(left_binder, &var_types, types, name)?;
                    let b = encode(right_binder, &var_types, types, name)?;
                    conditions.push(if left_always && right_always {
                        term_equal(&a, &b)
                    } else {
                        compatible(&a, &b)
                    });
                    if !left_always {
                        binders.insert(
                            name.clone(),
                            coalesce(left_binder.clone(), guard(right_binder.clone())),
                        );
                        scope.insert(
                            name.clone(),
                            coalesce(left_binder.clone(), right_binder.clone()),
                        );
                    }
                }
            }
        }
        if let Some(expression) = expression {
            let condition =
                ExpressionTranslator::new(&scope, &var_types, types).condition(expression)?;
            conditions.push(condition.holds);
        }

        let mut model = left.model;
        model.sources.push(SourceCondition::LeftJoin {
            model: Box::new(right.model),
            condition: FilterCondition::and(conditions),
        });
        Ok(BuiltPattern {
            model,
            binders,
            always_bound: left.always_bound,
        })
    }

    fn union(&mut self, branches: Vec<BuiltPattern>) -> BuiltPattern {
        let discriminator = self.vars.fresh();
        let mut cases: IndexMap<String, Vec<(i64, ValueBinder)>> = IndexMap::new();
        let mut always_bound: Option<BTreeSet<String>> = None;
        let mut union_branches = Vec::with_capacity(branches.len());

        for (index, branch) in branches.into_iter().enumerate() {
            let tag = index as i64;
            for (name, binder) in branch.binders {
                cases.entry(name).or_default().push((tag, binder));
            }
            always_bound = Some(match always_bound {
                None => branch.always_bound,
                Some(acc) => acc
                    .intersection(&branch.always_bound)
                    .cloned()
                    .collect(),
            });
            union_branches.push(UnionBranch {
                tag,
                model: branch.model,
            });
        }

        let binders = cases
            .into_iter()
            .map(|(name, mut cases)| {
                let binder = if cases.iter().all(|(_, b)| b.is_column_guarded()) {
                    if cases.len() == 1 {
                        cases.remove(0).1
                    } else {
                        ValueBinder::Coalesce(cases.into_iter().map(|(_, b)| b).collect())
                    }
                } else {
                    ValueBinder::Switch {
                        discriminator,
                        cases,
                    }
                };
                (name, binder)
            })
            .collect();

        BuiltPattern {
            model: CalculusModel {
                sources: vec![SourceCondition::UnionedSources {
                    discriminator,
                    branches: union_branches,
                }],
                filters: Vec::new(),
                assignments: Vec::new(),
            },
            binders,
            always_bound: always_bound.unwrap_or_default(),
        }
    }

    fn minus(&mut self, left: BuiltPattern, right: BuiltPattern) -> BuildResult<BuiltPattern> {
        let shared: Vec<&String> = left
            .binders
            .keys()
            .filter(|name| right.binders.contains_key(*name))
            .collect();
        if shared.is_empty() {
            return Ok(left);
        }

        let mut var_types = left.model.variable_types();
        var_types.extend(right.model.variable_types());
        let types = self.session.types();
        let mut conditions = Vec::new();
        let mut overlap = Vec::new();
        for name in shared {
            let a = encode(&left.binders[name], &var_types, types, name)?;
            let b = encode(&right.binders[name], &var_types, types, name)?;
            conditions.push(compatible(&a, &b));
            overlap.push(FilterCondition::and(vec![a.is_bound(), b.is_bound()]));
        }
        conditions.push(FilterCondition::or(overlap));

        let mut excluded = right.model;
        excluded.filters.push(FilterCondition::and(conditions));
        let mut built = left;
        built
            .model
            .filters
            .push(FilterCondition::NotExists(Box::new(excluded)));
        Ok(built)
    }

    fn extend(
        &mut self,
        mut built: BuiltPattern,
        variable: &str,
        expression: &SparqlExpression,
    ) -> BuildResult<BuiltPattern> {
        if built.binders.contains_key(variable) {
            return Err(BuildError::Defect(format!(
                "BIND to already bound variable ?{}",
                variable
            )));
        }
        let var_types = built.model.variable_types();
        let set = ExpressionTranslator::new(&built.binders, &var_types, self.session.types())
            .term(expression)?;
        built.binders.insert(
            variable.to_string(),
            ValueBinder::ExpressionSet(guard_errors(set)),
        );
        Ok(built)
    }

    /// Peel the solution modifiers off a subtree
    fn build_modified(&mut self, node: &AlgebraNode) -> BuildResult<BuiltModified> {
        let mut node = node;
        let mut limit = None;
        let mut offset = 0;
        let mut distinct = false;
        let mut projection: Option<&[String]> = None;
        let mut order: Option<&[OrderCondition]> = None;

        if let AlgebraNode::Slice {
            inner,
            offset: o,
            limit: l,
        } = node
        {
            offset = *o as u64;
            limit = l.map(|l| l as u64);
            node = &**inner;
        }
        if let AlgebraNode::Distinct(inner) = node {
            distinct = true;
            node = &**inner;
        }
        if let AlgebraNode::Project { inner, variables } = node {
            projection = Some(variables.as_slice());
            node = &**inner;
        }
        if let AlgebraNode::OrderBy { inner, conditions } = node {
            order = Some(conditions.as_slice());
            node = &**inner;
        }

        let built = self.build(node)?;
        let mut model = ModifiedModel::new(built.model);
        model.limit = limit;
        model.offset = offset;
        model.distinct = distinct;

        if let Some(conditions) = order {
            let var_types = model.base.variable_types();
            let translator =
                ExpressionTranslator::new(&built.binders, &var_types, self.session.types());
            for condition in conditions {
                // errors sort like unbound values
                let set = guard_errors(translator.term(&condition.expression)?);
                // Kind first, then value within the kind
                for expression in [
                    set.category,
                    set.numeric,
                    set.datetime,
                    set.boolean,
                    set.string,
                ] {
                    model.order.push(OrderKey {
                        expression,
                        descending: condition.descending,
                    });
                }
            }
        }

        let (binders, always_bound) = match projection {
            Some(variables) => (
                variables
                    .iter()
                    .map(|name| {
                        let binder = built
                            .binders
                            .get(name)
                            .cloned()
                            .unwrap_or(ValueBinder::Empty);
                        (name.clone(), binder)
                    })
                    .collect(),
                built
                    .always_bound
                    .into_iter()
                    .filter(|name| variables.contains(name))
                    .collect(),
            ),
            None => (built.binders, built.always_bound),
        };
        Ok(BuiltModified {
            model,
            binders,
            always_bound,
        })
    }

    /// A modified subtree inside a larger pattern becomes a nested model
    /// source that re-exposes its binder variables under the same ids
    fn nested(&mut self, node: &AlgebraNode) -> BuildResult<BuiltPattern> {
        let BuiltModified {
            mut model,
            mut binders,
            always_bound,
        } = self.build_modified(node)?;

        // DISTINCT compares terms, so every computed binder is turned into
        // columns of its own before the select list is formed
        if model.distinct {
            let session = self.session;
            let var_types = model.base.variable_types();
            for (name, binder) in binders.iter_mut() {
                if matches!(binder, ValueBinder::Base { .. } | ValueBinder::Empty) {
                    continue;
                }
                let set = guard_errors(encode(binder, &var_types, session.types(), name)?);
                *binder = ValueBinder::ExpressionSet(materialize(
                    set,
                    &mut model.base,
                    &mut self.vars,
                ));
            }
        }

        let select = binder_variables(&binders);
        let var_types = model.base.variable_types();
        model.select = select.clone();
        let bindings = select
            .iter()
            .map(|v| ColumnBinding {
                variable: *v,
                column: v.column_name(),
                sql_type: var_types.get(v).copied().unwrap_or(SqlType::String),
                nullable: true,
            })
            .collect();
        Ok(BuiltPattern {
            model: CalculusModel {
                sources: vec![SourceCondition::TupleFromSource {
                    source: Source::Model(Box::new(model)),
                    bindings,
                }],
                filters: Vec::new(),
                assignments: Vec::new(),
            },
            binders,
            always_bound,
        })
    }
}

/// Sorted variables read by a set of binders
pub fn binder_variables(binders: &IndexMap<String, ValueBinder>) -> Vec<VarId> {
    let mut vars = Vec::new();
    for binder in binders.values() {
        binder.for_each_variable(&mut |v| vars.push(v));
    }
    vars.sort();
    vars.dedup();
    vars
}

/// Coalesce of two binders, flattening nested coalesces
fn coalesce(first: ValueBinder, second: ValueBinder) -> ValueBinder {
    let mut alternatives = Vec::new();
    for binder in [first, second] {
        match binder {
            ValueBinder::Coalesce(inner) => alternatives.extend(inner),
            other => alternatives.push(other),
        }
    }
    ValueBinder::Coalesce(alternatives)
}
