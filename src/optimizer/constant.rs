//! Constant folding
//!
//! Evaluates comparisons between constants, simplifies expressions with
//! constant or null operands and normalizes boolean structure. A comparison
//! whose value is unknown (a null operand) is left alone, since its negation
//! is unknown too.

use super::Pass;
use crate::calculus::rewrite::{rewrite_query, walk_condition, walk_expression, walk_model, Rewriter};
use crate::calculus::{
    CalculusModel, CaseBranch, Expression, FilterCondition, RelationalQuery, SqlType, Value,
};
use crate::eval::{compare, Truth};
use std::borrow::Cow;

/// Constant folding pass
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant folding"
    }

    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery> {
        rewrite_query(&Folder, query)
    }
}

struct Folder;

impl Rewriter for Folder {
    fn rewrite_expression<'a>(&self, expression: &'a Expression) -> Cow<'a, Expression> {
        let walked = walk_expression(self, expression);
        match fold_expression(&walked) {
            Some(folded) => Cow::Owned(folded),
            None => walked,
        }
    }

    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        let walked = walk_condition(self, condition);
        match fold_condition(&walked) {
            Some(folded) => Cow::Owned(folded),
            None => walked,
        }
    }

    fn rewrite_model<'a>(&self, model: &'a CalculusModel) -> Cow<'a, CalculusModel> {
        let walked = walk_model(self, model);
        match normalize_filters(&walked.filters) {
            Some(filters) => {
                let mut model = walked.into_owned();
                model.filters = filters;
                Cow::Owned(model)
            }
            None => walked,
        }
    }
}

/// Simplified expression, or `None` if nothing applies
fn fold_expression(expression: &Expression) -> Option<Expression> {
    match expression {
        Expression::Concat(parts) => {
            let mut out: Vec<Expression> = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Expression::Null(_) => return Some(Expression::Null(SqlType::String)),
                    Expression::Concat(inner) => out.extend(inner.iter().cloned()),
                    Expression::Constant(value) => {
                        let text = value.lexical().unwrap_or_default();
                        match out.last_mut() {
                            Some(Expression::Constant(Value::String(previous))) => {
                                previous.push_str(&text)
                            }
                            _ => out.push(Expression::string(text)),
                        }
                    }
                    other => out.push(other.clone()),
                }
            }
            out.retain(|p| *p != Expression::string(""));
            let folded = match out.len() {
                0 => Expression::string(""),
                1 if out[0].sql_type() == SqlType::String => out.remove(0),
                _ => Expression::Concat(out),
            };
            (folded != *expression).then_some(folded)
        }
        Expression::Coalesce(parts) => {
            let sql_type = expression.sql_type();
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    Expression::Null(_) => {}
                    Expression::Constant(_) => {
                        out.push(part.clone());
                        break;
                    }
                    other => out.push(other.clone()),
                }
            }
            let folded = match out.len() {
                0 => Expression::Null(sql_type),
                1 => out.remove(0),
                _ => Expression::Coalesce(out),
            };
            (folded != *expression).then_some(folded)
        }
        Expression::Case { branches, sql_type } => {
            let mut out: Vec<CaseBranch> = Vec::with_capacity(branches.len());
            for branch in branches {
                match branch.condition {
                    FilterCondition::AlwaysFalse => {}
                    FilterCondition::AlwaysTrue => {
                        out.push(branch.clone());
                        break;
                    }
                    _ => out.push(branch.clone()),
                }
            }
            // Trailing branches yielding null are the default anyway
            while matches!(out.last(), Some(b) if matches!(b.value, Expression::Null(_))) {
                out.pop();
            }
            let folded = match out.first() {
                None => Expression::Null(*sql_type),
                Some(first) if first.condition == FilterCondition::AlwaysTrue => {
                    first.value.clone()
                }
                _ => Expression::Case {
                    branches: out,
                    sql_type: *sql_type,
                },
            };
            (folded != *expression).then_some(folded)
        }
        _ => None,
    }
}

/// Simplified condition, or `None` if nothing applies
fn fold_condition(condition: &FilterCondition) -> Option<FilterCondition> {
    let folded = match condition {
        FilterCondition::And(cs) => FilterCondition::and(flatten(cs, true)),
        FilterCondition::Or(cs) => FilterCondition::or(flatten(cs, false)),
        FilterCondition::Not(inner) => match inner.as_ref() {
            FilterCondition::AlwaysTrue => FilterCondition::AlwaysFalse,
            FilterCondition::AlwaysFalse => FilterCondition::AlwaysTrue,
            FilterCondition::Not(c) => (**c).clone(),
            _ => return None,
        },
        FilterCondition::Comparison { op, left, right } if left.is_constant() && right.is_constant() => {
            let value = |e: &Expression| match e {
                Expression::Constant(v) => v.clone(),
                _ => Value::Null,
            };
            match compare(*op, &value(left), &value(right)) {
                Truth::True => FilterCondition::AlwaysTrue,
                Truth::False => FilterCondition::AlwaysFalse,
                Truth::Unknown => return None,
            }
        }
        FilterCondition::IsNull(e) => match e {
            Expression::Null(_) => FilterCondition::AlwaysTrue,
            Expression::Constant(_) => FilterCondition::AlwaysFalse,
            // A concatenation is null iff one of its parts is
            Expression::Concat(parts) => FilterCondition::or(
                parts
                    .iter()
                    .filter(|p| !matches!(p, Expression::Constant(_)))
                    .map(|p| FilterCondition::IsNull(p.clone()))
                    .collect(),
            ),
            Expression::Column {
                variable,
                sql_type,
                escape_iri: true,
            } => FilterCondition::IsNull(Expression::column(*variable, *sql_type)),
            _ => return None,
        },
        FilterCondition::NotExists(model) if model.is_unsatisfiable() => FilterCondition::AlwaysTrue,
        _ => return None,
    };
    (folded != *condition).then_some(folded)
}

/// Operands of a conjunction (or disjunction) with nested ones inlined
fn flatten(conditions: &[FilterCondition], conjunction: bool) -> Vec<FilterCondition> {
    let mut out = Vec::with_capacity(conditions.len());
    for c in conditions {
        match c {
            FilterCondition::And(inner) if conjunction => out.extend(inner.iter().cloned()),
            FilterCondition::Or(inner) if !conjunction => out.extend(inner.iter().cloned()),
            other => {
                if !out.contains(other) {
                    out.push(other.clone())
                }
            }
        }
    }
    out
}

/// Top-level filters as a flat, duplicate-free conjunction. An unsatisfiable
/// model keeps its sources and a single `AlwaysFalse` filter.
fn normalize_filters(filters: &[FilterCondition]) -> Option<Vec<FilterCondition>> {
    let normalized = match FilterCondition::and(flatten(filters, true)) {
        FilterCondition::AlwaysTrue => Vec::new(),
        FilterCondition::And(cs) => {
            let mut out: Vec<FilterCondition> = Vec::with_capacity(cs.len());
            for c in cs {
                if !out.contains(&c) {
                    out.push(c);
                }
            }
            out
        }
        single => vec![single],
    };
    (normalized != filters).then_some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculus::{CompareOp, ModifiedModel, VarId};
    use indexmap::IndexMap;

    fn col(v: usize) -> Expression {
        Expression::column(VarId(v), SqlType::String)
    }

    fn fold(condition: FilterCondition) -> FilterCondition {
        Folder.rewrite_condition(&condition).into_owned()
    }

    fn query(filters: Vec<FilterCondition>) -> RelationalQuery {
        RelationalQuery {
            model: ModifiedModel::new(CalculusModel {
                filters,
                ..CalculusModel::default()
            }),
            binders: IndexMap::new(),
        }
    }

    #[test]
    fn test_string_never_equals_integer() {
        let c = FilterCondition::equal(Expression::string("2"), Expression::integer(2));
        assert_eq!(fold(c), FilterCondition::AlwaysFalse);
    }

    #[test]
    fn test_unknown_comparison_is_kept() {
        let c = FilterCondition::equal(Expression::Null(SqlType::String), Expression::string("a"));
        assert_eq!(fold(c.clone()), c);
        let negated = FilterCondition::negate(c.clone());
        assert_eq!(fold(negated.clone()), negated);
    }

    #[test]
    fn test_concat_folding() {
        let e = Expression::Concat(vec![
            Expression::string("http://"),
            Expression::Concat(vec![Expression::string("s.com/"), col(0)]),
        ]);
        assert_eq!(
            Folder.rewrite_expression(&e).into_owned(),
            Expression::Concat(vec![Expression::string("http://s.com/"), col(0)])
        );
        let e = Expression::Concat(vec![Expression::string("a"), Expression::integer(1)]);
        assert_eq!(Folder.rewrite_expression(&e).into_owned(), Expression::string("a1"));
        let e = Expression::Concat(vec![col(0), Expression::Null(SqlType::String)]);
        assert_eq!(
            Folder.rewrite_expression(&e).into_owned(),
            Expression::Null(SqlType::String)
        );
        // a lone non-string part keeps its string conversion
        let e = Expression::Concat(vec![Expression::column(VarId(1), SqlType::Integer)]);
        assert!(matches!(Folder.rewrite_expression(&e), Cow::Borrowed(_)));
    }

    #[test]
    fn test_case_and_coalesce() {
        let e = Expression::Case {
            branches: vec![
                CaseBranch {
                    condition: FilterCondition::AlwaysFalse,
                    value: col(0),
                },
                CaseBranch {
                    condition: FilterCondition::AlwaysTrue,
                    value: col(1),
                },
            ],
            sql_type: SqlType::String,
        };
        assert_eq!(Folder.rewrite_expression(&e).into_owned(), col(1));
        let e = Expression::Coalesce(vec![Expression::Null(SqlType::String), col(2)]);
        assert_eq!(Folder.rewrite_expression(&e).into_owned(), col(2));
    }

    #[test]
    fn test_is_null_of_concat() {
        let c = FilterCondition::IsNull(Expression::Concat(vec![
            Expression::string("http://s.com/"),
            Expression::Column {
                variable: VarId(0),
                sql_type: SqlType::String,
                escape_iri: true,
            },
        ]));
        assert_eq!(fold(c), FilterCondition::IsNull(col(0)));
    }

    #[test]
    fn test_filters_are_flattened() {
        let q = query(vec![
            FilterCondition::And(vec![
                FilterCondition::IsNull(col(0)),
                FilterCondition::AlwaysTrue,
            ]),
            FilterCondition::IsNull(col(0)),
            FilterCondition::Comparison {
                op: CompareOp::Lt,
                left: Expression::integer(1),
                right: Expression::integer(2),
            },
        ]);
        let out = ConstantFolding.apply(&q).into_owned();
        assert_eq!(out.model.base.filters, vec![FilterCondition::IsNull(col(0))]);
        // idempotent
        assert!(matches!(ConstantFolding.apply(&out), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unsatisfiable_model_collapses_filters() {
        let q = query(vec![
            FilterCondition::IsNull(col(0)),
            FilterCondition::equal(Expression::integer(1), Expression::integer(2)),
        ]);
        let out = ConstantFolding.apply(&q).into_owned();
        assert_eq!(out.model.base.filters, vec![FilterCondition::AlwaysFalse]);
        assert!(out.is_provably_empty());
    }
}
