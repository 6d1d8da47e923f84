//! Static evaluator
//!
//! A row-local interpreter of relational expressions and filter conditions.
//! It computes what the generated SQL is expected to compute and is the
//! oracle every optimizer rewrite is tested against. Constant folding uses
//! [`compare`] so both always agree.

use crate::calculus::{CompareOp, Expression, FilterCondition, Row, Value};
use crate::mapping::iri_safe_escape;
use std::cmp::Ordering;
use thiserror::Error;

/// Evaluation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The condition needs other rows (e.g. `NOT EXISTS`)
    #[error("Condition is not row-local: {0}")]
    NotRowLocal(String),
}

pub type EvalResult<T> = Result<T, EvalError>;

/// Three-valued (Kleene) truth value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// A row passes a filter only if the condition is true
    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

impl From<bool> for Truth {
    fn from(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }
}

/// Compare two values.
///
/// NULL on either side is unknown. Values of different families are never
/// equal (so `=` is false and `<>` is true) and have no order (unknown).
/// Integers and doubles compare numerically.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Truth {
    if left.is_null() || right.is_null() {
        return Truth::Unknown;
    }
    let ordering = match (left, right) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        _ => {
            return match op {
                CompareOp::Eq => Truth::False,
                CompareOp::Ne => Truth::True,
                _ => Truth::Unknown,
            }
        }
    };
    let ordering = match ordering {
        Some(o) => o,
        None => return Truth::Unknown,
    };
    Truth::from(match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
    })
}

/// Evaluate an expression against a row
pub fn evaluate_expression(expression: &Expression, row: &Row) -> EvalResult<Value> {
    Ok(match expression {
        Expression::Column {
            variable,
            escape_iri,
            ..
        } => {
            let value = row.get(*variable);
            if *escape_iri {
                match value.lexical() {
                    Some(text) => Value::String(iri_safe_escape(&text)),
                    None => Value::Null,
                }
            } else {
                value.clone()
            }
        }
        Expression::Constant(value) => value.clone(),
        Expression::Null(_) => Value::Null,
        Expression::Concat(parts) => {
            let mut out = String::new();
            for part in parts {
                match evaluate_expression(part, row)?.lexical() {
                    Some(text) => out.push_str(&text),
                    None => return Ok(Value::Null),
                }
            }
            Value::String(out)
        }
        Expression::Case { branches, .. } => {
            for branch in branches {
                if evaluate_filter(&branch.condition, row)?.is_true() {
                    return evaluate_expression(&branch.value, row);
                }
            }
            Value::Null
        }
        Expression::Coalesce(parts) => {
            for part in parts {
                let value = evaluate_expression(part, row)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Value::Null
        }
    })
}

/// Evaluate a filter condition against a row
pub fn evaluate_filter(condition: &FilterCondition, row: &Row) -> EvalResult<Truth> {
    Ok(match condition {
        FilterCondition::AlwaysTrue => Truth::True,
        FilterCondition::AlwaysFalse => Truth::False,
        FilterCondition::And(cs) => {
            let mut acc = Truth::True;
            for c in cs {
                acc = acc.and(evaluate_filter(c, row)?);
            }
            acc
        }
        FilterCondition::Or(cs) => {
            let mut acc = Truth::False;
            for c in cs {
                acc = acc.or(evaluate_filter(c, row)?);
            }
            acc
        }
        FilterCondition::Not(c) => evaluate_filter(c, row)?.not(),
        FilterCondition::Comparison { op, left, right } => compare(
            *op,
            &evaluate_expression(left, row)?,
            &evaluate_expression(right, row)?,
        ),
        FilterCondition::EqualVariables(a, b) => compare(CompareOp::Eq, row.get(*a), row.get(*b)),
        FilterCondition::IsNull(e) => Truth::from(evaluate_expression(e, row)?.is_null()),
        FilterCondition::NotExists(_) => {
            return Err(EvalError::NotRowLocal(condition.to_string()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculus::{CaseBranch, SqlType, VarId};

    fn col(v: usize) -> Expression {
        Expression::column(VarId(v), SqlType::String)
    }

    #[test]
    fn test_kleene_logic() {
        assert_eq!(Truth::Unknown.and(Truth::False), Truth::False);
        assert_eq!(Truth::Unknown.or(Truth::True), Truth::True);
        assert_eq!(Truth::Unknown.not(), Truth::Unknown);
    }

    #[test]
    fn test_compare_families() {
        let two = Value::Integer(2);
        let two_str = Value::String("2".to_string());
        assert_eq!(compare(CompareOp::Eq, &two, &two_str), Truth::False);
        assert_eq!(compare(CompareOp::Ne, &two, &two_str), Truth::True);
        assert_eq!(compare(CompareOp::Lt, &two, &two_str), Truth::Unknown);
        assert_eq!(
            compare(CompareOp::Eq, &two, &Value::Double(2.0)),
            Truth::True
        );
        assert_eq!(compare(CompareOp::Eq, &two, &Value::Null), Truth::Unknown);
    }

    #[test]
    fn test_concat_is_null_if_any_part_is_null() {
        let e = Expression::Concat(vec![Expression::string("http://s.com/"), col(0)]);
        assert_eq!(evaluate_expression(&e, &Row::new()).unwrap(), Value::Null);
        let row = Row::from_pairs(vec![(VarId(0), Value::String("12".to_string()))]);
        assert_eq!(
            evaluate_expression(&e, &row).unwrap(),
            Value::String("http://s.com/12".to_string())
        );
    }

    #[test]
    fn test_escaped_column() {
        let e = Expression::Column {
            variable: VarId(0),
            sql_type: SqlType::String,
            escape_iri: true,
        };
        let row = Row::from_pairs(vec![(VarId(0), Value::String("a/b".to_string()))]);
        assert_eq!(
            evaluate_expression(&e, &row).unwrap(),
            Value::String("a%2Fb".to_string())
        );
    }

    #[test]
    fn test_case_and_coalesce() {
        let case = Expression::Case {
            branches: vec![CaseBranch {
                condition: FilterCondition::not_null(col(0)),
                value: Expression::integer(1),
            }],
            sql_type: SqlType::Integer,
        };
        assert_eq!(evaluate_expression(&case, &Row::new()).unwrap(), Value::Null);
        let coalesce = Expression::Coalesce(vec![col(0), Expression::string("x")]);
        assert_eq!(
            evaluate_expression(&coalesce, &Row::new()).unwrap(),
            Value::String("x".to_string())
        );
    }

    #[test]
    fn test_is_null_and_equal_variables() {
        let row = Row::from_pairs(vec![(VarId(0), Value::Integer(1))]);
        assert_eq!(
            evaluate_filter(&FilterCondition::EqualVariables(VarId(0), VarId(1)), &row).unwrap(),
            Truth::Unknown
        );
        assert_eq!(
            evaluate_filter(&FilterCondition::IsNull(col(1)), &row).unwrap(),
            Truth::True
        );
    }

    #[test]
    fn test_not_exists_is_not_row_local() {
        let c = FilterCondition::NotExists(Box::default());
        assert!(matches!(
            evaluate_filter(&c, &Row::new()),
            Err(EvalError::NotRowLocal(_))
        ));
    }
}
