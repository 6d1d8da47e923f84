//! Relational expressions and filter conditions

use super::model::{CalculusModel, VarId};
use super::types::{SqlType, Value};
use std::fmt;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    /// Operator with swapped operands (`a < b` iff `b > a`)
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
        }
    }

    /// Operator whose result is the complement on non-null operands
    pub fn negate(self) -> Self {
        match self {
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
        }
    }
}

/// One `WHEN condition THEN value` arm of a case expression
#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub condition: FilterCondition,
    pub value: Expression,
}

/// A relational expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference. With `escape_iri` the value is IRI-safe escaped
    /// text, as when it is embedded into an IRI template.
    Column {
        variable: VarId,
        sql_type: SqlType,
        escape_iri: bool,
    },
    /// Non-null typed constant
    Constant(Value),
    /// String concatenation; null if any part is null
    Concat(Vec<Expression>),
    /// First branch whose condition holds wins, else null
    Case {
        branches: Vec<CaseBranch>,
        sql_type: SqlType,
    },
    /// First non-null operand
    Coalesce(Vec<Expression>),
    /// Typed null
    Null(SqlType),
}

impl Expression {
    /// Plain column reference
    pub fn column(variable: VarId, sql_type: SqlType) -> Self {
        Expression::Column {
            variable,
            sql_type,
            escape_iri: false,
        }
    }

    /// String constant
    pub fn string(value: impl Into<String>) -> Self {
        Expression::Constant(Value::String(value.into()))
    }

    /// Integer constant
    pub fn integer(value: i64) -> Self {
        Expression::Constant(Value::Integer(value))
    }

    /// Constant from a value; NULL becomes a typed null
    pub fn constant(value: Value, sql_type: SqlType) -> Self {
        if value.is_null() {
            Expression::Null(sql_type)
        } else {
            Expression::Constant(value)
        }
    }

    /// Convert to a string-typed expression
    pub fn into_string(self) -> Self {
        if self.sql_type() == SqlType::String {
            self
        } else {
            Expression::Concat(vec![self])
        }
    }

    /// Result type
    pub fn sql_type(&self) -> SqlType {
        match self {
            Expression::Column { escape_iri: true, .. } => SqlType::String,
            Expression::Column { sql_type, .. } => *sql_type,
            Expression::Constant(value) => value.sql_type().unwrap_or(SqlType::String),
            Expression::Concat(_) => SqlType::String,
            Expression::Case { sql_type, .. } => *sql_type,
            Expression::Coalesce(parts) => parts
                .first()
                .map(|p| p.sql_type())
                .unwrap_or(SqlType::String),
            Expression::Null(sql_type) => *sql_type,
        }
    }

    /// True for constants and typed nulls
    pub fn is_constant(&self) -> bool {
        matches!(self, Expression::Constant(_) | Expression::Null(_))
    }

    /// The referenced variable if this is a plain column reference
    pub fn as_column(&self) -> Option<VarId> {
        match self {
            Expression::Column { variable, .. } => Some(*variable),
            _ => None,
        }
    }

    /// Visit every variable referenced, including inside case conditions
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        match self {
            Expression::Column { variable, .. } => f(*variable),
            Expression::Constant(_) | Expression::Null(_) => {}
            Expression::Concat(parts) | Expression::Coalesce(parts) => {
                for part in parts {
                    part.for_each_variable(f);
                }
            }
            Expression::Case { branches, .. } => {
                for branch in branches {
                    branch.condition.for_each_variable(f);
                    branch.value.for_each_variable(f);
                }
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Column {
                variable,
                escape_iri,
                ..
            } => {
                if *escape_iri {
                    write!(f, "iri_escape({})", variable)
                } else {
                    write!(f, "{}", variable)
                }
            }
            Expression::Constant(value) => write!(f, "{}", value),
            Expression::Concat(parts) => {
                write!(f, "concat(")?;
                write_list(f, parts)?;
                write!(f, ")")
            }
            Expression::Case { branches, .. } => {
                write!(f, "CASE")?;
                for b in branches {
                    write!(f, " WHEN {} THEN {}", b.condition, b.value)?;
                }
                write!(f, " END")
            }
            Expression::Coalesce(parts) => {
                write!(f, "coalesce(")?;
                write_list(f, parts)?;
                write!(f, ")")
            }
            Expression::Null(sql_type) => write!(f, "NULL::{}", sql_type),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// A filter condition over calculus variables
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    AlwaysTrue,
    AlwaysFalse,
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
    Not(Box<FilterCondition>),
    Comparison {
        op: CompareOp,
        left: Expression,
        right: Expression,
    },
    EqualVariables(VarId, VarId),
    IsNull(Expression),
    /// No row of the (correlated) model exists
    NotExists(Box<CalculusModel>),
}

impl FilterCondition {
    /// Equality comparison
    pub fn equal(left: Expression, right: Expression) -> Self {
        FilterCondition::Comparison {
            op: CompareOp::Eq,
            left,
            right,
        }
    }

    /// `NOT (e IS NULL)`
    pub fn not_null(expression: Expression) -> Self {
        FilterCondition::Not(Box::new(FilterCondition::IsNull(expression)))
    }

    /// Conjunction that skips trivially true operands
    pub fn and(conditions: Vec<FilterCondition>) -> Self {
        let mut conditions: Vec<_> = conditions
            .into_iter()
            .filter(|c| *c != FilterCondition::AlwaysTrue)
            .collect();
        if conditions.contains(&FilterCondition::AlwaysFalse) {
            return FilterCondition::AlwaysFalse;
        }
        match conditions.len() {
            0 => FilterCondition::AlwaysTrue,
            1 => conditions.remove(0),
            _ => FilterCondition::And(conditions),
        }
    }

    /// Disjunction that skips trivially false operands
    pub fn or(conditions: Vec<FilterCondition>) -> Self {
        let mut conditions: Vec<_> = conditions
            .into_iter()
            .filter(|c| *c != FilterCondition::AlwaysFalse)
            .collect();
        if conditions.contains(&FilterCondition::AlwaysTrue) {
            return FilterCondition::AlwaysTrue;
        }
        match conditions.len() {
            0 => FilterCondition::AlwaysFalse,
            1 => conditions.remove(0),
            _ => FilterCondition::Or(conditions),
        }
    }

    /// Negation that folds constants and double negation
    pub fn negate(condition: FilterCondition) -> Self {
        match condition {
            FilterCondition::AlwaysTrue => FilterCondition::AlwaysFalse,
            FilterCondition::AlwaysFalse => FilterCondition::AlwaysTrue,
            FilterCondition::Not(inner) => *inner,
            other => FilterCondition::Not(Box::new(other)),
        }
    }

    /// Visit every variable referenced at this level. Variables used inside
    /// a `NOT EXISTS` model are visited too.
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        match self {
            FilterCondition::AlwaysTrue | FilterCondition::AlwaysFalse => {}
            FilterCondition::And(cs) | FilterCondition::Or(cs) => {
                for c in cs {
                    c.for_each_variable(f);
                }
            }
            FilterCondition::Not(c) => c.for_each_variable(f),
            FilterCondition::Comparison { left, right, .. } => {
                left.for_each_variable(f);
                right.for_each_variable(f);
            }
            FilterCondition::EqualVariables(a, b) => {
                f(*a);
                f(*b);
            }
            FilterCondition::IsNull(e) => e.for_each_variable(f),
            FilterCondition::NotExists(model) => model.for_each_variable(f),
        }
    }
}

impl fmt::Display for FilterCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterCondition::AlwaysTrue => write!(f, "TRUE"),
            FilterCondition::AlwaysFalse => write!(f, "FALSE"),
            FilterCondition::And(cs) => write_joined(f, cs, " AND "),
            FilterCondition::Or(cs) => write_joined(f, cs, " OR "),
            FilterCondition::Not(c) => write!(f, "NOT {}", c),
            FilterCondition::Comparison { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            FilterCondition::EqualVariables(a, b) => write!(f, "{} = {}", a, b),
            FilterCondition::IsNull(e) => write!(f, "{} IS NULL", e),
            FilterCondition::NotExists(_) => write!(f, "NOT EXISTS (...)"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, cs: &[FilterCondition], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, c) in cs.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", c)?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_or_helpers() {
        let c = FilterCondition::IsNull(Expression::column(VarId(1), SqlType::String));
        assert_eq!(
            FilterCondition::and(vec![FilterCondition::AlwaysTrue, c.clone()]),
            c
        );
        assert_eq!(
            FilterCondition::and(vec![c.clone(), FilterCondition::AlwaysFalse]),
            FilterCondition::AlwaysFalse
        );
        assert_eq!(FilterCondition::or(vec![]), FilterCondition::AlwaysFalse);
        assert_eq!(
            FilterCondition::negate(FilterCondition::negate(c.clone())),
            c
        );
    }

    #[test]
    fn test_escaped_column_is_string_typed() {
        let e = Expression::Column {
            variable: VarId(0),
            sql_type: SqlType::Integer,
            escape_iri: true,
        };
        assert_eq!(e.sql_type(), SqlType::String);
        assert_eq!(
            Expression::column(VarId(0), SqlType::Integer).into_string(),
            Expression::Concat(vec![Expression::column(VarId(0), SqlType::Integer)])
        );
    }

    #[test]
    fn test_display() {
        let c = FilterCondition::equal(
            Expression::column(VarId(3), SqlType::String),
            Expression::string("12"),
        );
        assert_eq!(c.to_string(), "v3 = '12'");
    }
}
