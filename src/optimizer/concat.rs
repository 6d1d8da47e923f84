//! Concatenation in equality
//!
//! Template-generated terms compare as `concat(...) = 'text'`, which no
//! index can serve. This pass matches the literal parts of the concatenation
//! against the constant and turns the comparison into equalities on the
//! underlying columns, or into `AlwaysFalse` if the literal parts cannot
//! match. Comparisons between two concatenations with the same shape become
//! column equalities.

use super::Pass;
use crate::calculus::rewrite::{rewrite_query, walk_condition, Rewriter};
use crate::calculus::{CompareOp, Expression, FilterCondition, RelationalQuery, Value};
use crate::mapping::{contains_escaped_char, iri_safe_unescape};
use std::borrow::Cow;

/// Concat-in-equality pass
pub struct ConcatInEquality;

impl Pass for ConcatInEquality {
    fn name(&self) -> &'static str {
        "concat in equality"
    }

    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery> {
        rewrite_query(&Peeler, query)
    }
}

struct Peeler;

impl Rewriter for Peeler {
    fn rewrite_condition<'a>(&self, condition: &'a FilterCondition) -> Cow<'a, FilterCondition> {
        let walked = walk_condition(self, condition);
        let peeled = match walked.as_ref() {
            FilterCondition::Comparison {
                op: CompareOp::Eq,
                left,
                right,
            } => peel_equality(left, right),
            _ => None,
        };
        match peeled {
            Some(c) => Cow::Owned(c),
            None => walked,
        }
    }
}

/// A concatenation operand: literal text or a value expression
#[derive(Debug, Clone, PartialEq)]
enum Piece<'e> {
    Text(String),
    Value(&'e Expression),
}

/// Operands of a concatenation with adjacent literals merged
fn pieces(parts: &[Expression]) -> Vec<Piece<'_>> {
    let mut out: Vec<Piece<'_>> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Expression::Constant(value) => {
                let text = value.lexical().unwrap_or_default();
                match out.last_mut() {
                    Some(Piece::Text(previous)) => previous.push_str(&text),
                    _ => out.push(Piece::Text(text)),
                }
            }
            other => out.push(Piece::Value(other)),
        }
    }
    out
}

fn peel_equality(left: &Expression, right: &Expression) -> Option<FilterCondition> {
    match (left, right) {
        (Expression::Concat(parts), Expression::Constant(Value::String(text)))
        | (Expression::Constant(Value::String(text)), Expression::Concat(parts)) => {
            match_constant(pieces(parts), text)
        }
        (Expression::Concat(a), Expression::Concat(b)) => match_concat(pieces(a), pieces(b)),
        _ => None,
    }
}

/// True if the value never produces the separator: IRI-safe escaped text
/// cannot contain a character escaping always replaces
fn excludes(value: &Expression, separator: &str) -> bool {
    matches!(value, Expression::Column { escape_iri: true, .. }) && contains_escaped_char(separator)
}

/// `concat(pieces) = text`; `None` if a split point is ambiguous
fn match_constant(mut pieces: Vec<Piece<'_>>, text: &str) -> Option<FilterCondition> {
    let mut rest = text;
    while let Some(Piece::Text(prefix)) = pieces.first() {
        match rest.strip_prefix(prefix.as_str()) {
            Some(r) => rest = r,
            None => return Some(FilterCondition::AlwaysFalse),
        }
        pieces.remove(0);
    }
    while let Some(Piece::Text(suffix)) = pieces.last() {
        match rest.strip_suffix(suffix.as_str()) {
            Some(r) => rest = r,
            None => return Some(FilterCondition::AlwaysFalse),
        }
        pieces.pop();
    }
    if pieces.is_empty() {
        return Some(if rest.is_empty() {
            FilterCondition::AlwaysTrue
        } else {
            FilterCondition::AlwaysFalse
        });
    }

    let mut conditions = Vec::new();
    let mut index = 0;
    while index < pieces.len() {
        let value = match pieces[index] {
            Piece::Value(value) => value,
            Piece::Text(_) => return None,
        };
        if index + 1 == pieces.len() {
            conditions.push(value_equals(value, rest));
            break;
        }
        let separator = match &pieces[index + 1] {
            Piece::Text(separator) => separator.as_str(),
            // two adjacent values have no split point
            Piece::Value(_) => return None,
        };
        let split = match occurrences(rest, separator) {
            0 => return Some(FilterCondition::AlwaysFalse),
            1 => rest.find(separator)?,
            // occurrences of a separator that cannot overlap itself are
            // disjoint, so a later split would put the first one in the value
            _ if excludes(value, separator) && !overlaps_itself(separator) => {
                rest.find(separator)?
            }
            _ => return None,
        };
        conditions.push(value_equals(value, &rest[..split]));
        rest = &rest[split + separator.len()..];
        index += 2;
    }
    Some(FilterCondition::and(conditions))
}

/// Number of places `needle` starts in `haystack`, overlapping ones included
fn occurrences(haystack: &str, needle: &str) -> usize {
    let mut count = 0;
    let mut from = 0;
    while let Some(found) = haystack[from..].find(needle) {
        count += 1;
        let start = from + found;
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
        if from > haystack.len() {
            break;
        }
    }
    count
}

/// True if a proper prefix of `separator` is also a suffix of it
fn overlaps_itself(separator: &str) -> bool {
    separator
        .char_indices()
        .skip(1)
        .any(|(k, _)| separator.ends_with(&separator[..k]))
}

/// `value = text` where `text` is the value's contribution to the
/// concatenation
fn value_equals(value: &Expression, text: &str) -> FilterCondition {
    match value {
        Expression::Column {
            variable,
            sql_type,
            escape_iri,
        } => {
            let raw = if *escape_iri {
                match iri_safe_unescape(text) {
                    Some(raw) => raw,
                    None => return FilterCondition::AlwaysFalse,
                }
            } else {
                text.to_string()
            };
            match Value::parse_canonical(&raw, *sql_type) {
                Some(constant) => FilterCondition::equal(
                    Expression::column(*variable, *sql_type),
                    Expression::Constant(constant),
                ),
                None => FilterCondition::AlwaysFalse,
            }
        }
        other => FilterCondition::equal(other.clone().into_string(), Expression::string(text)),
    }
}

/// `concat(a) = concat(b)`
fn match_concat(a: Vec<Piece<'_>>, b: Vec<Piece<'_>>) -> Option<FilterCondition> {
    let leading = |p: &[Piece<'_>]| match p.first() {
        Some(Piece::Text(t)) => t.clone(),
        _ => String::new(),
    };
    let trailing = |p: &[Piece<'_>]| match p.last() {
        Some(Piece::Text(t)) if p.len() > 1 => t.clone(),
        _ => String::new(),
    };
    let (pa, pb) = (leading(&a), leading(&b));
    if !(pa.starts_with(&pb) || pb.starts_with(&pa)) {
        return Some(FilterCondition::AlwaysFalse);
    }
    let (sa, sb) = (trailing(&a), trailing(&b));
    if !(sa.ends_with(&sb) || sb.ends_with(&sa)) {
        return Some(FilterCondition::AlwaysFalse);
    }

    if a.len() != b.len() {
        return None;
    }
    let mut conditions = Vec::new();
    for (index, (x, y)) in a.iter().zip(&b).enumerate() {
        match (x, y) {
            (Piece::Text(tx), Piece::Text(ty)) if tx == ty => {}
            (
                Piece::Value(Expression::Column {
                    variable: vx,
                    sql_type: tx,
                    escape_iri: ex,
                }),
                Piece::Value(Expression::Column {
                    variable: vy,
                    sql_type: ty,
                    escape_iri: ey,
                }),
            ) if ex == ey => {
                // a value followed by another value must end at a
                // separator it cannot contain
                if index + 2 < a.len() {
                    match &a[index + 1] {
                        Piece::Text(separator) if *ex && contains_escaped_char(separator) => {}
                        _ => return None,
                    }
                }
                conditions.push(if tx == ty {
                    FilterCondition::EqualVariables(*vx, *vy)
                } else {
                    FilterCondition::equal(
                        Expression::column(*vx, *tx).into_string(),
                        Expression::column(*vy, *ty).into_string(),
                    )
                });
            }
            _ => return None,
        }
    }
    Some(FilterCondition::and(conditions))
}
