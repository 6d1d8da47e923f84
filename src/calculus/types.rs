//! SQL values, SQL types and the RDF type registry

use crate::rdf::{vocab, xsd};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Lexical format used for datetime values
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQL column type as reported by the schema lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Integer,
    Double,
    String,
    Boolean,
    DateTime,
}

impl SqlType {
    /// Comparison family of this type
    pub fn family(&self) -> Family {
        match self {
            SqlType::Integer | SqlType::Double => Family::Numeric,
            SqlType::String => Family::String,
            SqlType::Boolean => Family::Boolean,
            SqlType::DateTime => Family::DateTime,
        }
    }

    /// Datatype of the literal a column of this type produces when the term
    /// map declares none. `None` means a simple literal.
    pub fn natural_datatype(&self) -> Option<&'static str> {
        match self {
            SqlType::Integer => Some(xsd::INTEGER),
            SqlType::Double => Some(xsd::DOUBLE),
            SqlType::String => None,
            SqlType::Boolean => Some(xsd::BOOLEAN),
            SqlType::DateTime => Some(xsd::DATE_TIME),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SqlType::Integer => "INTEGER",
            SqlType::Double => "DOUBLE",
            SqlType::String => "VARCHAR",
            SqlType::Boolean => "BOOLEAN",
            SqlType::DateTime => "TIMESTAMP",
        };
        write!(f, "{}", name)
    }
}

/// Values of the same family are comparable with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Numeric,
    String,
    Boolean,
    DateTime,
}

/// A typed SQL value, as found in a row or in a constant expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Double(f64),
    String(String),
    Boolean(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if this value is SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL type of this value, `None` for NULL
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(SqlType::Integer),
            Value::Double(_) => Some(SqlType::Double),
            Value::String(_) => Some(SqlType::String),
            Value::Boolean(_) => Some(SqlType::Boolean),
            Value::DateTime(_) => Some(SqlType::DateTime),
        }
    }

    /// Canonical lexical form, `None` for NULL
    pub fn lexical(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Double(d) => Some(format_double(*d)),
            Value::String(s) => Some(s.clone()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::DateTime(dt) => Some(dt.format(DATETIME_FORMAT).to_string()),
        }
    }

    /// Parse a lexical form into a value of the given type.
    ///
    /// Returns `None` unless the text is the canonical lexical form of some
    /// value of that type, so that `parse(lexical(v)) == v` always holds.
    pub fn parse_canonical(text: &str, sql_type: SqlType) -> Option<Value> {
        let value = match sql_type {
            SqlType::String => return Some(Value::String(text.to_string())),
            SqlType::Integer => Value::Integer(text.parse().ok()?),
            SqlType::Double => Value::Double(text.parse().ok()?),
            SqlType::Boolean => match text {
                "true" => Value::Boolean(true),
                "false" => Value::Boolean(false),
                _ => return None,
            },
            SqlType::DateTime => {
                Value::DateTime(NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok()?)
            }
        };
        if value.lexical().as_deref() == Some(text) {
            Some(value)
        } else {
            None
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.lexical().unwrap_or_default()),
        }
    }
}

fn format_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        d.to_string()
    }
}

/// Well-known type ids. Dynamically interned datatypes and language tags
/// start at [`FIRST_DYNAMIC_TYPE_ID`].
pub mod type_ids {
    pub const IRI: i64 = 1;
    pub const BLANK_NODE: i64 = 2;
    pub const SIMPLE_LITERAL: i64 = 3;
    pub const XSD_STRING: i64 = 4;
    pub const INTEGER: i64 = 5;
    pub const DOUBLE: i64 = 6;
    pub const BOOLEAN: i64 = 7;
    pub const DATE_TIME: i64 = 8;
    pub const DECIMAL: i64 = 9;
}

pub const FIRST_DYNAMIC_TYPE_ID: i64 = 100;

/// Coarse classification of an RDF term, stored in the category component
/// of an expression set. The numeric order is the SPARQL ordering of kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeCategory {
    BlankNode = 1,
    Iri = 2,
    SimpleLiteral = 3,
    LanguageLiteral = 4,
    Numeric = 5,
    Boolean = 6,
    DateTime = 7,
    OtherLiteral = 8,
}

impl TypeCategory {
    pub fn code(self) -> i64 {
        self as i64
    }

    /// Category of a literal with the given datatype
    pub fn of_datatype(datatype: &str) -> Self {
        match datatype {
            xsd::STRING => TypeCategory::SimpleLiteral,
            xsd::INTEGER | xsd::DOUBLE | xsd::DECIMAL => TypeCategory::Numeric,
            xsd::BOOLEAN => TypeCategory::Boolean,
            xsd::DATE_TIME => TypeCategory::DateTime,
            vocab::LANG_STRING => TypeCategory::LanguageLiteral,
            _ => TypeCategory::OtherLiteral,
        }
    }
}

/// What a type id stands for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Iri,
    BlankNode,
    SimpleLiteral,
    Datatype(String),
    Language(String),
}

/// Session-wide registry of RDF type ids.
///
/// Ids are interned on first use and never change afterwards, so concurrent
/// queries can share one registry.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    ids: HashMap<TypeKey, i64>,
    keys: Vec<TypeKey>,
}

impl TypeRegistry {
    /// Create a new registry holding only the well-known ids
    pub fn new() -> Self {
        Self::default()
    }

    /// Type id of a literal datatype
    pub fn datatype_id(&self, datatype: &str) -> i64 {
        match datatype {
            xsd::STRING => type_ids::XSD_STRING,
            xsd::INTEGER => type_ids::INTEGER,
            xsd::DOUBLE => type_ids::DOUBLE,
            xsd::BOOLEAN => type_ids::BOOLEAN,
            xsd::DATE_TIME => type_ids::DATE_TIME,
            xsd::DECIMAL => type_ids::DECIMAL,
            other => self.intern(TypeKey::Datatype(other.to_string())),
        }
    }

    /// Type id of a language tag
    pub fn language_id(&self, language: &str) -> i64 {
        self.intern(TypeKey::Language(language.to_ascii_lowercase()))
    }

    /// Resolve a type id back to its key
    pub fn key(&self, id: i64) -> Option<TypeKey> {
        let key = match id {
            type_ids::IRI => TypeKey::Iri,
            type_ids::BLANK_NODE => TypeKey::BlankNode,
            type_ids::SIMPLE_LITERAL => TypeKey::SimpleLiteral,
            type_ids::XSD_STRING => TypeKey::Datatype(xsd::STRING.to_string()),
            type_ids::INTEGER => TypeKey::Datatype(xsd::INTEGER.to_string()),
            type_ids::DOUBLE => TypeKey::Datatype(xsd::DOUBLE.to_string()),
            type_ids::BOOLEAN => TypeKey::Datatype(xsd::BOOLEAN.to_string()),
            type_ids::DATE_TIME => TypeKey::Datatype(xsd::DATE_TIME.to_string()),
            type_ids::DECIMAL => TypeKey::Datatype(xsd::DECIMAL.to_string()),
            _ => {
                let index = usize::try_from(id - FIRST_DYNAMIC_TYPE_ID).ok()?;
                let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
                return inner.keys.get(index).cloned();
            }
        };
        Some(key)
    }

    fn intern(&self, key: TypeKey) -> i64 {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(id) = inner.ids.get(&key) {
                return *id;
            }
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Another query may have interned the key between the two locks.
        if let Some(id) = inner.ids.get(&key) {
            return *id;
        }
        let id = FIRST_DYNAMIC_TYPE_ID + inner.keys.len() as i64;
        inner.keys.push(key.clone());
        inner.ids.insert(key, id);
        id
    }
}
