//! R2RML term maps
//!
//! Term maps define how one RDF term is generated from a logical table row.

use super::template::Template;
use super::{MappingError, MappingResult};
use crate::calculus::types::Value;
use crate::rdf::{BlankNode, Literal, NamedNode, RdfTerm, TermKind};
use oxiri::Iri;
use serde::{Deserialize, Serialize};

/// Constant value of a constant-valued term map
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstantValue {
    /// Constant IRI
    Iri(String),
    /// Constant literal with optional datatype and language
    Literal {
        value: String,
        datatype: Option<String>,
        language: Option<String>,
    },
}

/// How a term map computes its value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermValuation {
    /// `rr:constant`
    Constant(ConstantValue),
    /// `rr:column`
    Column(String),
    /// `rr:template`
    Template(Template),
}

/// A term map
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TermMap {
    pub valuation: TermValuation,
    #[serde(default)]
    pub term_kind: TermKind,
    #[serde(default)]
    pub datatype: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub base_iri: Option<String>,
}

impl TermMap {
    /// Create a constant IRI term map
    pub fn constant_iri(iri: impl Into<String>) -> Self {
        Self::new(TermValuation::Constant(ConstantValue::Iri(iri.into())), TermKind::Iri)
    }

    /// Create a constant simple literal term map
    pub fn constant_literal(value: impl Into<String>) -> Self {
        Self::new(
            TermValuation::Constant(ConstantValue::Literal {
                value: value.into(),
                datatype: None,
                language: None,
            }),
            TermKind::Literal,
        )
    }

    /// Create a column-valued term map
    pub fn column(column: impl Into<String>, term_kind: TermKind) -> Self {
        Self::new(TermValuation::Column(column.into()), term_kind)
    }

    /// Create a template-valued term map
    pub fn template(template: &str, term_kind: TermKind) -> MappingResult<Self> {
        Ok(Self::new(
            TermValuation::Template(Template::parse(template)?),
            term_kind,
        ))
    }

    fn new(valuation: TermValuation, term_kind: TermKind) -> Self {
        Self {
            valuation,
            term_kind,
            datatype: None,
            language: None,
            base_iri: None,
        }
    }

    /// Set the literal datatype
    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }

    /// Set the literal language tag
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the base IRI used to resolve relative IRIs
    pub fn with_base_iri(mut self, base_iri: impl Into<String>) -> Self {
        self.base_iri = Some(base_iri.into());
        self
    }

    /// Check if this term map is constant-valued
    pub fn is_constant(&self) -> bool {
        matches!(self.valuation, TermValuation::Constant(_))
    }

    /// Columns referenced by this term map, in order and without duplicates
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = match &self.valuation {
            TermValuation::Constant(_) => Vec::new(),
            TermValuation::Column(c) => vec![c.as_str()],
            TermValuation::Template(t) => t.columns(),
        };
        let mut seen = std::collections::HashSet::new();
        columns.retain(|c| seen.insert(*c));
        columns
    }

    /// The constant term, if this term map is constant-valued
    pub fn constant_term(&self) -> Option<RdfTerm> {
        match &self.valuation {
            TermValuation::Constant(value) => constant_to_term(value).ok(),
            _ => None,
        }
    }

    /// Check that kind, datatype and language are consistent
    pub fn validate(&self, position: &str) -> MappingResult<()> {
        let invalid = |message: &str| MappingError::InvalidValue {
            property: position.to_string(),
            message: message.to_string(),
        };
        if self.term_kind != TermKind::Literal
            && (self.datatype.is_some() || self.language.is_some())
        {
            return Err(invalid("datatype or language on a non-literal term map"));
        }
        if self.datatype.is_some() && self.language.is_some() {
            return Err(invalid("both datatype and language given"));
        }
        if let TermValuation::Constant(value) = &self.valuation {
            let term = constant_to_term(value)?;
            if term.kind() != self.term_kind {
                return Err(invalid(&format!(
                    "constant {} declared as {}",
                    term, self.term_kind
                )));
            }
        }
        if let Some(base) = &self.base_iri {
            Iri::parse(base.as_str())
                .map_err(|e| invalid(&format!("bad base IRI '{}': {}", base, e)))?;
        }
        Ok(())
    }

    /// Generate the term for one row.
    ///
    /// `lookup` returns the value of a column. A null column produces no term
    /// (`Ok(None)`); a value that does not form a valid term is an error.
    pub fn generate<'v, F>(&self, lookup: F) -> MappingResult<Option<RdfTerm>>
    where
        F: Fn(&str) -> Option<&'v Value>,
    {
        let (lexical, natural_datatype) = match &self.valuation {
            TermValuation::Constant(value) => return constant_to_term(value).map(Some),
            TermValuation::Column(column) => {
                let value = match lookup(column) {
                    Some(v) if !v.is_null() => v,
                    _ => return Ok(None),
                };
                let natural = value.sql_type().and_then(|t| t.natural_datatype());
                (value.lexical().unwrap_or_default(), natural)
            }
            TermValuation::Template(template) => {
                let escape = self.term_kind == TermKind::Iri;
                let expanded =
                    template.expand(|c| lookup(c).and_then(|v| v.lexical()), escape);
                match expanded {
                    Some(text) => (text, None),
                    None => return Ok(None),
                }
            }
        };

        let term = match self.term_kind {
            TermKind::Iri => RdfTerm::NamedNode(self.resolve_iri(&lexical)?),
            TermKind::BlankNode => RdfTerm::BlankNode(
                BlankNode::from_row_value(&lexical)
                    .map_err(|e| MappingError::Materialization(e.to_string()))?,
            ),
            TermKind::Literal => RdfTerm::Literal(self.literal(lexical, natural_datatype)?),
        };
        Ok(Some(term))
    }

    /// Resolve a generated IRI against the base IRI if it is relative
    pub fn resolve_iri(&self, text: &str) -> MappingResult<NamedNode> {
        if Iri::parse(text).is_ok() {
            return NamedNode::new(text).map_err(|e| MappingError::Materialization(e.to_string()));
        }
        let base = self.base_iri.as_deref().ok_or_else(|| {
            MappingError::Materialization(format!("relative IRI '{}' without base IRI", text))
        })?;
        let base = Iri::parse(base).map_err(|e| MappingError::Materialization(e.to_string()))?;
        let resolved = base
            .resolve(text)
            .map_err(|e| MappingError::Materialization(format!("'{}': {}", text, e)))?;
        NamedNode::new(resolved.as_str()).map_err(|e| MappingError::Materialization(e.to_string()))
    }

    fn literal(&self, lexical: String, natural_datatype: Option<&str>) -> MappingResult<Literal> {
        if let Some(language) = &self.language {
            return Literal::new_language_tagged_literal(lexical, language.as_str())
                .map_err(|e| MappingError::Materialization(e.to_string()));
        }
        match self.datatype.as_deref().or(natural_datatype) {
            Some(datatype) => {
                let datatype = NamedNode::new(datatype)
                    .map_err(|e| MappingError::Materialization(e.to_string()))?;
                Ok(Literal::new_typed_literal(lexical, datatype))
            }
            None => Ok(Literal::new_simple_literal(lexical)),
        }
    }
}

fn constant_to_term(value: &ConstantValue) -> MappingResult<RdfTerm> {
    let invalid = |e: crate::rdf::RdfError| MappingError::InvalidValue {
        property: "rr:constant".to_string(),
        message: e.to_string(),
    };
    match value {
        ConstantValue::Iri(iri) => RdfTerm::iri(iri).map_err(invalid),
        ConstantValue::Literal {
            value,
            datatype,
            language,
        } => {
            let literal = match (datatype, language) {
                (_, Some(lang)) => {
                    Literal::new_language_tagged_literal(value.as_str(), lang.as_str())
                        .map_err(invalid)?
                }
                (Some(dt), None) => {
                    Literal::new_typed_literal(value.as_str(), NamedNode::new(dt).map_err(invalid)?)
                }
                (None, None) => Literal::new_simple_literal(value.as_str()),
            };
            Ok(RdfTerm::Literal(literal))
        }
    }
}
