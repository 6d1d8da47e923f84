//! RDF type definitions
//!
//! Wrapper types around the oxrdf library for the terms the compiler reads
//! back from relational rows.

use oxrdf::{BlankNode as OxBlankNode, Literal as OxLiteral, NamedNode as OxNamedNode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// RDF errors
#[derive(Error, Debug)]
pub enum RdfError {
    /// Invalid IRI
    #[error("Invalid IRI: {0}")]
    InvalidIri(String),

    /// Invalid blank node
    #[error("Invalid blank node: {0}")]
    InvalidBlankNode(String),

    /// Invalid literal
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
}

pub type RdfResult<T> = Result<T, RdfError>;

/// Named node (IRI)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedNode(OxNamedNode);

impl NamedNode {
    /// Create a new named node from an IRI string
    pub fn new(iri: &str) -> RdfResult<Self> {
        OxNamedNode::new(iri)
            .map(Self)
            .map_err(|e| RdfError::InvalidIri(e.to_string()))
    }

    /// Get the IRI string
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Get the inner oxrdf NamedNode
    pub fn inner(&self) -> &OxNamedNode {
        &self.0
    }
}

impl fmt::Display for NamedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.as_str())
    }
}

impl From<OxNamedNode> for NamedNode {
    fn from(node: OxNamedNode) -> Self {
        Self(node)
    }
}

/// Blank node
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlankNode(OxBlankNode);

impl BlankNode {
    /// Create a blank node from a string identifier
    pub fn new(id: &str) -> RdfResult<Self> {
        OxBlankNode::new(id)
            .map(Self)
            .map_err(|e| RdfError::InvalidBlankNode(e.to_string()))
    }

    /// Create a blank node from arbitrary row text.
    ///
    /// Characters that are not allowed in a blank node label are replaced by
    /// their hexadecimal code so that distinct inputs stay distinct.
    pub fn from_row_value(value: &str) -> RdfResult<Self> {
        let mut id = String::with_capacity(value.len() + 1);
        id.push('b');
        for c in value.chars() {
            if c.is_ascii_alphanumeric() {
                id.push(c);
            } else {
                id.push_str(&format!("_{:x}_", c as u32));
            }
        }
        Self::new(&id)
    }

    /// Get the blank node identifier
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for BlankNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_:{}", self.as_str())
    }
}

impl From<OxBlankNode> for BlankNode {
    fn from(node: OxBlankNode) -> Self {
        Self(node)
    }
}

/// RDF literal value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal(OxLiteral);

impl Literal {
    /// Create a simple literal (plain string)
    pub fn new_simple_literal(value: impl Into<String>) -> Self {
        Self(OxLiteral::new_simple_literal(value))
    }

    /// Create a literal with language tag
    pub fn new_language_tagged_literal(
        value: impl Into<String>,
        language: impl Into<String>,
    ) -> RdfResult<Self> {
        OxLiteral::new_language_tagged_literal(value, language)
            .map(Self)
            .map_err(|e| RdfError::InvalidLiteral(e.to_string()))
    }

    /// Create a typed literal
    pub fn new_typed_literal(value: impl Into<String>, datatype: NamedNode) -> Self {
        Self(OxLiteral::new_typed_literal(value, datatype.0))
    }

    /// Get the lexical value
    pub fn value(&self) -> &str {
        self.0.value()
    }

    /// Get the language tag if present
    pub fn language(&self) -> Option<&str> {
        self.0.language()
    }

    /// Get the datatype IRI
    pub fn datatype(&self) -> &str {
        self.0.datatype().as_str()
    }

    /// True for literals without language tag whose datatype is xsd:string
    pub fn is_plain(&self) -> bool {
        self.language().is_none() && self.datatype() == super::xsd::STRING
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<OxLiteral> for Literal {
    fn from(lit: OxLiteral) -> Self {
        Self(lit)
    }
}

/// The kind of RDF term a term map generates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TermKind {
    /// An IRI
    #[default]
    Iri,
    /// A blank node
    BlankNode,
    /// A literal
    Literal,
}

impl TermKind {
    /// Parse term type from R2RML IRI
    pub fn from_iri(iri: &str) -> Option<Self> {
        match iri {
            "http://www.w3.org/ns/r2rml#IRI" => Some(TermKind::Iri),
            "http://www.w3.org/ns/r2rml#BlankNode" => Some(TermKind::BlankNode),
            "http://www.w3.org/ns/r2rml#Literal" => Some(TermKind::Literal),
            _ => None,
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermKind::Iri => write!(f, "IRI"),
            TermKind::BlankNode => write!(f, "blank node"),
            TermKind::Literal => write!(f, "literal"),
        }
    }
}

/// RDF term (any RDF value)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RdfTerm {
    /// Named node (IRI)
    NamedNode(NamedNode),
    /// Blank node
    BlankNode(BlankNode),
    /// Literal value
    Literal(Literal),
}

impl RdfTerm {
    /// Create an IRI term
    pub fn iri(iri: &str) -> RdfResult<Self> {
        NamedNode::new(iri).map(RdfTerm::NamedNode)
    }

    /// Create a simple literal term
    pub fn string(value: impl Into<String>) -> Self {
        RdfTerm::Literal(Literal::new_simple_literal(value))
    }

    /// Kind of this term
    pub fn kind(&self) -> TermKind {
        match self {
            RdfTerm::NamedNode(_) => TermKind::Iri,
            RdfTerm::BlankNode(_) => TermKind::BlankNode,
            RdfTerm::Literal(_) => TermKind::Literal,
        }
    }

    /// Lexical form: IRI string, blank node label or literal value
    pub fn lexical(&self) -> &str {
        match self {
            RdfTerm::NamedNode(n) => n.as_str(),
            RdfTerm::BlankNode(b) => b.as_str(),
            RdfTerm::Literal(l) => l.value(),
        }
    }

    /// Get as literal if this is a literal
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            RdfTerm::Literal(l) => Some(l),
            _ => None,
        }
    }

    /// Get as named node if this is an IRI
    pub fn as_named_node(&self) -> Option<&NamedNode> {
        match self {
            RdfTerm::NamedNode(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for RdfTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfTerm::NamedNode(n) => write!(f, "{}", n),
            RdfTerm::BlankNode(b) => write!(f, "{}", b),
            RdfTerm::Literal(l) => write!(f, "{}", l),
        }
    }
}

impl From<NamedNode> for RdfTerm {
    fn from(node: NamedNode) -> Self {
        RdfTerm::NamedNode(node)
    }
}

impl From<BlankNode> for RdfTerm {
    fn from(node: BlankNode) -> Self {
        RdfTerm::BlankNode(node)
    }
}

impl From<Literal> for RdfTerm {
    fn from(lit: Literal) -> Self {
        RdfTerm::Literal(lit)
    }
}

/// RDF triple produced by CONSTRUCT queries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Triple {
    /// Subject (IRI or blank node)
    pub subject: RdfTerm,
    /// Predicate
    pub predicate: NamedNode,
    /// Object
    pub object: RdfTerm,
}

impl Triple {
    /// Create a new triple, rejecting literal subjects
    pub fn new(subject: RdfTerm, predicate: NamedNode, object: RdfTerm) -> Option<Self> {
        if subject.kind() == TermKind::Literal {
            return None;
        }
        Some(Self {
            subject,
            predicate,
            object,
        })
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}
