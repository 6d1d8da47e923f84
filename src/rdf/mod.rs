//! RDF term support
//!
//! The compiler never stores triples; it only reconstructs terms from rows and
//! compares pattern constants against term maps. This module wraps the oxrdf
//! primitives used for that and holds the vocabulary constants.

mod types;

pub use types::{BlankNode, Literal, NamedNode, RdfError, RdfResult, RdfTerm, TermKind, Triple};

/// XML Schema datatype IRIs
pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
}

/// RDF vocabulary IRIs
pub mod vocab {
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
    /// `rr:defaultGraph`, the graph map constant naming the default graph
    pub const R2RML_DEFAULT_GRAPH: &str = "http://www.w3.org/ns/r2rml#defaultGraph";
}
