//! SPARQL over R2RML
//!
//! A compiler from SPARQL queries to relational queries over a database
//! described by an R2RML mapping, and the readback of result rows into RDF
//! terms.
//!
//! # Architecture
//!
//! Per query:
//!
//! 1. `spargebra` parses the text; [`sparql::SparqlParser`] lowers it into
//!    the crate's algebra
//! 2. [`sparql::SparqlOptimizer`] expands triple patterns into the mapping
//!    combinations that can produce them and distributes joins over unions
//! 3. [`builder::Builder`] translates the algebra into the relational
//!    calculus plus one value binder per output variable
//! 4. [`optimizer::RelationalOptimizer`] simplifies the calculus and aligns
//!    the binders for readback
//! 5. an [`engine::Database`] renders and runs the SQL; the binders rebuild
//!    terms from the rows
//!
//! The static evaluator in [`eval`] interprets expressions and conditions
//! row by row and is what every optimizer rewrite is checked against.
//!
//! ## Example Usage
//!
//! ```rust
//! use sparql_r2rml::calculus::{RelationalQuery, Row, SqlType, VarId};
//! use sparql_r2rml::engine::{Database, DatabaseResult, RowCursor};
//! use sparql_r2rml::mapping::{
//!     LogicalTable, Mapping, ObjectMap, PredicateObjectMap, SubjectMap, TermMap, TriplesMap,
//! };
//! use sparql_r2rml::rdf::TermKind;
//! use sparql_r2rml::session::{ColumnSchema, StaticSchema, TableSchema};
//! use sparql_r2rml::{EngineConfig, Session, SparqlEngine};
//! use std::sync::Arc;
//!
//! struct NoDatabase;
//!
//! impl Database for NoDatabase {
//!     fn generate_sql(&self, _query: &RelationalQuery) -> DatabaseResult<String> {
//!         Ok(String::new())
//!     }
//!
//!     fn execute(&self, _sql: &str, _columns: &[VarId]) -> DatabaseResult<Box<dyn RowCursor + '_>> {
//!         struct Done;
//!         impl RowCursor for Done {
//!             fn next_row(&mut self) -> DatabaseResult<Option<Row>> {
//!                 Ok(None)
//!             }
//!         }
//!         Ok(Box::new(Done))
//!     }
//! }
//!
//! let subject = SubjectMap::new(TermMap::template("http://s.com/{id}", TermKind::Iri).unwrap());
//! let people = TriplesMap::new("people", LogicalTable::Table("people".to_string()), subject)
//!     .with_predicate_object_map(PredicateObjectMap::new(
//!         TermMap::constant_iri("http://xmlns.com/foaf/0.1/name"),
//!         ObjectMap::Term(TermMap::column("name", TermKind::Literal)),
//!     ));
//! let schema = StaticSchema::new().with_table(
//!     "people",
//!     TableSchema::new(vec![
//!         ColumnSchema::new("id", SqlType::Integer, false),
//!         ColumnSchema::new("name", SqlType::String, true),
//!     ])
//!     .with_primary_key(["id"]),
//! );
//! let session = Session::new(
//!     Arc::new(Mapping::new(vec![people]).unwrap()),
//!     Arc::new(schema),
//!     EngineConfig::default(),
//! );
//! let engine = SparqlEngine::new(Arc::new(session), NoDatabase);
//!
//! let compiled = engine
//!     .compile("SELECT ?name WHERE { <http://s.com/7> <http://xmlns.com/foaf/0.1/name> ?name }")
//!     .unwrap();
//! assert_eq!(compiled.relational.model.base.reachable_table_sources(), 1);
//! assert!(engine.execute("ASK { ?s <http://ex.org/unmapped> ?o }").unwrap().is_empty());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod calculus;
pub mod config;
pub mod engine;
pub mod eval;
pub mod mapping;
pub mod optimizer;
pub mod rdf;
pub mod session;
pub mod sparql;

// Re-export main types for convenience
pub use builder::{BuildError, BuildResult, Builder};
pub use calculus::{RelationalQuery, TypeRegistry, ValueBinder};
pub use config::{ConfigError, ConfigResult, EngineConfig};
pub use engine::{
    CompiledQuery, Database, DatabaseError, DatabaseResult, EngineError, EngineResult, RowCursor,
    SparqlEngine,
};
pub use eval::{EvalError, EvalResult};
pub use mapping::{Mapping, MappingError, MappingResult};
pub use optimizer::{OptimizerError, OptimizerResult, RelationalOptimizer};
pub use rdf::{BlankNode, Literal, NamedNode, RdfError, RdfResult, RdfTerm, Triple};
pub use session::{SchemaError, SchemaLookup, SchemaResult, Session};
pub use sparql::{ParseError, ParseResult, QueryForm, QuerySolution, SparqlResults};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.3.0");
    }
}
