//! SPARQL query language support
//!
//! This module holds the algebra the compiler works on, the ingress adapter
//! from spargebra, the algebra-level optimizers and the result types.
//!
//! # Example
//!
//! ```rust,ignore
//! use sparql_r2rml::sparql::{SparqlParser, QueryForm};
//!
//! let parsed = SparqlParser::parse(
//!     "SELECT ?s WHERE { ?s <http://ex.org/p> ?o }",
//! ).unwrap();
//! assert!(matches!(parsed.form, QueryForm::Select { .. }));
//! ```

pub mod algebra;
pub mod expression;
pub mod optimizer;
mod parser;
mod results;

pub use algebra::{AlgebraNode, OrderCondition, RestrictedTriplePattern, TermPattern, TriplePattern};
pub use expression::SparqlExpression;
pub use optimizer::SparqlOptimizer;
pub use parser::{ParseError, ParseResult, ParsedQuery, QueryForm, SparqlParser};
pub use results::{QuerySolution, SparqlResults};
