//! SPARQL query results

use crate::rdf::{RdfTerm, Triple};
use std::collections::HashMap;

/// Query solution (variable bindings). Unbound variables have no entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySolution {
    /// Variable name → RDF term bindings
    pub bindings: HashMap<String, RdfTerm>,
}

impl QuerySolution {
    /// Create a new query solution
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Get a binding
    pub fn get(&self, variable: &str) -> Option<&RdfTerm> {
        self.bindings.get(variable)
    }

    /// Add a binding
    pub fn bind(&mut self, variable: String, term: RdfTerm) {
        self.bindings.insert(variable, term);
    }
}

impl Default for QuerySolution {
    fn default() -> Self {
        Self::new()
    }
}

/// SPARQL query results
#[derive(Debug, Clone, PartialEq)]
pub enum SparqlResults {
    /// Bindings from SELECT query
    Bindings {
        /// Variables
        variables: Vec<String>,
        /// Solutions
        solutions: Vec<QuerySolution>,
    },

    /// Boolean result from ASK query
    Boolean(bool),

    /// Graph from CONSTRUCT query
    Graph(Vec<Triple>),
}

impl SparqlResults {
    /// Create empty bindings result
    pub fn empty(variables: Vec<String>) -> Self {
        SparqlResults::Bindings {
            variables,
            solutions: Vec::new(),
        }
    }

    /// Number of solutions, triples, or 1/0 for a boolean
    pub fn len(&self) -> usize {
        match self {
            SparqlResults::Bindings { solutions, .. } => solutions.len(),
            SparqlResults::Boolean(b) => usize::from(*b),
            SparqlResults::Graph(triples) => triples.len(),
        }
    }

    /// True if there is no solution, no triple, or the boolean is false
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
