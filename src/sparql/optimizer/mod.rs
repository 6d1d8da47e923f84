//! SPARQL-level optimizer pipeline
//!
//! Runs on the algebra before translation. Expansion is mandatory since the
//! builder only accepts restricted patterns; distribution is optional.

mod distribute;
mod expand;

pub use distribute::distribute;
pub use expand::{expand, term_map_may_produce};

use super::algebra::AlgebraNode;
use crate::config::EngineConfig;
use crate::mapping::Mapping;
use tracing::debug;

/// SPARQL query optimizer
pub struct SparqlOptimizer<'a> {
    mapping: &'a Mapping,
    config: &'a EngineConfig,
}

impl<'a> SparqlOptimizer<'a> {
    /// Create a new optimizer
    pub fn new(mapping: &'a Mapping, config: &'a EngineConfig) -> Self {
        Self { mapping, config }
    }

    /// Optimize a query
    pub fn optimize(&self, node: &AlgebraNode) -> AlgebraNode {
        let expanded = expand(node, self.mapping);
        debug!("Expanded triple patterns: {}", expanded);
        if !self.config.distribute_unions {
            return expanded;
        }
        let distributed = distribute(&expanded, self.config.max_union_branches);
        debug!("Distributed joins over unions: {}", distributed);
        distributed
    }
}
