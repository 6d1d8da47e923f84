//! Relational optimizers
//!
//! Passes rewrite a [`RelationalQuery`] into an equivalent one that is cheaper
//! to run. The rewriting passes run in rounds until none of them changes the
//! query; null propagation and alignment run once afterwards.

mod alignment;
mod concat;
mod constant;
mod dead_branch;
mod null_propagation;
mod self_join;

pub use alignment::align;
pub use concat::ConcatInEquality;
pub use constant::ConstantFolding;
pub use dead_branch::DeadBranchElimination;
pub use null_propagation::NullPropagation;
pub use self_join::SelfJoinElimination;

use crate::calculus::{RelationalQuery, TypeRegistry};
use crate::config::EngineConfig;
use std::borrow::Cow;
use thiserror::Error;
use tracing::{debug, warn};

/// Optimizer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    /// The query violates an internal invariant
    #[error("Optimizer defect: {0}")]
    Defect(String),
}

pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// A semantics-preserving rewrite of a relational query
pub trait Pass {
    /// Name used in log output
    fn name(&self) -> &'static str;

    /// Rewrite the query; `Cow::Borrowed` if nothing applies
    fn apply<'q>(&self, query: &'q RelationalQuery) -> Cow<'q, RelationalQuery>;
}

/// Runs the enabled passes
pub struct RelationalOptimizer<'a> {
    config: &'a EngineConfig,
    types: &'a TypeRegistry,
}

impl<'a> RelationalOptimizer<'a> {
    /// Create an optimizer for the given settings
    pub fn new(config: &'a EngineConfig, types: &'a TypeRegistry) -> Self {
        Self { config, types }
    }

    fn passes(&self) -> Vec<Box<dyn Pass>> {
        let mut passes: Vec<Box<dyn Pass>> = Vec::new();
        if self.config.concat_in_equality {
            passes.push(Box::new(ConcatInEquality));
        }
        if self.config.constant_folding {
            passes.push(Box::new(ConstantFolding));
        }
        if self.config.self_join_elimination {
            passes.push(Box::new(SelfJoinElimination));
        }
        if self.config.dead_branch_elimination {
            passes.push(Box::new(DeadBranchElimination));
        }
        passes
    }

    /// Optimize a query and align its binders for readback
    pub fn optimize(&self, mut query: RelationalQuery) -> OptimizerResult<RelationalQuery> {
        let passes = self.passes();
        let mut converged = passes.is_empty();
        for round in 0..self.config.max_optimizer_passes {
            let mut changed = false;
            for pass in &passes {
                let next = match pass.apply(&query) {
                    Cow::Owned(q) => Some(q),
                    Cow::Borrowed(_) => None,
                };
                if let Some(q) = next {
                    debug!("Round {}: {} changed the query", round, pass.name());
                    query = q;
                    changed = true;
                }
            }
            if !changed {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                "Optimizer did not reach a fixpoint after {} rounds",
                self.config.max_optimizer_passes
            );
        }

        if self.config.null_propagation {
            if let Cow::Owned(q) = NullPropagation.apply(&query) {
                debug!("{} changed the query", NullPropagation.name());
                query = q;
            }
            if self.config.constant_folding {
                if let Cow::Owned(q) = ConstantFolding.apply(&query) {
                    query = q;
                }
            }
        }
        align(query, self.types)
    }
}
