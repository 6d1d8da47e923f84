//! Binder alignment
//!
//! The last step before SQL generation. Every binder that is not a plain
//! base binder is turned into an expression set whose components are
//! constants or single columns; computed components become assignments of
//! the top model. The select list is then exactly the variables the binders
//! read.

use super::{OptimizerError, OptimizerResult};
use crate::builder::{binder_variables, guard_errors, materialize};
use crate::calculus::{ExpressionSet, RelationalQuery, TypeRegistry, ValueBinder, VarGen};
use tracing::debug;

/// Align the binders of a query for readback
pub fn align(query: RelationalQuery, types: &TypeRegistry) -> OptimizerResult<RelationalQuery> {
    let var_types = query.model.base.variable_types();
    let mut vars = VarGen::after(&query);
    let RelationalQuery { mut model, binders } = query;

    let mut aligned = indexmap::IndexMap::with_capacity(binders.len());
    for (name, binder) in binders {
        let binder = match binder {
            ValueBinder::Base { .. } => binder,
            ValueBinder::Empty => ValueBinder::ExpressionSet(ExpressionSet::unbound()),
            other => {
                let set = other.to_expression_set(&var_types, types).ok_or_else(|| {
                    OptimizerError::Defect(format!("binder of ?{} reads an unbound column", name))
                })?;
                let set = materialize(guard_errors(set), &mut model.base, &mut vars);
                ValueBinder::ExpressionSet(set)
            }
        };
        aligned.insert(name, binder);
    }

    model.select = binder_variables(&aligned);
    debug!("Aligned query selects {} columns", model.select.len());
    Ok(RelationalQuery {
        model,
        binders: aligned,
    })
}
