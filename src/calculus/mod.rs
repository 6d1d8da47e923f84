//! Relational calculus: the intermediate representation between the SPARQL
//! algebra and SQL text
//!
//! A query compiles into a [`RelationalQuery`]: a [`ModifiedModel`] plus one
//! [`ValueBinder`] per output variable. Models are immutable values; passes
//! rewrite them through the traversal in [`rewrite`].

pub mod binder;
pub mod expression;
pub mod expression_set;
pub mod model;
pub mod rewrite;
pub mod types;

pub use binder::ValueBinder;
pub use expression::{CaseBranch, CompareOp, Expression, FilterCondition};
pub use expression_set::ExpressionSet;
pub use model::{
    Assignment, CalculusModel, ColumnBinding, ModifiedModel, OrderKey, RelationalQuery, Source,
    SourceCondition, UnionBranch, VarGen, VarId,
};
pub use types::{SqlType, TypeCategory, TypeRegistry, Value};

use rustc_hash::FxHashMap;

static NULL: Value = Value::Null;

/// One result row, keyed by calculus variable. Missing variables read as
/// NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: FxHashMap<VarId, Value>,
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a row from variable/value pairs
    pub fn from_pairs(pairs: impl IntoIterator<Item = (VarId, Value)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    /// Value of a variable
    pub fn get(&self, variable: VarId) -> &Value {
        self.values.get(&variable).unwrap_or(&NULL)
    }

    /// Set the value of a variable
    pub fn set(&mut self, variable: VarId, value: Value) {
        self.values.insert(variable, value);
    }
}
