//! The calculus model: sources, filters and assignments over calculus
//! variables
//!
//! Variable ids are unique per query. A nested model re-exposes its
//! variables under the same ids, so a reference never needs renaming when a
//! model is wrapped.

use super::binder::ValueBinder;
use super::expression::{Expression, FilterCondition};
use super::types::SqlType;
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

/// Calculus variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl VarId {
    /// SQL column alias of this variable
    pub fn column_name(&self) -> String {
        format!("v{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Per-query generator of fresh variables
#[derive(Debug, Default)]
pub struct VarGen {
    next: usize,
}

impl VarGen {
    /// Create a generator starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator that never reuses an id of `query`
    pub fn after(query: &RelationalQuery) -> Self {
        let mut max = None;
        query.model.for_each_variable(&mut |v| max = max.max(Some(v.0)));
        for binder in query.binders.values() {
            binder.for_each_variable(&mut |v| max = max.max(Some(v.0)));
        }
        Self {
            next: max.map(|m| m + 1).unwrap_or(0),
        }
    }

    /// Allocate a fresh variable
    pub fn fresh(&mut self) -> VarId {
        let id = VarId(self.next);
        self.next += 1;
        id
    }
}

/// Where a tuple comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Physical table
    Table {
        name: String,
        /// Primary key columns, empty if unknown
        primary_key: Vec<String>,
    },
    /// SQL view query (`rr:sqlQuery`)
    SqlQuery(String),
    /// Nested modified model; its select list is the column list
    Model(Box<ModifiedModel>),
}

/// Binding of one source column to a variable
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    pub variable: VarId,
    pub column: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// One branch of a union
#[derive(Debug, Clone, PartialEq)]
pub struct UnionBranch {
    /// Value of the discriminator for rows from this branch
    pub tag: i64,
    pub model: CalculusModel,
}

/// Source conditions bind variables
#[derive(Debug, Clone, PartialEq)]
pub enum SourceCondition {
    /// Bind a tuple of variables from one source
    TupleFromSource {
        source: Source,
        bindings: Vec<ColumnBinding>,
    },
    /// Bind from exactly one of the branches; the discriminator holds the
    /// branch tag and every variable of the other branches is null
    UnionedSources {
        discriminator: VarId,
        branches: Vec<UnionBranch>,
    },
    /// Bind the model's variables if the condition matches, else null
    LeftJoin {
        model: Box<CalculusModel>,
        condition: FilterCondition,
    },
}

impl SourceCondition {
    /// Variables this source exposes to the enclosing model
    pub fn bound_variables(&self, out: &mut Vec<VarId>) {
        match self {
            SourceCondition::TupleFromSource { bindings, .. } => {
                out.extend(bindings.iter().map(|b| b.variable));
            }
            SourceCondition::UnionedSources {
                discriminator,
                branches,
            } => {
                out.push(*discriminator);
                for branch in branches {
                    branch.model.collect_bound(out);
                }
            }
            SourceCondition::LeftJoin { model, .. } => model.collect_bound(out),
        }
    }
}

/// `variable := expression`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub variable: VarId,
    pub expression: Expression,
}

/// A calculus model: the cross product of its sources, restricted by the
/// conjunction of its filters, extended by its assignments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalculusModel {
    pub sources: Vec<SourceCondition>,
    pub filters: Vec<FilterCondition>,
    pub assignments: Vec<Assignment>,
}

impl CalculusModel {
    /// Model producing exactly one empty row
    pub fn unit() -> Self {
        Self::default()
    }

    /// Model producing no rows
    pub fn unsatisfiable() -> Self {
        Self {
            filters: vec![FilterCondition::AlwaysFalse],
            ..Self::default()
        }
    }

    /// True if a top-level filter is `AlwaysFalse`
    pub fn is_unsatisfiable(&self) -> bool {
        self.filters.contains(&FilterCondition::AlwaysFalse)
    }

    /// Number of source conditions that would scan a table, at any depth
    pub fn reachable_table_sources(&self) -> usize {
        if self.is_unsatisfiable() {
            return 0;
        }
        self.sources
            .iter()
            .map(|s| match s {
                SourceCondition::TupleFromSource { source, .. } => match source {
                    Source::Model(m) => m.base.reachable_table_sources(),
                    _ => 1,
                },
                SourceCondition::UnionedSources { branches, .. } => branches
                    .iter()
                    .map(|b| b.model.reachable_table_sources())
                    .sum(),
                SourceCondition::LeftJoin { model, .. } => model.reachable_table_sources(),
            })
            .sum()
    }

    /// Append another model's conditions (cross product)
    pub fn merge(&mut self, other: CalculusModel) {
        self.sources.extend(other.sources);
        self.filters.extend(other.filters);
        self.assignments.extend(other.assignments);
    }

    /// Variables bound at this scope, in binding order
    pub fn bound_variables(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_bound(&mut out);
        out
    }

    fn collect_bound(&self, out: &mut Vec<VarId>) {
        for source in &self.sources {
            source.bound_variables(out);
        }
        out.extend(self.assignments.iter().map(|a| a.variable));
    }

    /// SQL type of every variable bound anywhere in the model
    pub fn variable_types(&self) -> FxHashMap<VarId, SqlType> {
        let mut types = FxHashMap::default();
        self.collect_types(&mut types);
        types
    }

    fn collect_types(&self, types: &mut FxHashMap<VarId, SqlType>) {
        for source in &self.sources {
            match source {
                SourceCondition::TupleFromSource { source, bindings } => {
                    for b in bindings {
                        types.insert(b.variable, b.sql_type);
                    }
                    if let Source::Model(m) = source {
                        m.base.collect_types(types);
                    }
                }
                SourceCondition::UnionedSources {
                    discriminator,
                    branches,
                } => {
                    types.insert(*discriminator, SqlType::Integer);
                    for b in branches {
                        b.model.collect_types(types);
                    }
                }
                SourceCondition::LeftJoin { model, .. } => model.collect_types(types),
            }
        }
        for a in &self.assignments {
            types.insert(a.variable, a.expression.sql_type());
        }
    }

    /// Visit every variable referenced or bound anywhere in the model
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        for source in &self.sources {
            match source {
                SourceCondition::TupleFromSource { source, bindings } => {
                    for b in bindings {
                        f(b.variable);
                    }
                    if let Source::Model(m) = source {
                        m.for_each_variable(f);
                    }
                }
                SourceCondition::UnionedSources {
                    discriminator,
                    branches,
                } => {
                    f(*discriminator);
                    for b in branches {
                        b.model.for_each_variable(f);
                    }
                }
                SourceCondition::LeftJoin { model, condition } => {
                    model.for_each_variable(f);
                    condition.for_each_variable(f);
                }
            }
        }
        for c in &self.filters {
            c.for_each_variable(f);
        }
        for a in &self.assignments {
            f(a.variable);
            a.expression.for_each_variable(f);
        }
    }

    /// Variables referenced without being bound in an enclosing scope.
    /// Empty for every well-formed model.
    pub fn unbound_references(&self) -> Vec<VarId> {
        let mut missing = FxHashSet::default();
        self.check_scope(&FxHashSet::default(), &mut missing);
        let mut missing: Vec<_> = missing.into_iter().collect();
        missing.sort();
        missing
    }

    fn check_scope(&self, outer: &FxHashSet<VarId>, missing: &mut FxHashSet<VarId>) {
        let mut scope = outer.clone();
        scope.extend(self.bound_variables());

        for source in &self.sources {
            match source {
                SourceCondition::TupleFromSource { source, .. } => {
                    if let Source::Model(m) = source {
                        m.check_scope(outer, missing);
                    }
                }
                SourceCondition::UnionedSources { branches, .. } => {
                    for b in branches {
                        b.model.check_scope(outer, missing);
                    }
                }
                SourceCondition::LeftJoin { model, condition } => {
                    model.check_scope(&scope, missing);
                    check_condition(condition, &scope, missing);
                }
            }
        }
        for c in &self.filters {
            check_condition(c, &scope, missing);
        }
        for a in &self.assignments {
            a.expression.for_each_variable(&mut |v| {
                if !scope.contains(&v) {
                    missing.insert(v);
                }
            });
        }
    }
}

fn check_condition(
    condition: &FilterCondition,
    scope: &FxHashSet<VarId>,
    missing: &mut FxHashSet<VarId>,
) {
    match condition {
        FilterCondition::NotExists(model) => model.check_scope(scope, missing),
        FilterCondition::And(cs) | FilterCondition::Or(cs) => {
            for c in cs {
                check_condition(c, scope, missing);
            }
        }
        FilterCondition::Not(c) => check_condition(c, scope, missing),
        other => other.for_each_variable(&mut |v| {
            if !scope.contains(&v) {
                missing.insert(v);
            }
        }),
    }
}

/// Ordering key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub expression: Expression,
    pub descending: bool,
}

/// A model with select list, ordering, slicing and duplicate elimination
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModifiedModel {
    pub base: CalculusModel,
    /// Output columns, in order
    pub select: Vec<VarId>,
    pub order: Vec<OrderKey>,
    pub limit: Option<u64>,
    pub offset: u64,
    pub distinct: bool,
}

impl ModifiedModel {
    /// Wrap a model without modifiers
    pub fn new(base: CalculusModel) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    /// Visit every variable referenced or bound
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        self.base.for_each_variable(f);
        for v in &self.select {
            f(*v);
        }
        for key in &self.order {
            key.expression.for_each_variable(f);
        }
    }

    fn check_scope(&self, outer: &FxHashSet<VarId>, missing: &mut FxHashSet<VarId>) {
        self.base.check_scope(outer, missing);
        let mut scope = outer.clone();
        scope.extend(self.base.bound_variables());
        let mut check = |v: VarId| {
            if !scope.contains(&v) {
                missing.insert(v);
            }
        };
        for v in &self.select {
            check(*v);
        }
        for key in &self.order {
            key.expression.for_each_variable(&mut check);
        }
    }

    /// Variables referenced without being bound; see
    /// [`CalculusModel::unbound_references`]
    pub fn unbound_references(&self) -> Vec<VarId> {
        let mut missing = FxHashSet::default();
        self.check_scope(&FxHashSet::default(), &mut missing);
        let mut missing: Vec<_> = missing.into_iter().collect();
        missing.sort();
        missing
    }
}

/// The compiled relational query: a modified model plus one value binder per
/// output SPARQL variable, in output order
#[derive(Debug, Clone, PartialEq)]
pub struct RelationalQuery {
    pub model: ModifiedModel,
    pub binders: IndexMap<String, ValueBinder>,
}

impl RelationalQuery {
    /// True if the query provably returns no rows
    pub fn is_provably_empty(&self) -> bool {
        self.model.base.is_unsatisfiable() || self.model.limit == Some(0)
    }

    /// Variables referenced by the model or the binders without being bound
    pub fn unbound_references(&self) -> Vec<VarId> {
        let mut missing = self.model.unbound_references();
        let bound: FxHashSet<VarId> = self.model.base.bound_variables().into_iter().collect();
        for binder in self.binders.values() {
            binder.for_each_variable(&mut |v| {
                if !bound.contains(&v) {
                    missing.push(v);
                }
            });
        }
        missing.sort();
        missing.dedup();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, vars: &[(usize, &str)]) -> SourceCondition {
        SourceCondition::TupleFromSource {
            source: Source::Table {
                name: name.to_string(),
                primary_key: vec!["id".to_string()],
            },
            bindings: vars
                .iter()
                .map(|(v, c)| ColumnBinding {
                    variable: VarId(*v),
                    column: c.to_string(),
                    sql_type: SqlType::String,
                    nullable: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_unbound_references() {
        let mut model = CalculusModel::unit();
        model.sources.push(table("t", &[(0, "id")]));
        model
            .filters
            .push(FilterCondition::EqualVariables(VarId(0), VarId(7)));
        assert_eq!(model.unbound_references(), vec![VarId(7)]);

        model.sources.push(table("u", &[(7, "id")]));
        assert!(model.unbound_references().is_empty());
    }

    #[test]
    fn test_left_join_condition_sees_both_sides() {
        let mut right = CalculusModel::unit();
        right.sources.push(table("u", &[(1, "id")]));
        let mut model = CalculusModel::unit();
        model.sources.push(table("t", &[(0, "id")]));
        model.sources.push(SourceCondition::LeftJoin {
            model: Box::new(right),
            condition: FilterCondition::EqualVariables(VarId(0), VarId(1)),
        });
        assert!(model.unbound_references().is_empty());
        assert_eq!(model.bound_variables(), vec![VarId(0), VarId(1)]);
    }

    #[test]
    fn test_union_branches_do_not_see_each_other() {
        let mut a = CalculusModel::unit();
        a.sources.push(table("t", &[(1, "id")]));
        let mut b = CalculusModel::unit();
        b.sources.push(table("u", &[(2, "id")]));
        b.filters
            .push(FilterCondition::EqualVariables(VarId(1), VarId(2)));
        let mut model = CalculusModel::unit();
        model.sources.push(SourceCondition::UnionedSources {
            discriminator: VarId(0),
            branches: vec![
                UnionBranch { tag: 0, model: a },
                UnionBranch { tag: 1, model: b },
            ],
        });
        assert_eq!(model.unbound_references(), vec![VarId(1)]);
    }

    #[test]
    fn test_unsatisfiable_model_has_no_reachable_sources() {
        let mut model = CalculusModel::unsatisfiable();
        model.sources.push(table("t", &[(0, "id")]));
        assert_eq!(model.reachable_table_sources(), 0);
    }
}
