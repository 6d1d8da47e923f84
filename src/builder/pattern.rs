//! Translation of restricted triple patterns
//!
//! A restricted pattern reads one row of its triples map's logical table
//! (plus one row of the parent table for a referencing object map with join
//! conditions). Every column a term map references gets a fresh calculus
//! variable; variable positions become base binders and constant positions
//! become filters.

use super::expression::{encode, term_equal};
use super::{BuildError, BuildResult, Builder, BuiltPattern};
use crate::calculus::{
    CalculusModel, ColumnBinding, Expression, ExpressionSet, FilterCondition, Source,
    SourceCondition, SqlType, ValueBinder, VarGen, VarId,
};
use crate::mapping::{LogicalTable, ResolvedObject, TermMap, TermValuation};
use crate::rdf::{RdfTerm, TermKind};
use crate::session::{SchemaError, TableSchema};
use crate::sparql::optimizer::term_map_may_produce;
use crate::sparql::{RestrictedTriplePattern, TermPattern};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Variables bound from one row of a logical table
struct TableTuple {
    table: LogicalTable,
    schema: Arc<TableSchema>,
    bindings: Vec<ColumnBinding>,
}

impl TableTuple {
    fn new(table: LogicalTable, schema: Arc<TableSchema>) -> Self {
        Self {
            table,
            schema,
            bindings: Vec::new(),
        }
    }

    /// Variable of a column, allocated on first reference
    fn column(&mut self, vars: &mut VarGen, name: &str) -> BuildResult<VarId> {
        if let Some(binding) = self.bindings.iter().find(|b| b.column == name) {
            return Ok(binding.variable);
        }
        let column = self
            .schema
            .column(name)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: self.table.to_string(),
                column: name.to_string(),
            })?;
        let variable = vars.fresh();
        self.bindings.push(ColumnBinding {
            variable,
            column: name.to_string(),
            sql_type: column.sql_type,
            nullable: column.nullable,
        });
        Ok(variable)
    }

    /// Variables of every column a term map references
    fn columns_of(
        &mut self,
        vars: &mut VarGen,
        term_map: &TermMap,
    ) -> BuildResult<IndexMap<String, VarId>> {
        let mut columns = IndexMap::new();
        for name in term_map.columns() {
            columns.insert(name.to_string(), self.column(vars, name)?);
        }
        Ok(columns)
    }

    fn sql_type(&self, variable: VarId) -> SqlType {
        self.bindings
            .iter()
            .find(|b| b.variable == variable)
            .map(|b| b.sql_type)
            .unwrap_or(SqlType::String)
    }

    fn into_source(self) -> SourceCondition {
        let source = match self.table {
            LogicalTable::Table(name) => Source::Table {
                name,
                primary_key: self.schema.primary_key.clone(),
            },
            LogicalTable::SqlQuery(query) => Source::SqlQuery(query),
        };
        SourceCondition::TupleFromSource {
            source,
            bindings: self.bindings,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Side {
    Child,
    Parent,
}

impl<'s> Builder<'s> {
    fn table_tuple(&self, table: &LogicalTable) -> BuildResult<TableTuple> {
        let schema = self.session.schemas().get(table)?;
        Ok(TableTuple::new(table.clone(), schema))
    }

    /// Translate a triple pattern restricted to one mapping combination
    pub(super) fn restricted(&mut self, r: &RestrictedTriplePattern) -> BuildResult<BuiltPattern> {
        let session = self.session;
        let resolved = session.mapping().resolve(&r.combination).ok_or_else(|| {
            BuildError::Defect(format!("combination of {} does not resolve", r.pattern))
        })?;

        let mut child = self.table_tuple(&resolved.triples_map.logical_table)?;
        let mut parent: Option<TableTuple> = None;
        let mut filters = Vec::new();

        let (object_map, object_side) = match resolved.object {
            ResolvedObject::Term(term_map) => (term_map, Side::Child),
            ResolvedObject::Reference { map, parent: parent_map } => {
                let same_table = parent_map.logical_table == resolved.triples_map.logical_table;
                if map.join_conditions.is_empty() && same_table {
                    (&parent_map.subject_map.term_map, Side::Child)
                } else {
                    let mut tuple = self.table_tuple(&parent_map.logical_table)?;
                    for join in &map.join_conditions {
                        let c = child.column(&mut self.vars, &join.child)?;
                        let p = tuple.column(&mut self.vars, &join.parent)?;
                        filters.push(join_equality(
                            c,
                            child.sql_type(c),
                            p,
                            tuple.sql_type(p),
                        ));
                    }
                    parent = Some(tuple);
                    (&parent_map.subject_map.term_map, Side::Parent)
                }
            }
        };

        let mut positions: Vec<(&TermPattern, &TermMap, Side)> = vec![
            (&r.pattern.subject, resolved.subject, Side::Child),
            (&r.pattern.predicate, resolved.predicate, Side::Child),
            (&r.pattern.object, object_map, object_side),
        ];
        if let Some(graph) = &r.graph {
            let graph_map = resolved.graph.ok_or_else(|| {
                BuildError::Defect(format!("{} has a graph but no graph map", r.pattern))
            })?;
            positions.push((graph, graph_map, Side::Child));
        }

        let mut position_columns = Vec::with_capacity(positions.len());
        for (_, term_map, side) in &positions {
            let tuple = match (side, parent.as_mut()) {
                (Side::Parent, Some(tuple)) => tuple,
                _ => &mut child,
            };
            position_columns.push(tuple.columns_of(&mut self.vars, term_map)?);
        }

        let mut var_types = FxHashMap::default();
        for tuple in std::iter::once(&child).chain(parent.as_ref()) {
            for b in &tuple.bindings {
                var_types.insert(b.variable, b.sql_type);
            }
        }

        // A row produces no triple if any referenced column is null
        let mut not_null = Vec::new();
        for columns in &position_columns {
            for variable in columns.values() {
                if !not_null.contains(variable) {
                    not_null.push(*variable);
                }
            }
        }
        filters.extend(not_null.iter().map(|v| {
            let sql_type = var_types.get(v).copied().unwrap_or(SqlType::String);
            FilterCondition::not_null(Expression::column(*v, sql_type))
        }));

        let types = session.types();
        let mut binders: IndexMap<String, ValueBinder> = IndexMap::new();
        let mut always_bound = BTreeSet::new();
        for ((pattern, term_map, _), columns) in positions.iter().zip(position_columns) {
            match pattern {
                TermPattern::Variable(name) => {
                    let binder = ValueBinder::base((*term_map).clone(), columns);
                    match binders.get(name) {
                        Some(existing) => {
                            let a = encode(existing, &var_types, types, name)?;
                            let b = encode(&binder, &var_types, types, name)?;
                            filters.push(term_equal(&a, &b));
                        }
                        None => {
                            binders.insert(name.clone(), binder);
                            always_bound.insert(name.clone());
                        }
                    }
                }
                TermPattern::Term(term) => {
                    filters.push(self.constant_filter(term_map, &columns, &var_types, term)?);
                }
            }
        }

        let mut sources = vec![child.into_source()];
        sources.extend(parent.map(TableTuple::into_source));
        Ok(BuiltPattern {
            model: CalculusModel {
                sources,
                filters,
                assignments: Vec::new(),
            },
            binders,
            always_bound,
        })
    }

    /// Condition under which a term map produces the given constant term
    fn constant_filter(
        &self,
        term_map: &TermMap,
        columns: &IndexMap<String, VarId>,
        var_types: &FxHashMap<VarId, SqlType>,
        term: &RdfTerm,
    ) -> BuildResult<FilterCondition> {
        if !term_map_may_produce(term_map, term) {
            return Ok(FilterCondition::AlwaysFalse);
        }
        if term_map.is_constant() {
            return Ok(FilterCondition::AlwaysTrue);
        }
        let set = ExpressionSet::from_term_map(term_map, columns, var_types, self.session.types())
            .ok_or_else(|| {
                BuildError::Defect(format!("term map column missing while matching {}", term))
            })?;
        // same kind, datatype and language, then same text
        let constant = ExpressionSet::from_term(term, self.session.types());
        Ok(FilterCondition::and(vec![
            FilterCondition::equal(set.type_id, constant.type_id),
            FilterCondition::equal(set.string, Expression::string(generated_text(term_map, term))),
        ]))
    }
}

/// The text a term map generates for a term. IRI templates may produce a
/// relative IRI that the base IRI turns into the term.
fn generated_text<'t>(term_map: &TermMap, term: &'t RdfTerm) -> &'t str {
    let lexical = term.lexical();
    if let (TermValuation::Template(template), Some(base), TermKind::Iri) =
        (&term_map.valuation, &term_map.base_iri, term_map.term_kind)
    {
        if !template.can_produce(lexical, true) {
            if let Some(relative) = lexical.strip_prefix(base.as_str()) {
                return relative;
            }
        }
    }
    lexical
}

/// Equality of a child and a parent join column. Columns of different SQL
/// types are compared as strings.
fn join_equality(child: VarId, child_type: SqlType, parent: VarId, parent_type: SqlType) -> FilterCondition {
    if child_type == parent_type {
        FilterCondition::EqualVariables(child, parent)
    } else {
        FilterCondition::equal(
            Expression::column(child, child_type).into_string(),
            Expression::column(parent, parent_type).into_string(),
        )
    }
}
