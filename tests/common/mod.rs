//! Shared fixtures for integration tests
//!
//! `TableDatabase` stands in for a SQL backend. It interprets the compiled
//! relational query directly over in-memory tables with the same evaluator
//! the optimizers are checked against, so a test sees exactly the rows the
//! generated SQL would return.

#![allow(dead_code)]

use sparql_r2rml::calculus::{
    CalculusModel, CompareOp, FilterCondition, ModifiedModel, RelationalQuery, Row, Source,
    SourceCondition, SqlType, Value, VarId,
};
use sparql_r2rml::engine::{Database, DatabaseError, DatabaseResult, RowCursor};
use sparql_r2rml::eval::{compare, evaluate_expression, evaluate_filter, Truth};
use sparql_r2rml::mapping::{
    LogicalTable, Mapping, ObjectMap, PredicateObjectMap, RefObjectMap, SubjectMap, TermMap,
    TriplesMap,
};
use sparql_r2rml::rdf::TermKind;
use sparql_r2rml::session::{ColumnSchema, StaticSchema, TableSchema};
use sparql_r2rml::sparql::SparqlResults;
use sparql_r2rml::{EngineConfig, Session, SparqlEngine};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FOAF_NAME: &str = "http://xmlns.com/foaf/0.1/name";
pub const EX: &str = "http://ex.org/";

pub type TableRow = HashMap<String, Value>;

pub fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

/// In-memory tables answering compiled queries
pub struct TableDatabase {
    tables: HashMap<String, Vec<TableRow>>,
    pending: Mutex<Option<RelationalQuery>>,
    /// Statements executed so far
    pub executed: AtomicUsize,
    /// Cursors not yet dropped
    pub open_cursors: Arc<AtomicUsize>,
    /// Fail reading after this many rows
    pub fail_after: Option<usize>,
}

impl TableDatabase {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            pending: Mutex::new(None),
            executed: AtomicUsize::new(0),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    pub fn with_table(mut self, name: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .map(|c| c.to_string())
                    .zip(values)
                    .collect::<TableRow>()
            })
            .collect();
        self.tables.insert(name.to_string(), rows);
        self
    }

    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn run_modified(&self, model: &ModifiedModel, outer: &Row) -> DatabaseResult<Vec<Row>> {
        let mut rows = self.run_model(&model.base, outer)?;

        if !model.order.is_empty() {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let mut keys = Vec::with_capacity(model.order.len());
                for key in &model.order {
                    keys.push(evaluate_expression(&key.expression, &row).map_err(execution)?);
                }
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), key) in a.iter().zip(b).zip(&model.order) {
                    let ordering = order_values(x, y);
                    let ordering = if key.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != CmpOrdering::Equal {
                        return ordering;
                    }
                }
                CmpOrdering::Equal
            });
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        if model.distinct {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            rows.retain(|row| {
                let key: Vec<Value> = model.select.iter().map(|v| row.get(*v).clone()).collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        let limit = model.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(model.offset as usize)
            .take(limit)
            .collect())
    }

    fn run_model(&self, model: &CalculusModel, outer: &Row) -> DatabaseResult<Vec<Row>> {
        let mut rows = vec![outer.clone()];
        for source in &model.sources {
            let mut next = Vec::new();
            for row in &rows {
                next.extend(self.run_source(source, row)?);
            }
            rows = next;
        }

        let mut kept = Vec::with_capacity(rows.len());
        for mut row in rows {
            let mut passes = true;
            for filter in &model.filters {
                if !self.truth(filter, &row)?.is_true() {
                    passes = false;
                    break;
                }
            }
            if !passes {
                continue;
            }
            for assignment in &model.assignments {
                let value = evaluate_expression(&assignment.expression, &row).map_err(execution)?;
                row.set(assignment.variable, value);
            }
            kept.push(row);
        }
        Ok(kept)
    }

    fn run_source(&self, source: &SourceCondition, row: &Row) -> DatabaseResult<Vec<Row>> {
        match source {
            SourceCondition::TupleFromSource { source, bindings } => match source {
                Source::Table { name, .. } => {
                    let table = self
                        .tables
                        .get(name)
                        .ok_or_else(|| DatabaseError::Execution(format!("no table {}", name)))?;
                    Ok(table
                        .iter()
                        .map(|tuple| {
                            let mut out = row.clone();
                            for b in bindings {
                                let value = tuple.get(&b.column).cloned().unwrap_or(Value::Null);
                                out.set(b.variable, value);
                            }
                            out
                        })
                        .collect())
                }
                Source::Model(inner) => {
                    let tuples = self.run_modified(inner, &Row::new())?;
                    Ok(tuples
                        .iter()
                        .map(|tuple| {
                            let mut out = row.clone();
                            for b in bindings {
                                let value = inner
                                    .select
                                    .iter()
                                    .find(|v| v.column_name() == b.column)
                                    .map(|v| tuple.get(*v).clone())
                                    .unwrap_or(Value::Null);
                                out.set(b.variable, value);
                            }
                            out
                        })
                        .collect())
                }
                Source::SqlQuery(sql) => Err(DatabaseError::Execution(format!(
                    "views are not supported: {}",
                    sql
                ))),
            },
            SourceCondition::UnionedSources {
                discriminator,
                branches,
            } => {
                let mut out = Vec::new();
                for branch in branches {
                    for mut tuple in self.run_model(&branch.model, row)? {
                        tuple.set(*discriminator, Value::Integer(branch.tag));
                        out.push(tuple);
                    }
                }
                Ok(out)
            }
            SourceCondition::LeftJoin { model, condition } => {
                let mut matches = Vec::new();
                for tuple in self.run_model(model, row)? {
                    if self.truth(condition, &tuple)?.is_true() {
                        matches.push(tuple);
                    }
                }
                if matches.is_empty() {
                    Ok(vec![row.clone()])
                } else {
                    Ok(matches)
                }
            }
        }
    }

    fn truth(&self, condition: &FilterCondition, row: &Row) -> DatabaseResult<Truth> {
        Ok(match condition {
            FilterCondition::NotExists(model) => Truth::from(self.run_model(model, row)?.is_empty()),
            FilterCondition::And(cs) => {
                let mut acc = Truth::True;
                for c in cs {
                    acc = acc.and(self.truth(c, row)?);
                }
                acc
            }
            FilterCondition::Or(cs) => {
                let mut acc = Truth::False;
                for c in cs {
                    acc = acc.or(self.truth(c, row)?);
                }
                acc
            }
            FilterCondition::Not(c) => self.truth(c, row)?.not(),
            other => evaluate_filter(other, row).map_err(execution)?,
        })
    }
}

impl Default for TableDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn execution(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Execution(e.to_string())
}

/// NULL first, then the order `compare` defines
fn order_values(a: &Value, b: &Value) -> CmpOrdering {
    match (a.is_null(), b.is_null()) {
        (true, true) => CmpOrdering::Equal,
        (true, false) => CmpOrdering::Less,
        (false, true) => CmpOrdering::Greater,
        (false, false) => {
            if compare(CompareOp::Lt, a, b).is_true() {
                CmpOrdering::Less
            } else if compare(CompareOp::Gt, a, b).is_true() {
                CmpOrdering::Greater
            } else {
                CmpOrdering::Equal
            }
        }
    }
}

impl Database for TableDatabase {
    fn generate_sql(&self, query: &RelationalQuery) -> DatabaseResult<String> {
        let sql = format!(
            "SELECT {} /* {} table sources */",
            query
                .model
                .select
                .iter()
                .map(|v| v.column_name())
                .collect::<Vec<_>>()
                .join(", "),
            query.model.base.reachable_table_sources()
        );
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(query.clone());
        Ok(sql)
    }

    fn execute(&self, _sql: &str, _columns: &[VarId]) -> DatabaseResult<Box<dyn RowCursor + '_>> {
        let query = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| DatabaseError::Execution("no statement prepared".to_string()))?;
        let rows = self.run_modified(&query.model, &Row::new())?;
        self.executed.fetch_add(1, Ordering::SeqCst);
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TableCursor {
            rows: rows.into_iter(),
            served: 0,
            fail_after: self.fail_after,
            open: Arc::clone(&self.open_cursors),
        }))
    }
}

struct TableCursor {
    rows: std::vec::IntoIter<Row>,
    served: usize,
    fail_after: Option<usize>,
    open: Arc<AtomicUsize>,
}

impl RowCursor for TableCursor {
    fn next_row(&mut self) -> DatabaseResult<Option<Row>> {
        if self.fail_after == Some(self.served) {
            return Err(DatabaseError::Read("connection reset".to_string()));
        }
        self.served += 1;
        Ok(self.rows.next())
    }
}

impl Drop for TableCursor {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `dummy(col1 pk, col2)`, `people(id pk, name, dept)` and `dept(id pk, label)`
pub fn schema() -> StaticSchema {
    StaticSchema::new()
        .with_table(
            "dummy",
            TableSchema::new(vec![
                ColumnSchema::new("col1", SqlType::String, false),
                ColumnSchema::new("col2", SqlType::String, true),
            ])
            .with_primary_key(["col1"]),
        )
        .with_table(
            "people",
            TableSchema::new(vec![
                ColumnSchema::new("id", SqlType::Integer, false),
                ColumnSchema::new("name", SqlType::String, true),
                ColumnSchema::new("dept", SqlType::Integer, true),
            ])
            .with_primary_key(["id"]),
        )
        .with_table(
            "dept",
            TableSchema::new(vec![
                ColumnSchema::new("id", SqlType::Integer, false),
                ColumnSchema::new("label", SqlType::String, false),
            ])
            .with_primary_key(["id"]),
        )
}

pub fn mapping() -> Mapping {
    let dummy = TriplesMap::new(
        "dummy",
        LogicalTable::Table("dummy".to_string()),
        SubjectMap::new(TermMap::template("http://s.com/{col1}", TermKind::Iri).unwrap()),
    )
    .with_predicate_object_map(PredicateObjectMap::new(
        TermMap::constant_iri("http://p.com/col2"),
        ObjectMap::Term(TermMap::column("col2", TermKind::Literal)),
    ));

    let person = TriplesMap::new(
        "person",
        LogicalTable::Table("people".to_string()),
        SubjectMap::new(TermMap::template("http://ex.org/person/{id}", TermKind::Iri).unwrap())
            .with_class("http://ex.org/Person"),
    )
    .with_predicate_object_map(PredicateObjectMap::new(
        TermMap::constant_iri(FOAF_NAME),
        ObjectMap::Term(TermMap::column("name", TermKind::Literal)),
    ))
    .with_predicate_object_map(PredicateObjectMap::new(
        TermMap::constant_iri("http://ex.org/dept"),
        ObjectMap::Reference(RefObjectMap::new("dept").with_join("dept", "id")),
    ));

    let dept = TriplesMap::new(
        "dept",
        LogicalTable::Table("dept".to_string()),
        SubjectMap::new(TermMap::template("http://ex.org/dept/{id}", TermKind::Iri).unwrap())
            .with_class("http://ex.org/Dept"),
    )
    .with_predicate_object_map(PredicateObjectMap::new(
        TermMap::constant_iri("http://ex.org/label"),
        ObjectMap::Term(TermMap::column("label", TermKind::Literal)),
    ));

    Mapping::new(vec![dummy, person, dept]).unwrap()
}

pub fn session(config: EngineConfig) -> Session {
    Session::new(Arc::new(mapping()), Arc::new(schema()), config)
}

pub fn database() -> TableDatabase {
    TableDatabase::new()
        .with_table(
            "dummy",
            &["col1", "col2"],
            vec![
                vec![text("12"), text("x")],
                vec![text("7"), Value::Null],
                vec![text("a b"), text("y")],
            ],
        )
        .with_table(
            "people",
            &["id", "name", "dept"],
            vec![
                vec![Value::Integer(1), text("Alice"), Value::Integer(10)],
                vec![Value::Integer(2), Value::Null, Value::Integer(10)],
                vec![Value::Integer(3), text("Carol"), Value::Null],
            ],
        )
        .with_table(
            "dept",
            &["id", "label"],
            vec![
                vec![Value::Integer(10), text("Research")],
                vec![Value::Integer(20), text("Sales")],
            ],
        )
}

pub fn engine(config: EngineConfig) -> SparqlEngine<TableDatabase> {
    SparqlEngine::new(Arc::new(session(config)), database())
}

/// Solutions as sorted `?var=term` lines, independent of row order
pub fn rendered(results: &SparqlResults) -> Vec<String> {
    let mut lines: Vec<String> = match results {
        SparqlResults::Bindings { solutions, .. } => solutions
            .iter()
            .map(|s| {
                let mut parts: Vec<String> = s
                    .bindings
                    .iter()
                    .map(|(k, v)| format!("?{}={}", k, v))
                    .collect();
                parts.sort();
                parts.join(" ")
            })
            .collect(),
        SparqlResults::Boolean(b) => vec![b.to_string()],
        SparqlResults::Graph(triples) => triples.iter().map(|t| t.to_string()).collect(),
    };
    lines.sort();
    lines
}

/// Bound values of one variable, in solution order
pub fn column(results: &SparqlResults, variable: &str) -> Vec<Option<String>> {
    match results {
        SparqlResults::Bindings { solutions, .. } => solutions
            .iter()
            .map(|s| s.get(variable).map(|t| t.lexical().to_string()))
            .collect(),
        _ => Vec::new(),
    }
}
