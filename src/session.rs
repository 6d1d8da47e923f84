//! Per-mapping session state shared by concurrent queries
//!
//! A session owns the mapping, the schema cache, the type registry and the
//! configuration. All of them are read-only or internally synchronized, so a
//! `Session` can sit behind an `Arc` and serve many queries at once.

use crate::calculus::{SqlType, TypeRegistry};
use crate::config::EngineConfig;
use crate::mapping::{LogicalTable, Mapping};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

/// Schema errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The logical table does not exist
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A term map references a column the table does not have
    #[error("Unknown column {column} in {table}")]
    UnknownColumn { table: String, column: String },

    /// The lookup collaborator failed
    #[error("Schema lookup failed: {0}")]
    Lookup(String),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// One column of a logical table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnSchema {
    /// Create a column description
    pub fn new(name: impl Into<String>, sql_type: SqlType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable,
        }
    }
}

/// Columns and primary key of a logical table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    /// Empty if the table has no declared key
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Create a schema without a primary key
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self {
            columns,
            primary_key: Vec::new(),
        }
    }

    /// Declare the primary key
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Look up a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Resolves logical tables to their schema, typically by asking the
/// database catalog
pub trait SchemaLookup: Send + Sync {
    fn table_schema(&self, table: &LogicalTable) -> SchemaResult<TableSchema>;
}

/// Fixed schema lookup keyed by table name or SQL query text
#[derive(Debug, Clone, Default)]
pub struct StaticSchema {
    tables: HashMap<String, TableSchema>,
}

impl StaticSchema {
    /// Create an empty lookup
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table
    pub fn with_table(mut self, key: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.insert(key.into(), schema);
        self
    }
}

impl SchemaLookup for StaticSchema {
    fn table_schema(&self, table: &LogicalTable) -> SchemaResult<TableSchema> {
        self.tables
            .get(table.schema_key())
            .cloned()
            .ok_or_else(|| SchemaError::UnknownTable(table.to_string()))
    }
}

/// Read-through cache in front of a [`SchemaLookup`]
pub struct SchemaCache {
    lookup: Arc<dyn SchemaLookup>,
    tables: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaCache {
    /// Create an empty cache
    pub fn new(lookup: Arc<dyn SchemaLookup>) -> Self {
        Self {
            lookup,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Schema of a logical table, asking the lookup on first access.
    ///
    /// Two queries racing on the same table may both ask the lookup; the
    /// first insert wins and both get the same `Arc`.
    pub fn get(&self, table: &LogicalTable) -> SchemaResult<Arc<TableSchema>> {
        let key = table.schema_key();
        if let Some(schema) = self
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Ok(Arc::clone(schema));
        }

        let loaded = Arc::new(self.lookup.table_schema(table)?);
        debug!("Loaded schema of {} ({} columns)", table, loaded.columns.len());
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(
            tables.entry(key.to_string()).or_insert(loaded),
        ))
    }

    /// Number of cached tables
    pub fn len(&self) -> usize {
        self.tables.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if nothing is cached yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a query compilation needs besides the query
pub struct Session {
    mapping: Arc<Mapping>,
    schemas: SchemaCache,
    types: TypeRegistry,
    config: EngineConfig,
}

impl Session {
    /// Create a new session
    pub fn new(mapping: Arc<Mapping>, lookup: Arc<dyn SchemaLookup>, config: EngineConfig) -> Self {
        Self {
            mapping,
            schemas: SchemaCache::new(lookup),
            types: TypeRegistry::new(),
            config,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn schemas(&self) -> &SchemaCache {
        &self.schemas
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLookup {
        calls: AtomicUsize,
    }

    impl SchemaLookup for CountingLookup {
        fn table_schema(&self, table: &LogicalTable) -> SchemaResult<TableSchema> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match table {
                LogicalTable::Table(name) if name == "dummy" => Ok(TableSchema::new(vec![
                    ColumnSchema::new("col1", SqlType::String, false),
                ])
                .with_primary_key(["col1"])),
                other => Err(SchemaError::UnknownTable(other.to_string())),
            }
        }
    }

    #[test]
    fn test_cache_reads_through_once() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
        });
        let cache = SchemaCache::new(lookup.clone());
        let table = LogicalTable::Table("dummy".to_string());
        let a = cache.get(&table).unwrap();
        let b = cache.get(&table).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.primary_key, vec!["col1".to_string()]);
        assert!(cache
            .get(&LogicalTable::Table("missing".to_string()))
            .is_err());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_first_access() {
        let lookup = Arc::new(CountingLookup {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(SchemaCache::new(lookup));
        let table = LogicalTable::Table("dummy".to_string());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let table = table.clone();
                std::thread::spawn(move || cache.get(&table).unwrap())
            })
            .collect();
        let schemas: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
    }

    #[test]
    fn test_static_schema() {
        let lookup = StaticSchema::new().with_table(
            "dummy",
            TableSchema::new(vec![ColumnSchema::new("col1", SqlType::Integer, true)]),
        );
        let schema = lookup
            .table_schema(&LogicalTable::Table("dummy".to_string()))
            .unwrap();
        assert_eq!(schema.column("col1").unwrap().sql_type, SqlType::Integer);
        assert!(schema.column("col2").is_none());
    }
}
