//! Triples maps and their parts

use super::term_map::TermMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical table of a triples map
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalTable {
    /// `rr:tableName`
    Table(String),
    /// `rr:sqlQuery` (R2RML view)
    SqlQuery(String),
}

impl LogicalTable {
    /// Key under which the schema of this logical table is cached
    pub fn schema_key(&self) -> &str {
        match self {
            LogicalTable::Table(name) => name,
            LogicalTable::SqlQuery(sql) => sql,
        }
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalTable::Table(name) => write!(f, "{}", name),
            LogicalTable::SqlQuery(sql) => write!(f, "({})", sql),
        }
    }
}

/// Subject map: the subject term map plus classes and graph maps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectMap {
    pub term_map: TermMap,
    /// `rr:class` IRIs
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub graph_maps: Vec<TermMap>,
}

impl SubjectMap {
    /// Create a subject map without classes or graphs
    pub fn new(term_map: TermMap) -> Self {
        Self {
            term_map,
            classes: Vec::new(),
            graph_maps: Vec::new(),
        }
    }

    /// Add an `rr:class`
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// Add a graph map
    pub fn with_graph(mut self, graph_map: TermMap) -> Self {
        self.graph_maps.push(graph_map);
        self
    }
}

/// `rr:joinCondition`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinCondition {
    /// Column of the child (referencing) logical table
    pub child: String,
    /// Column of the parent logical table
    pub parent: String,
}

/// Reference object map: the object is the subject of another triples map
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefObjectMap {
    pub parent_triples_map: String,
    #[serde(default)]
    pub join_conditions: Vec<JoinCondition>,
}

impl RefObjectMap {
    /// Create a reference to a parent triples map
    pub fn new(parent_triples_map: impl Into<String>) -> Self {
        Self {
            parent_triples_map: parent_triples_map.into(),
            join_conditions: Vec::new(),
        }
    }

    /// Add a join condition
    pub fn with_join(mut self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.join_conditions.push(JoinCondition {
            child: child.into(),
            parent: parent.into(),
        });
        self
    }
}

/// Object position of a predicate-object map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectMap {
    Term(TermMap),
    Reference(RefObjectMap),
}

/// `rr:predicateObjectMap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateObjectMap {
    pub predicate_maps: Vec<TermMap>,
    pub object_maps: Vec<ObjectMap>,
    #[serde(default)]
    pub graph_maps: Vec<TermMap>,
}

impl PredicateObjectMap {
    /// Create a predicate-object map with one predicate and one object
    pub fn new(predicate_map: TermMap, object_map: ObjectMap) -> Self {
        Self {
            predicate_maps: vec![predicate_map],
            object_maps: vec![object_map],
            graph_maps: Vec::new(),
        }
    }

    /// Add a graph map
    pub fn with_graph(mut self, graph_map: TermMap) -> Self {
        self.graph_maps.push(graph_map);
        self
    }
}

/// `rr:TriplesMap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriplesMap {
    /// Name used by reference object maps
    pub name: String,
    pub logical_table: LogicalTable,
    pub subject_map: SubjectMap,
    #[serde(default)]
    pub predicate_object_maps: Vec<PredicateObjectMap>,
}

impl TriplesMap {
    /// Create a triples map without predicate-object maps
    pub fn new(name: impl Into<String>, logical_table: LogicalTable, subject_map: SubjectMap) -> Self {
        Self {
            name: name.into(),
            logical_table,
            subject_map,
            predicate_object_maps: Vec::new(),
        }
    }

    /// Add a predicate-object map
    pub fn with_predicate_object_map(mut self, pom: PredicateObjectMap) -> Self {
        self.predicate_object_maps.push(pom);
        self
    }
}
