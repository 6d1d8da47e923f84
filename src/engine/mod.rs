//! Query orchestration
//!
//! [`SparqlEngine`] runs one query through the whole pipeline: lowering,
//! SPARQL-level optimization, translation, relational optimization, SQL
//! generation and execution by the [`Database`] collaborator, and readback of
//! the rows into SPARQL results.
//!
//! A cursor never outlives the call that opened it. Abandoning a result early
//! (ASK stops at the first row) or failing on a read drops the cursor, which
//! releases its connection.

mod database;

pub use database::{Database, DatabaseError, DatabaseResult, RowCursor};

use crate::builder::{BuildError, Builder};
use crate::calculus::{RelationalQuery, Row};
use crate::optimizer::{OptimizerError, RelationalOptimizer};
use crate::rdf::{BlankNode, RdfTerm, Triple};
use crate::session::Session;
use crate::sparql::{
    AlgebraNode, ParseError, QueryForm, QuerySolution, SparqlOptimizer, SparqlParser,
    SparqlResults, TermPattern, TriplePattern,
};
use indexmap::IndexSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or unsupported query
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Translation failed
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    /// SQL generation or execution failed
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// The compiled query violates an internal invariant
    #[error("Compiler defect: {0}")]
    Defect(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A query ready for SQL generation
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub form: QueryForm,
    pub relational: RelationalQuery,
}

/// SPARQL engine over one session and one database
pub struct SparqlEngine<D: Database> {
    session: Arc<Session>,
    database: D,
}

impl<D: Database> SparqlEngine<D> {
    /// Create a new engine
    pub fn new(session: Arc<Session>, database: D) -> Self {
        Self { session, database }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    /// Compile a query without running it
    pub fn compile(&self, query: &str) -> EngineResult<CompiledQuery> {
        let parsed = SparqlParser::parse(query)?;
        let session = &*self.session;

        let mut pattern = SparqlOptimizer::new(session.mapping(), session.config())
            .optimize(&parsed.pattern);
        let output: Vec<String> = match &parsed.form {
            QueryForm::Select { variables } => variables.clone(),
            QueryForm::Ask => {
                pattern = AlgebraNode::Slice {
                    inner: Box::new(pattern),
                    offset: 0,
                    limit: Some(1),
                };
                Vec::new()
            }
            QueryForm::Construct { template } => template_variables(template),
        };

        let relational = Builder::new(session).build_query(&pattern, &output)?;
        let relational =
            RelationalOptimizer::new(session.config(), session.types()).optimize(relational)?;

        let missing = relational.unbound_references();
        if !missing.is_empty() {
            return Err(EngineError::Defect(format!(
                "unbound variables {:?} in compiled query",
                missing
            )));
        }
        debug!(
            "Compiled query reads {} table sources",
            relational.model.base.reachable_table_sources()
        );
        Ok(CompiledQuery {
            form: parsed.form,
            relational,
        })
    }

    /// SQL text of a query, or `None` if the query is provably empty
    pub fn sql(&self, query: &str) -> EngineResult<Option<String>> {
        let compiled = self.compile(query)?;
        if compiled.relational.is_provably_empty() {
            return Ok(None);
        }
        Ok(Some(self.database.generate_sql(&compiled.relational)?))
    }

    /// Compile and run a query
    pub fn execute(&self, query: &str) -> EngineResult<SparqlResults> {
        let compiled = self.compile(query)?;
        self.run(&compiled)
    }

    /// Run a compiled query
    pub fn run(&self, compiled: &CompiledQuery) -> EngineResult<SparqlResults> {
        match &compiled.form {
            QueryForm::Select { variables } => {
                let mut solutions = Vec::new();
                self.for_each_row(&compiled.relational, |row| {
                    solutions.push(self.solution(&compiled.relational, row));
                    true
                })?;
                info!("SELECT returned {} solutions", solutions.len());
                Ok(SparqlResults::Bindings {
                    variables: variables.clone(),
                    solutions,
                })
            }
            QueryForm::Ask => {
                let mut found = false;
                self.for_each_row(&compiled.relational, |_| {
                    found = true;
                    false
                })?;
                Ok(SparqlResults::Boolean(found))
            }
            QueryForm::Construct { template } => {
                let mut triples = IndexSet::new();
                let mut index = 0usize;
                self.for_each_row(&compiled.relational, |row| {
                    let solution = self.solution(&compiled.relational, row);
                    triples.extend(instantiate(template, &solution, index));
                    index += 1;
                    true
                })?;
                info!("CONSTRUCT produced {} triples", triples.len());
                Ok(SparqlResults::Graph(triples.into_iter().collect()))
            }
        }
    }

    /// Feed rows to `f` until it returns false or the rows run out
    fn for_each_row<F>(&self, query: &RelationalQuery, mut f: F) -> EngineResult<()>
    where
        F: FnMut(&Row) -> bool,
    {
        if query.is_provably_empty() {
            debug!("Query is provably empty, skipping the database");
            return Ok(());
        }
        let sql = self.database.generate_sql(query)?;
        debug!("Generated SQL: {}", sql);
        let mut cursor = self.database.execute(&sql, &query.model.select)?;
        while let Some(row) = cursor.next_row()? {
            if !f(&row) {
                break;
            }
        }
        Ok(())
    }

    fn solution(&self, query: &RelationalQuery, row: &Row) -> QuerySolution {
        let mut solution = QuerySolution::new();
        for (name, binder) in &query.binders {
            if let Some(term) = binder.read(row, self.session.types()) {
                solution.bind(name.clone(), term);
            }
        }
        solution
    }
}

/// Variables of a CONSTRUCT template in first-occurrence order
fn template_variables(template: &[TriplePattern]) -> Vec<String> {
    let mut variables = IndexSet::new();
    for triple in template {
        variables.extend(triple.variables().map(str::to_string));
    }
    variables.into_iter().collect()
}

/// Template triples for one solution. Triples with an unbound variable or an
/// ill-formed position are skipped; blank nodes are fresh per solution.
fn instantiate(template: &[TriplePattern], solution: &QuerySolution, index: usize) -> Vec<Triple> {
    let term = |pattern: &TermPattern| -> Option<RdfTerm> {
        match pattern {
            TermPattern::Variable(v) => solution.get(v).cloned(),
            TermPattern::Term(RdfTerm::BlankNode(b)) => {
                BlankNode::new(&format!("{}x{}", b.as_str(), index))
                    .ok()
                    .map(RdfTerm::BlankNode)
            }
            TermPattern::Term(t) => Some(t.clone()),
        }
    };
    template
        .iter()
        .filter_map(|t| {
            let predicate = term(&t.predicate)?.as_named_node()?.clone();
            Triple::new(term(&t.subject)?, predicate, term(&t.object)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::dummy_session;
    use crate::calculus::VarId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and never returns rows
    #[derive(Default)]
    struct NullDatabase {
        generated: AtomicUsize,
    }

    struct NoRows;

    impl RowCursor for NoRows {
        fn next_row(&mut self) -> DatabaseResult<Option<Row>> {
            Ok(None)
        }
    }

    impl Database for NullDatabase {
        fn generate_sql(&self, _query: &RelationalQuery) -> DatabaseResult<String> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            Ok("SELECT 1".to_string())
        }

        fn execute(&self, _sql: &str, _columns: &[VarId]) -> DatabaseResult<Box<dyn RowCursor + '_>> {
            Ok(Box::new(NoRows))
        }
    }

    fn engine() -> SparqlEngine<NullDatabase> {
        SparqlEngine::new(Arc::new(dummy_session()), NullDatabase::default())
    }

    #[test]
    fn test_provably_empty_query_skips_database() {
        let engine = engine();
        let results = engine
            .execute("SELECT ?s WHERE { ?s <http://p.com/other> ?o }")
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(engine.database().generated.load(Ordering::SeqCst), 0);
        assert_eq!(
            engine.sql("SELECT ?s WHERE { ?s <http://p.com/other> ?o }").unwrap(),
            None
        );
    }

    #[test]
    fn test_mapped_query_reaches_database() {
        let engine = engine();
        let results = engine
            .execute("SELECT ?s ?o WHERE { ?s <http://p.com/col2> ?o }")
            .unwrap();
        assert_eq!(results, SparqlResults::empty(vec!["s".to_string(), "o".to_string()]));
        assert_eq!(engine.database().generated.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.execute("ASK { ?s <http://p.com/col2> ?o }").unwrap(),
            SparqlResults::Boolean(false)
        );
    }

    #[test]
    fn test_ask_is_limited_to_one_row() {
        let compiled = engine().compile("ASK { ?s <http://p.com/col2> ?o }").unwrap();
        assert_eq!(compiled.relational.model.limit, Some(1));
        assert!(compiled.relational.binders.is_empty());
    }

    #[test]
    fn test_unsupported_query_is_a_parse_error() {
        assert!(matches!(
            engine().compile("DESCRIBE <http://s.com/1>"),
            Err(EngineError::Parse(ParseError::Unsupported(_)))
        ));
        assert!(matches!(
            engine().compile("SELECT WHERE"),
            Err(EngineError::Parse(ParseError::Syntax(_)))
        ));
    }

    #[test]
    fn test_template_instantiation() {
        let template = vec![
            TriplePattern::new(
                TermPattern::var("s"),
                TermPattern::iri("http://p.com/copy"),
                TermPattern::var("o"),
            ),
            TriplePattern::new(
                TermPattern::Term(RdfTerm::BlankNode(BlankNode::new("b").unwrap())),
                TermPattern::iri("http://p.com/of"),
                TermPattern::var("s"),
            ),
            // literal subject, skipped
            TriplePattern::new(
                TermPattern::var("o"),
                TermPattern::iri("http://p.com/back"),
                TermPattern::var("s"),
            ),
        ];
        assert_eq!(template_variables(&template), vec!["s", "o"]);

        let mut solution = QuerySolution::new();
        solution.bind("s".to_string(), RdfTerm::iri("http://s.com/1").unwrap());
        solution.bind("o".to_string(), RdfTerm::string("x"));
        let first = instantiate(&template, &solution, 0);
        let second = instantiate(&template, &solution, 1);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0], second[0]);
        // blank nodes differ per solution
        assert_ne!(first[1], second[1]);

        let mut partial = QuerySolution::new();
        partial.bind("s".to_string(), RdfTerm::iri("http://s.com/1").unwrap());
        assert_eq!(instantiate(&template, &partial, 0).len(), 1);
    }
}
