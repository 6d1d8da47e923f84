//! End-to-end tests: SPARQL text in, RDF terms out, over in-memory tables

mod common;

use common::*;
use sparql_r2rml::sparql::SparqlResults;
use sparql_r2rml::{DatabaseError, EngineConfig, EngineError, SparqlEngine};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn some(values: &[&str]) -> Vec<Option<String>> {
    values.iter().map(|v| Some(v.to_string())).collect()
}

#[test]
fn test_unmapped_predicate_never_reaches_the_database() {
    init_tracing();
    let engine = engine(EngineConfig::default());
    let compiled = engine
        .compile("SELECT ?s WHERE { ?s <http://p.com/absent> ?o }")
        .unwrap();
    assert_eq!(compiled.relational.model.base.reachable_table_sources(), 0);

    let results = engine
        .execute("SELECT ?s WHERE { ?s <http://p.com/absent> ?o }")
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(engine.database().executed(), 0);
}

#[test]
fn test_all_triples_of_a_predicate() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute("SELECT ?s ?o WHERE { ?s <http://p.com/col2> ?o }")
        .unwrap();
    // the row with a NULL col2 produces no triple
    assert_eq!(
        rendered(&results),
        vec![
            "?o=\"x\" ?s=<http://s.com/12>".to_string(),
            "?o=\"y\" ?s=<http://s.com/a%20b>".to_string(),
        ]
    );
}

#[test]
fn test_constant_subject_round_trip() {
    let engine = engine(EngineConfig::default());
    let query = "SELECT ?o WHERE { <http://s.com/12> <http://p.com/col2> ?o }";

    let compiled = engine.compile(query).unwrap();
    assert_eq!(compiled.relational.model.base.reachable_table_sources(), 1);

    let results = engine.execute(query).unwrap();
    assert_eq!(column(&results, "o"), some(&["x"]));
}

#[test]
fn test_escaped_template_value_round_trip() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute("SELECT ?o WHERE { <http://s.com/a%20b> <http://p.com/col2> ?o }")
        .unwrap();
    assert_eq!(column(&results, "o"), some(&["y"]));

    let results = engine
        .execute("SELECT ?s WHERE { ?s <http://p.com/col2> \"y\" }")
        .unwrap();
    assert_eq!(column(&results, "s"), some(&["http://s.com/a%20b"]));
}

#[test]
fn test_subject_outside_every_template_is_empty() {
    let engine = engine(EngineConfig::default());
    let query = "SELECT ?o WHERE { <http://other.com/12> <http://p.com/col2> ?o }";
    assert_eq!(engine.sql(query).unwrap(), None);
    assert!(engine.execute(query).unwrap().is_empty());
    assert_eq!(engine.database().executed(), 0);
}

#[test]
fn test_optional_leaves_variables_unbound() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "SELECT ?p ?n WHERE { \
               ?p a <http://ex.org/Person> \
               OPTIONAL { ?p <http://xmlns.com/foaf/0.1/name> ?n } \
             }",
        )
        .unwrap();
    assert_eq!(
        rendered(&results),
        vec![
            "?n=\"Alice\" ?p=<http://ex.org/person/1>".to_string(),
            "?n=\"Carol\" ?p=<http://ex.org/person/3>".to_string(),
            "?p=<http://ex.org/person/2>".to_string(),
        ]
    );
}

#[test]
fn test_reference_object_map_joins_parent() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "SELECT ?p ?l WHERE { \
               ?p <http://ex.org/dept> ?d . \
               ?d <http://ex.org/label> ?l \
             }",
        )
        .unwrap();
    assert_eq!(
        rendered(&results),
        vec![
            "?l=\"Research\" ?p=<http://ex.org/person/1>".to_string(),
            "?l=\"Research\" ?p=<http://ex.org/person/2>".to_string(),
        ]
    );
}

#[test]
fn test_union_of_predicates() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "SELECT ?x ?l WHERE { \
               { ?x <http://ex.org/label> ?l } UNION { ?x <http://xmlns.com/foaf/0.1/name> ?l } \
             }",
        )
        .unwrap();
    let mut labels: Vec<_> = column(&results, "l").into_iter().flatten().collect();
    labels.sort();
    assert_eq!(labels, vec!["Alice", "Carol", "Research", "Sales"]);
}

#[test]
fn test_minus_without_shared_variables_is_a_no_op() {
    let engine = engine(EngineConfig::default());
    let plain = engine
        .execute("SELECT ?s WHERE { ?s <http://p.com/col2> ?o }")
        .unwrap();
    let minus = engine
        .execute(
            "SELECT ?s WHERE { ?s <http://p.com/col2> ?o MINUS { ?x <http://ex.org/label> ?l } }",
        )
        .unwrap();
    assert_eq!(rendered(&plain), rendered(&minus));
    assert_eq!(minus.len(), 2);
}

#[test]
fn test_minus_removes_compatible_solutions() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "SELECT ?p WHERE { \
               ?p a <http://ex.org/Person> \
               MINUS { ?p <http://xmlns.com/foaf/0.1/name> ?n } \
             }",
        )
        .unwrap();
    assert_eq!(column(&results, "p"), some(&["http://ex.org/person/2"]));
}

#[test]
fn test_filter_on_literal() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "SELECT ?p WHERE { ?p <http://xmlns.com/foaf/0.1/name> ?n FILTER(?n = \"Carol\") }",
        )
        .unwrap();
    assert_eq!(column(&results, "p"), some(&["http://ex.org/person/3"]));
}

#[test]
fn test_solution_modifiers() {
    let engine = engine(EngineConfig::default());

    let results = engine
        .execute("SELECT DISTINCT ?d WHERE { ?p <http://ex.org/dept> ?d }")
        .unwrap();
    assert_eq!(column(&results, "d"), some(&["http://ex.org/dept/10"]));

    let results = engine
        .execute("SELECT ?p WHERE { ?p a <http://ex.org/Person> } LIMIT 2")
        .unwrap();
    assert_eq!(results.len(), 2);

    let results = engine
        .execute(
            "SELECT ?n WHERE { ?p <http://xmlns.com/foaf/0.1/name> ?n } ORDER BY DESC(?n)",
        )
        .unwrap();
    assert_eq!(column(&results, "n"), some(&["Carol", "Alice"]));
}

#[test]
fn test_ask() {
    let engine = engine(EngineConfig::default());
    assert_eq!(
        engine.execute("ASK { ?p a <http://ex.org/Person> }").unwrap(),
        SparqlResults::Boolean(true)
    );
    assert_eq!(
        engine
            .execute("ASK { <http://ex.org/person/2> <http://xmlns.com/foaf/0.1/name> ?n }")
            .unwrap(),
        SparqlResults::Boolean(false)
    );
    assert_eq!(engine.database().open_cursors(), 0);
}

#[test]
fn test_ask_abandons_the_cursor_after_the_first_row() {
    // a second read would fail; ASK never asks for it
    let engine = SparqlEngine::new(
        Arc::new(session(EngineConfig::default())),
        database().failing_after(1),
    );
    assert_eq!(
        engine.execute("ASK { ?p a <http://ex.org/Person> }").unwrap(),
        SparqlResults::Boolean(true)
    );
    assert_eq!(engine.database().executed(), 1);
    assert_eq!(engine.database().open_cursors(), 0);
}

#[test]
fn test_read_error_releases_the_cursor() {
    let engine = SparqlEngine::new(
        Arc::new(session(EngineConfig::default())),
        database().failing_after(1),
    );
    let result = engine.execute("SELECT ?p WHERE { ?p a <http://ex.org/Person> }");
    assert!(matches!(
        result,
        Err(EngineError::Database(DatabaseError::Read(_)))
    ));
    assert_eq!(engine.database().open_cursors(), 0);
}

#[test]
fn test_construct() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "CONSTRUCT { ?p <http://ex.org/called> ?n } \
             WHERE { ?p <http://xmlns.com/foaf/0.1/name> ?n }",
        )
        .unwrap();
    assert_eq!(
        rendered(&results),
        vec![
            "<http://ex.org/person/1> <http://ex.org/called> \"Alice\" .".to_string(),
            "<http://ex.org/person/3> <http://ex.org/called> \"Carol\" .".to_string(),
        ]
    );
}

#[test]
fn test_construct_skips_unbound_positions() {
    let engine = engine(EngineConfig::default());
    let results = engine
        .execute(
            "CONSTRUCT { ?p <http://ex.org/called> ?n } WHERE { \
               ?p a <http://ex.org/Person> \
               OPTIONAL { ?p <http://xmlns.com/foaf/0.1/name> ?n } \
             }",
        )
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_constant_object_must_match_datatype_and_language() {
    for config in [EngineConfig::default(), EngineConfig::unoptimized()] {
        let engine = engine(config);
        for object in [
            "\"x\"^^<http://www.w3.org/2001/XMLSchema#integer>",
            "\"x\"@en",
        ] {
            let query = format!("SELECT ?s WHERE {{ ?s <http://p.com/col2> {} }}", object);
            assert!(engine.execute(&query).unwrap().is_empty(), "{}", query);
        }
        // xsd:string is the simple literal's datatype
        let results = engine
            .execute(
                "SELECT ?s WHERE { ?s <http://p.com/col2> \
                 \"x\"^^<http://www.w3.org/2001/XMLSchema#string> }",
            )
            .unwrap();
        assert_eq!(column(&results, "s"), some(&["http://s.com/12"]));
    }
}

#[test]
fn test_distinct_subquery_compares_terms() {
    let nested = "SELECT ?s WHERE { { SELECT DISTINCT ?s WHERE { \
                    { ?s <http://p.com/col2> ?a } UNION { ?s <http://p.com/col2> ?b } \
                  } } }";
    let flat = "SELECT DISTINCT ?s WHERE { \
                  { ?s <http://p.com/col2> ?a } UNION { ?s <http://p.com/col2> ?b } \
                }";
    for config in [EngineConfig::default(), EngineConfig::unoptimized()] {
        let engine = engine(config);
        let results = engine.execute(nested).unwrap();
        assert_eq!(
            rendered(&results),
            vec![
                "?s=<http://s.com/12>".to_string(),
                "?s=<http://s.com/a%20b>".to_string(),
            ]
        );
        assert_eq!(rendered(&results), rendered(&engine.execute(flat).unwrap()));
    }
}

#[test]
fn test_distinct_subquery_over_optional() {
    // person/1 and person/2 share a department; person/3 has none
    let query = "SELECT ?d WHERE { { SELECT DISTINCT ?d WHERE { \
                   ?p a <http://ex.org/Person> OPTIONAL { ?p <http://ex.org/dept> ?d } \
                 } } }";
    for config in [EngineConfig::default(), EngineConfig::unoptimized()] {
        let results = engine(config).execute(query).unwrap();
        assert_eq!(
            rendered(&results),
            vec!["".to_string(), "?d=<http://ex.org/dept/10>".to_string()]
        );
    }
}
