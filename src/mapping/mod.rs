//! R2RML mapping model
//!
//! The mapping is read-only input to the compiler. Parsing R2RML documents is
//! left to the caller; mappings are built in code or loaded from the serde
//! representation of [`TriplesMap`].
//!
//! `Mapping::new` validates every term map and normalizes `rr:class` into an
//! explicit `rdf:type` predicate-object map, so later stages only see
//! predicate-object maps.

mod template;
mod term_map;
mod triples_map;

pub use template::{
    contains_escaped_char, iri_safe_escape, iri_safe_unescape, Template, TemplateSegment,
};
pub use term_map::{ConstantValue, TermMap, TermValuation};
pub use triples_map::{
    JoinCondition, LogicalTable, ObjectMap, PredicateObjectMap, RefObjectMap, SubjectMap,
    TriplesMap,
};

use crate::rdf::{vocab, TermKind};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Mapping errors
#[derive(Error, Debug)]
pub enum MappingError {
    /// Error reading or deserializing a mapping document
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid property value
    #[error("Invalid value for {property}: {message}")]
    InvalidValue { property: String, message: String },

    /// Invalid template syntax
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Reference to non-existent triples map
    #[error("Unknown TriplesMap: {0}")]
    UnknownTriplesMap(String),

    /// Two triples maps share a name
    #[error("Duplicate TriplesMap: {0}")]
    DuplicateTriplesMap(String),

    /// Term generation failed for a row
    #[error("Materialization error: {0}")]
    Materialization(String),
}

pub type MappingResult<T> = Result<T, MappingError>;

/// A validated R2RML mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    triples_maps: Vec<TriplesMap>,
    by_name: HashMap<String, usize>,
}

/// Which graph map a combination uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphMapRef {
    /// Index into the subject map's graph maps
    Subject(usize),
    /// Index into the predicate-object map's graph maps
    PredicateObject(usize),
}

/// One candidate way a triple can be produced: a triples map, one of its
/// predicate-object maps, one predicate map, one object map and at most one
/// graph map. All fields are indices into the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingCombination {
    pub triples_map: usize,
    pub predicate_object_map: usize,
    pub predicate_map: usize,
    pub object_map: usize,
    /// `None` when the triple is only in the default graph
    pub graph_map: Option<GraphMapRef>,
}

/// Object position of a resolved combination
#[derive(Debug, Clone, Copy)]
pub enum ResolvedObject<'a> {
    Term(&'a TermMap),
    Reference {
        map: &'a RefObjectMap,
        parent: &'a TriplesMap,
    },
}

/// A combination with its indices resolved to references
#[derive(Debug, Clone, Copy)]
pub struct ResolvedCombination<'a> {
    pub triples_map: &'a TriplesMap,
    pub subject: &'a TermMap,
    pub predicate: &'a TermMap,
    pub object: ResolvedObject<'a>,
    pub graph: Option<&'a TermMap>,
}

impl Mapping {
    /// Validate and normalize a set of triples maps
    pub fn new(triples_maps: Vec<TriplesMap>) -> MappingResult<Self> {
        let mut by_name = HashMap::new();
        for (index, tm) in triples_maps.iter().enumerate() {
            if by_name.insert(tm.name.clone(), index).is_some() {
                return Err(MappingError::DuplicateTriplesMap(tm.name.clone()));
            }
        }

        let mut normalized = Vec::with_capacity(triples_maps.len());
        for mut tm in triples_maps {
            validate_triples_map(&tm, &by_name)?;
            let classes = std::mem::take(&mut tm.subject_map.classes);
            if !classes.is_empty() {
                let mut pom = PredicateObjectMap {
                    predicate_maps: vec![TermMap::constant_iri(vocab::RDF_TYPE)],
                    object_maps: classes
                        .into_iter()
                        .map(|c| ObjectMap::Term(TermMap::constant_iri(c)))
                        .collect(),
                    graph_maps: Vec::new(),
                };
                pom.object_maps.dedup();
                tm.predicate_object_maps.push(pom);
            }
            normalized.push(tm);
        }

        debug!("Loaded R2RML mapping with {} triples maps", normalized.len());
        Ok(Self {
            triples_maps: normalized,
            by_name,
        })
    }

    /// Load a mapping from its JSON representation
    pub fn from_json_str(json: &str) -> MappingResult<Self> {
        let maps: Vec<TriplesMap> =
            serde_json::from_str(json).map_err(|e| MappingError::Parse(e.to_string()))?;
        Self::new(maps)
    }

    /// Load a mapping from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> MappingResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MappingError::Parse(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Serialize the normalized mapping to JSON
    pub fn to_json_string(&self) -> MappingResult<String> {
        serde_json::to_string_pretty(&self.triples_maps)
            .map_err(|e| MappingError::Parse(e.to_string()))
    }

    /// All triples maps
    pub fn triples_maps(&self) -> &[TriplesMap] {
        &self.triples_maps
    }

    /// Look up a triples map by name
    pub fn triples_map(&self, name: &str) -> Option<&TriplesMap> {
        self.by_name.get(name).map(|i| &self.triples_maps[*i])
    }

    /// Enumerate every combination of the mapping.
    ///
    /// A triple belongs to every graph named by the subject map and by its
    /// predicate-object map; with no graph map it belongs to the default
    /// graph only.
    pub fn combinations(&self) -> Vec<MappingCombination> {
        let mut out = Vec::new();
        for (t, tm) in self.triples_maps.iter().enumerate() {
            for (p, pom) in tm.predicate_object_maps.iter().enumerate() {
                let mut graphs: Vec<Option<GraphMapRef>> = (0..tm.subject_map.graph_maps.len())
                    .map(|g| Some(GraphMapRef::Subject(g)))
                    .chain((0..pom.graph_maps.len()).map(|g| Some(GraphMapRef::PredicateObject(g))))
                    .collect();
                if graphs.is_empty() {
                    graphs.push(None);
                }
                for pm in 0..pom.predicate_maps.len() {
                    for om in 0..pom.object_maps.len() {
                        for graph in &graphs {
                            out.push(MappingCombination {
                                triples_map: t,
                                predicate_object_map: p,
                                predicate_map: pm,
                                object_map: om,
                                graph_map: *graph,
                            });
                        }
                    }
                }
            }
        }
        out
    }

    /// Resolve a combination into references
    pub fn resolve(&self, c: &MappingCombination) -> Option<ResolvedCombination<'_>> {
        let triples_map = self.triples_maps.get(c.triples_map)?;
        let pom = triples_map.predicate_object_maps.get(c.predicate_object_map)?;
        let predicate = pom.predicate_maps.get(c.predicate_map)?;
        let object = match pom.object_maps.get(c.object_map)? {
            ObjectMap::Term(tm) => ResolvedObject::Term(tm),
            ObjectMap::Reference(map) => ResolvedObject::Reference {
                map,
                parent: self.triples_map(&map.parent_triples_map)?,
            },
        };
        let graph = match c.graph_map {
            None => None,
            Some(GraphMapRef::Subject(g)) => Some(triples_map.subject_map.graph_maps.get(g)?),
            Some(GraphMapRef::PredicateObject(g)) => Some(pom.graph_maps.get(g)?),
        };
        Some(ResolvedCombination {
            triples_map,
            subject: &triples_map.subject_map.term_map,
            predicate,
            object,
            graph,
        })
    }
}

fn validate_triples_map(tm: &TriplesMap, by_name: &HashMap<String, usize>) -> MappingResult<()> {
    let subject = &tm.subject_map.term_map;
    subject.validate("rr:subjectMap")?;
    if subject.term_kind == TermKind::Literal {
        return Err(MappingError::InvalidValue {
            property: "rr:subjectMap".to_string(),
            message: format!("triples map {} generates literal subjects", tm.name),
        });
    }
    for graph in &tm.subject_map.graph_maps {
        validate_iri_map(graph, "rr:graphMap")?;
    }
    for class in &tm.subject_map.classes {
        TermMap::constant_iri(class.as_str()).validate("rr:class")?;
    }
    for pom in &tm.predicate_object_maps {
        for pm in &pom.predicate_maps {
            validate_iri_map(pm, "rr:predicateMap")?;
        }
        for graph in &pom.graph_maps {
            validate_iri_map(graph, "rr:graphMap")?;
        }
        for om in &pom.object_maps {
            match om {
                ObjectMap::Term(term_map) => term_map.validate("rr:objectMap")?,
                ObjectMap::Reference(r) => {
                    if !by_name.contains_key(&r.parent_triples_map) {
                        return Err(MappingError::UnknownTriplesMap(r.parent_triples_map.clone()));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_iri_map(term_map: &TermMap, position: &str) -> MappingResult<()> {
    term_map.validate(position)?;
    if term_map.term_kind != TermKind::Iri {
        return Err(MappingError::InvalidValue {
            property: position.to_string(),
            message: format!("must generate IRIs, not {}", term_map.term_kind),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TriplesMap {
        TriplesMap::new(
            "people",
            LogicalTable::Table("people".to_string()),
            SubjectMap::new(TermMap::template("http://ex.org/person/{id}", TermKind::Iri).unwrap())
                .with_class("http://ex.org/Person"),
        )
        .with_predicate_object_map(PredicateObjectMap::new(
            TermMap::constant_iri("http://ex.org/name"),
            ObjectMap::Term(TermMap::column("name", TermKind::Literal)),
        ))
    }

    #[test]
    fn test_class_becomes_rdf_type() {
        let mapping = Mapping::new(vec![people()]).unwrap();
        let tm = mapping.triples_map("people").unwrap();
        assert!(tm.subject_map.classes.is_empty());
        assert_eq!(tm.predicate_object_maps.len(), 2);
        let pom = &tm.predicate_object_maps[1];
        assert_eq!(
            pom.predicate_maps[0].constant_term().unwrap().lexical(),
            vocab::RDF_TYPE
        );
    }

    #[test]
    fn test_combinations() {
        let mapping = Mapping::new(vec![people()]).unwrap();
        let combinations = mapping.combinations();
        assert_eq!(combinations.len(), 2);
        assert!(combinations.iter().all(|c| c.graph_map.is_none()));
        let resolved = mapping.resolve(&combinations[0]).unwrap();
        assert_eq!(resolved.triples_map.name, "people");
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let tm = people().with_predicate_object_map(PredicateObjectMap::new(
            TermMap::constant_iri("http://ex.org/knows"),
            ObjectMap::Reference(RefObjectMap::new("nobody").with_join("friend", "id")),
        ));
        assert!(matches!(
            Mapping::new(vec![tm]),
            Err(MappingError::UnknownTriplesMap(_))
        ));
    }

    #[test]
    fn test_json_round_trip_is_stable() {
        let mapping = Mapping::new(vec![people()]).unwrap();
        let json = mapping.to_json_string().unwrap();
        let reloaded = Mapping::from_json_str(&json).unwrap();
        assert_eq!(mapping, reloaded);
    }

    #[test]
    fn test_literal_predicate_is_rejected() {
        let tm = TriplesMap::new(
            "t",
            LogicalTable::Table("t".to_string()),
            SubjectMap::new(TermMap::column("id", TermKind::BlankNode)),
        )
        .with_predicate_object_map(PredicateObjectMap::new(
            TermMap::column("p", TermKind::Literal),
            ObjectMap::Term(TermMap::column("o", TermKind::Literal)),
        ));
        assert!(Mapping::new(vec![tm]).is_err());
    }
}
