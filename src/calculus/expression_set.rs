//! Expression sets: the fixed-width relational encoding of one RDF term
//!
//! Every component is a relational expression. The string component holds
//! the lexical form and is null exactly when the term is unbound.

use super::expression::{CaseBranch, CompareOp, Expression, FilterCondition};
use super::model::VarId;
use super::types::{type_ids, SqlType, TypeCategory, TypeRegistry, Value, DATETIME_FORMAT};
use crate::mapping::{TemplateSegment, TermMap, TermValuation};
use crate::rdf::{xsd, RdfTerm, TermKind};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

/// Relational encoding of an RDF term
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionSet {
    pub type_id: Expression,
    pub category: Expression,
    pub string: Expression,
    pub numeric: Expression,
    pub boolean: Expression,
    pub datetime: Expression,
    /// Holds unless computing the term raised an evaluation error
    pub is_not_error: FilterCondition,
}

impl ExpressionSet {
    /// The unbound term
    pub fn unbound() -> Self {
        Self {
            type_id: Expression::Null(SqlType::Integer),
            category: Expression::Null(SqlType::Integer),
            string: Expression::Null(SqlType::String),
            numeric: Expression::Null(SqlType::Double),
            boolean: Expression::Null(SqlType::Boolean),
            datetime: Expression::Null(SqlType::DateTime),
            is_not_error: FilterCondition::AlwaysTrue,
        }
    }

    /// An evaluation error
    pub fn error() -> Self {
        Self {
            is_not_error: FilterCondition::AlwaysFalse,
            ..Self::unbound()
        }
    }

    /// A constant term
    pub fn from_term(term: &RdfTerm, types: &TypeRegistry) -> Self {
        let mut set = Self::unbound();
        set.string = Expression::string(term.lexical());
        let (type_id, category) = match term {
            RdfTerm::NamedNode(_) => (type_ids::IRI, TypeCategory::Iri),
            RdfTerm::BlankNode(_) => (type_ids::BLANK_NODE, TypeCategory::BlankNode),
            RdfTerm::Literal(literal) => {
                let (type_id, category) =
                    literal_type(literal.datatype(), literal.language(), types);
                let lexical = literal.value();
                match category {
                    TypeCategory::Numeric => {
                        if let Ok(n) = lexical.trim().parse::<f64>() {
                            set.numeric = Expression::Constant(Value::Double(n));
                        }
                    }
                    TypeCategory::Boolean => match lexical {
                        "true" | "1" => set.boolean = Expression::Constant(Value::Boolean(true)),
                        "false" | "0" => set.boolean = Expression::Constant(Value::Boolean(false)),
                        _ => {}
                    },
                    TypeCategory::DateTime => {
                        if let Ok(dt) = NaiveDateTime::parse_from_str(lexical, DATETIME_FORMAT) {
                            set.datetime = Expression::Constant(Value::DateTime(dt));
                        }
                    }
                    _ => {}
                }
                (type_id, category)
            }
        };
        set.type_id = Expression::integer(type_id);
        set.category = Expression::integer(category.code());
        set
    }

    /// Encoding of the term a term map produces from the given column
    /// variables. Returns `None` if a referenced column has no variable.
    pub fn from_term_map(
        term_map: &TermMap,
        columns: &IndexMap<String, VarId>,
        var_types: &FxHashMap<VarId, SqlType>,
        types: &TypeRegistry,
    ) -> Option<Self> {
        let column = |name: &str, escape_iri: bool| -> Option<Expression> {
            let variable = *columns.get(name)?;
            Some(Expression::Column {
                variable,
                sql_type: var_types.get(&variable).copied().unwrap_or(SqlType::String),
                escape_iri,
            })
        };

        let mut set = Self::unbound();
        let (type_id, category) = match &term_map.valuation {
            TermValuation::Constant(_) => {
                return term_map
                    .constant_term()
                    .map(|term| Self::from_term(&term, types));
            }
            TermValuation::Column(name) => {
                let expr = column(name, false)?;
                let natural = expr.sql_type().natural_datatype();
                set.string = expr.clone().into_string();
                match term_map.term_kind {
                    TermKind::Iri => (type_ids::IRI, TypeCategory::Iri),
                    TermKind::BlankNode => (type_ids::BLANK_NODE, TypeCategory::BlankNode),
                    TermKind::Literal => {
                        let datatype = term_map.datatype.as_deref().or(natural);
                        let (type_id, category) = literal_type(
                            datatype.unwrap_or(xsd::STRING),
                            term_map.language.as_deref(),
                            types,
                        );
                        let family_matches = |wanted: SqlType| {
                            expr.sql_type().family() == wanted.family()
                        };
                        match category {
                            TypeCategory::Numeric if family_matches(SqlType::Double) => {
                                set.numeric = expr.clone();
                            }
                            TypeCategory::Boolean if family_matches(SqlType::Boolean) => {
                                set.boolean = expr.clone();
                            }
                            TypeCategory::DateTime if family_matches(SqlType::DateTime) => {
                                set.datetime = expr.clone();
                            }
                            _ => {}
                        }
                        (type_id, category)
                    }
                }
            }
            TermValuation::Template(template) => {
                let escape = term_map.term_kind == TermKind::Iri;
                let mut parts = Vec::new();
                for segment in template.segments() {
                    match segment {
                        TemplateSegment::Literal(text) => parts.push(Expression::string(text)),
                        TemplateSegment::Column(name) => parts.push(column(name, escape)?),
                    }
                }
                set.string = Expression::Concat(parts);
                match term_map.term_kind {
                    TermKind::Iri => (type_ids::IRI, TypeCategory::Iri),
                    TermKind::BlankNode => (type_ids::BLANK_NODE, TypeCategory::BlankNode),
                    TermKind::Literal => literal_type(
                        term_map.datatype.as_deref().unwrap_or(xsd::STRING),
                        term_map.language.as_deref(),
                        types,
                    ),
                }
            }
        };
        set.type_id = Expression::integer(type_id);
        set.category = Expression::integer(category.code());
        Some(set)
    }

    /// First bound alternative wins
    pub fn coalesce(mut sets: Vec<ExpressionSet>) -> Self {
        match sets.len() {
            0 => return Self::unbound(),
            1 => return sets.remove(0),
            _ => {}
        }
        let guards: Vec<FilterCondition> = sets.iter().map(|s| s.is_bound()).collect();
        let pick = |get: fn(&ExpressionSet) -> &Expression| -> Expression {
            let first = get(&sets[0]);
            if first.is_constant() && sets.iter().all(|s| get(s) == first) {
                return first.clone();
            }
            Expression::Case {
                branches: sets
                    .iter()
                    .zip(&guards)
                    .map(|(s, g)| CaseBranch {
                        condition: g.clone(),
                        value: get(s).clone(),
                    })
                    .collect(),
                sql_type: first.sql_type(),
            }
        };
        Self {
            type_id: pick(|s| &s.type_id),
            category: pick(|s| &s.category),
            string: Expression::Coalesce(sets.iter().map(|s| s.string.clone()).collect()),
            numeric: pick(|s| &s.numeric),
            boolean: pick(|s| &s.boolean),
            datetime: pick(|s| &s.datetime),
            is_not_error: FilterCondition::and(
                sets.iter().map(|s| s.is_not_error.clone()).collect(),
            ),
        }
    }

    /// Dispatch on the value of a discriminator; no matching case is unbound
    pub fn switch(discriminator: VarId, cases: Vec<(i64, ExpressionSet)>) -> Self {
        let guards: Vec<FilterCondition> = cases
            .iter()
            .map(|(tag, _)| FilterCondition::Comparison {
                op: CompareOp::Eq,
                left: Expression::column(discriminator, SqlType::Integer),
                right: Expression::integer(*tag),
            })
            .collect();
        let pick = |get: fn(&ExpressionSet) -> &Expression, sql_type: SqlType| -> Expression {
            Expression::Case {
                branches: cases
                    .iter()
                    .zip(&guards)
                    .map(|((_, s), g)| CaseBranch {
                        condition: g.clone(),
                        value: get(s).clone(),
                    })
                    .collect(),
                sql_type,
            }
        };
        let is_not_error = FilterCondition::and(
            cases
                .iter()
                .zip(&guards)
                .map(|((_, s), g)| {
                    FilterCondition::or(vec![
                        FilterCondition::negate(g.clone()),
                        s.is_not_error.clone(),
                    ])
                })
                .collect(),
        );
        Self {
            type_id: pick(|s| &s.type_id, SqlType::Integer),
            category: pick(|s| &s.category, SqlType::Integer),
            string: pick(|s| &s.string, SqlType::String),
            numeric: pick(|s| &s.numeric, SqlType::Double),
            boolean: pick(|s| &s.boolean, SqlType::Boolean),
            datetime: pick(|s| &s.datetime, SqlType::DateTime),
            is_not_error,
        }
    }

    /// Condition holding iff the term is bound
    pub fn is_bound(&self) -> FilterCondition {
        match &self.string {
            Expression::Null(_) => FilterCondition::AlwaysFalse,
            Expression::Constant(_) => FilterCondition::AlwaysTrue,
            other => FilterCondition::not_null(other.clone()),
        }
    }

    /// The six components in fixed order
    pub fn components(&self) -> [&Expression; 6] {
        [
            &self.type_id,
            &self.category,
            &self.string,
            &self.numeric,
            &self.boolean,
            &self.datetime,
        ]
    }

    /// Mutable access to the six components in fixed order
    pub fn components_mut(&mut self) -> [&mut Expression; 6] {
        [
            &mut self.type_id,
            &mut self.category,
            &mut self.string,
            &mut self.numeric,
            &mut self.boolean,
            &mut self.datetime,
        ]
    }

    /// Visit every variable referenced
    pub fn for_each_variable(&self, f: &mut dyn FnMut(VarId)) {
        for c in self.components() {
            c.for_each_variable(f);
        }
        self.is_not_error.for_each_variable(f);
    }
}

/// Type id and category of a literal.
///
/// `xsd:string` literals share the simple literal id, since RDF 1.1 treats
/// them as the same term.
pub fn literal_type(
    datatype: &str,
    language: Option<&str>,
    types: &TypeRegistry,
) -> (i64, TypeCategory) {
    if let Some(language) = language {
        return (types.language_id(language), TypeCategory::LanguageLiteral);
    }
    if datatype == xsd::STRING {
        return (type_ids::SIMPLE_LITERAL, TypeCategory::SimpleLiteral);
    }
    (types.datatype_id(datatype), TypeCategory::of_datatype(datatype))
}
