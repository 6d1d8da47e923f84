//! Translation of SPARQL expressions into relational conditions
//!
//! A boolean SPARQL expression becomes a pair of conditions: one that holds
//! on rows where the expression is true and one that holds where it is
//! false. On rows where neither holds, evaluation raised an error (which
//! includes reading an unbound variable). A filter keeps only rows where the
//! first condition holds, so errors and `false` both reject the row while
//! staying distinguishable.

use super::{BuildError, BuildResult};
use crate::calculus::types::type_ids;
use crate::calculus::{
    Assignment, CalculusModel, CaseBranch, CompareOp, Expression, ExpressionSet, FilterCondition,
    SqlType, TypeCategory, TypeRegistry, ValueBinder, Value, VarGen, VarId,
};
use crate::sparql::SparqlExpression;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

/// Truth conditions of a boolean expression
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Holds where the expression is true
    pub holds: FilterCondition,
    /// Holds where the expression is false
    pub fails: FilterCondition,
}

impl Condition {
    fn negate(self) -> Self {
        Self {
            holds: self.fails,
            fails: self.holds,
        }
    }
}

/// Translates expressions over the variables of one built pattern
pub struct ExpressionTranslator<'c> {
    binders: &'c IndexMap<String, ValueBinder>,
    var_types: &'c FxHashMap<VarId, SqlType>,
    types: &'c TypeRegistry,
}

impl<'c> ExpressionTranslator<'c> {
    pub fn new(
        binders: &'c IndexMap<String, ValueBinder>,
        var_types: &'c FxHashMap<VarId, SqlType>,
        types: &'c TypeRegistry,
    ) -> Self {
        Self {
            binders,
            var_types,
            types,
        }
    }

    /// Expression set of a variable's binder; unbound if there is none
    pub fn variable(&self, name: &str) -> BuildResult<ExpressionSet> {
        match self.binders.get(name) {
            Some(binder) => encode(binder, self.var_types, self.types, name),
            None => Ok(ExpressionSet::unbound()),
        }
    }

    /// Translate a term-valued expression
    pub fn term(&self, expression: &SparqlExpression) -> BuildResult<ExpressionSet> {
        match expression {
            SparqlExpression::Variable(name) => self.variable(name),
            SparqlExpression::Constant(term) => Ok(ExpressionSet::from_term(term, self.types)),
            SparqlExpression::Str(inner) => {
                let set = self.term(inner)?;
                let mut out = ExpressionSet::unbound();
                out.type_id = Expression::integer(type_ids::SIMPLE_LITERAL);
                out.category = Expression::integer(TypeCategory::SimpleLiteral.code());
                out.is_not_error = FilterCondition::and(vec![
                    set.is_not_error.clone(),
                    set.is_bound(),
                    category_compare(&set, CompareOp::Ne, TypeCategory::BlankNode),
                ]);
                out.string = set.string;
                Ok(out)
            }
            other => Ok(boolean_term(self.condition(other)?, self.types)),
        }
    }

    /// Translate a boolean expression
    pub fn condition(&self, expression: &SparqlExpression) -> BuildResult<Condition> {
        Ok(match expression {
            SparqlExpression::And(a, b) => {
                let (a, b) = (self.condition(a)?, self.condition(b)?);
                Condition {
                    holds: FilterCondition::and(vec![a.holds, b.holds]),
                    fails: FilterCondition::or(vec![a.fails, b.fails]),
                }
            }
            SparqlExpression::Or(a, b) => {
                let (a, b) = (self.condition(a)?, self.condition(b)?);
                Condition {
                    holds: FilterCondition::or(vec![a.holds, b.holds]),
                    fails: FilterCondition::and(vec![a.fails, b.fails]),
                }
            }
            SparqlExpression::Not(a) => self.condition(a)?.negate(),
            SparqlExpression::Equal(a, b) => {
                value_comparison(CompareOp::Eq, &self.term(a)?, &self.term(b)?)
            }
            SparqlExpression::Less(a, b) => {
                value_comparison(CompareOp::Lt, &self.term(a)?, &self.term(b)?)
            }
            SparqlExpression::LessOrEqual(a, b) => {
                value_comparison(CompareOp::Le, &self.term(a)?, &self.term(b)?)
            }
            SparqlExpression::Greater(a, b) => {
                value_comparison(CompareOp::Gt, &self.term(a)?, &self.term(b)?)
            }
            SparqlExpression::GreaterOrEqual(a, b) => {
                value_comparison(CompareOp::Ge, &self.term(a)?, &self.term(b)?)
            }
            SparqlExpression::SameTerm(a, b) => {
                let (a, b) = (self.term(a)?, self.term(b)?);
                let ok = both_valid(&a, &b);
                let same = term_equal(&a, &b);
                Condition {
                    holds: FilterCondition::and(vec![ok.clone(), same.clone()]),
                    fails: FilterCondition::and(vec![ok, FilterCondition::negate(same)]),
                }
            }
            SparqlExpression::Bound(name) => {
                let bound = self.variable(name)?.is_bound();
                Condition {
                    fails: FilterCondition::negate(bound.clone()),
                    holds: bound,
                }
            }
            SparqlExpression::IsIri(a) => {
                kind_test(&self.term(a)?, CompareOp::Eq, TypeCategory::Iri)
            }
            SparqlExpression::IsBlank(a) => {
                kind_test(&self.term(a)?, CompareOp::Eq, TypeCategory::BlankNode)
            }
            SparqlExpression::IsLiteral(a) => {
                kind_test(&self.term(a)?, CompareOp::Ge, TypeCategory::SimpleLiteral)
            }
            SparqlExpression::Variable(_)
            | SparqlExpression::Constant(_)
            | SparqlExpression::Str(_) => effective_boolean_value(&self.term(expression)?),
        })
    }
}

/// Encode a binder as an expression set
pub fn encode(
    binder: &ValueBinder,
    var_types: &FxHashMap<VarId, SqlType>,
    types: &TypeRegistry,
    name: &str,
) -> BuildResult<ExpressionSet> {
    binder
        .to_expression_set(var_types, types)
        .ok_or_else(|| BuildError::Defect(format!("binder of ?{} reads an unbound column", name)))
}

/// Same RDF term: equal type ids and equal lexical forms
pub fn term_equal(a: &ExpressionSet, b: &ExpressionSet) -> FilterCondition {
    FilterCondition::and(vec![
        FilterCondition::equal(a.type_id.clone(), b.type_id.clone()),
        FilterCondition::equal(a.string.clone(), b.string.clone()),
    ])
}

/// SPARQL compatibility of two optional bindings: either is unbound, or both
/// are the same term
pub fn compatible(a: &ExpressionSet, b: &ExpressionSet) -> FilterCondition {
    FilterCondition::or(vec![
        FilterCondition::negate(a.is_bound()),
        FilterCondition::negate(b.is_bound()),
        term_equal(a, b),
    ])
}

/// Make a set unbound wherever computing it raised an error
pub fn guard_errors(set: ExpressionSet) -> ExpressionSet {
    if set.is_not_error == FilterCondition::AlwaysTrue {
        return set;
    }
    let guard = set.is_not_error.clone();
    let wrap = |value: Expression| {
        let sql_type = value.sql_type();
        Expression::Case {
            branches: vec![CaseBranch {
                condition: guard.clone(),
                value,
            }],
            sql_type,
        }
    };
    ExpressionSet {
        type_id: wrap(set.type_id),
        category: wrap(set.category),
        string: wrap(set.string),
        numeric: wrap(set.numeric),
        boolean: wrap(set.boolean),
        datetime: wrap(set.datetime),
        is_not_error: FilterCondition::AlwaysTrue,
    }
}

/// Move every computed component of a set into a fresh assignment of
/// `model`, leaving a set that reads only constants and columns
pub fn materialize(
    mut set: ExpressionSet,
    model: &mut CalculusModel,
    vars: &mut VarGen,
) -> ExpressionSet {
    for component in set.components_mut() {
        if component.is_constant() || component.as_column().is_some() {
            continue;
        }
        let variable = vars.fresh();
        let sql_type = component.sql_type();
        let expression = std::mem::replace(component, Expression::column(variable, sql_type));
        model.assignments.push(Assignment {
            variable,
            expression,
        });
    }
    set
}

fn both_valid(a: &ExpressionSet, b: &ExpressionSet) -> FilterCondition {
    FilterCondition::and(vec![
        a.is_not_error.clone(),
        b.is_not_error.clone(),
        a.is_bound(),
        b.is_bound(),
    ])
}

fn category_compare(set: &ExpressionSet, op: CompareOp, category: TypeCategory) -> FilterCondition {
    FilterCondition::Comparison {
        op,
        left: set.category.clone(),
        right: Expression::integer(category.code()),
    }
}

fn both_in(a: &ExpressionSet, b: &ExpressionSet, category: TypeCategory) -> FilterCondition {
    FilterCondition::and(vec![
        category_compare(a, CompareOp::Eq, category),
        category_compare(b, CompareOp::Eq, category),
    ])
}

fn compare(op: CompareOp, left: &Expression, right: &Expression) -> FilterCondition {
    FilterCondition::Comparison {
        op,
        left: left.clone(),
        right: right.clone(),
    }
}

type Component = fn(&ExpressionSet) -> &Expression;

/// `=` and the ordering operators. Numbers, booleans and datetimes compare
/// by value; `=` on anything else is term equality; ordering simple
/// literals compares their strings. Any other ordering is an error.
fn value_comparison(op: CompareOp, a: &ExpressionSet, b: &ExpressionSet) -> Condition {
    let mut families: Vec<(TypeCategory, Component)> = vec![
        (TypeCategory::Numeric, |s| &s.numeric),
        (TypeCategory::Boolean, |s| &s.boolean),
        (TypeCategory::DateTime, |s| &s.datetime),
    ];
    let equality = op == CompareOp::Eq;
    if !equality {
        families.push((TypeCategory::SimpleLiteral, |s| &s.string));
    }

    let mut holds = Vec::new();
    let mut fails = Vec::new();
    for (category, component) in &families {
        let guard = both_in(a, b, *category);
        holds.push(FilterCondition::and(vec![
            guard.clone(),
            compare(op, component(a), component(b)),
        ]));
        fails.push(FilterCondition::and(vec![
            guard,
            compare(op.negate(), component(a), component(b)),
        ]));
    }
    if equality {
        let untyped = FilterCondition::and(
            families
                .iter()
                .map(|(category, _)| FilterCondition::negate(both_in(a, b, *category)))
                .collect(),
        );
        let same = term_equal(a, b);
        holds.push(FilterCondition::and(vec![untyped.clone(), same.clone()]));
        fails.push(FilterCondition::and(vec![untyped, FilterCondition::negate(same)]));
    }

    let ok = both_valid(a, b);
    Condition {
        holds: FilterCondition::and(vec![ok.clone(), FilterCondition::or(holds)]),
        fails: FilterCondition::and(vec![ok, FilterCondition::or(fails)]),
    }
}

fn kind_test(set: &ExpressionSet, op: CompareOp, category: TypeCategory) -> Condition {
    let ok = FilterCondition::and(vec![set.is_not_error.clone(), set.is_bound()]);
    Condition {
        holds: FilterCondition::and(vec![ok.clone(), category_compare(set, op, category)]),
        fails: FilterCondition::and(vec![ok, category_compare(set, op.negate(), category)]),
    }
}

/// Effective boolean value of a term
fn effective_boolean_value(set: &ExpressionSet) -> Condition {
    let ok = FilterCondition::and(vec![set.is_not_error.clone(), set.is_bound()]);
    let test = |op: CompareOp| {
        FilterCondition::or(vec![
            FilterCondition::and(vec![
                category_compare(set, CompareOp::Eq, TypeCategory::Boolean),
                compare(op, &set.boolean, &Expression::Constant(Value::Boolean(true))),
            ]),
            FilterCondition::and(vec![
                category_compare(set, CompareOp::Eq, TypeCategory::Numeric),
                compare(op.negate(), &set.numeric, &Expression::Constant(Value::Double(0.0))),
            ]),
            FilterCondition::and(vec![
                category_compare(set, CompareOp::Eq, TypeCategory::SimpleLiteral),
                compare(op.negate(), &set.string, &Expression::string("")),
            ]),
        ])
    };
    Condition {
        holds: FilterCondition::and(vec![ok.clone(), test(CompareOp::Eq)]),
        fails: FilterCondition::and(vec![ok, test(CompareOp::Ne)]),
    }
}

/// An `xsd:boolean` literal holding the truth value of a condition;
/// unbound where the condition raised an error
fn boolean_term(condition: Condition, types: &TypeRegistry) -> ExpressionSet {
    let pick = |on_true: Value, on_false: Value, sql_type: SqlType| Expression::Case {
        branches: vec![
            CaseBranch {
                condition: condition.holds.clone(),
                value: Expression::Constant(on_true),
            },
            CaseBranch {
                condition: condition.fails.clone(),
                value: Expression::Constant(on_false),
            },
        ],
        sql_type,
    };
    let mut set = ExpressionSet::unbound();
    set.type_id = Expression::integer(types.datatype_id(crate::rdf::xsd::BOOLEAN));
    set.category = Expression::integer(TypeCategory::Boolean.code());
    set.string = pick(
        Value::String("true".to_string()),
        Value::String("false".to_string()),
        SqlType::String,
    );
    set.boolean = pick(Value::Boolean(true), Value::Boolean(false), SqlType::Boolean);
    set.is_not_error = FilterCondition::or(vec![condition.holds, condition.fails]);
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculus::Row;
    use crate::eval::{evaluate_filter, Truth};
    use crate::mapping::TermMap;
    use crate::rdf::{Literal, NamedNode, RdfTerm, TermKind};

    fn translator_for<'c>(
        binders: &'c IndexMap<String, ValueBinder>,
        var_types: &'c FxHashMap<VarId, SqlType>,
        types: &'c TypeRegistry,
    ) -> ExpressionTranslator<'c> {
        ExpressionTranslator::new(binders, var_types, types)
    }

    fn setup() -> (IndexMap<String, ValueBinder>, FxHashMap<VarId, SqlType>) {
        let mut columns = IndexMap::new();
        columns.insert("age".to_string(), VarId(0));
        let mut binders = IndexMap::new();
        binders.insert(
            "age".to_string(),
            ValueBinder::base(TermMap::column("age", TermKind::Literal), columns),
        );
        let mut var_types = FxHashMap::default();
        var_types.insert(VarId(0), SqlType::Integer);
        (binders, var_types)
    }

    fn integer(value: &str) -> SparqlExpression {
        SparqlExpression::Constant(RdfTerm::Literal(Literal::new_typed_literal(
            value,
            NamedNode::new(crate::rdf::xsd::INTEGER).unwrap(),
        )))
    }

    fn truth(condition: &FilterCondition, age: Option<i64>) -> Truth {
        let row = match age {
            Some(a) => Row::from_pairs(vec![(VarId(0), Value::Integer(a))]),
            None => Row::new(),
        };
        evaluate_filter(condition, &row).unwrap()
    }

    #[test]
    fn test_numeric_comparison() {
        let types = TypeRegistry::new();
        let (binders, var_types) = setup();
        let t = translator_for(&binders, &var_types, &types);
        let c = t
            .condition(&SparqlExpression::Greater(
                Box::new(SparqlExpression::var("age")),
                Box::new(integer("30")),
            ))
            .unwrap();
        assert_eq!(truth(&c.holds, Some(40)), Truth::True);
        assert_eq!(truth(&c.fails, Some(40)), Truth::False);
        assert_eq!(truth(&c.holds, Some(20)), Truth::False);
        assert_eq!(truth(&c.fails, Some(20)), Truth::True);
        // unbound: neither true nor false
        assert_ne!(truth(&c.holds, None), Truth::True);
        assert_ne!(truth(&c.fails, None), Truth::True);
    }

    #[test]
    fn test_not_equal_is_negated_equal() {
        let types = TypeRegistry::new();
        let (binders, var_types) = setup();
        let t = translator_for(&binders, &var_types, &types);
        let c = t
            .condition(&SparqlExpression::Not(Box::new(SparqlExpression::equal(
                SparqlExpression::var("age"),
                integer("3"),
            ))))
            .unwrap();
        assert_eq!(truth(&c.holds, Some(4)), Truth::True);
        assert_eq!(truth(&c.holds, Some(3)), Truth::False);
        assert_ne!(truth(&c.holds, None), Truth::True);
    }

    #[test]
    fn test_string_never_equals_number() {
        let types = TypeRegistry::new();
        let (binders, var_types) = setup();
        let t = translator_for(&binders, &var_types, &types);
        let c = t
            .condition(&SparqlExpression::equal(
                SparqlExpression::var("age"),
                SparqlExpression::Constant(RdfTerm::string("4")),
            ))
            .unwrap();
        assert_eq!(truth(&c.holds, Some(4)), Truth::False);
        assert_eq!(truth(&c.fails, Some(4)), Truth::True);
    }

    #[test]
    fn test_bound_and_kind_tests() {
        let types = TypeRegistry::new();
        let (binders, var_types) = setup();
        let t = translator_for(&binders, &var_types, &types);
        let bound = t.condition(&SparqlExpression::Bound("age".to_string())).unwrap();
        assert_eq!(truth(&bound.holds, Some(1)), Truth::True);
        assert_eq!(truth(&bound.fails, None), Truth::True);
        let missing = t
            .condition(&SparqlExpression::Bound("nope".to_string()))
            .unwrap();
        assert_eq!(missing.holds, FilterCondition::AlwaysFalse);

        let literal = t
            .condition(&SparqlExpression::IsLiteral(Box::new(SparqlExpression::var(
                "age",
            ))))
            .unwrap();
        assert_eq!(truth(&literal.holds, Some(1)), Truth::True);
        let iri = t
            .condition(&SparqlExpression::IsIri(Box::new(SparqlExpression::var("age"))))
            .unwrap();
        assert_eq!(truth(&iri.holds, Some(1)), Truth::False);
    }

    #[test]
    fn test_boolean_term_is_unbound_on_error() {
        let types = TypeRegistry::new();
        let (binders, var_types) = setup();
        let t = translator_for(&binders, &var_types, &types);
        let set = guard_errors(
            t.term(&SparqlExpression::Greater(
                Box::new(SparqlExpression::var("age")),
                Box::new(integer("30")),
            ))
            .unwrap(),
        );
        let binder = ValueBinder::ExpressionSet(set);
        let row = Row::from_pairs(vec![(VarId(0), Value::Integer(40))]);
        let term = binder.read(&row, &types).unwrap();
        assert_eq!(term.lexical(), "true");
        assert_eq!(binder.read(&Row::new(), &types), None);
    }
}
