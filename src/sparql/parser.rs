//! SPARQL parser using spargebra library
//!
//! Surface syntax is parsed by spargebra; this module lowers the resulting
//! algebra into [`AlgebraNode`]s and rejects everything the compiler cannot
//! translate.

use super::algebra::{AlgebraNode, OrderCondition, TermPattern, TriplePattern};
use super::expression::SparqlExpression;
use crate::rdf::{BlankNode, Literal, NamedNode, RdfTerm};
use spargebra::algebra::{Expression, Function, GraphPattern, OrderExpression};
use spargebra::term::{NamedNodePattern, TermPattern as SpTermPattern, TriplePattern as SpTriple};
use spargebra::Query;
use thiserror::Error;
use tracing::debug;

/// Parse errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// Syntax error
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Prefix of the hidden variables standing for blank nodes in patterns
const BLANK_VARIABLE_PREFIX: &str = "_bnode_";

/// Query form and its form-specific parts
#[derive(Debug, Clone, PartialEq)]
pub enum QueryForm {
    /// Projected variables in output order
    Select { variables: Vec<String> },
    Ask,
    /// Template triples instantiated for every solution
    Construct { template: Vec<TriplePattern> },
}

/// A lowered query
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub form: QueryForm,
    pub pattern: AlgebraNode,
}

/// SPARQL parser
pub struct SparqlParser;

impl SparqlParser {
    /// Parse a SPARQL query string
    pub fn parse(query: &str) -> ParseResult<ParsedQuery> {
        let query = Query::parse(query, None).map_err(|e| ParseError::Syntax(e.to_string()))?;
        let parsed = match query {
            Query::Select {
                dataset, pattern, ..
            } => {
                reject_dataset(dataset.is_some())?;
                let pattern = lower_pattern(&pattern)?;
                let variables = projected_variables(&pattern);
                ParsedQuery {
                    form: QueryForm::Select { variables },
                    pattern,
                }
            }
            Query::Ask {
                dataset, pattern, ..
            } => {
                reject_dataset(dataset.is_some())?;
                ParsedQuery {
                    form: QueryForm::Ask,
                    pattern: lower_pattern(&pattern)?,
                }
            }
            Query::Construct {
                template,
                dataset,
                pattern,
                ..
            } => {
                reject_dataset(dataset.is_some())?;
                let template = template
                    .iter()
                    .map(lower_template_triple)
                    .collect::<ParseResult<Vec<_>>>()?;
                ParsedQuery {
                    form: QueryForm::Construct { template },
                    pattern: lower_pattern(&pattern)?,
                }
            }
            Query::Describe { .. } => {
                return Err(ParseError::Unsupported("DESCRIBE queries".to_string()))
            }
        };
        debug!("Lowered query pattern: {}", parsed.pattern);
        Ok(parsed)
    }
}

fn reject_dataset(has_dataset: bool) -> ParseResult<()> {
    if has_dataset {
        return Err(ParseError::Unsupported("FROM / FROM NAMED".to_string()));
    }
    Ok(())
}

/// Output variables: the outermost projection, else every free variable
fn projected_variables(pattern: &AlgebraNode) -> Vec<String> {
    let mut node = pattern;
    loop {
        match node {
            AlgebraNode::Slice { inner, .. } | AlgebraNode::Distinct(inner) => node = inner,
            AlgebraNode::Project { variables, .. } => return variables.clone(),
            _ => break,
        }
    }
    pattern
        .free_variables()
        .into_iter()
        .filter(|v| !v.starts_with(BLANK_VARIABLE_PREFIX))
        .collect()
}

fn lower_pattern(pattern: &GraphPattern) -> ParseResult<AlgebraNode> {
    Ok(match pattern {
        GraphPattern::Bgp { patterns } => {
            let mut triples = patterns
                .iter()
                .map(|t| lower_triple(t).map(AlgebraNode::TriplePattern))
                .collect::<ParseResult<Vec<_>>>()?;
            match triples.len() {
                0 => AlgebraNode::Empty,
                1 => triples.remove(0),
                _ => AlgebraNode::Join(triples),
            }
        }
        GraphPattern::Join { left, right } => {
            AlgebraNode::join(lower_pattern(left)?, lower_pattern(right)?)
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => AlgebraNode::LeftJoin {
            left: Box::new(lower_pattern(left)?),
            right: Box::new(lower_pattern(right)?),
            expression: expression.as_ref().map(lower_expression).transpose()?,
        },
        GraphPattern::Filter { expr, inner } => AlgebraNode::Filter {
            expression: lower_expression(expr)?,
            inner: Box::new(lower_pattern(inner)?),
        },
        GraphPattern::Union { left, right } => {
            AlgebraNode::union(lower_pattern(left)?, lower_pattern(right)?)
        }
        GraphPattern::Graph { name, inner } => AlgebraNode::Graph {
            name: match name {
                NamedNodePattern::NamedNode(n) => {
                    TermPattern::Term(RdfTerm::NamedNode(NamedNode::from(n.clone())))
                }
                NamedNodePattern::Variable(v) => TermPattern::Variable(v.as_str().to_string()),
            },
            inner: Box::new(lower_pattern(inner)?),
        },
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => AlgebraNode::Extend {
            inner: Box::new(lower_pattern(inner)?),
            variable: variable.as_str().to_string(),
            expression: lower_expression(expression)?,
        },
        GraphPattern::Minus { left, right } => AlgebraNode::Minus {
            left: Box::new(lower_pattern(left)?),
            right: Box::new(lower_pattern(right)?),
        },
        GraphPattern::OrderBy { inner, expression } => AlgebraNode::OrderBy {
            inner: Box::new(lower_pattern(inner)?),
            conditions: expression
                .iter()
                .map(|e| match e {
                    OrderExpression::Asc(e) => Ok(OrderCondition {
                        expression: lower_expression(e)?,
                        descending: false,
                    }),
                    OrderExpression::Desc(e) => Ok(OrderCondition {
                        expression: lower_expression(e)?,
                        descending: true,
                    }),
                })
                .collect::<ParseResult<Vec<_>>>()?,
        },
        GraphPattern::Project { inner, variables } => AlgebraNode::Project {
            inner: Box::new(lower_pattern(inner)?),
            variables: variables.iter().map(|v| v.as_str().to_string()).collect(),
        },
        GraphPattern::Distinct { inner } => AlgebraNode::Distinct(Box::new(lower_pattern(inner)?)),
        // Duplicates may be kept, so the inner pattern is a valid answer.
        GraphPattern::Reduced { inner } => lower_pattern(inner)?,
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => AlgebraNode::Slice {
            inner: Box::new(lower_pattern(inner)?),
            offset: *start,
            limit: *length,
        },
        GraphPattern::Path { .. } => {
            return Err(ParseError::Unsupported("property paths".to_string()))
        }
        GraphPattern::Values { .. } => return Err(ParseError::Unsupported("VALUES".to_string())),
        GraphPattern::Group { .. } => {
            return Err(ParseError::Unsupported("GROUP BY and aggregates".to_string()))
        }
        GraphPattern::Service { .. } => {
            return Err(ParseError::Unsupported("SERVICE".to_string()))
        }
    })
}

fn lower_triple(triple: &SpTriple) -> ParseResult<TriplePattern> {
    Ok(TriplePattern::new(
        lower_term(&triple.subject, true)?,
        lower_predicate(&triple.predicate),
        lower_term(&triple.object, true)?,
    ))
}

fn lower_template_triple(triple: &SpTriple) -> ParseResult<TriplePattern> {
    Ok(TriplePattern::new(
        lower_term(&triple.subject, false)?,
        lower_predicate(&triple.predicate),
        lower_term(&triple.object, false)?,
    ))
}

fn lower_predicate(predicate: &NamedNodePattern) -> TermPattern {
    match predicate {
        NamedNodePattern::NamedNode(n) => {
            TermPattern::Term(RdfTerm::NamedNode(NamedNode::from(n.clone())))
        }
        NamedNodePattern::Variable(v) => TermPattern::Variable(v.as_str().to_string()),
    }
}

/// In a query pattern a blank node is a variable that cannot be projected.
/// In a CONSTRUCT template it stays a blank node, renamed per solution.
fn lower_term(term: &SpTermPattern, blank_as_variable: bool) -> ParseResult<TermPattern> {
    Ok(match term {
        SpTermPattern::NamedNode(n) => {
            TermPattern::Term(RdfTerm::NamedNode(NamedNode::from(n.clone())))
        }
        SpTermPattern::Literal(l) => TermPattern::Term(RdfTerm::Literal(Literal::from(l.clone()))),
        SpTermPattern::Variable(v) => TermPattern::Variable(v.as_str().to_string()),
        SpTermPattern::BlankNode(b) => {
            if blank_as_variable {
                TermPattern::Variable(format!("{}{}", BLANK_VARIABLE_PREFIX, b.as_str()))
            } else {
                TermPattern::Term(RdfTerm::BlankNode(BlankNode::from(b.clone())))
            }
        }
        #[allow(unreachable_patterns)]
        _ => return Err(ParseError::Unsupported("quoted triples".to_string())),
    })
}

fn lower_expression(expression: &Expression) -> ParseResult<SparqlExpression> {
    let binary = |a: &Expression, b: &Expression| -> ParseResult<_> {
        Ok((Box::new(lower_expression(a)?), Box::new(lower_expression(b)?)))
    };
    Ok(match expression {
        Expression::NamedNode(n) => {
            SparqlExpression::Constant(RdfTerm::NamedNode(NamedNode::from(n.clone())))
        }
        Expression::Literal(l) => SparqlExpression::Constant(RdfTerm::Literal(Literal::from(l.clone()))),
        Expression::Variable(v) => SparqlExpression::Variable(v.as_str().to_string()),
        Expression::And(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::And(a, b)
        }
        Expression::Or(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::Or(a, b)
        }
        Expression::Not(a) => SparqlExpression::Not(Box::new(lower_expression(a)?)),
        Expression::Equal(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::Equal(a, b)
        }
        Expression::SameTerm(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::SameTerm(a, b)
        }
        Expression::Greater(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::Greater(a, b)
        }
        Expression::GreaterOrEqual(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::GreaterOrEqual(a, b)
        }
        Expression::Less(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::Less(a, b)
        }
        Expression::LessOrEqual(a, b) => {
            let (a, b) = binary(a, b)?;
            SparqlExpression::LessOrEqual(a, b)
        }
        Expression::Bound(v) => SparqlExpression::Bound(v.as_str().to_string()),
        Expression::FunctionCall(function, args) => {
            let single = || -> ParseResult<Box<SparqlExpression>> {
                match args.as_slice() {
                    [arg] => Ok(Box::new(lower_expression(arg)?)),
                    _ => Err(ParseError::Syntax(format!(
                        "{} expects one argument",
                        function
                    ))),
                }
            };
            match function {
                Function::Str => SparqlExpression::Str(single()?),
                Function::IsIri => SparqlExpression::IsIri(single()?),
                Function::IsBlank => SparqlExpression::IsBlank(single()?),
                Function::IsLiteral => SparqlExpression::IsLiteral(single()?),
                other => {
                    return Err(ParseError::Unsupported(format!("function {}", other)));
                }
            }
        }
        other => {
            return Err(ParseError::Unsupported(format!("expression {}", other)));
        }
    })
}
