//! SPARQL filter and BIND expressions

use crate::rdf::RdfTerm;
use std::collections::BTreeSet;
use std::fmt;

/// A SPARQL expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SparqlExpression {
    Variable(String),
    Constant(RdfTerm),
    And(Box<SparqlExpression>, Box<SparqlExpression>),
    Or(Box<SparqlExpression>, Box<SparqlExpression>),
    Not(Box<SparqlExpression>),
    Equal(Box<SparqlExpression>, Box<SparqlExpression>),
    SameTerm(Box<SparqlExpression>, Box<SparqlExpression>),
    Less(Box<SparqlExpression>, Box<SparqlExpression>),
    LessOrEqual(Box<SparqlExpression>, Box<SparqlExpression>),
    Greater(Box<SparqlExpression>, Box<SparqlExpression>),
    GreaterOrEqual(Box<SparqlExpression>, Box<SparqlExpression>),
    Bound(String),
    IsIri(Box<SparqlExpression>),
    IsBlank(Box<SparqlExpression>),
    IsLiteral(Box<SparqlExpression>),
    Str(Box<SparqlExpression>),
}

impl SparqlExpression {
    /// Variable expression
    pub fn var(name: &str) -> Self {
        SparqlExpression::Variable(name.to_string())
    }

    /// `a = b`
    pub fn equal(a: SparqlExpression, b: SparqlExpression) -> Self {
        SparqlExpression::Equal(Box::new(a), Box::new(b))
    }

    /// Variables mentioned by the expression
    pub fn variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            SparqlExpression::Variable(v) | SparqlExpression::Bound(v) => {
                out.insert(v.clone());
            }
            SparqlExpression::Constant(_) => {}
            SparqlExpression::And(a, b)
            | SparqlExpression::Or(a, b)
            | SparqlExpression::Equal(a, b)
            | SparqlExpression::SameTerm(a, b)
            | SparqlExpression::Less(a, b)
            | SparqlExpression::LessOrEqual(a, b)
            | SparqlExpression::Greater(a, b)
            | SparqlExpression::GreaterOrEqual(a, b) => {
                a.collect_variables(out);
                b.collect_variables(out);
            }
            SparqlExpression::Not(a)
            | SparqlExpression::IsIri(a)
            | SparqlExpression::IsBlank(a)
            | SparqlExpression::IsLiteral(a)
            | SparqlExpression::Str(a) => a.collect_variables(out),
        }
    }
}

impl fmt::Display for SparqlExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparqlExpression::Variable(v) => write!(f, "?{}", v),
            SparqlExpression::Constant(t) => write!(f, "{}", t),
            SparqlExpression::And(a, b) => write!(f, "({} && {})", a, b),
            SparqlExpression::Or(a, b) => write!(f, "({} || {})", a, b),
            SparqlExpression::Not(a) => write!(f, "!{}", a),
            SparqlExpression::Equal(a, b) => write!(f, "({} = {})", a, b),
            SparqlExpression::SameTerm(a, b) => write!(f, "sameTerm({}, {})", a, b),
            SparqlExpression::Less(a, b) => write!(f, "({} < {})", a, b),
            SparqlExpression::LessOrEqual(a, b) => write!(f, "({} <= {})", a, b),
            SparqlExpression::Greater(a, b) => write!(f, "({} > {})", a, b),
            SparqlExpression::GreaterOrEqual(a, b) => write!(f, "({} >= {})", a, b),
            SparqlExpression::Bound(v) => write!(f, "bound(?{})", v),
            SparqlExpression::IsIri(a) => write!(f, "isIRI({})", a),
            SparqlExpression::IsBlank(a) => write!(f, "isBlank({})", a),
            SparqlExpression::IsLiteral(a) => write!(f, "isLiteral({})", a),
            SparqlExpression::Str(a) => write!(f, "str({})", a),
        }
    }
}
