//! Join/union distribution
//!
//! Pushes joins (and the left side of left joins) below unions so that the
//! tree becomes a union of join trees over restricted patterns, and removes
//! `Empty` and `NotMatching` units on the way.

use crate::sparql::algebra::AlgebraNode;

/// Distribute joins over unions bottom-up. A distribution producing more
/// than `max_branches` union branches is skipped.
pub fn distribute(node: &AlgebraNode, max_branches: usize) -> AlgebraNode {
    let rec = |inner: &AlgebraNode| distribute(inner, max_branches);
    match node {
        AlgebraNode::Empty
        | AlgebraNode::NotMatching
        | AlgebraNode::TriplePattern(_)
        | AlgebraNode::Restricted(_) => node.clone(),
        AlgebraNode::Join(nodes) => join(nodes.iter().map(rec).collect(), max_branches),
        AlgebraNode::Union(nodes) => union(nodes.iter().map(rec).collect()),
        AlgebraNode::LeftJoin {
            left,
            right,
            expression,
        } => {
            let left = rec(left);
            let right = rec(right);
            match (left, right) {
                (AlgebraNode::NotMatching, _) => AlgebraNode::NotMatching,
                (left, AlgebraNode::NotMatching) => left,
                (AlgebraNode::Union(branches), right) if branches.len() <= max_branches => union(
                    branches
                        .into_iter()
                        .map(|branch| AlgebraNode::LeftJoin {
                            left: Box::new(branch),
                            right: Box::new(right.clone()),
                            expression: expression.clone(),
                        })
                        .collect(),
                ),
                (left, right) => AlgebraNode::LeftJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    expression: expression.clone(),
                },
            }
        }
        AlgebraNode::Minus { left, right } => match (rec(left), rec(right)) {
            (AlgebraNode::NotMatching, _) => AlgebraNode::NotMatching,
            (left, AlgebraNode::NotMatching) => left,
            (left, right) => AlgebraNode::Minus {
                left: Box::new(left),
                right: Box::new(right),
            },
        },
        AlgebraNode::Filter { expression, inner } => wrap(rec(inner), |inner| {
            AlgebraNode::Filter {
                expression: expression.clone(),
                inner,
            }
        }),
        AlgebraNode::Graph { name, inner } => wrap(rec(inner), |inner| AlgebraNode::Graph {
            name: name.clone(),
            inner,
        }),
        AlgebraNode::Extend {
            inner,
            variable,
            expression,
        } => wrap(rec(inner), |inner| AlgebraNode::Extend {
            inner,
            variable: variable.clone(),
            expression: expression.clone(),
        }),
        AlgebraNode::Project { inner, variables } => {
            wrap(rec(inner), |inner| AlgebraNode::Project {
                inner,
                variables: variables.clone(),
            })
        }
        AlgebraNode::OrderBy { inner, conditions } => {
            wrap(rec(inner), |inner| AlgebraNode::OrderBy {
                inner,
                conditions: conditions.clone(),
            })
        }
        AlgebraNode::Slice {
            inner,
            offset,
            limit,
        } => wrap(rec(inner), |inner| AlgebraNode::Slice {
            inner,
            offset: *offset,
            limit: *limit,
        }),
        AlgebraNode::Distinct(inner) => wrap(rec(inner), AlgebraNode::Distinct),
    }
}

/// A unary node over no solutions has no solutions
fn wrap(inner: AlgebraNode, build: impl FnOnce(Box<AlgebraNode>) -> AlgebraNode) -> AlgebraNode {
    match inner {
        AlgebraNode::NotMatching => AlgebraNode::NotMatching,
        inner => build(Box::new(inner)),
    }
}

/// Flattened union without `NotMatching` branches
fn union(nodes: Vec<AlgebraNode>) -> AlgebraNode {
    let mut branches = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            AlgebraNode::NotMatching => {}
            AlgebraNode::Union(inner) => branches.extend(inner),
            other => branches.push(other),
        }
    }
    match branches.len() {
        0 => AlgebraNode::NotMatching,
        1 => branches.remove(0),
        _ => AlgebraNode::Union(branches),
    }
}

/// Flattened join without `Empty` operands; distributed over union operands
/// when the product stays within `max_branches`
fn join(nodes: Vec<AlgebraNode>, max_branches: usize) -> AlgebraNode {
    let operands = match flatten_join(nodes) {
        Ok(operands) => operands,
        Err(node) => return node,
    };

    let mut branches: usize = 1;
    for operand in &operands {
        if let AlgebraNode::Union(alternatives) = operand {
            branches = branches.saturating_mul(alternatives.len());
        }
    }
    if branches == 1 || branches > max_branches {
        return AlgebraNode::Join(operands);
    }

    let mut product: Vec<Vec<AlgebraNode>> = vec![Vec::new()];
    for operand in operands {
        let alternatives = match operand {
            AlgebraNode::Union(alternatives) => alternatives,
            other => vec![other],
        };
        product = product
            .into_iter()
            .flat_map(|prefix| {
                alternatives.iter().map(move |alternative| {
                    let mut row = prefix.clone();
                    row.push(alternative.clone());
                    row
                })
            })
            .collect();
    }
    union(
        product
            .into_iter()
            .map(|operands| match flatten_join(operands) {
                Ok(operands) => AlgebraNode::Join(operands),
                Err(node) => node,
            })
            .collect(),
    )
}

/// Flatten nested joins and drop `Empty` operands. `Err` carries the whole
/// join's replacement when it degenerates to a single node.
fn flatten_join(nodes: Vec<AlgebraNode>) -> Result<Vec<AlgebraNode>, AlgebraNode> {
    let mut operands = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            AlgebraNode::Empty => {}
            AlgebraNode::NotMatching => return Err(AlgebraNode::NotMatching),
            AlgebraNode::Join(inner) => operands.extend(inner),
            other => operands.push(other),
        }
    }
    match operands.len() {
        0 => Err(AlgebraNode::Empty),
        1 => Err(operands.remove(0)),
        _ => Ok(operands),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::algebra::{TermPattern, TriplePattern};

    fn leaf(name: &str) -> AlgebraNode {
        AlgebraNode::TriplePattern(TriplePattern::new(
            TermPattern::var("s"),
            TermPattern::iri(&format!("http://ex.org/{}", name)),
            TermPattern::var(name),
        ))
    }

    #[test]
    fn test_join_distributes_over_union() {
        let node = AlgebraNode::join(AlgebraNode::union(leaf("a"), leaf("b")), leaf("c"));
        assert_eq!(
            distribute(&node, 16),
            AlgebraNode::union(
                AlgebraNode::join(leaf("a"), leaf("c")),
                AlgebraNode::join(leaf("b"), leaf("c")),
            )
        );
        // right operand position
        let node = AlgebraNode::join(leaf("c"), AlgebraNode::union(leaf("a"), leaf("b")));
        assert_eq!(
            distribute(&node, 16),
            AlgebraNode::union(
                AlgebraNode::join(leaf("c"), leaf("a")),
                AlgebraNode::join(leaf("c"), leaf("b")),
            )
        );
    }

    #[test]
    fn test_branch_limit_skips_distribution() {
        let node = AlgebraNode::join(
            AlgebraNode::union(leaf("a"), leaf("b")),
            AlgebraNode::union(leaf("c"), leaf("d")),
        );
        assert!(matches!(distribute(&node, 3), AlgebraNode::Join(_)));
        match distribute(&node, 4) {
            AlgebraNode::Union(branches) => assert_eq!(branches.len(), 4),
            other => panic!("Expected union, got {}", other),
        }
    }

    #[test]
    fn test_units_are_absorbed() {
        let node = AlgebraNode::join(AlgebraNode::Empty, leaf("a"));
        assert_eq!(distribute(&node, 16), leaf("a"));
        let node = AlgebraNode::join(AlgebraNode::NotMatching, leaf("a"));
        assert_eq!(distribute(&node, 16), AlgebraNode::NotMatching);
        let node = AlgebraNode::union(AlgebraNode::NotMatching, leaf("a"));
        assert_eq!(distribute(&node, 16), leaf("a"));
        let node = AlgebraNode::LeftJoin {
            left: Box::new(leaf("a")),
            right: Box::new(AlgebraNode::NotMatching),
            expression: None,
        };
        assert_eq!(distribute(&node, 16), leaf("a"));
    }

    #[test]
    fn test_left_join_distributes_left_union() {
        let node = AlgebraNode::LeftJoin {
            left: Box::new(AlgebraNode::union(leaf("a"), leaf("b"))),
            right: Box::new(leaf("c")),
            expression: None,
        };
        match distribute(&node, 16) {
            AlgebraNode::Union(branches) => {
                assert_eq!(branches.len(), 2);
                assert!(branches
                    .iter()
                    .all(|b| matches!(b, AlgebraNode::LeftJoin { .. })));
            }
            other => panic!("Expected union, got {}", other),
        }
    }

    #[test]
    fn test_distribution_is_idempotent() {
        let node = AlgebraNode::join(
            AlgebraNode::union(leaf("a"), AlgebraNode::join(leaf("b"), leaf("e"))),
            AlgebraNode::union(leaf("c"), leaf("d")),
        );
        for limit in [2, 16] {
            let once = distribute(&node, limit);
            assert_eq!(distribute(&once, limit), once);
        }
    }
}
