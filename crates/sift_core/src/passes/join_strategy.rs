//! Pick hash joins for equi-joins.

use sift_parser::ast::{ComparisonOperator, Expr, JoinKind, JoinStrategy};
use tracing::trace;

use crate::binder::rewrite::referenced_slots;
use crate::plan::{FromPlan, LeafSource, SelectPlan};

/// Switch joins to [`JoinStrategy::Hash`] where the condition allows it.
///
/// A join qualifies when it's an inner or left outer join, the right side
/// can be read once up front, and every conjunct of the condition is an
/// equality between an expression over the left sources and one over the
/// right source.
pub fn choose_join_strategies(select: &mut SelectPlan, enabled: bool) {
    if let Some(from) = &mut select.from {
        visit(from, enabled);
    }
}

fn visit(from: &mut FromPlan, enabled: bool) {
    match from {
        FromPlan::Leaf(_) => (),
        FromPlan::Apply { left, .. } => visit(left, enabled),
        FromPlan::Join {
            left,
            right,
            kind,
            condition,
            strategy,
        } => {
            visit(left, enabled);

            *strategy = JoinStrategy::NestedLoop;
            if !enabled || *kind == JoinKind::RightOuter || !is_rereadable(right) {
                return;
            }

            if let Some((left_keys, right_keys)) =
                equi_join_keys(condition, &left.slots(), &right.slots())
            {
                trace!(keys = left_keys.len(), "using hash join");
                *strategy = JoinStrategy::Hash {
                    left_keys,
                    right_keys,
                };
            }
        }
    }
}

/// Check that the right side doesn't depend on the current left row.
fn is_rereadable(right: &FromPlan) -> bool {
    match right {
        FromPlan::Leaf(leaf) => match &leaf.source {
            LeafSource::Schema { args, .. } => args.iter().all(Expr::is_constant),
            LeafSource::Materialized { .. } | LeafSource::Memory { .. } => true,
        },
        _ => false,
    }
}

fn equi_join_keys(
    condition: &Expr,
    left_slots: &[usize],
    right_slots: &[usize],
) -> Option<(Vec<Expr>, Vec<Expr>)> {
    let within = |expr: &Expr, slots: &[usize]| {
        let used = referenced_slots(expr);
        !used.is_empty() && used.iter().all(|s| slots.contains(s))
    };

    let mut left_keys = Vec::new();
    let mut right_keys = Vec::new();
    for conjunct in condition.conjuncts() {
        let Expr::Comparison {
            left,
            op: ComparisonOperator::Eq,
            right,
        } = conjunct
        else {
            return None;
        };

        if within(left, left_slots) && within(right, right_slots) {
            left_keys.push(left.as_ref().clone());
            right_keys.push(right.as_ref().clone());
        } else if within(right, left_slots) && within(left, right_slots) {
            left_keys.push(right.as_ref().clone());
            right_keys.push(left.as_ref().clone());
        } else {
            return None;
        }
    }

    Some((left_keys, right_keys))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::ast::{ColumnExpr, Ident, Literal, LogicalOperator, ResolvedColumn};
    use sift_parser::datatype::DataType;
    use sift_parser::tokens::Span;

    use super::*;
    use crate::plan::LeafPlan;

    fn col(slot: usize, index: usize) -> Expr {
        let mut c = ColumnExpr::new(None, Ident::new(format!("c{index}")), Span::EMPTY);
        c.resolved = Some(ResolvedColumn {
            source: slot,
            index,
            data_type: DataType::Int64,
        });
        Expr::Column(c)
    }

    fn eq(left: Expr, right: Expr) -> Expr {
        Expr::Comparison {
            left: Box::new(left),
            op: ComparisonOperator::Eq,
            right: Box::new(right),
        }
    }

    fn and(left: Expr, right: Expr) -> Expr {
        Expr::Logical {
            left: Box::new(left),
            op: LogicalOperator::And,
            right: Box::new(right),
        }
    }

    fn leaf(slot: usize, args: Vec<Expr>) -> FromPlan {
        FromPlan::Leaf(LeafPlan {
            slot,
            alias: format!("t{slot}"),
            source: LeafSource::Schema {
                schema: "s".to_string(),
                method: "m".to_string(),
                args,
            },
            columns: Vec::new(),
            used_columns: None,
        })
    }

    fn join(kind: JoinKind, condition: Expr, right_args: Vec<Expr>) -> FromPlan {
        FromPlan::Join {
            left: Box::new(leaf(0, Vec::new())),
            right: Box::new(leaf(1, right_args)),
            kind,
            condition,
            strategy: JoinStrategy::NestedLoop,
        }
    }

    fn strategy(mut from: FromPlan, enabled: bool) -> JoinStrategy {
        visit(&mut from, enabled);
        match from {
            FromPlan::Join { strategy, .. } => strategy,
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn equi_join_uses_hash() {
        // Sides are swapped so the left keys read the left source.
        let condition = and(eq(col(0, 0), col(1, 1)), eq(col(1, 0), col(0, 2)));
        assert_eq!(
            JoinStrategy::Hash {
                left_keys: vec![col(0, 0), col(0, 2)],
                right_keys: vec![col(1, 1), col(1, 0)],
            },
            strategy(join(JoinKind::Inner, condition, Vec::new()), true)
        );
    }

    #[test]
    fn nested_loop_cases() {
        let one = Expr::Literal(Literal::Integer(1));
        let tests = [
            // Disabled.
            (JoinKind::Inner, eq(col(0, 0), col(1, 0)), Vec::new(), false),
            // Right outer.
            (JoinKind::RightOuter, eq(col(0, 0), col(1, 0)), Vec::new(), true),
            // Not an equality.
            (
                JoinKind::Inner,
                Expr::Comparison {
                    left: Box::new(col(0, 0)),
                    op: ComparisonOperator::Lt,
                    right: Box::new(col(1, 0)),
                },
                Vec::new(),
                true,
            ),
            // Both sides read the same source.
            (JoinKind::Inner, eq(col(0, 0), col(0, 1)), Vec::new(), true),
            // Constant side.
            (JoinKind::LeftOuter, eq(col(0, 0), one), Vec::new(), true),
            // Right source depends on the left row.
            (JoinKind::Inner, eq(col(0, 0), col(1, 0)), vec![col(0, 1)], true),
        ];

        for (kind, condition, args, enabled) in tests {
            let display = condition.to_string();
            assert_eq!(
                JoinStrategy::NestedLoop,
                strategy(join(kind, condition, args), enabled),
                "{display}"
            );
        }
    }
}
