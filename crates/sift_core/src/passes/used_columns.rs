//! Tell row sources which columns a query reads.

use hashbrown::HashSet;
use sift_parser::ast::{Expr, JoinStrategy};

use crate::binder::rewrite::referenced_columns;
use crate::plan::{FromPlan, LeafSource, SelectPlan};

/// Set `used_columns` on every leaf of a select to the names of the
/// columns referenced anywhere in it.
pub fn compute_used_columns(select: &mut SelectPlan) {
    let mut refs = Vec::new();
    {
        let mut collect = |expr: &Expr| referenced_columns(expr, &mut refs);

        select.filter.iter().for_each(&mut collect);
        select.having.iter().for_each(&mut collect);
        select.projections.iter().for_each(&mut collect);
        if let Some(grouping) = &select.grouping {
            grouping.keys.iter().for_each(&mut collect);
            grouping
                .aggregates
                .iter()
                .filter_map(|agg| agg.arg.as_ref())
                .for_each(&mut collect);
        }
        if let Some(from) = &select.from {
            collect_from(from, &mut collect);
        }
    }
    let refs: HashSet<(usize, usize)> = refs.into_iter().collect();

    if let Some(from) = &mut select.from {
        from.for_each_leaf_mut(&mut |leaf| {
            let mut used: Vec<_> = leaf
                .columns
                .iter()
                .filter(|c| refs.contains(&(leaf.slot, c.index)))
                .map(|c| c.name.clone())
                .collect();
            used.dedup();
            leaf.used_columns = Some(used);
        });
    }
}

fn collect_from<F>(from: &FromPlan, collect: &mut F)
where
    F: FnMut(&Expr),
{
    match from {
        FromPlan::Leaf(leaf) => {
            if let LeafSource::Schema { args, .. } = &leaf.source {
                args.iter().for_each(&mut *collect);
            }
        }
        FromPlan::Join {
            left,
            right,
            condition,
            strategy,
            ..
        } => {
            collect_from(left, collect);
            collect_from(right, collect);
            collect(condition);
            if let JoinStrategy::Hash {
                left_keys,
                right_keys,
            } = strategy
            {
                left_keys.iter().chain(right_keys).for_each(&mut *collect);
            }
        }
        FromPlan::Apply { left, right, .. } => {
            collect_from(left, collect);
            collect_from(right, collect);
        }
    }
}
