//! Rewrites run over the AST before binding and over the bound plan after.

pub mod alias;
pub mod cte;
pub mod join_strategy;
pub mod pivot;
pub mod setop;
pub mod used_columns;

use crate::plan::{QueryPlan, SelectPlan, StatementPlan};

/// Apply `f` to every select of a plan, materialize steps included.
pub fn for_each_select_mut<F>(plan: &mut StatementPlan, f: &mut F)
where
    F: FnMut(&mut SelectPlan),
{
    let queries = plan
        .steps
        .iter_mut()
        .map(|step| &mut step.query)
        .chain(std::iter::once(&mut plan.body));
    for query in queries {
        if let QueryPlan::Select(select) = query {
            f(select);
        }
    }
}
