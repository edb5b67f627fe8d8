//! Bound form of a statement, ready for instruction emission.
//!
//! Expressions are AST expressions whose columns and functions have been
//! resolved. A column's `source` is a slot local to its select: FROM leaves
//! are numbered left to right starting at zero, and the group row of a
//! grouped select comes after the last leaf.

use sift_parser::ast::{ApplyKind, Expr, JoinKind, JoinStrategy, SetOperator};

use crate::schema::SchemaColumn;
use crate::table::Column;

/// Name of the table holding a statement's result.
pub const RESULT_TABLE: &str = "result";

#[derive(Debug, Clone, PartialEq)]
pub struct StatementPlan {
    /// Tables to build before the body runs, in order.
    pub steps: Vec<MaterializeStep>,
    pub body: QueryPlan,
}

/// Run a query and store its rows in a named table.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeStep {
    pub table: String,
    pub query: QueryPlan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    Select(Box<SelectPlan>),
    SetOp(SetOpPlan),
}

impl QueryPlan {
    pub fn columns(&self) -> &[Column] {
        match self {
            Self::Select(select) => &select.columns,
            Self::SetOp(setop) => &setop.columns,
        }
    }
}

/// Combine two materialized tables.
#[derive(Debug, Clone, PartialEq)]
pub struct SetOpPlan {
    pub left: String,
    pub right: String,
    pub op: SetOperator,
    /// Positions of the key columns. Empty for UNION ALL.
    pub keys: Vec<usize>,
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectPlan {
    /// Offset added to local slots to get the executor's slot.
    pub slot_base: usize,
    /// Number of local slots, leaves plus the group slot if grouped.
    pub slot_count: usize,
    pub from: Option<FromPlan>,
    pub filter: Option<Expr>,
    pub grouping: Option<GroupingPlan>,
    pub having: Option<Expr>,
    /// Output expressions. Expressions past `columns.len()` only exist for
    /// sorting and are dropped afterwards.
    pub projections: Vec<Expr>,
    pub columns: Vec<Column>,
    /// (projection index, descending)
    pub order_by: Vec<(usize, bool)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
}

impl SelectPlan {
    pub fn has_hidden_columns(&self) -> bool {
        self.projections.len() > self.columns.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingPlan {
    /// Name of the group tree.
    pub arena: String,
    /// Local slot of the group row.
    pub slot: usize,
    /// GROUP BY expressions, empty when aggregating without grouping.
    pub keys: Vec<Expr>,
    pub aggregates: Vec<AggregatePlan>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// Accumulator name within a group.
    pub name: String,
    /// Index into the aggregate function registry.
    pub function: usize,
    /// None for `Func(*)`.
    pub arg: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromPlan {
    Leaf(LeafPlan),
    Join {
        left: Box<FromPlan>,
        right: Box<FromPlan>,
        kind: JoinKind,
        condition: Expr,
        strategy: JoinStrategy,
    },
    Apply {
        left: Box<FromPlan>,
        right: Box<FromPlan>,
        kind: ApplyKind,
    },
}

impl FromPlan {
    /// Local slots of all leaves, left to right.
    pub fn slots(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| out.push(leaf.slot));
        out
    }

    pub fn for_each_leaf<F>(&self, f: &mut F)
    where
        F: FnMut(&LeafPlan),
    {
        match self {
            Self::Leaf(leaf) => f(leaf),
            Self::Join { left, right, .. } | Self::Apply { left, right, .. } => {
                left.for_each_leaf(f);
                right.for_each_leaf(f);
            }
        }
    }

    pub fn for_each_leaf_mut<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut LeafPlan),
    {
        match self {
            Self::Leaf(leaf) => f(leaf),
            Self::Join { left, right, .. } | Self::Apply { left, right, .. } => {
                left.for_each_leaf_mut(f);
                right.for_each_leaf_mut(f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafPlan {
    pub slot: usize,
    pub alias: String,
    pub source: LeafSource,
    pub columns: Vec<SchemaColumn>,
    /// Columns read by the query. None reads everything.
    pub used_columns: Option<Vec<String>>,
}

impl LeafPlan {
    /// Number of values needed to hold a row of this leaf addressed by
    /// column index.
    pub fn width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.index + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafSource {
    /// `#schema.method(args)`
    Schema {
        schema: String,
        method: String,
        args: Vec<Expr>,
    },
    /// A table built by an earlier step.
    Materialized { table: String },
    /// A table registered with the compile options.
    Memory { name: String },
}
