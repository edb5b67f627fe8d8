use super::{ColumnExpr, ErrorNode, Expr, FunctionExpr, Ident, Literal, QueryExpr};
use crate::tokens::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromAlias {
    pub name: Ident,
    /// Alias was assigned during rewriting, not written by the user.
    pub generated: bool,
}

impl FromAlias {
    pub fn new(name: Ident) -> Self {
        FromAlias {
            name,
            generated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyKind {
    /// Only left rows with at least one right row.
    Cross,
    /// All left rows, null extended when the right side is empty.
    Outer,
}

/// How a join gets executed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    #[default]
    NestedLoop,
    /// Build an index over the right side keyed on `right_keys`, probe it with
    /// `left_keys` evaluated per left row.
    Hash {
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FromNode {
    /// `#schema.method(args)`
    SchemaMethod {
        schema: Ident,
        method: Ident,
        args: Vec<Expr>,
        alias: Option<FromAlias>,
        span: Span,
    },
    /// A bare name. Resolved during binding to a CTE or an in-memory table.
    Reference {
        name: Ident,
        alias: Option<FromAlias>,
        span: Span,
    },
    /// Reference to a CTE defined in the WITH clause.
    Cte {
        name: Ident,
        alias: Option<FromAlias>,
    },
    /// Reference to an in-memory table registered with the compile options.
    Memory {
        name: Ident,
        alias: Option<FromAlias>,
    },
    Subquery {
        query: Box<QueryExpr>,
        alias: Option<FromAlias>,
    },
    Join {
        left: Box<FromNode>,
        right: Box<FromNode>,
        kind: JoinKind,
        condition: Expr,
        strategy: JoinStrategy,
    },
    Apply {
        left: Box<FromNode>,
        right: Box<FromNode>,
        kind: ApplyKind,
    },
    /// `source PIVOT (Agg(expr) FOR column IN (v1, v2, ...)) alias`
    Pivot {
        source: Box<FromNode>,
        aggregate: FunctionExpr,
        for_column: ColumnExpr,
        values: Vec<Literal>,
        alias: Option<FromAlias>,
    },
    Error(ErrorNode),
}

impl FromNode {
    /// Alias of a leaf source. Joins and applies have no alias of their own.
    pub fn alias(&self) -> Option<&FromAlias> {
        match self {
            Self::SchemaMethod { alias, .. }
            | Self::Reference { alias, .. }
            | Self::Cte { alias, .. }
            | Self::Memory { alias, .. }
            | Self::Subquery { alias, .. }
            | Self::Pivot { alias, .. } => alias.as_ref(),
            Self::Join { .. } | Self::Apply { .. } | Self::Error(_) => None,
        }
    }

    pub fn alias_mut(&mut self) -> Option<&mut Option<FromAlias>> {
        match self {
            Self::SchemaMethod { alias, .. }
            | Self::Reference { alias, .. }
            | Self::Cte { alias, .. }
            | Self::Memory { alias, .. }
            | Self::Subquery { alias, .. }
            | Self::Pivot { alias, .. } => Some(alias),
            Self::Join { .. } | Self::Apply { .. } | Self::Error(_) => None,
        }
    }

    /// Leaf sources left to right.
    pub fn leaves(&self) -> Vec<&FromNode> {
        match self {
            Self::Join { left, right, .. } | Self::Apply { left, right, .. } => {
                let mut out = left.leaves();
                out.extend(right.leaves());
                out
            }
            other => vec![other],
        }
    }

    /// Number of leaf sources.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Join { left, right, .. } | Self::Apply { left, right, .. } => {
                left.leaf_count() + right.leaf_count()
            }
            _ => 1,
        }
    }
}
