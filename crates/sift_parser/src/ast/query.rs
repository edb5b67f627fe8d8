use std::fmt;

use super::format::{self, FormatMode};
use super::{ErrorNode, Expr, FromNode, Ident, SkippedTokensNode};
use crate::tokens::Span;

/// A full query, optional CTEs followed by the query body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub ctes: Vec<CteNode>,
    pub body: QueryExpr,
}

impl Statement {
    /// Canonical text used as a key for plan caching.
    ///
    /// Generated aliases are replaced with placeholders so that a statement
    /// has the same key before and after alias assignment.
    pub fn cache_key(&self) -> String {
        let mut s = String::new();
        let _ = format::write_statement(&mut s, self, FormatMode::CacheKey);
        s
    }

    /// Structural encoding of the statement. See [`Expr::id`].
    pub fn id(&self) -> String {
        let mut s = String::new();
        let _ = format::write_statement(&mut s, self, FormatMode::Id);
        s
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format::write_statement(f, self, FormatMode::Sql)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteNode {
    pub name: Ident,
    pub query: QueryExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperator {
    Union,
    UnionAll,
    Except,
    Intersect,
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union => write!(f, "UNION"),
            Self::UnionAll => write!(f, "UNION ALL"),
            Self::Except => write!(f, "EXCEPT"),
            Self::Intersect => write!(f, "INTERSECT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOpNode {
    pub left: QueryExpr,
    pub right: QueryExpr,
    pub op: SetOperator,
    /// Columns that determine row identity, e.g. `UNION (Name, City)`.
    pub keys: Option<Vec<Ident>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    Select(Box<SelectQuery>),
    SetOp(Box<SetOpNode>),
    Error(ErrorNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `alias.*`
    QualifiedWildcard(Ident),
    Expr { expr: Expr, alias: Option<Ident> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectNode {
    pub items: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhereNode {
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HavingNode {
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupByNode {
    pub exprs: Vec<Expr>,
    pub having: Option<HavingNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByNode {
    pub items: Vec<OrderByItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipNode {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeNode {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub select: SelectNode,
    /// Absent for queries like `select 1 + 1`.
    pub from: Option<FromNode>,
    pub where_clause: Option<WhereNode>,
    pub group_by: Option<GroupByNode>,
    pub order_by: Option<OrderByNode>,
    pub skip: Option<SkipNode>,
    pub take: Option<TakeNode>,
    /// Tokens dropped while recovering from errors inside this query.
    pub skipped: Vec<SkippedTokensNode>,
    pub span: Span,
}

impl SelectQuery {
    pub fn new(select: SelectNode, span: Span) -> Self {
        SelectQuery {
            select,
            from: None,
            where_clause: None,
            group_by: None,
            order_by: None,
            skip: None,
            take: None,
            skipped: Vec::new(),
            span,
        }
    }
}
