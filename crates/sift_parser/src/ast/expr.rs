use std::fmt;

use super::{ErrorNode, Ident, MissingNode};
use crate::datatype::DataType;
use crate::tokens::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    /// Decimal digits as written, without any unit suffix.
    Decimal(String),
    String(String),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Any,
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Int64,
            Self::Decimal(_) => DataType::Decimal,
            Self::String(_) => DataType::Utf8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Plus,
    Minus,
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Not => write!(f, "NOT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOperator {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOperator {
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    /// Operator to use when the operands are swapped.
    pub const fn flip(&self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    And,
    Or,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LikeKind {
    /// SQL pattern with `%` and `_`.
    Like,
    /// Regular expression.
    RLike,
}

impl fmt::Display for LikeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Like => write!(f, "LIKE"),
            Self::RLike => write!(f, "RLIKE"),
        }
    }
}

/// Binding of a column reference to a source in the enclosing query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Position of the source in the query's FROM clause, left to right.
    pub source: usize,
    /// Column index reported by the source.
    pub index: usize,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnExpr {
    /// Source alias, if written.
    pub qualifier: Option<Ident>,
    pub name: Ident,
    pub span: Span,
    /// Set during binding.
    pub resolved: Option<ResolvedColumn>,
}

impl ColumnExpr {
    pub fn new(qualifier: Option<Ident>, name: Ident, span: Span) -> Self {
        ColumnExpr {
            qualifier,
            name,
            span,
            resolved: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFunction {
    /// Index into the function registry.
    pub id: usize,
    pub is_aggregate: bool,
    pub return_type: DataType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionExpr {
    pub name: Ident,
    pub args: Vec<Expr>,
    /// Called as `Func(*)`.
    pub star: bool,
    pub span: Span,
    /// Set during binding.
    pub resolved: Option<ResolvedFunction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhenThen {
    pub when: Expr,
    pub then: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnExpr),
    /// Access a named field of a structured value, e.g. `Doc.Address.City`.
    Property {
        expr: Box<Expr>,
        name: Ident,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Comparison {
        left: Box<Expr>,
        op: ComparisonOperator,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: LogicalOperator,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
        kind: LikeKind,
    },
    Case {
        when_then: Vec<WhenThen>,
        else_expr: Option<Box<Expr>>,
    },
    Function(FunctionExpr),
    Error(ErrorNode),
    Missing(MissingNode),
}

impl Expr {
    /// Type this expression produces. `Any` until columns and functions are
    /// bound.
    pub fn return_type(&self) -> DataType {
        match self {
            Self::Literal(lit) => lit.data_type(),
            Self::Column(col) => match &col.resolved {
                Some(resolved) => resolved.data_type,
                None => DataType::Any,
            },
            Self::Property { .. } => DataType::Any,
            Self::Unary { op, expr } => match op {
                UnaryOperator::Not => DataType::Boolean,
                UnaryOperator::Plus | UnaryOperator::Minus => expr.return_type(),
            },
            Self::Binary { left, op, right } => {
                let (left, right) = (left.return_type(), right.return_type());
                if *op == BinaryOperator::Plus
                    && left == DataType::Utf8
                    && right == DataType::Utf8
                {
                    return DataType::Utf8;
                }
                match DataType::common_supertype(left, right) {
                    Some(t) if t.is_numeric() => t,
                    _ => DataType::Any,
                }
            }
            Self::Comparison { .. }
            | Self::Logical { .. }
            | Self::IsNull { .. }
            | Self::InList { .. }
            | Self::Like { .. } => DataType::Boolean,
            Self::Case {
                when_then,
                else_expr,
            } => {
                // Null branches don't constrain the type.
                let mut types = when_then
                    .iter()
                    .map(|wt| &wt.then)
                    .chain(else_expr.iter().map(|e| e.as_ref()))
                    .filter(|e| !matches!(e, Expr::Literal(Literal::Null)))
                    .map(|e| e.return_type());
                let first = match types.next() {
                    Some(t) => t,
                    None => return DataType::Any,
                };
                types
                    .try_fold(first, DataType::common_supertype)
                    .unwrap_or(DataType::Any)
            }
            Self::Function(func) => match &func.resolved {
                Some(resolved) => resolved.return_type,
                None => DataType::Any,
            },
            Self::Error(_) | Self::Missing(_) => DataType::Any,
        }
    }

    /// Deterministic structural encoding of this expression.
    ///
    /// Spans are ignored. Bound columns are encoded by their source position
    /// and index so that `a.Name` and `Name` compare equal once both resolve
    /// to the same column.
    pub fn id(&self) -> String {
        let mut s = String::new();
        // Writing to a string doesn't fail.
        let _ = super::format::write_expr(&mut s, self, super::format::FormatMode::Id);
        s
    }

    /// Returns true if this expression or any of its children is a recovery
    /// node.
    pub fn contains_recovery_node(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if matches!(expr, Expr::Error(_) | Expr::Missing(_)) {
                found = true;
            }
        });
        found
    }

    /// Returns true if this is a literal or an expression over only literals.
    pub fn is_constant(&self) -> bool {
        let mut constant = true;
        self.walk(&mut |expr| match expr {
            Expr::Column(_)
            | Expr::Property { .. }
            | Expr::Function(_)
            | Expr::Error(_)
            | Expr::Missing(_) => constant = false,
            _ => (),
        });
        constant
    }

    /// Visit this expression and all children, parents first.
    pub fn walk<F>(&self, f: &mut F)
    where
        F: FnMut(&Expr),
    {
        f(self);
        match self {
            Self::Literal(_) | Self::Column(_) | Self::Error(_) | Self::Missing(_) => (),
            Self::Property { expr, .. } | Self::Unary { expr, .. } | Self::IsNull { expr, .. } => {
                expr.walk(f)
            }
            Self::Binary { left, right, .. }
            | Self::Comparison { left, right, .. }
            | Self::Logical { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Self::InList { expr, list, .. } => {
                expr.walk(f);
                for item in list {
                    item.walk(f);
                }
            }
            Self::Like { expr, pattern, .. } => {
                expr.walk(f);
                pattern.walk(f);
            }
            Self::Case {
                when_then,
                else_expr,
            } => {
                for wt in when_then {
                    wt.when.walk(f);
                    wt.then.walk(f);
                }
                if let Some(else_expr) = else_expr {
                    else_expr.walk(f);
                }
            }
            Self::Function(func) => {
                for arg in &func.args {
                    arg.walk(f);
                }
            }
        }
    }

    /// Split a predicate on AND into its conjuncts.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Self::Logical {
                left,
                op: LogicalOperator::And,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        super::format::write_expr(f, self, super::format::FormatMode::Sql)
    }
}
