//! Text rendering of the AST.
//!
//! One traversal serves three purposes depending on the mode: query text that
//! parses back into the same tree, plan cache keys, and structural ids.

use std::fmt::{self, Write};

use super::{
    ApplyKind, CteNode, Expr, FromAlias, FromNode, Ident, JoinKind, Literal, QueryExpr,
    SelectItem, SelectQuery, SetOpNode, SetOperator, Statement, UnaryOperator,
};
use crate::escape::escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Query text that parses back into an equivalent tree.
    Sql,
    /// Like `Sql`, but generated aliases are omitted and function names are
    /// normalized.
    CacheKey,
    /// Like `CacheKey`, but bound columns are written as their resolved
    /// position.
    Id,
}

impl FormatMode {
    fn normalized(&self) -> bool {
        matches!(self, Self::CacheKey | Self::Id)
    }
}

pub fn write_statement<W: Write>(w: &mut W, stmt: &Statement, mode: FormatMode) -> fmt::Result {
    if !stmt.ctes.is_empty() {
        write!(w, "WITH ")?;
        for (idx, cte) in stmt.ctes.iter().enumerate() {
            if idx > 0 {
                write!(w, ", ")?;
            }
            write_cte(w, cte, mode)?;
        }
        write!(w, " ")?;
    }
    write_query(w, &stmt.body, mode)
}

fn write_cte<W: Write>(w: &mut W, cte: &CteNode, mode: FormatMode) -> fmt::Result {
    write_ident(w, &cte.name)?;
    write!(w, " AS (")?;
    write_query(w, &cte.query, mode)?;
    write!(w, ")")
}

pub fn write_query<W: Write>(w: &mut W, query: &QueryExpr, mode: FormatMode) -> fmt::Result {
    match query {
        QueryExpr::Select(select) => write_select(w, select, mode),
        QueryExpr::SetOp(setop) => write_setop(w, setop, mode),
        QueryExpr::Error(err) => write!(w, "<error: {}>", err.message),
    }
}

fn setop_precedence(op: SetOperator) -> u8 {
    match op {
        SetOperator::Union | SetOperator::UnionAll | SetOperator::Except => 10,
        SetOperator::Intersect => 20,
    }
}

fn write_setop<W: Write>(w: &mut W, setop: &SetOpNode, mode: FormatMode) -> fmt::Result {
    let prec = setop_precedence(setop.op);

    match &setop.left {
        QueryExpr::SetOp(left) if setop_precedence(left.op) < prec => {
            write!(w, "(")?;
            write_setop(w, left, mode)?;
            write!(w, ")")?;
        }
        other => write_query(w, other, mode)?,
    }

    write!(w, " {}", setop.op)?;
    if let Some(keys) = &setop.keys {
        write!(w, " (")?;
        write_ident_list(w, keys)?;
        write!(w, ")")?;
    }
    write!(w, " ")?;

    match &setop.right {
        QueryExpr::SetOp(right) => {
            write!(w, "(")?;
            write_setop(w, right, mode)?;
            write!(w, ")")
        }
        other => write_query(w, other, mode),
    }
}

fn write_select<W: Write>(w: &mut W, query: &SelectQuery, mode: FormatMode) -> fmt::Result {
    write!(w, "SELECT ")?;
    for (idx, item) in query.select.items.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        match item {
            SelectItem::Wildcard => write!(w, "*")?,
            SelectItem::QualifiedWildcard(qualifier) => {
                write_ident(w, qualifier)?;
                write!(w, ".*")?;
            }
            SelectItem::Expr { expr, alias } => {
                write_expr(w, expr, mode)?;
                if let Some(alias) = alias {
                    write!(w, " AS ")?;
                    write_ident(w, alias)?;
                }
            }
        }
    }

    if let Some(from) = &query.from {
        write!(w, " FROM ")?;
        write_from(w, from, mode)?;
    }

    if let Some(where_clause) = &query.where_clause {
        write!(w, " WHERE ")?;
        write_expr(w, &where_clause.expr, mode)?;
    }

    if let Some(group_by) = &query.group_by {
        write!(w, " GROUP BY ")?;
        write_expr_list(w, &group_by.exprs, mode)?;
        if let Some(having) = &group_by.having {
            write!(w, " HAVING ")?;
            write_expr(w, &having.expr, mode)?;
        }
    }

    if let Some(order_by) = &query.order_by {
        write!(w, " ORDER BY ")?;
        for (idx, item) in order_by.items.iter().enumerate() {
            if idx > 0 {
                write!(w, ", ")?;
            }
            write_expr(w, &item.expr, mode)?;
            if item.descending {
                write!(w, " DESC")?;
            }
        }
    }

    if let Some(skip) = &query.skip {
        write!(w, " SKIP {}", skip.count)?;
    }
    if let Some(take) = &query.take {
        write!(w, " TAKE {}", take.count)?;
    }

    Ok(())
}

fn write_alias<W: Write>(w: &mut W, alias: &Option<FromAlias>, mode: FormatMode) -> fmt::Result {
    match alias {
        Some(alias) if alias.generated && mode.normalized() => Ok(()),
        Some(alias) => {
            write!(w, " ")?;
            write_ident(w, &alias.name)
        }
        None => Ok(()),
    }
}

fn write_from<W: Write>(w: &mut W, from: &FromNode, mode: FormatMode) -> fmt::Result {
    match from {
        FromNode::SchemaMethod {
            schema,
            method,
            args,
            alias,
            ..
        } => {
            write!(w, "#")?;
            write_ident(w, schema)?;
            write!(w, ".")?;
            write_ident(w, method)?;
            write!(w, "(")?;
            write_expr_list(w, args, mode)?;
            write!(w, ")")?;
            write_alias(w, alias, mode)
        }
        FromNode::Reference { name, alias, .. }
        | FromNode::Cte { name, alias }
        | FromNode::Memory { name, alias } => {
            write_ident(w, name)?;
            write_alias(w, alias, mode)
        }
        FromNode::Subquery { query, alias } => {
            write!(w, "(")?;
            write_query(w, query, mode)?;
            write!(w, ")")?;
            write_alias(w, alias, mode)
        }
        FromNode::Join {
            left,
            right,
            kind,
            condition,
            ..
        } => {
            write_from(w, left, mode)?;
            let kind = match kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::LeftOuter => "LEFT OUTER JOIN",
                JoinKind::RightOuter => "RIGHT OUTER JOIN",
            };
            write!(w, " {kind} ")?;
            write_from(w, right, mode)?;
            write!(w, " ON ")?;
            write_expr(w, condition, mode)
        }
        FromNode::Apply { left, right, kind } => {
            write_from(w, left, mode)?;
            let kind = match kind {
                ApplyKind::Cross => "CROSS APPLY",
                ApplyKind::Outer => "OUTER APPLY",
            };
            write!(w, " {kind} ")?;
            write_from(w, right, mode)
        }
        FromNode::Pivot {
            source,
            aggregate,
            for_column,
            values,
            alias,
        } => {
            write_from(w, source, mode)?;
            write!(w, " PIVOT (")?;
            write_expr(w, &Expr::Function(aggregate.clone()), mode)?;
            write!(w, " FOR ")?;
            write_expr(w, &Expr::Column(for_column.clone()), mode)?;
            write!(w, " IN (")?;
            for (idx, value) in values.iter().enumerate() {
                if idx > 0 {
                    write!(w, ", ")?;
                }
                write_literal(w, value)?;
            }
            write!(w, "))")?;
            write_alias(w, alias, mode)
        }
        FromNode::Error(err) => write!(w, "<error: {}>", err.message),
    }
}

fn write_ident<W: Write>(w: &mut W, ident: &Ident) -> fmt::Result {
    write!(w, "{ident}")
}

fn write_ident_list<W: Write>(w: &mut W, idents: &[Ident]) -> fmt::Result {
    for (idx, ident) in idents.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write_ident(w, ident)?;
    }
    Ok(())
}

fn write_expr_list<W: Write>(w: &mut W, exprs: &[Expr], mode: FormatMode) -> fmt::Result {
    for (idx, expr) in exprs.iter().enumerate() {
        if idx > 0 {
            write!(w, ", ")?;
        }
        write_expr(w, expr, mode)?;
    }
    Ok(())
}

fn write_literal<W: Write>(w: &mut W, lit: &Literal) -> fmt::Result {
    match lit {
        Literal::Null => write!(w, "NULL"),
        Literal::Boolean(true) => write!(w, "TRUE"),
        Literal::Boolean(false) => write!(w, "FALSE"),
        Literal::Integer(v) => write!(w, "{v}"),
        Literal::Decimal(v) => {
            if v.contains('.') {
                write!(w, "{v}")
            } else {
                write!(w, "{v}d")
            }
        }
        Literal::String(s) => write!(w, "'{}'", escape(s)),
    }
}

/// Returns true if the expression needs parentheses when used as an operand.
fn is_compound(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(Literal::Integer(v)) => *v < 0,
        Expr::Unary { .. }
        | Expr::Binary { .. }
        | Expr::Comparison { .. }
        | Expr::Logical { .. }
        | Expr::IsNull { .. }
        | Expr::InList { .. }
        | Expr::Like { .. } => true,
        _ => false,
    }
}

fn write_operand<W: Write>(w: &mut W, expr: &Expr, mode: FormatMode) -> fmt::Result {
    if is_compound(expr) {
        write!(w, "(")?;
        write_expr(w, expr, mode)?;
        write!(w, ")")
    } else {
        write_expr(w, expr, mode)
    }
}

pub fn write_expr<W: Write>(w: &mut W, expr: &Expr, mode: FormatMode) -> fmt::Result {
    match expr {
        Expr::Literal(lit) => write_literal(w, lit),
        Expr::Column(col) => {
            if mode == FormatMode::Id {
                if let Some(resolved) = &col.resolved {
                    return write!(w, "#{}.{}", resolved.source, resolved.index);
                }
            }
            if let Some(qualifier) = &col.qualifier {
                write_ident(w, qualifier)?;
                write!(w, ".")?;
            }
            write_ident(w, &col.name)
        }
        Expr::Property { expr, name } => {
            match expr.as_ref() {
                Expr::Column(col) if col.qualifier.is_some() || mode == FormatMode::Id => {
                    write_expr(w, expr, mode)?
                }
                Expr::Property { .. } | Expr::Function(_) => write_expr(w, expr, mode)?,
                other => {
                    write!(w, "(")?;
                    write_expr(w, other, mode)?;
                    write!(w, ")")?;
                }
            }
            write!(w, ".")?;
            write_ident(w, name)
        }
        Expr::Unary { op, expr } => {
            match op {
                UnaryOperator::Not => write!(w, "NOT ")?,
                other => write!(w, "{other}")?,
            }
            write_operand(w, expr, mode)
        }
        Expr::Binary { left, op, right } => {
            write_operand(w, left, mode)?;
            write!(w, " {op} ")?;
            write_operand(w, right, mode)
        }
        Expr::Comparison { left, op, right } => {
            write_operand(w, left, mode)?;
            write!(w, " {op} ")?;
            write_operand(w, right, mode)
        }
        Expr::Logical { left, op, right } => {
            write_operand(w, left, mode)?;
            write!(w, " {op} ")?;
            write_operand(w, right, mode)
        }
        Expr::IsNull { expr, negated } => {
            write_operand(w, expr, mode)?;
            if *negated {
                write!(w, " IS NOT NULL")
            } else {
                write!(w, " IS NULL")
            }
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            write_operand(w, expr, mode)?;
            if *negated {
                write!(w, " NOT")?;
            }
            write!(w, " IN (")?;
            write_expr_list(w, list, mode)?;
            write!(w, ")")
        }
        Expr::Like {
            expr,
            pattern,
            negated,
            kind,
        } => {
            write_operand(w, expr, mode)?;
            if *negated {
                write!(w, " NOT")?;
            }
            write!(w, " {kind} ")?;
            write_operand(w, pattern, mode)
        }
        Expr::Case {
            when_then,
            else_expr,
        } => {
            write!(w, "CASE")?;
            for wt in when_then {
                write!(w, " WHEN ")?;
                write_expr(w, &wt.when, mode)?;
                write!(w, " THEN ")?;
                write_expr(w, &wt.then, mode)?;
            }
            if let Some(else_expr) = else_expr {
                write!(w, " ELSE ")?;
                write_expr(w, else_expr, mode)?;
            }
            write!(w, " END")
        }
        Expr::Function(func) => {
            if mode.normalized() {
                write!(w, "{}", func.name.value.to_ascii_lowercase())?;
            } else {
                write_ident(w, &func.name)?;
            }
            write!(w, "(")?;
            if func.star {
                write!(w, "*")?;
            } else {
                write_expr_list(w, &func.args, mode)?;
            }
            write!(w, ")")
        }
        Expr::Error(err) => write!(w, "<error: {}>", err.message),
        Expr::Missing(missing) => write!(w, "<missing {}>", missing.expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, ColumnExpr, FunctionExpr, ResolvedColumn};
    use crate::datatype::DataType;
    use crate::tokens::Span;

    fn col(qualifier: Option<&str>, name: &str) -> Expr {
        Expr::Column(ColumnExpr::new(
            qualifier.map(Ident::new),
            Ident::new(name),
            Span::EMPTY,
        ))
    }

    #[test]
    fn nested_operands_parenthesized() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Binary {
                left: Box::new(col(None, "a")),
                op: BinaryOperator::Plus,
                right: Box::new(col(None, "b")),
            }),
            op: BinaryOperator::Multiply,
            right: Box::new(Expr::Unary {
                op: UnaryOperator::Minus,
                expr: Box::new(Expr::Literal(Literal::Integer(2))),
            }),
        };
        assert_eq!("(a + b) * (-2)", expr.to_string());
    }

    #[test]
    fn decimal_without_point_keeps_unit() {
        assert_eq!("3d", Expr::Literal(Literal::Decimal("3".to_string())).to_string());
        assert_eq!(
            "3.25",
            Expr::Literal(Literal::Decimal("3.25".to_string())).to_string()
        );
    }

    #[test]
    fn id_uses_resolved_position() {
        let mut qualified = ColumnExpr::new(Some(Ident::new("p")), Ident::new("Name"), Span::EMPTY);
        let mut bare = ColumnExpr::new(None, Ident::new("Name"), Span::EMPTY);
        let resolved = ResolvedColumn {
            source: 0,
            index: 2,
            data_type: DataType::Utf8,
        };
        qualified.resolved = Some(resolved.clone());
        bare.resolved = Some(resolved);

        assert_eq!(Expr::Column(qualified).id(), Expr::Column(bare).id());
    }

    #[test]
    fn function_names_normalized_in_id() {
        let func = |name: &str| {
            Expr::Function(FunctionExpr {
                name: Ident::new(name),
                args: Vec::new(),
                star: true,
                span: Span::EMPTY,
                resolved: None,
            })
        };
        assert_eq!(func("Count").id(), func("COUNT").id());
        assert_eq!("Count(*)", func("Count").to_string());
    }

    #[test]
    fn property_on_unqualified_column() {
        let expr = Expr::Property {
            expr: Box::new(col(None, "Doc")),
            name: Ident::new("City"),
        };
        assert_eq!("(Doc).City", expr.to_string());

        let expr = Expr::Property {
            expr: Box::new(col(Some("d"), "Doc")),
            name: Ident::new("City"),
        };
        assert_eq!("d.Doc.City", expr.to_string());
    }
}
