//! Lower PIVOT into a grouped query.
//!
//! `src PIVOT (Agg(expr) FOR col IN (v1, v2))` becomes
//!
//! ```text
//! SELECT <other columns>,
//!        Agg(CASE WHEN col = v1 THEN expr END) AS v1,
//!        Agg(CASE WHEN col = v2 THEN expr END) AS v2
//! FROM src
//! GROUP BY <other columns>
//! ```
//!
//! where the other columns are those of `src` not used by the FOR column or
//! the aggregate.

use sift_error::{Result, SiftError};
use sift_parser::ast::{
    ColumnExpr, ComparisonOperator, Expr, FromAlias, FromNode, FunctionExpr, GroupByNode, Ident,
    Literal, QueryExpr, SelectItem, SelectNode, SelectQuery, WhenThen,
};
use sift_parser::tokens::Span;

use crate::binder::rewrite::transform_expr;
use crate::table::Column;

/// Alias of the pivot source inside the lowered query.
pub const PIVOT_SOURCE_ALIAS: &str = "pivot_source";

#[derive(Debug)]
pub struct PivotInput<'a> {
    /// Name of the materialized pivot source.
    pub source_table: &'a str,
    pub source_columns: &'a [Column],
    /// Aliases of the sources the pivot was written over. Qualifiers using
    /// these are dropped.
    pub source_aliases: &'a [String],
    pub aggregate: &'a FunctionExpr,
    pub for_column: &'a ColumnExpr,
    pub values: &'a [Literal],
}

/// Column name for a pivot value.
pub fn value_name(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Boolean(b) => b.to_string(),
        Literal::Integer(i) => i.to_string(),
        Literal::Decimal(d) => d.clone(),
        Literal::String(s) => s.clone(),
    }
}

pub fn lower_pivot(input: PivotInput<'_>) -> Result<QueryExpr> {
    if input.values.is_empty() {
        return Err(SiftError::semantic("PIVOT requires at least one value"));
    }

    let arg = match (input.aggregate.star, input.aggregate.args.as_slice()) {
        (true, _) => Expr::Literal(Literal::Integer(1)),
        (false, [arg]) => strip_qualifiers(arg.clone(), input.source_aliases)?,
        (false, args) => {
            return Err(SiftError::semantic(format!(
                "PIVOT aggregate '{}' must take exactly one argument",
                input.aggregate.name
            ))
            .with_field("function", &input.aggregate.name.value)
            .with_field("actual", args.len()));
        }
    };

    let for_column = ColumnExpr::new(None, input.for_column.name.clone(), Span::EMPTY);

    // Columns consumed by the pivot don't take part in grouping.
    let mut consumed = vec![for_column.name.value.clone()];
    arg.walk(&mut |e| {
        if let Expr::Column(col) = e {
            consumed.push(col.name.value.clone());
        }
    });
    let remaining: Vec<Expr> = input
        .source_columns
        .iter()
        .filter(|c| !consumed.iter().any(|u| u.eq_ignore_ascii_case(&c.name)))
        .map(|c| Expr::Column(ColumnExpr::new(None, Ident::new(c.name.clone()), Span::EMPTY)))
        .collect();

    let mut items: Vec<SelectItem> = remaining
        .iter()
        .map(|expr| SelectItem::Expr {
            expr: expr.clone(),
            alias: None,
        })
        .collect();

    for value in input.values {
        let case = Expr::Case {
            when_then: vec![WhenThen {
                when: Expr::Comparison {
                    left: Box::new(Expr::Column(for_column.clone())),
                    op: ComparisonOperator::Eq,
                    right: Box::new(Expr::Literal(value.clone())),
                },
                then: arg.clone(),
            }],
            else_expr: None,
        };
        items.push(SelectItem::Expr {
            expr: Expr::Function(FunctionExpr {
                name: input.aggregate.name.clone(),
                args: vec![case],
                star: false,
                span: input.aggregate.span,
                resolved: None,
            }),
            alias: Some(Ident::new(value_name(value))),
        });
    }

    let mut query = SelectQuery::new(SelectNode { items }, Span::EMPTY);
    query.from = Some(FromNode::Cte {
        name: Ident::new(input.source_table),
        alias: Some(FromAlias {
            name: Ident::new(PIVOT_SOURCE_ALIAS),
            generated: true,
        }),
    });
    if !remaining.is_empty() {
        query.group_by = Some(GroupByNode {
            exprs: remaining,
            having: None,
        });
    }

    Ok(QueryExpr::Select(Box::new(query)))
}

fn strip_qualifiers(expr: Expr, aliases: &[String]) -> Result<Expr> {
    transform_expr(expr, &mut |e| {
        Ok(match e {
            Expr::Column(mut col) => {
                if col
                    .qualifier
                    .as_ref()
                    .is_some_and(|q| aliases.iter().any(|a| q.matches(a)))
                {
                    col.qualifier = None;
                }
                Expr::Column(col)
            }
            other => other,
        })
    })
}
