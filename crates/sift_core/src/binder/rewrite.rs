use sift_error::Result;
use sift_parser::ast::{Expr, FunctionExpr, WhenThen};

/// Rebuild an expression bottom-up, applying `f` to every node after its
/// children have been rebuilt.
pub fn transform_expr<F>(expr: Expr, f: &mut F) -> Result<Expr>
where
    F: FnMut(Expr) -> Result<Expr>,
{
    let expr = map_children(expr, &mut |child| transform_expr(child, &mut *f))?;
    f(expr)
}

/// Rebuild the direct children of an expression with `f`.
pub fn map_children<F>(expr: Expr, f: &mut F) -> Result<Expr>
where
    F: FnMut(Expr) -> Result<Expr>,
{
    Ok(match expr {
        Expr::Literal(_) | Expr::Column(_) | Expr::Error(_) | Expr::Missing(_) => expr,
        Expr::Property { expr, name } => Expr::Property {
            expr: Box::new(f(*expr)?),
            name,
        },
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(f(*expr)?),
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(f(*left)?),
            op,
            right: Box::new(f(*right)?),
        },
        Expr::Comparison { left, op, right } => Expr::Comparison {
            left: Box::new(f(*left)?),
            op,
            right: Box::new(f(*right)?),
        },
        Expr::Logical { left, op, right } => Expr::Logical {
            left: Box::new(f(*left)?),
            op,
            right: Box::new(f(*right)?),
        },
        Expr::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(f(*expr)?),
            negated,
        },
        Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(f(*expr)?),
            list: list.into_iter().map(&mut *f).collect::<Result<_>>()?,
            negated,
        },
        Expr::Like {
            expr,
            pattern,
            negated,
            kind,
        } => Expr::Like {
            expr: Box::new(f(*expr)?),
            pattern: Box::new(f(*pattern)?),
            negated,
            kind,
        },
        Expr::Case {
            when_then,
            else_expr,
        } => Expr::Case {
            when_then: when_then
                .into_iter()
                .map(|wt| {
                    Ok(WhenThen {
                        when: f(wt.when)?,
                        then: f(wt.then)?,
                    })
                })
                .collect::<Result<_>>()?,
            else_expr: match else_expr {
                Some(e) => Some(Box::new(f(*e)?)),
                None => None,
            },
        },
        Expr::Function(func) => Expr::Function(FunctionExpr {
            args: func.args.into_iter().map(&mut *f).collect::<Result<_>>()?,
            ..func
        }),
    })
}

/// Column references as (slot, index) pairs, in visiting order.
pub fn referenced_columns(expr: &Expr, out: &mut Vec<(usize, usize)>) {
    expr.walk(&mut |e| {
        if let Expr::Column(col) = e {
            if let Some(resolved) = &col.resolved {
                out.push((resolved.source, resolved.index));
            }
        }
    });
}

/// Slots an expression reads from.
pub fn referenced_slots(expr: &Expr) -> Vec<usize> {
    let mut cols = Vec::new();
    referenced_columns(expr, &mut cols);
    let mut slots: Vec<_> = cols.into_iter().map(|(slot, _)| slot).collect();
    slots.sort_unstable();
    slots.dedup();
    slots
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::ast::{BinaryOperator, Literal};

    use super::*;

    #[test]
    fn transform_bottom_up() {
        let expr = Expr::Binary {
            left: Box::new(Expr::Literal(Literal::Integer(1))),
            op: BinaryOperator::Plus,
            right: Box::new(Expr::Literal(Literal::Integer(2))),
        };

        let mut order = Vec::new();
        let out = transform_expr(expr, &mut |e| {
            order.push(e.to_string());
            Ok(match e {
                Expr::Literal(Literal::Integer(v)) => Expr::Literal(Literal::Integer(v * 10)),
                other => other,
            })
        })
        .unwrap();

        assert_eq!(vec!["1", "2", "10 + 20"], order);
        assert_eq!("10 + 20", out.to_string());
    }
}
