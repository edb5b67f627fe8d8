use sift_error::{Result, SiftError};
use sift_parser::ast::Expr;

/// Operand stack used while binding expressions bottom-up.
///
/// Children push their bound form, and the handler for the parent pops
/// exactly as many operands as it needs.
#[derive(Debug, Default)]
pub struct NodeStack {
    nodes: Vec<Expr>,
}

impl NodeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn push(&mut self, node: Expr) {
        self.nodes.push(node);
    }

    /// Pop `n` operands for `op`, returned in push order.
    ///
    /// Errors if fewer than `n` nodes are on the stack, or if any operand is
    /// a recovery node.
    pub fn pop_many(&mut self, op: &str, n: usize) -> Result<Vec<Expr>> {
        let actual = self.nodes.len();
        if actual < n {
            return Err(SiftError::new(format!(
                "Not enough operands for '{op}'"
            ))
            .with_field("operator", op.to_string())
            .with_field("required", n)
            .with_field("actual", actual));
        }

        let operands = self.nodes.split_off(actual - n);
        if operands
            .iter()
            .any(|node| matches!(node, Expr::Error(_) | Expr::Missing(_)))
        {
            return Err(SiftError::semantic(format!("Null operand for '{op}'"))
                .with_field("operator", op.to_string()));
        }

        Ok(operands)
    }

    pub fn pop_n<const N: usize>(&mut self, op: &str) -> Result<[Expr; N]> {
        let operands = self.pop_many(op, N)?;
        <[Expr; N]>::try_from(operands)
            .map_err(|_| SiftError::new(format!("Wrong operand count for '{op}'")))
    }

    /// Get the single remaining node once a whole expression is bound.
    pub fn finish(mut self, what: &str) -> Result<Expr> {
        if self.nodes.len() != 1 {
            return Err(SiftError::new(format!(
                "Expected one bound node for {what}"
            ))
            .with_field("actual", self.nodes.len()));
        }
        let [node] = self.pop_n::<1>(what)?;
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::ast::{Literal, MissingNode};
    use sift_parser::tokens::Span;

    use super::*;

    fn lit(v: i64) -> Expr {
        Expr::Literal(Literal::Integer(v))
    }

    #[test]
    fn pops_in_push_order() {
        let mut stack = NodeStack::new();
        stack.push(lit(1));
        stack.push(lit(2));
        let [a, b] = stack.pop_n::<2>("+").unwrap();
        assert_eq!(lit(1), a);
        assert_eq!(lit(2), b);
        assert!(stack.is_empty());
    }

    #[test]
    fn underflow_names_operator_and_depths() {
        let mut stack = NodeStack::new();
        stack.push(lit(1));
        let err = stack.pop_n::<2>("*").unwrap_err();
        assert_eq!(Some("*"), err.field("operator"));
        assert_eq!(Some("2"), err.field("required"));
        assert_eq!(Some("1"), err.field("actual"));
    }

    #[test]
    fn recovery_operand_rejected() {
        let mut stack = NodeStack::new();
        stack.push(lit(1));
        stack.push(Expr::Missing(MissingNode {
            expected: "expression".to_string(),
            span: Span::EMPTY,
        }));
        let err = stack.pop_n::<2>("-").unwrap_err();
        assert!(err.message().contains("Null operand"));
    }

    #[test]
    fn finish_requires_single_node() {
        let mut stack = NodeStack::new();
        stack.push(lit(1));
        stack.push(lit(2));
        assert!(stack.finish("select item").is_err());
    }
}
