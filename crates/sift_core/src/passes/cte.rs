//! Order CTEs so each is materialized after the CTEs it reads from.

use hashbrown::HashMap;
use sift_error::{Result, SiftError};
use sift_parser::ast::{CteNode, FromNode, QueryExpr};

/// Get the indexes of `ctes` in materialization order.
///
/// Definition order is kept where dependencies allow it.
pub fn order_ctes(ctes: &[CteNode]) -> Result<Vec<usize>> {
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (idx, cte) in ctes.iter().enumerate() {
        if by_name
            .insert(cte.name.value.to_ascii_lowercase(), idx)
            .is_some()
        {
            return Err(
                SiftError::semantic(format!("Duplicate CTE name '{}'", cte.name))
                    .with_field("cte", &cte.name.value),
            );
        }
    }

    let deps: Vec<Vec<usize>> = ctes
        .iter()
        .enumerate()
        .map(|(idx, cte)| {
            let mut names = Vec::new();
            query_references(&cte.query, &mut names);

            let mut deps = Vec::new();
            for name in names {
                if let Some(&dep) = by_name.get(&name.to_ascii_lowercase()) {
                    if dep == idx {
                        return Err(SiftError::semantic(format!(
                            "CTE '{}' references itself",
                            cte.name
                        ))
                        .with_field("cte", &cte.name.value));
                    }
                    if !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
            Ok(deps)
        })
        .collect::<Result<_>>()?;

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        Visiting,
        Done,
    }

    fn visit(
        idx: usize,
        ctes: &[CteNode],
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[idx] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                let start = path.iter().position(|&p| p == idx).unwrap_or(0);
                let cycle: Vec<_> = path[start..]
                    .iter()
                    .chain(std::iter::once(&idx))
                    .map(|&i| ctes[i].name.value.as_str())
                    .collect();
                return Err(SiftError::semantic(format!(
                    "Cyclic CTE dependency: {}",
                    cycle.join(" -> ")
                ))
                .with_field("cte", &ctes[idx].name.value));
            }
            Mark::Unvisited => (),
        }

        marks[idx] = Mark::Visiting;
        path.push(idx);
        for &dep in &deps[idx] {
            visit(dep, ctes, deps, marks, path, order)?;
        }
        path.pop();
        marks[idx] = Mark::Done;
        order.push(idx);
        Ok(())
    }

    let mut marks = vec![Mark::Unvisited; ctes.len()];
    let mut order = Vec::with_capacity(ctes.len());
    let mut path = Vec::new();
    for idx in 0..ctes.len() {
        visit(idx, ctes, &deps, &mut marks, &mut path, &mut order)?;
    }

    Ok(order)
}

/// Collect bare source names referenced anywhere in a query.
fn query_references(query: &QueryExpr, out: &mut Vec<String>) {
    match query {
        QueryExpr::Select(select) => {
            if let Some(from) = &select.from {
                from_references(from, out);
            }
        }
        QueryExpr::SetOp(setop) => {
            query_references(&setop.left, out);
            query_references(&setop.right, out);
        }
        QueryExpr::Error(_) => (),
    }
}

fn from_references(from: &FromNode, out: &mut Vec<String>) {
    match from {
        FromNode::Reference { name, .. } | FromNode::Cte { name, .. } => {
            out.push(name.value.clone())
        }
        FromNode::Join { left, right, .. } | FromNode::Apply { left, right, .. } => {
            from_references(left, out);
            from_references(right, out);
        }
        FromNode::Subquery { query, .. } => query_references(query, out),
        FromNode::Pivot { source, .. } => from_references(source, out),
        FromNode::SchemaMethod { .. } | FromNode::Memory { .. } | FromNode::Error(_) => (),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_error::ErrorKind;
    use sift_parser::parse;

    use super::*;

    fn ctes(query: &str) -> Vec<CteNode> {
        let out = parse(query);
        assert!(!out.has_errors(), "{:?}", out.diagnostics);
        out.statement.ctes
    }

    #[test]
    fn dependencies_first() {
        let ctes = ctes(
            "WITH b AS (SELECT * FROM a), a AS (SELECT * FROM #s.m()), c AS (SELECT * FROM b) \
             SELECT * FROM c",
        );
        assert_eq!(vec![1, 0, 2], order_ctes(&ctes).unwrap());
    }

    #[test]
    fn independent_keep_definition_order() {
        let ctes = ctes("WITH x AS (SELECT 1), y AS (SELECT 2) SELECT * FROM y");
        assert_eq!(vec![0, 1], order_ctes(&ctes).unwrap());
    }

    #[test]
    fn invalid_dependencies() {
        let tests = [
            "WITH a AS (SELECT * FROM b), b AS (SELECT * FROM a) SELECT * FROM a",
            "WITH a AS (SELECT * FROM a) SELECT * FROM a",
            "WITH a AS (SELECT 1), A AS (SELECT 2) SELECT * FROM a",
        ];

        for query in tests {
            let err = order_ctes(&ctes(query)).unwrap_err();
            assert_eq!(ErrorKind::Semantic, err.kind(), "{query}");
            assert!(err.has_field("cte"), "{query}");
        }
    }
}
