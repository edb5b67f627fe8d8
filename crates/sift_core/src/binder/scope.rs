use sift_error::{Result, SiftError};
use sift_parser::ast::{ColumnExpr, Expr, Ident, ResolvedColumn};
use sift_parser::tokens::Span;

use crate::schema::SchemaColumn;

/// A FROM source visible to expressions of a select.
#[derive(Debug, Clone)]
pub struct ScopeLeaf {
    pub slot: usize,
    pub alias: String,
    /// Other names the source can be qualified with, e.g. the name of a
    /// referenced CTE.
    pub other_names: Vec<String>,
    pub columns: Vec<SchemaColumn>,
}

impl ScopeLeaf {
    fn is_named(&self, name: &str) -> bool {
        self.alias.eq_ignore_ascii_case(name)
            || self.other_names.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

/// Sources of one select. Every sub-query gets its own scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub leaves: Vec<ScopeLeaf>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_leaf(&self, name: &str) -> Option<&ScopeLeaf> {
        self.leaves
            .iter()
            .find(|l| l.alias == name)
            .or_else(|| self.leaves.iter().find(|l| l.is_named(name)))
    }

    /// Resolve a column reference.
    ///
    /// `a.b` where `a` isn't a source is read as property `b` of column `a`.
    pub fn resolve_column(&self, col: &ColumnExpr) -> Result<Expr> {
        match &col.qualifier {
            Some(qualifier) => match self.find_leaf(&qualifier.value) {
                Some(leaf) => match leaf.column(&col.name.value) {
                    Some(column) => Ok(bound_column(col, leaf.slot, column)),
                    None => {
                        let names = leaf.columns.iter().map(|c| c.name.as_str());
                        Err(unknown_column(
                            &format!("{}.{}", qualifier.value, col.name.value),
                            names,
                        )
                        .with_field("source", &leaf.alias))
                    }
                },
                None => {
                    let base = ColumnExpr::new(None, qualifier.clone(), col.span);
                    let base = self.resolve_unqualified(&base).map_err(|_| {
                        let names = self.leaves.iter().map(|l| l.alias.as_str());
                        with_suggestions(
                            SiftError::semantic(format!(
                                "Unknown source or column '{}'",
                                qualifier.value
                            ))
                            .with_field("source", &qualifier.value),
                            &qualifier.value,
                            names,
                        )
                    })?;
                    Ok(Expr::Property {
                        expr: Box::new(base),
                        name: col.name.clone(),
                    })
                }
            },
            None => self.resolve_unqualified(col),
        }
    }

    fn resolve_unqualified(&self, col: &ColumnExpr) -> Result<Expr> {
        let name = col.name.value.as_str();

        let exact: Vec<_> = self
            .leaves
            .iter()
            .filter_map(|leaf| {
                leaf.columns
                    .iter()
                    .find(|c| c.name == name)
                    .map(|c| (leaf, c))
            })
            .collect();
        let matches = if exact.is_empty() {
            self.leaves
                .iter()
                .filter_map(|leaf| {
                    leaf.columns
                        .iter()
                        .find(|c| c.name.eq_ignore_ascii_case(name))
                        .map(|c| (leaf, c))
                })
                .collect()
        } else {
            exact
        };

        match matches.as_slice() {
            [(leaf, column)] => Ok(bound_column(col, leaf.slot, column)),
            [] => {
                let names = self
                    .leaves
                    .iter()
                    .flat_map(|l| l.columns.iter().map(|c| c.name.as_str()));
                Err(unknown_column(name, names))
            }
            many => {
                let sources: Vec<_> = many.iter().map(|(l, _)| l.alias.as_str()).collect();
                Err(
                    SiftError::semantic(format!("Ambiguous column '{name}'"))
                        .with_field("column", name.to_string())
                        .with_field("sources", sources.join(", ")),
                )
            }
        }
    }
}

fn bound_column(col: &ColumnExpr, slot: usize, column: &SchemaColumn) -> Expr {
    Expr::Column(ColumnExpr {
        qualifier: col.qualifier.clone(),
        name: col.name.clone(),
        span: col.span,
        resolved: Some(ResolvedColumn {
            source: slot,
            index: column.index,
            data_type: column.data_type,
        }),
    })
}

/// Build a bound column reference that isn't backed by any written text.
pub fn synthetic_column(name: &str, resolved: ResolvedColumn) -> Expr {
    Expr::Column(ColumnExpr {
        qualifier: None,
        name: Ident::new(name),
        span: Span::EMPTY,
        resolved: Some(resolved),
    })
}

fn unknown_column<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> SiftError {
    with_suggestions(
        SiftError::semantic(format!("Unknown column '{name}'")).with_field("column", name.to_string()),
        name,
        candidates,
    )
}

/// Maximum edit distance for a name to be suggested.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Find the candidates closest to `name`, at most three.
pub fn suggest<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Vec<String> {
    let lower = name.to_ascii_lowercase();
    let mut scored: Vec<_> = candidates
        .map(|c| (strsim::levenshtein(&lower, &c.to_ascii_lowercase()), c))
        .filter(|(dist, _)| *dist <= MAX_SUGGESTION_DISTANCE && *dist < name.len())
        .collect();
    scored.sort();
    scored.dedup();
    scored.into_iter().take(3).map(|(_, c)| c.to_string()).collect()
}

pub fn with_suggestions<'a>(
    err: SiftError,
    name: &str,
    candidates: impl Iterator<Item = &'a str>,
) -> SiftError {
    let suggestions = suggest(name, candidates);
    if suggestions.is_empty() {
        return err;
    }
    err.with_field("suggestions", suggestions.join(", "))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::datatype::DataType;

    use super::*;

    fn scope() -> Scope {
        Scope {
            leaves: vec![
                ScopeLeaf {
                    slot: 0,
                    alias: "p".to_string(),
                    other_names: vec!["people".to_string()],
                    columns: vec![
                        SchemaColumn::new("Name", 0, DataType::Utf8),
                        SchemaColumn::new("Id", 1, DataType::Int64),
                        SchemaColumn::new("Doc", 2, DataType::Struct),
                    ],
                },
                ScopeLeaf {
                    slot: 1,
                    alias: "c".to_string(),
                    other_names: Vec::new(),
                    columns: vec![
                        SchemaColumn::new("Id", 0, DataType::Int64),
                        SchemaColumn::new("City", 1, DataType::Utf8),
                    ],
                },
            ],
        }
    }

    fn col(qualifier: Option<&str>, name: &str) -> ColumnExpr {
        ColumnExpr::new(qualifier.map(Ident::new), Ident::new(name), Span::EMPTY)
    }

    fn resolved(expr: &Expr) -> (usize, usize) {
        match expr {
            Expr::Column(ColumnExpr {
                resolved: Some(r), ..
            }) => (r.source, r.index),
            other => panic!("not a bound column: {other:?}"),
        }
    }

    #[test]
    fn resolves_columns() {
        let scope = scope();
        // (qualifier, name, (slot, index))
        let tests = [
            (None, "Name", (0, 0)),
            (None, "city", (1, 1)),
            (Some("c"), "Id", (1, 0)),
            (Some("people"), "Id", (0, 1)),
            (Some("P"), "name", (0, 0)),
        ];

        for (qualifier, name, expected) in tests {
            let expr = scope.resolve_column(&col(qualifier, name)).unwrap();
            assert_eq!(expected, resolved(&expr), "{qualifier:?}.{name}");
        }
    }

    #[test]
    fn ambiguous_column() {
        let err = scope().resolve_column(&col(None, "Id")).unwrap_err();
        assert!(err.message().contains("Ambiguous"));
        assert_eq!(Some("p, c"), err.field("sources"));
    }

    #[test]
    fn unknown_column_suggests() {
        let err = scope().resolve_column(&col(None, "Nme")).unwrap_err();
        assert_eq!(Some("Name"), err.field("suggestions"));
    }

    #[test]
    fn qualifier_column_is_property_access() {
        let expr = scope().resolve_column(&col(Some("Doc"), "Street")).unwrap();
        match expr {
            Expr::Property { expr, name } => {
                assert_eq!((0, 2), resolved(&expr));
                assert_eq!("Street", name.value);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
