//! Give every unaliased FROM source a generated alias.
//!
//! Aliases come from a ChaCha8 stream keyed by a seed, so the same query and
//! seed always produce the same aliases.

use hashbrown::HashSet;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sift_parser::ast::{FromAlias, FromNode, Ident, QueryExpr, Statement};
use sift_parser::keywords::keyword_from_str;
use tracing::trace;

const ALIAS_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ALIAS_LEN: usize = 4;

#[derive(Debug)]
pub struct AliasGenerator {
    seed: u64,
    counter: u64,
    used: HashSet<String>,
}

impl AliasGenerator {
    pub fn new(seed: u64) -> Self {
        AliasGenerator {
            seed,
            counter: 0,
            used: HashSet::new(),
        }
    }

    /// Mark a name as taken. Comparison is case insensitive.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_ascii_lowercase());
    }

    /// Generate an alias not yet used, and reserve it.
    pub fn next_alias(&mut self) -> String {
        loop {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            rng.set_stream(self.counter);
            self.counter += 1;

            let alias: String = (0..ALIAS_LEN)
                .map(|_| ALIAS_CHARS[rng.random_range(0..ALIAS_CHARS.len())] as char)
                .collect();

            if !self.is_valid(&alias) {
                continue;
            }
            self.used.insert(alias.clone());
            return alias;
        }
    }

    fn is_valid(&self, alias: &str) -> bool {
        match alias.chars().next() {
            Some(c) if !c.is_ascii_digit() => (),
            _ => return false,
        }
        !self.used.contains(alias) && keyword_from_str(alias).is_none()
    }
}

/// Assign generated aliases to all sources in the statement lacking one.
pub fn assign_aliases(stmt: &mut Statement, seed: u64) {
    let mut generator = AliasGenerator::new(seed);

    for cte in &stmt.ctes {
        generator.reserve(&cte.name.value);
        reserve_query(&mut generator, &cte.query);
    }
    reserve_query(&mut generator, &stmt.body);

    for cte in &mut stmt.ctes {
        assign_query(&mut generator, &mut cte.query);
    }
    assign_query(&mut generator, &mut stmt.body);
}

fn reserve_query(generator: &mut AliasGenerator, query: &QueryExpr) {
    match query {
        QueryExpr::Select(select) => {
            if let Some(from) = &select.from {
                reserve_from(generator, from);
            }
        }
        QueryExpr::SetOp(setop) => {
            reserve_query(generator, &setop.left);
            reserve_query(generator, &setop.right);
        }
        QueryExpr::Error(_) => (),
    }
}

fn reserve_from(generator: &mut AliasGenerator, from: &FromNode) {
    if let Some(alias) = from.alias() {
        generator.reserve(&alias.name.value);
    }
    match from {
        FromNode::Join { left, right, .. } | FromNode::Apply { left, right, .. } => {
            reserve_from(generator, left);
            reserve_from(generator, right);
        }
        FromNode::Subquery { query, .. } => reserve_query(generator, query),
        FromNode::Pivot { source, .. } => reserve_from(generator, source),
        FromNode::Reference { name, .. }
        | FromNode::Cte { name, .. }
        | FromNode::Memory { name, .. } => generator.reserve(&name.value),
        FromNode::SchemaMethod { .. } | FromNode::Error(_) => (),
    }
}

fn assign_query(generator: &mut AliasGenerator, query: &mut QueryExpr) {
    match query {
        QueryExpr::Select(select) => {
            if let Some(from) = &mut select.from {
                assign_from(generator, from);
            }
        }
        QueryExpr::SetOp(setop) => {
            assign_query(generator, &mut setop.left);
            assign_query(generator, &mut setop.right);
        }
        QueryExpr::Error(_) => (),
    }
}

fn assign_from(generator: &mut AliasGenerator, from: &mut FromNode) {
    match from {
        FromNode::Join { left, right, .. } | FromNode::Apply { left, right, .. } => {
            assign_from(generator, left);
            assign_from(generator, right);
            return;
        }
        FromNode::Subquery { query, .. } => assign_query(generator, query),
        FromNode::Pivot { source, .. } => assign_from(generator, source),
        _ => (),
    }

    if let Some(alias) = from.alias_mut() {
        if alias.is_none() {
            let name = generator.next_alias();
            trace!(%name, "generated alias");
            *alias = Some(FromAlias {
                name: Ident::new(name),
                generated: true,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sift_parser::parse;

    use super::*;

    #[test]
    fn aliases_are_valid_and_unique() {
        let mut generator = AliasGenerator::new(42);
        generator.reserve("abcd");

        let mut seen = HashSet::new();
        for _ in 0..500 {
            let alias = generator.next_alias();
            assert!(!alias.is_empty());
            assert!(!alias.starts_with(|c: char| c.is_ascii_digit()));
            assert!(keyword_from_str(&alias).is_none());
            assert_ne!("abcd", alias);
            assert!(seen.insert(alias));
        }
    }

    #[test]
    fn deterministic_for_seed() {
        let mut a = AliasGenerator::new(7);
        let mut b = AliasGenerator::new(7);
        for _ in 0..10 {
            assert_eq!(a.next_alias(), b.next_alias());
        }
    }

    #[test]
    fn only_unaliased_sources_assigned() {
        let mut stmt = parse("SELECT * FROM #a.b() x JOIN #a.c() ON x.Id = Id")
            .statement;
        assign_aliases(&mut stmt, 1);

        let from = match &stmt.body {
            QueryExpr::Select(select) => select.from.as_ref().unwrap(),
            other => panic!("unexpected query: {other:?}"),
        };
        let leaves = from.leaves();
        let first = leaves[0].alias().unwrap();
        assert_eq!("x", first.name.value);
        assert!(!first.generated);

        let second = leaves[1].alias().unwrap();
        assert!(second.generated);
        assert_ne!("x", second.name.value);
    }

    #[test]
    fn cache_key_unchanged_by_assignment() {
        let mut stmt = parse("SELECT Name FROM #src.people() WHERE Age > 3").statement;
        let before = stmt.cache_key();
        assign_aliases(&mut stmt, 99);
        assert_eq!(before, stmt.cache_key());
    }
}
