use pretty_assertions::assert_eq;
use sift_parser::ast::{Expr, FromNode, QueryExpr, SelectItem, SelectQuery};
use sift_parser::diagnostics;
use sift_parser::{ParseOutput, Parser, parse};

fn codes(out: &ParseOutput) -> Vec<&'static str> {
    out.diagnostics.iter().map(|d| d.code).collect()
}

fn select_body(out: &ParseOutput) -> &SelectQuery {
    match &out.statement.body {
        QueryExpr::Select(select) => select,
        other => panic!("expected select: {other:?}"),
    }
}

#[test]
fn misspelled_from() {
    let out = parse("select Name, City frm #src.Entities()");
    assert_eq!(vec![diagnostics::UNKNOWN_KEYWORD], codes(&out));
    assert!(out.diagnostics[0].message.contains("did you mean FROM"));
    assert!(matches!(
        select_body(&out).from,
        Some(FromNode::SchemaMethod { .. })
    ));
}

#[test]
fn misspelled_select() {
    let out = parse("selct Name from #src.Entities()");
    assert_eq!(vec![diagnostics::UNKNOWN_KEYWORD], codes(&out));
    assert_eq!(1, select_body(&out).select.items.len());
}

#[test]
fn misspelled_where_not_taken_as_alias() {
    let out = parse("select Name from #src.Entities() wher Population > 10");
    assert_eq!(vec![diagnostics::UNKNOWN_KEYWORD], codes(&out));
    let select = select_body(&out);
    assert!(select.where_clause.is_some());
    assert!(select.from.as_ref().and_then(|f| f.alias()).is_none());
}

#[test]
fn missing_close_paren_inserted() {
    let out = parse("select Upper(Name from #src.Entities()");
    assert_eq!(vec![diagnostics::MISSING_TOKEN], codes(&out));
    assert!(select_body(&out).from.is_some());
}

#[test]
fn duplicate_comma_deleted() {
    let out = parse("select a,, b from #s.m()");
    assert_eq!(vec![diagnostics::DUPLICATE_DELIMITER], codes(&out));
    assert_eq!(2, select_body(&out).select.items.len());
}

#[test]
fn missing_comma_inserted() {
    let out = parse("select a b c from #s.m()");
    assert_eq!(vec![diagnostics::MISSING_TOKEN], codes(&out));
    // `b` is an alias for `a`, the comma is missing before `c`.
    assert_eq!(2, select_body(&out).select.items.len());
}

#[test]
fn missing_then_and_end() {
    let out = parse("select case when a > 1 'big' end from #s.m()");
    assert_eq!(vec![diagnostics::MISSING_TOKEN], codes(&out));
    assert!(out.diagnostics[0].message.contains("THEN"));

    let out = parse("select case when a then 1 from #s.m()");
    assert_eq!(vec![diagnostics::MISSING_TOKEN], codes(&out));
    assert!(out.diagnostics[0].message.contains("END"));
}

#[test]
fn many_errors_in_one_parse() {
    let out = parse(
        "select Upper(Name from #s.m() where Population > and City = 'x' order Name",
    );
    assert_eq!(
        vec![
            diagnostics::MISSING_TOKEN,
            diagnostics::UNEXPECTED_TOKEN,
            diagnostics::MISSING_TOKEN,
        ],
        codes(&out)
    );

    // Tree is still complete enough to visit.
    let select = select_body(&out);
    assert!(select.where_clause.is_some());
    assert!(select.order_by.is_some());
    assert!(
        select
            .where_clause
            .as_ref()
            .is_some_and(|w| w.expr.contains_recovery_node())
    );
}

#[test]
fn clauses_after_stray_paren_still_parsed() {
    let out = parse("select a from #s.m()) order by a,, b");
    assert_eq!(
        vec![
            diagnostics::UNEXPECTED_TOKEN,
            diagnostics::DUPLICATE_DELIMITER
        ],
        codes(&out)
    );
    let select = select_body(&out);
    assert_eq!(vec![")".to_string()], select.skipped[0].tokens);
    assert_eq!(2, select.order_by.as_ref().map_or(0, |o| o.items.len()));
}

#[test]
fn trailing_query_after_end_is_skipped() {
    let out = parse("select a from #s.m()) select b");
    assert_eq!(vec![diagnostics::UNEXPECTED_TOKEN], codes(&out));
    assert_eq!(1, select_body(&out).select.items.len());
}

#[test]
fn panic_mode_skips_to_clause() {
    let out = parse("select a from #s.m() 1 2 3 where a > 1");
    assert_eq!(vec![diagnostics::UNEXPECTED_TOKEN], codes(&out));
    let select = select_body(&out);
    assert_eq!(1, select.skipped.len());
    assert_eq!(
        vec!["1".to_string(), "2".to_string(), "3".to_string()],
        select.skipped[0].tokens
    );
    assert!(select.where_clause.is_some());
}

#[test]
fn panic_mode_is_bounded() {
    let garbage = vec!["1"; 200].join(" ");
    let out = Parser::new(&format!("select a from #s.m() {garbage}"))
        .with_max_diagnostics(100)
        .parse();
    let select = select_body(&out);
    // Each recovery skips at most MAX_PANIC_SKIP tokens.
    assert!(select.skipped.len() >= 200 / sift_parser::parser::MAX_PANIC_SKIP);
    assert!(
        select
            .skipped
            .iter()
            .all(|s| s.tokens.len() <= sift_parser::parser::MAX_PANIC_SKIP)
    );
}

#[test]
fn misplaced_clause_reported_and_kept() {
    let out = parse("select a from #s.m() order by a where a > 1");
    assert_eq!(vec![diagnostics::MISPLACED_CLAUSE], codes(&out));
    assert!(select_body(&out).where_clause.is_some());
}

#[test]
fn having_without_group_by() {
    let out = parse("select a from #s.m() having a > 1");
    assert_eq!(vec![diagnostics::MISPLACED_CLAUSE], codes(&out));
}

#[test]
fn unrecognized_character() {
    let out = parse("select a ? b from #s.m()");
    assert_eq!(vec![diagnostics::UNRECOGNIZED_CHARACTER], codes(&out));
    assert_eq!(1, out.diagnostics[0].location.line);
    assert_eq!(10, out.diagnostics[0].location.col);
}

#[test]
fn unterminated_string() {
    let out = parse("select 'abc from #s.m()");
    assert_eq!(diagnostics::UNTERMINATED_STRING, out.diagnostics[0].code);
}

#[test]
fn missing_expression_produces_missing_node() {
    let out = parse("select from #s.m()");
    assert_eq!(vec![diagnostics::UNEXPECTED_TOKEN], codes(&out));
    match &select_body(&out).select.items[0] {
        SelectItem::Expr {
            expr: Expr::Missing(_),
            ..
        } => (),
        other => panic!("unexpected item: {other:?}"),
    }
}

#[test]
fn missing_source_produces_error_node() {
    let out = parse("select a from");
    assert_eq!(vec![diagnostics::UNEXPECTED_EOF], codes(&out));
    assert!(matches!(select_body(&out).from, Some(FromNode::Error(_))));
}

#[test]
fn missing_hash_inserted() {
    let out = parse("select a from src.Entities()");
    assert_eq!(vec![diagnostics::MISSING_TOKEN], codes(&out));
    assert!(matches!(
        select_body(&out).from,
        Some(FromNode::SchemaMethod { .. })
    ));
}

#[test]
fn empty_query() {
    let out = parse("   -- nothing here");
    assert_eq!(vec![diagnostics::UNEXPECTED_EOF], codes(&out));
}

#[test]
fn diagnostics_capped() {
    let out = Parser::new("select a,,,,,,,,, b from #s.m()")
        .with_max_diagnostics(3)
        .parse();
    assert_eq!(4, out.diagnostics.len());
    assert_eq!(
        diagnostics::TOO_MANY_ERRORS,
        out.diagnostics.last().expect("diagnostic").code
    );
    assert!(matches!(out.statement.body, QueryExpr::Error(_)));
}

#[test]
fn diagnostics_carry_snippets() {
    let out = parse("select a\nfrom #s.m() where a >");
    assert_eq!(vec![diagnostics::UNEXPECTED_EOF], codes(&out));
    let diag = &out.diagnostics[0];
    assert_eq!(2, diag.location.line);
    assert_eq!(
        Some("from #s.m() where a >\n                     ^"),
        diag.snippet.as_deref()
    );
}
