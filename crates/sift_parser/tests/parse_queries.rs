use pretty_assertions::assert_eq;
use sift_parser::ast::{
    ApplyKind, Expr, FromNode, JoinKind, Literal, QueryExpr, SelectItem, SelectQuery, SetOperator,
};
use sift_parser::parse;

fn parse_ok(query: &str) -> sift_parser::ast::Statement {
    let out = parse(query);
    assert!(
        out.diagnostics.is_empty(),
        "query: {query}\n{:#?}",
        out.diagnostics
    );
    out.statement
}

fn select_body(query: &str) -> Box<SelectQuery> {
    match parse_ok(query).body {
        QueryExpr::Select(select) => select,
        other => panic!("expected select: {other:?}"),
    }
}

#[test]
fn simple_select() {
    let select =
        select_body("select Name, City from #src.Entities() where Population > 1000000 order by Name");

    assert_eq!(2, select.select.items.len());
    match select.from {
        Some(FromNode::SchemaMethod {
            schema,
            method,
            args,
            alias,
            ..
        }) => {
            assert_eq!("src", schema.value);
            assert_eq!("Entities", method.value);
            assert!(args.is_empty());
            assert!(alias.is_none());
        }
        other => panic!("unexpected from: {other:?}"),
    }
    assert!(select.where_clause.is_some());
    let order_by = select.order_by.expect("order by");
    assert_eq!(1, order_by.items.len());
    assert!(!order_by.items[0].descending);
}

#[test]
fn keywords_case_insensitive() {
    let a = parse_ok("SELECT Name FROM #src.Entities() WHERE Population > 1");
    let b = parse_ok("select Name from #src.Entities() where Population > 1");
    assert_eq!(a.id(), b.id());
}

#[test]
fn wildcards_and_aliases() {
    let select = select_body("select *, p.*, Name as n, City c from #src.People() as p");
    let expected_items = vec![
        "*".to_string(),
        "p.*".to_string(),
        "Name AS n".to_string(),
        "City AS c".to_string(),
    ];
    let got: Vec<_> = select
        .select
        .items
        .iter()
        .map(|item| match item {
            SelectItem::Wildcard => "*".to_string(),
            SelectItem::QualifiedWildcard(q) => format!("{q}.*"),
            SelectItem::Expr { expr, alias } => match alias {
                Some(alias) => format!("{expr} AS {alias}"),
                None => expr.to_string(),
            },
        })
        .collect();
    assert_eq!(expected_items, got);

    let alias = select.from.as_ref().and_then(|f| f.alias()).expect("alias");
    assert_eq!("p", alias.name.value);
    assert!(!alias.generated);
}

#[test]
fn schema_method_args() {
    let select = select_body("select Name from #os.files('/tmp', true, 10) f");
    match select.from {
        Some(FromNode::SchemaMethod { args, alias, .. }) => {
            assert_eq!(
                vec![
                    Expr::Literal(Literal::String("/tmp".to_string())),
                    Expr::Literal(Literal::Boolean(true)),
                    Expr::Literal(Literal::Integer(10)),
                ],
                args
            );
            assert_eq!("f", alias.expect("alias").name.value);
        }
        other => panic!("unexpected from: {other:?}"),
    }
}

#[test]
fn joins() {
    // (query, expected kinds left to right)
    let tests = [
        (
            "select a.x from #s.a() a inner join #s.b() b on a.x = b.x",
            vec![JoinKind::Inner],
        ),
        (
            "select a.x from #s.a() a join #s.b() b on a.x = b.x left outer join #s.c() c on b.y = c.y",
            vec![JoinKind::Inner, JoinKind::LeftOuter],
        ),
        (
            "select a.x from #s.a() a right outer join #s.b() b on a.x = b.x",
            vec![JoinKind::RightOuter],
        ),
    ];

    fn collect_kinds(from: &FromNode, out: &mut Vec<JoinKind>) {
        if let FromNode::Join { left, kind, .. } = from {
            collect_kinds(left, out);
            out.push(*kind);
        }
    }

    for (query, expected) in tests {
        let select = select_body(query);
        let mut kinds = Vec::new();
        collect_kinds(select.from.as_ref().expect("from"), &mut kinds);
        assert_eq!(expected, kinds, "query: {query}");
    }
}

#[test]
fn applies() {
    let select = select_body(
        "select a.x, b.y from #s.a() a cross apply #s.b(a.x) b outer apply #s.c(b.y) c",
    );
    match select.from {
        Some(FromNode::Apply { left, kind, .. }) => {
            assert_eq!(ApplyKind::Outer, kind);
            assert!(matches!(
                *left,
                FromNode::Apply {
                    kind: ApplyKind::Cross,
                    ..
                }
            ));
        }
        other => panic!("unexpected from: {other:?}"),
    }
}

#[test]
fn pivot() {
    let select = select_body(
        "select * from #s.sales() pivot (Sum(Amount) for Year in (2020, 2021)) p",
    );
    match select.from {
        Some(FromNode::Pivot {
            aggregate,
            for_column,
            values,
            alias,
            ..
        }) => {
            assert_eq!("Sum", aggregate.name.value);
            assert_eq!("Year", for_column.name.value);
            assert_eq!(vec![Literal::Integer(2020), Literal::Integer(2021)], values);
            assert_eq!("p", alias.expect("alias").name.value);
        }
        other => panic!("unexpected from: {other:?}"),
    }
}

#[test]
fn group_by_having_skip_take() {
    let select = select_body(
        "select City, Count(*) from #s.people() group by City having Count(*) > 1 order by City desc skip 2 take 10",
    );
    let group_by = select.group_by.expect("group by");
    assert_eq!(1, group_by.exprs.len());
    assert!(group_by.having.is_some());
    assert!(select.order_by.expect("order by").items[0].descending);
    assert_eq!(2, select.skip.expect("skip").count);
    assert_eq!(10, select.take.expect("take").count);
}

#[test]
fn ctes() {
    let stmt = parse_ok(
        "with a as (select x from #s.m()), b as (select x from a) select x from b",
    );
    let names: Vec<_> = stmt.ctes.iter().map(|c| c.name.value.clone()).collect();
    assert_eq!(vec!["a".to_string(), "b".to_string()], names);
}

#[test]
fn set_operations() {
    let stmt = parse_ok(
        "select Name from #s.a() union all (Name) select Name from #s.b() intersect (Name) select Name from #s.c()",
    );
    // INTERSECT binds tighter than UNION.
    match stmt.body {
        QueryExpr::SetOp(setop) => {
            assert_eq!(SetOperator::UnionAll, setop.op);
            assert_eq!(1, setop.keys.as_ref().expect("keys").len());
            match &setop.right {
                QueryExpr::SetOp(right) => assert_eq!(SetOperator::Intersect, right.op),
                other => panic!("unexpected right: {other:?}"),
            }
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn set_operation_without_keys() {
    let stmt = parse_ok("select Name from #s.a() except select Name from #s.b()");
    match stmt.body {
        QueryExpr::SetOp(setop) => {
            assert_eq!(SetOperator::Except, setop.op);
            assert!(setop.keys.is_none());
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[test]
fn subquery_source() {
    let select = select_body("select t.a from (select a from #s.m() where a > 1) t");
    match select.from {
        Some(FromNode::Subquery { alias, .. }) => {
            assert_eq!("t", alias.expect("alias").name.value)
        }
        other => panic!("unexpected from: {other:?}"),
    }
}

#[test]
fn select_without_from() {
    let select = select_body("select 1 + 1 as two");
    assert!(select.from.is_none());
}

#[test]
fn trailing_semicolon() {
    parse_ok("select a from #s.m();");
}
