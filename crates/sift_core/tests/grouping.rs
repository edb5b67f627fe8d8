mod setup;

use pretty_assertions::assert_eq;
use setup::*;

#[test]
fn grouped_queries() {
    let fx = fixture();

    // (query, expected rows)
    let tests: &[(&str, &[&[&str]])] = &[
        (
            "SELECT Country, Count(*) AS N, Sum(Population) AS Total \
             FROM #geo.cities() GROUP BY Country ORDER BY Country",
            &[
                &["JP", "2", "16700000"],
                &["NO", "2", "985000"],
                &["PE", "1", "10000000"],
            ],
        ),
        (
            "SELECT Country FROM #geo.cities() GROUP BY Country HAVING Count(*) > 1 \
             ORDER BY Country",
            &[&["JP"], &["NO"]],
        ),
        (
            "SELECT Country, Max(Population) AS Largest FROM #geo.cities() \
             GROUP BY Country ORDER BY Max(Population) DESC",
            &[
                &["JP", "14000000"],
                &["PE", "10000000"],
                &["NO", "700000"],
            ],
        ),
        (
            "SELECT Min(Name) AS First, Count(Country) AS N FROM #geo.cities()",
            &[&["Bergen", "5"]],
        ),
        (
            "SELECT Count(*) AS N FROM #geo.cities() WHERE Population < 0",
            &[&["0"]],
        ),
        (
            "SELECT Count(*) AS N, Sum(Population) AS Total FROM #geo.cities() \
             WHERE Population < 0",
            &[&["0", "NULL"]],
        ),
        (
            "SELECT Country FROM #geo.cities() WHERE Population < 0 GROUP BY Country",
            &[],
        ),
    ];

    for (query, rows_expected) in tests {
        let table = fx.run(query).unwrap_or_else(|e| panic!("{query}: {e}"));
        assert_eq!(expected(rows_expected), rows(&table), "{query}");
    }
}

#[test]
fn pivot_spreads_values_into_columns() {
    let fx = fixture();
    let table = fx
        .run(
            "SELECT * FROM (SELECT Country, Population FROM #geo.cities()) s \
             PIVOT (Sum(Population) FOR Country IN ('NO', 'JP')) p",
        )
        .unwrap();

    let names: Vec<_> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(vec!["NO", "JP"], names);
    assert_eq!(expected(&[&["985000", "16700000"]]), rows(&table));
}
