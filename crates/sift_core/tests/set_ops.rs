mod setup;

use pretty_assertions::assert_eq;
use sift_error::ErrorKind;
use setup::*;

#[test]
fn set_operations() {
    let fx = fixture();

    // (query, expected rows)
    let tests: &[(&str, &[&[&str]])] = &[
        (
            "SELECT Country FROM #geo.cities() UNION (Country) SELECT Code FROM #geo.countries()",
            &[&["NO"], &["JP"], &["PE"], &["FR"]],
        ),
        (
            "SELECT Country FROM #geo.cities() EXCEPT (Country) SELECT Code FROM #geo.countries()",
            &[&["PE"]],
        ),
        (
            "SELECT Country FROM #geo.cities() INTERSECT (Country) \
             SELECT Code FROM #geo.countries()",
            &[&["NO"], &["NO"], &["JP"], &["JP"]],
        ),
        (
            "SELECT Code, Name FROM #geo.countries() WHERE Code = 'FR' \
             UNION ALL SELECT Country, Name FROM #geo.cities() WHERE Country = 'PE'",
            &[&["FR", "France"], &["PE", "Lima"]],
        ),
    ];

    for (query, rows_expected) in tests {
        let table = fx.run(query).unwrap_or_else(|e| panic!("{query}: {e}"));
        assert_eq!(expected(rows_expected), rows(&table), "{query}");
    }
}

#[test]
fn union_first_seen_row_wins() {
    let fx = fixture();
    let table = fx
        .run(
            "SELECT Country, Name FROM #geo.cities() \
             UNION (Country) SELECT Code, Name FROM #geo.countries()",
        )
        .unwrap();
    assert_eq!(
        expected(&[
            &["NO", "Oslo"],
            &["JP", "Tokyo"],
            &["PE", "Lima"],
            &["FR", "France"],
        ]),
        rows(&table)
    );
}

#[test]
fn set_operation_feeds_cte() {
    let fx = fixture();
    let table = fx
        .run(
            "WITH codes AS (SELECT Country AS Code FROM #geo.cities() \
             UNION ALL SELECT Code FROM #geo.countries()) \
             SELECT Code, Count(*) AS N FROM codes GROUP BY Code ORDER BY Code",
        )
        .unwrap();
    assert_eq!(
        expected(&[&["FR", "1"], &["JP", "3"], &["NO", "3"], &["PE", "1"]]),
        rows(&table)
    );
}

#[test]
fn set_operation_errors() {
    let fx = fixture();

    // (query, field expected on the error)
    let tests = [
        (
            "SELECT Country FROM #geo.cities() UNION SELECT Code FROM #geo.countries()",
            "operator",
        ),
        (
            "SELECT Country, Name FROM #geo.cities() UNION ALL SELECT Code FROM #geo.countries()",
            "left",
        ),
        (
            "SELECT Country FROM #geo.cities() EXCEPT (Cuntry) SELECT Code FROM #geo.countries()",
            "column",
        ),
    ];

    for (query, field) in tests {
        let err = fx.run(query).unwrap_err();
        assert_eq!(ErrorKind::Semantic, err.kind(), "{query}: {err}");
        assert!(err.has_field(field), "{query}: {err}");
    }
}
