mod setup;

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sift_core::{CancellationToken, CompileOptions, Phase, PhaseListener};
use sift_error::ErrorKind;
use setup::*;

fn recorder() -> (PhaseListener, Arc<Mutex<Vec<Phase>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener = PhaseListener::new({
        let seen = seen.clone();
        move |phase| seen.lock().push(phase)
    });
    (listener, seen)
}

#[test]
fn pre_cancelled_token_opens_nothing() {
    let fx = fixture();
    let query = fx
        .engine
        .compile(
            "SELECT Name FROM #geo.cities()",
            fx.provider.clone(),
            CompileOptions::default(),
        )
        .unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let err = query.run(&token).unwrap_err();

    assert!(err.is_cancelled(), "{err}");
    assert_eq!(0, query.rows_processed());
    assert_eq!(0, fx.geo.opened_sources());
}

#[test]
fn cancel_while_running() {
    let fx = fixture();
    let token = CancellationToken::new();
    let listener = PhaseListener::new({
        let token = token.clone();
        move |phase| {
            if phase == Phase::Where {
                token.cancel();
            }
        }
    });

    let query = fx
        .engine
        .compile(
            "SELECT N FROM #gen.range(100000) WHERE N > 10",
            fx.provider.clone(),
            CompileOptions::default(),
        )
        .unwrap()
        .with_phase_listener(listener);

    let err = query.run(&token).unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(Some("where"), err.field("phase"));
    assert!(query.rows_processed() < 100000);
}

#[test]
fn phases_reported_in_order() {
    let fx = fixture();

    // (query, expected phases)
    let tests = [
        (
            "SELECT Name FROM #geo.cities() WHERE Country = 'NO'",
            vec![Phase::Begin, Phase::From, Phase::Where, Phase::Select, Phase::End],
        ),
        (
            "SELECT Country, Count(*) FROM #geo.cities() GROUP BY Country",
            vec![
                Phase::Begin,
                Phase::From,
                Phase::Where,
                Phase::GroupBy,
                Phase::Select,
                Phase::End,
            ],
        ),
        (
            "WITH no AS (SELECT Name FROM #geo.cities() WHERE Country = 'NO') SELECT Name FROM no",
            vec![Phase::Begin, Phase::From, Phase::Where, Phase::Select, Phase::End],
        ),
    ];

    for (query, phases) in tests {
        let (listener, seen) = recorder();
        let compiled = fx
            .engine
            .compile(query, fx.provider.clone(), CompileOptions::default())
            .unwrap()
            .with_phase_listener(listener);
        compiled.run(&CancellationToken::new()).unwrap();
        assert_eq!(phases, *seen.lock(), "{query}");
    }
}

#[test]
fn execution_errors_carry_query_and_phase() {
    let fx = fixture();

    let err = fx
        .run("SELECT Population / 0 AS X FROM #geo.cities()")
        .unwrap_err();
    assert_eq!(ErrorKind::Execution, err.kind());
    assert_eq!(Some("/"), err.field("operator"));
    assert_eq!(Some("select"), err.field("phase"));
    assert!(err.has_field("query_id"));
}

#[test]
fn source_failures_are_forwarded() {
    let fx = fixture();

    for capacity in [0, 4] {
        let options = CompileOptions::new().with_source_channel_capacity(capacity);
        let err = fx.run_with("SELECT N FROM #gen.fail()", options).unwrap_err();
        assert_eq!(ErrorKind::Execution, err.kind(), "capacity {capacity}: {err}");
        assert!(err.message().contains("source failed"), "{err}");
        assert!(err.has_field("query_id"));
    }
}

#[test]
fn syntax_errors_list_diagnostics() {
    let fx = fixture();
    let err = fx.run("SELECT Name FROM #geo.cities() WHERE").unwrap_err();
    assert_eq!(ErrorKind::Syntax, err.kind());
    assert!(!err.diagnostics().is_empty());
}

#[test]
fn rows_processed_counts_source_rows() {
    let fx = fixture();
    let query = fx
        .engine
        .compile(
            "SELECT Name FROM #geo.cities() WHERE Country = 'NO'",
            fx.provider.clone(),
            CompileOptions::default(),
        )
        .unwrap();

    let table = query.run(&CancellationToken::new()).unwrap();
    assert_eq!(2, table.num_rows());
    assert_eq!(5, query.rows_processed());
    assert_eq!(1, fx.geo.opened_sources());
}

#[test]
fn runs_concurrently_and_reuses_vms() {
    let fx = fixture();
    let query = fx
        .engine
        .compile(
            "SELECT Country, Sum(Population) AS Total FROM #geo.cities() \
             GROUP BY Country ORDER BY Country",
            fx.provider.clone(),
            CompileOptions::default(),
        )
        .unwrap();
    let expected_rows = rows(&query.run(&CancellationToken::new()).unwrap());

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| query.run(&CancellationToken::new()).unwrap()))
            .collect();
        for handle in handles {
            assert_eq!(expected_rows, rows(&handle.join().unwrap()));
        }
    });

    let idle = query.idle_vms();
    assert!((1..=4).contains(&idle), "{idle}");

    // A failed run still returns its VM.
    let token = CancellationToken::new();
    token.cancel();
    assert!(query.run(&token).is_err());
    assert_eq!(idle, query.idle_vms());
}
