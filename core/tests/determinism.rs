//! Determinism tests — the same seed and panel must produce identical
//! forecasts, and a stored model must reproduce them.

use fast_core::{
    aggregate::ForecastRecord,
    config::ForecastConfig,
    engine::ForecastEngine,
    synthetic::SyntheticPanel,
};

fn run(run_id: &str, seed: u64) -> Vec<ForecastRecord> {
    let panel = SyntheticPanel::default().generate().unwrap();
    let mut engine = ForecastEngine::build_test(run_id.to_string(), seed).unwrap();
    engine.run(&panel).unwrap().forecasts
}

#[test]
fn same_seed_same_forecasts() {
    let a = run("det-a", 12345);
    let b = run("det-b", 12345);
    assert!(!a.is_empty());
    assert_eq!(a, b, "same seed produced different forecasts");
}

#[test]
fn different_seed_different_forecasts() {
    let a = run("det-a", 12345);
    let b = run("det-b", 54321);
    assert_eq!(a.len(), b.len());
    assert!(
        a.iter().zip(&b).any(|(x, y)| x.predicted != y.predicted),
        "different seeds produced identical forecasts"
    );
}

/// Re-simulating from the snapshotted model gives the same records as
/// the run that fitted it.
#[test]
fn rerun_from_snapshot_reproduces_forecasts() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let config = ForecastConfig { seed: 777, ..ForecastConfig::default_test() };

    let mut first = ForecastEngine::build_with_config("fit-run".into(), config.clone()).unwrap();
    let original = first.run(&panel).unwrap();

    let store = first.into_store();
    store
        .insert_run("rerun", config.seed, "0.1.0-test", &serde_json::to_string(&config).unwrap(), "1970-01-01T00:00:00Z")
        .unwrap();
    let mut second = ForecastEngine::new("rerun".into(), config, store).unwrap();
    let replay = second.rerun_from(&panel, "fit-run").unwrap();

    assert_eq!(second.store().event_count("rerun", "model_reused").unwrap(), 1);
    assert_eq!(second.store().event_count("rerun", "model_fitted").unwrap(), 0);

    assert_eq!(second.store().load_model_snapshot("rerun").unwrap().as_ref(), Some(&original.model));
    assert_eq!(original.forecasts, replay.forecasts);
}

#[test]
fn rerun_from_unknown_run_is_rejected() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let mut engine = ForecastEngine::build_test("orphan".into(), 1).unwrap();
    assert!(engine.rerun_from(&panel, "never-ran").is_err());
}

/// Records come back from the store exactly as the run produced them,
/// in (country, month) order.
#[test]
fn stored_forecasts_match_report() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let mut engine = ForecastEngine::build_test("store-check".into(), 99).unwrap();
    let report = engine.run(&panel).unwrap();

    let stored = engine.store().forecasts_for_run("store-check").unwrap();
    assert_eq!(stored.len(), report.forecasts.len());
    assert_eq!(engine.store().forecast_count("store-check").unwrap(), stored.len() as i64);
    for (s, r) in stored.iter().zip(&report.forecasts) {
        assert_eq!((s.country_id, s.outcome_n, s.dates), (r.country_id, r.outcome_n, r.dates));
        assert_eq!(s.isoab, r.isoab);
        assert!((s.predicted - r.predicted).abs() < 1e-9);
        assert!((s.outcome_p - r.outcome_p).abs() < 1e-12);
        assert_eq!(s.window_p.len(), r.window_p.len());
    }
}
