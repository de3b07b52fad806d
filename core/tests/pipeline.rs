//! End-to-end engine tests — failure isolation, fit aborts, the event
//! log and persisted outputs.

use fast_core::{
    config::ForecastConfig,
    engine::ForecastEngine,
    error::{FitFailure, ForecastError},
    event::ForecastEvent,
    panel::{PanelRow, PanelStore},
    synthetic::SyntheticPanel,
};
use std::collections::BTreeMap;

fn synthetic() -> (SyntheticPanel, Vec<PanelRow>) {
    let spec = SyntheticPanel::default();
    let rows = spec.rows();
    (spec, rows)
}

#[test]
fn failing_country_does_not_stop_the_others() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (spec, mut rows) = synthetic();
    let broken_month = spec.first_month + spec.history_months as i64 + 1;
    rows.iter_mut()
        .find(|r| r.country_id == 4 && r.month_index == broken_month)
        .unwrap()
        .covariates
        .remove("milex_share");
    let panel = PanelStore::from_rows(rows).unwrap();

    let mut engine = ForecastEngine::build_test("isolation".into(), 31).unwrap();
    let report = engine.run(&panel).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].country_id, 4);
    assert_eq!(report.failures[0].isoab, "C04");
    assert!(report.failures[0].reason.contains("milex_share"));

    let ok = report.succeeded_countries();
    assert_eq!(ok.len(), spec.n_countries - 1);
    assert!(!ok.contains(&4));
    assert!(report.forecasts_for(4).is_empty());
    for id in ok {
        assert_eq!(report.forecasts_for(id).len(), 6);
    }

    let store = engine.store();
    assert_eq!(store.country_failures("isolation").unwrap(), report.failures);
    assert_eq!(store.event_count("isolation", "country_failed").unwrap(), 1);
    assert_eq!(store.event_count("isolation", "country_forecasted").unwrap(), 11);
    assert_eq!(store.forecast_count("isolation").unwrap(), 11 * 6);
}

#[test]
fn fit_failure_aborts_every_country() {
    let (_, mut rows) = synthetic();
    rows.push(PanelRow {
        country_id:  77,
        name:        "Newland".into(),
        isoab:       "NEW".into(),
        month_index: 560,
        fatalities:  None,
        covariates:  [("infant_mortality".to_string(), 12.0), ("milex_share".to_string(), 2.0)].into(),
        regions:     Default::default(),
    });
    let panel = PanelStore::from_rows(rows).unwrap();

    let mut engine = ForecastEngine::build_test("aborted".into(), 3).unwrap();
    match engine.run(&panel) {
        Err(ForecastError::Fit(FitFailure::InsufficientData { country_id, observed, .. })) => {
            assert_eq!((country_id, observed), (77, 0));
        }
        other => panic!("expected an InsufficientData fit failure, got {other:?}"),
    }

    let store = engine.store();
    assert_eq!(store.event_count("aborted", "fit_failed").unwrap(), 1);
    assert_eq!(store.event_count("aborted", "model_fitted").unwrap(), 0);
    assert_eq!(store.forecast_count("aborted").unwrap(), 0);
    assert!(store.load_model_snapshot("aborted").unwrap().is_none());
}

#[test]
fn event_log_records_the_run_in_order() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let mut engine = ForecastEngine::build_test("events".into(), 8).unwrap();
    engine.run(&panel).unwrap();

    let store = engine.store();
    assert_eq!(store.run_seed("events").unwrap(), Some(8));
    assert_eq!(store.run_seed("missing").unwrap(), None);

    let events = store.events_for_run("events").unwrap();
    assert_eq!(events.len(), 1 + 1 + 12 + 1);
    for (i, e) in events.iter().enumerate() {
        assert_eq!(e.seq, i as u64);
    }
    assert_eq!(events[0].event_type, "run_initialized");
    assert_eq!(events[1].event_type, "model_fitted");

    let last: ForecastEvent = serde_json::from_str(&events[events.len() - 1].payload).unwrap();
    assert_eq!(last, ForecastEvent::RunCompleted { succeeded: 12, failed: 0 });

    let first: ForecastEvent = serde_json::from_str(&events[0].payload).unwrap();
    match first {
        ForecastEvent::RunInitialized { seed, n_simulations, horizon_months, threshold, .. } => {
            assert_eq!((seed, n_simulations, horizon_months, threshold), (8, 200, 6, 25));
        }
        other => panic!("unexpected first event {other:?}"),
    }
}

/// Countries with constant-zero history keep their own fitted baseline
/// in simulation: a zero country with covariates at the training minimum
/// forecasts no conflict, and the pooled intercept spread from a sparse
/// panel does not inflate the active countries.
#[test]
fn zero_history_country_forecasts_nothing() {
    let _ = env_logger::builder().is_test(true).try_init();

    let spec = SyntheticPanel {
        n_countries:    20,
        history_months: 60,
        dispersion:     0.05,
        seed:           11,
        ..SyntheticPanel::default()
    };
    let mut rows = spec.rows();
    let silent = |id: i64| id <= 8;

    let mut minimums: BTreeMap<String, f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.fatalities.is_some() && !silent(r.country_id)) {
        for (name, &v) in &row.covariates {
            minimums.entry(name.clone()).and_modify(|m| *m = m.min(v)).or_insert(v);
        }
    }
    for row in rows.iter_mut().filter(|r| silent(r.country_id)) {
        if row.fatalities.is_some() {
            row.fatalities = Some(0);
        }
        if row.country_id == 1 {
            row.covariates = minimums.clone();
        }
    }
    let panel = PanelStore::from_rows(rows).unwrap();

    let mut config = ForecastConfig { seed: 5, n_simulations: 1000, ..ForecastConfig::default_test() };
    config.fitter.max_iterations = 500;
    let mut engine = ForecastEngine::build_with_config("zero".into(), config).unwrap();
    let report = engine.run(&panel).unwrap();

    assert!(report.failures.is_empty());
    assert!(report.model.country_effects[&1].mean < 0.0);

    let zero = report.forecasts_for(1);
    assert_eq!(zero.len(), 6);
    for r in &zero {
        assert!(r.predicted < 0.5, "month {}: predicted {}", r.outcome_n, r.predicted);
        assert!(r.outcome_p <= 0.01, "month {}: outcome_p {}", r.outcome_n, r.outcome_p);
    }

    for id in 9..=20 {
        let peak = panel
            .country(id)
            .unwrap()
            .history()
            .iter()
            .filter_map(|r| r.fatalities_observed)
            .max()
            .unwrap_or(0) as f64;
        for r in report.forecasts_for(id) {
            assert!(
                r.predicted <= 10.0 * (peak + 1.0),
                "country {id} month {}: predicted {} against a historical peak of {peak}",
                r.outcome_n,
                r.predicted
            );
        }
    }
}

#[test]
fn threshold_zero_is_certain_exceedance() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let config = ForecastConfig { threshold: 0, seed: 4, ..ForecastConfig::default_test() };
    let mut engine = ForecastEngine::build_with_config("t0".into(), config).unwrap();
    let report = engine.run(&panel).unwrap();
    assert!(report.forecasts.iter().all(|r| r.outcome_p == 1.0));
}

#[test]
fn records_are_well_formed() {
    let panel = SyntheticPanel::default().generate().unwrap();
    let mut engine = ForecastEngine::build_test("shape".into(), 17).unwrap();
    let report = engine.run(&panel).unwrap();

    for id in panel.forecast_countries() {
        let records = report.forecasts_for(id);
        let history_end = panel.country(id).unwrap().last_observed().unwrap().0;
        let months: Vec<i64> = records.iter().map(|r| r.outcome_n).collect();
        assert_eq!(months, (history_end + 1..=history_end + 6).collect::<Vec<_>>());
        for pair in records.windows(2) {
            assert!(pair[1].cumulative_outcome_n >= pair[0].cumulative_outcome_n);
            assert!(pair[1].dates > pair[0].dates);
        }
        assert!(records.iter().all(|r| r.predicted >= 0.0 && (0.0..=1.0).contains(&r.outcome_p)));
        // windows of 3 and 6 months fill in over a six-month horizon
        assert_eq!(records[2].window_p.len(), 1);
        assert_eq!(records[5].window_p.len(), 2);
    }
}

#[test]
fn invalid_configuration_is_rejected() {
    let config = ForecastConfig { n_simulations: 0, ..ForecastConfig::default_test() };
    assert!(matches!(
        ForecastEngine::build_with_config("bad".into(), config),
        Err(ForecastError::InvalidConfig(_))
    ));

    let config = ForecastConfig { horizon_months: 0, ..ForecastConfig::default_test() };
    assert!(ForecastEngine::build_with_config("bad".into(), config).is_err());
}

#[test]
fn region_flags_select_africa_and_middle_east() {
    let panel = SyntheticPanel::default().generate().unwrap();
    assert_eq!(panel.regional_countries(), vec![2, 4, 5, 6, 8, 10, 12]);
    assert_eq!(panel.country_ids().len(), 12);
    assert_eq!(panel.historical_row_count(), 12 * 48);
    assert!(panel.historical_rows().all(|r| r.is_historical()));
}

#[test]
fn panel_rejects_inconsistent_rows() {
    let (_, rows) = synthetic();

    let mut duplicated = rows.clone();
    duplicated.push(rows[0].clone());
    assert!(matches!(PanelStore::from_rows(duplicated), Err(ForecastError::InvalidPanel(_))));

    let mut renamed = rows.clone();
    renamed[1].isoab = "XXX".into();
    assert!(matches!(PanelStore::from_rows(renamed), Err(ForecastError::InvalidPanel(_))));

    let mut reopened = rows;
    let late = reopened.iter_mut().filter(|r| r.country_id == 1).last().unwrap();
    late.fatalities = Some(3);
    assert!(matches!(PanelStore::from_rows(reopened), Err(ForecastError::InvalidPanel(_))));
}
