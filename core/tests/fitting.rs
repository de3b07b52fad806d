//! ModelFitter tests — parameter recovery on synthetic panels and the
//! all-or-nothing failure modes.

use fast_core::{
    config::{FitterConfig, ForecastConfig, LagTransform},
    error::FitFailure,
    fitter::{ModelFitter, INTERCEPT_TERM, LAG_TERM},
    panel::{PanelRow, PanelStore},
    synthetic::SyntheticPanel,
};

fn fitter_for(spec: &SyntheticPanel) -> ModelFitter {
    ModelFitter::with_settings(FitterConfig::default(), spec.covariate_names(), spec.lag_transform)
}

// ── Recovery ─────────────────────────────────────────────────────────────────

#[test]
fn recovers_generating_parameters() {
    let _ = env_logger::builder().is_test(true).try_init();

    let spec = SyntheticPanel { n_countries: 30, history_months: 60, seed: 2024, ..SyntheticPanel::default() };
    let panel = spec.generate().unwrap();
    let model = fitter_for(&spec).fit(&panel).unwrap();

    assert!(model.iterations <= FitterConfig::default().max_iterations);
    assert_eq!(model.n_observations, 30 * 59);
    assert!(model.log_likelihood.is_finite());

    assert!(
        (model.autoregressive - spec.autoregressive).abs() < 0.2,
        "phi {} vs {}",
        model.autoregressive,
        spec.autoregressive
    );
    assert!(
        model.dispersion > 0.3 && model.dispersion < 1.2,
        "dispersion {}",
        model.dispersion
    );
    assert!(model.random_effect.variance > 0.0 && model.random_effect.variance.is_finite());
    assert_eq!(model.random_effect.mean, 0.0);
    assert_eq!(model.country_effects.len(), 30);
    for (id, effect) in &model.country_effects {
        assert!(effect.mean.is_finite(), "country {id} mode {}", effect.mean);
        // conditional variance never exceeds the pooled prior variance
        assert!(effect.variance > 0.0 && effect.variance <= model.random_effect.variance);
        assert_eq!(model.random_effect_for(*id), *effect);
    }
    assert_eq!(model.random_effect_for(999), model.random_effect);

    // Coefficients are reported per standard deviation.
    for c in &model.covariates {
        assert!(c.scale > 0.0);
        assert!(c.coefficient.is_finite());
    }
    assert_eq!(model.coefficient(LAG_TERM), Some(model.autoregressive));
    assert_eq!(model.coefficient(INTERCEPT_TERM), Some(model.intercept));
    assert!(model.coefficient("no_such_term").is_none());
}

#[test]
fn identity_lag_transform_is_fitted_on_raw_counts() {
    let spec = SyntheticPanel {
        n_countries:    20,
        history_months: 48,
        intercept:      -1.0,
        autoregressive: 0.01,
        lag_transform:  LagTransform::Identity,
        seed:           5,
        ..SyntheticPanel::default()
    };
    let panel = spec.generate().unwrap();
    let model = fitter_for(&spec).fit(&panel).unwrap();

    assert_eq!(model.lag_transform, LagTransform::Identity);
    assert!(model.autoregressive.is_finite());
    assert!(model.autoregressive.abs() < 0.1, "phi {}", model.autoregressive);
}

#[test]
fn same_panel_gives_identical_fit() {
    let spec = SyntheticPanel::default();
    let panel = spec.generate().unwrap();
    let a = fitter_for(&spec).fit(&panel).unwrap();
    let b = fitter_for(&spec).fit(&panel).unwrap();
    assert_eq!(a, b);
}

#[test]
fn fitter_built_from_config_uses_its_covariates() {
    let spec = SyntheticPanel::default();
    let panel = spec.generate().unwrap();
    let config = ForecastConfig::default_test();
    let model = ModelFitter::new(&config).fit(&panel).unwrap();
    let names: Vec<&str> = model.covariates.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["infant_mortality", "milex_share"]);
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[test]
fn empty_panel_fails() {
    let spec = SyntheticPanel::default();
    let err = fitter_for(&spec).fit(&PanelStore::default()).unwrap_err();
    assert_eq!(err, FitFailure::EmptyPanel);
}

#[test]
fn country_without_history_fails_the_fit() {
    let spec = SyntheticPanel { n_countries: 4, history_months: 12, ..SyntheticPanel::default() };
    let mut rows = spec.rows();
    rows.push(PanelRow {
        country_id: 99,
        name:       "Newland".into(),
        isoab:      "NEW".into(),
        month_index: 600,
        fatalities: None,
        covariates: [("infant_mortality".to_string(), 10.0), ("milex_share".to_string(), 1.0)].into(),
        regions:    Default::default(),
    });
    let panel = PanelStore::from_rows(rows).unwrap();

    let err = fitter_for(&spec).fit(&panel).unwrap_err();
    assert_eq!(err, FitFailure::InsufficientData { country_id: 99, observed: 0, required: 3 });
}

#[test]
fn missing_historical_covariate_fails_the_fit() {
    let spec = SyntheticPanel { n_countries: 4, history_months: 12, ..SyntheticPanel::default() };
    let mut rows = spec.rows();
    let target = rows
        .iter_mut()
        .find(|r| r.country_id == 3 && r.month_index == spec.first_month + 5)
        .unwrap();
    target.covariates.remove("milex_share");
    let panel = PanelStore::from_rows(rows).unwrap();

    let err = fitter_for(&spec).fit(&panel).unwrap_err();
    assert_eq!(
        err,
        FitFailure::MissingCovariate {
            country_id:  3,
            month_index: spec.first_month + 5,
            covariate:   "milex_share".into(),
        }
    );
}

#[test]
fn linearly_dependent_covariate_is_collinear() {
    let spec = SyntheticPanel { n_countries: 6, history_months: 24, ..SyntheticPanel::default() };
    let mut rows = spec.rows();
    for row in &mut rows {
        let share = row.covariates["milex_share"];
        row.covariates.insert("milex_scaled".into(), 3.0 * share + 1.0);
    }
    let panel = PanelStore::from_rows(rows).unwrap();

    let fitter = ModelFitter::with_settings(
        FitterConfig::default(),
        vec!["infant_mortality".into(), "milex_share".into(), "milex_scaled".into()],
        LagTransform::Log1p,
    );
    assert_eq!(fitter.fit(&panel).unwrap_err(), FitFailure::Collinear { term: "milex_scaled".into() });
}

#[test]
fn constant_covariate_is_collinear_with_intercept() {
    let spec = SyntheticPanel { n_countries: 6, history_months: 24, ..SyntheticPanel::default() };
    let mut rows = spec.rows();
    for row in &mut rows {
        row.covariates.insert("exec_military".into(), 1.0);
    }
    let panel = PanelStore::from_rows(rows).unwrap();

    let fitter = ModelFitter::with_settings(
        FitterConfig::default(),
        vec!["infant_mortality".into(), "exec_military".into()],
        LagTransform::Log1p,
    );
    assert_eq!(fitter.fit(&panel).unwrap_err(), FitFailure::Collinear { term: "exec_military".into() });
}

#[test]
fn exhausted_iteration_budget_is_non_convergence() {
    let spec = SyntheticPanel::default();
    let panel = spec.generate().unwrap();
    let config = FitterConfig { max_iterations: 1, ..FitterConfig::default() };
    let fitter = ModelFitter::with_settings(config, spec.covariate_names(), spec.lag_transform);

    match fitter.fit(&panel) {
        Err(FitFailure::NonConvergence { iterations, last_change }) => {
            assert_eq!(iterations, 1);
            assert!(last_change > 0.0);
        }
        other => panic!("expected NonConvergence, got {other:?}"),
    }
}
