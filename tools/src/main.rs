//! forecast-runner: headless forecasting run for FAST.
//!
//! Usage:
//!   forecast-runner --panel panel.json --db forecasts.db --out forecast.jsonl
//!   forecast-runner --synthetic --seed 12345 --simulations 500 --horizon 6
//!   forecast-runner --panel panel.json --db forecasts.db --reuse-model run-<id>

use anyhow::{Context, Result};
use fast_core::{
    categorize::{horizon_summaries, rank_month, RiskCategory},
    config::{ForecastConfig, CONFIG_FILE},
    engine::{ForecastEngine, RunReport},
    panel::PanelStore,
    store::ForecastStore,
    synthetic::SyntheticPanel,
};
use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let panel_path = string_arg(&args, "--panel");
    let out_path = string_arg(&args, "--out");
    let reuse_model = string_arg(&args, "--reuse-model");
    let synthetic = args.iter().any(|a| a == "--synthetic");

    let mut config = if Path::new(data_dir).join(CONFIG_FILE).exists() {
        ForecastConfig::load(data_dir)?
    } else {
        log::info!("no {CONFIG_FILE} in {data_dir}; using defaults");
        ForecastConfig::default()
    };
    config.seed = parse_arg(&args, "--seed", config.seed);
    config.threshold = parse_arg(&args, "--threshold", config.threshold);
    config.n_simulations = parse_arg(&args, "--simulations", config.n_simulations);
    config.horizon_months = parse_arg(&args, "--horizon", config.horizon_months);

    let panel = match (panel_path, synthetic) {
        (Some(path), _) => PanelStore::load_json(path)
            .with_context(|| format!("loading panel from {path}"))?,
        (None, true) => {
            let spec = SyntheticPanel {
                horizon_months: config.horizon_months,
                seed: config.seed,
                ..SyntheticPanel::default()
            };
            config.covariates = spec.covariate_names();
            config.lag_transform = spec.lag_transform;
            spec.generate()?
        }
        (None, false) => anyhow::bail!("either --panel <file> or --synthetic is required"),
    };
    config.validate()?;

    eprintln!("FAST — forecast-runner");
    eprintln!("  seed:        {}", config.seed);
    eprintln!("  simulations: {}", config.n_simulations);
    eprintln!("  horizon:     {} months", config.horizon_months);
    eprintln!("  threshold:   {}", config.threshold);
    eprintln!("  db:          {db}");
    eprintln!();

    let store = ForecastStore::open(db)?;
    store.migrate()?;

    let run_id = format!("run-{}", uuid::Uuid::new_v4());
    store.insert_run(
        &run_id,
        config.seed,
        env!("CARGO_PKG_VERSION"),
        &serde_json::to_string(&config)?,
        &chrono::Utc::now().to_rfc3339(),
    )?;

    let mut engine = ForecastEngine::new(run_id.clone(), config, store)?;
    let report = match reuse_model {
        Some(source) => engine.rerun_from(&panel, source)?,
        None => engine.run(&panel)?,
    };

    match out_path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating {path}"))?;
            write_records(&report, BufWriter::new(file))?;
        }
        None => write_records(&report, io::stdout().lock())?,
    }

    print_summary(&report, &panel);
    Ok(())
}

fn write_records<W: Write>(report: &RunReport, mut out: W) -> Result<()> {
    for record in &report.forecasts {
        writeln!(out, "{}", serde_json::to_string(record)?)?;
    }
    out.flush()?;
    Ok(())
}

fn print_summary(report: &RunReport, panel: &PanelStore) {
    let model = &report.model;
    eprintln!("=== RUN SUMMARY ===");
    eprintln!("  run_id:       {}", report.run_id);
    eprintln!("  countries ok: {}", report.succeeded_countries().len());
    eprintln!("  failed:       {}", report.failures.len());
    eprintln!("  records:      {}", report.forecasts.len());
    eprintln!();
    eprintln!("=== MODEL ===");
    eprintln!("  intercept:    {:.4}", model.intercept);
    for c in &model.covariates {
        eprintln!("  {:<13} {:.4} (per sd {:.3})", format!("{}:", c.name), c.coefficient, c.scale);
    }
    eprintln!("  lag (φ):      {:.4}", model.autoregressive);
    eprintln!("  dispersion:   {:.4}", model.dispersion);
    eprintln!("  RE variance:  {:.4}", model.random_effect.variance);
    eprintln!("  log-lik:      {:.2} ({} iterations)", model.log_likelihood, model.iterations);

    if !report.failures.is_empty() {
        eprintln!();
        eprintln!("=== FAILED COUNTRIES ===");
        for f in &report.failures {
            eprintln!("  {:>4} {:<4} {}", f.country_id, f.isoab, f.reason);
        }
    }

    if let Some(first) = report.forecasts.iter().map(|r| r.outcome_n).min() {
        eprintln!();
        eprintln!("=== HIGHEST RISK, MONTH {first} ===");
        let mut ranks = rank_month(&report.forecasts, first);
        ranks.sort_by(|a, b| b.probability_percentile.total_cmp(&a.probability_percentile));
        for r in ranks.iter().take(5) {
            eprintln!(
                "  {:<4} {:<26} {:<12} p-pct {:>5.1}",
                r.isoab,
                r.risk.label(),
                r.intensity.label(),
                r.probability_percentile
            );
        }
    }

    let regional = panel.regional_countries();
    if !regional.is_empty() {
        let at_risk = report
            .forecasts
            .iter()
            .filter(|r| regional.contains(&r.country_id))
            .filter(|r| RiskCategory::from_probability(r.outcome_p) >= RiskCategory::ProbableConflict)
            .map(|r| r.country_id)
            .collect::<BTreeSet<_>>();
        eprintln!();
        eprintln!(
            "  Africa & Middle East: {} countries, {} with probable conflict in some month",
            regional.len(),
            at_risk.len()
        );
    }

    let totals = horizon_summaries(&report.forecasts);
    if let Some(top) = totals.iter().max_by(|a, b| a.total_predicted.total_cmp(&b.total_predicted)) {
        eprintln!();
        eprintln!(
            "  largest horizon total: {} {:.1} fatalities (months {}–{})",
            top.isoab, top.total_predicted, top.horizon_start, top.horizon_end
        );
    }
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
