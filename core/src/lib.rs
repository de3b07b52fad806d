//! FAST conflict-fatality forecasting core.
//!
//! Data flow:
//!   PanelStore → ModelFitter → FittedModel → SimulationEngine
//!     → simulated paths → Aggregator → ForecastRecords
//!
//! `engine::ForecastEngine` runs the whole flow for one run and
//! persists its results through `store::ForecastStore`.

pub mod aggregate;
pub mod categorize;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fitter;
pub mod linalg;
pub mod negbin;
pub mod panel;
pub mod rng;
pub mod simulation;
pub mod store;
pub mod synthetic;
pub mod types;
