//! PanelStore — the historical and forecast-horizon country–month records.
//!
//! RULE: PanelStore is a read-only snapshot once built.
//! The fitter and the simulation engine borrow it; nothing mutates it.
//!
//! Horizon rows never carry a lag: the lag for a forecast month is
//! path state owned by the simulation engine, not panel data.

use crate::{
    error::{ForecastError, ForecastResult},
    types::{CountryId, Count, MonthIndex},
};
use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Stable country identity. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Country {
    pub country_id: CountryId,
    pub name:       String,
    pub isoab:      String,
}

/// Region membership. Carried for downstream reporting only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFlags {
    #[serde(default)]
    pub in_africa:      bool,
    #[serde(default)]
    pub in_middle_east: bool,
}

pub type Covariates = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryMonthRecord {
    pub country_id:          CountryId,
    pub month_index:         MonthIndex,
    /// `Some` for historical rows, `None` for forecast-horizon rows.
    pub fatalities_observed: Option<Count>,
    /// Observed count at `month_index - 1`. `None` when that month is
    /// absent from the history and always `None` on horizon rows.
    pub lag1_fatalities:     Option<Count>,
    pub covariates:          Covariates,
}

impl CountryMonthRecord {
    pub fn is_historical(&self) -> bool {
        self.fatalities_observed.is_some()
    }
}

/// One flat row at the ingestion boundary. Rows with `fatalities`
/// are history; rows without are forecast-horizon covariates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelRow {
    pub country_id:  CountryId,
    pub name:        String,
    pub isoab:       String,
    pub month_index: MonthIndex,
    #[serde(default)]
    pub fatalities:  Option<Count>,
    #[serde(default)]
    pub covariates:  Covariates,
    #[serde(flatten)]
    pub regions:     RegionFlags,
}

/// Everything the panel knows about one country.
#[derive(Debug, Clone)]
pub struct CountryPanel {
    pub country: Country,
    pub regions: RegionFlags,
    history:     Vec<CountryMonthRecord>,
    horizon:     Vec<CountryMonthRecord>,
}

impl CountryPanel {
    pub fn history(&self) -> &[CountryMonthRecord] {
        &self.history
    }

    pub fn horizon(&self) -> &[CountryMonthRecord] {
        &self.horizon
    }

    /// Last observed (month, count): the ground truth available at
    /// forecast time.
    pub fn last_observed(&self) -> Option<(MonthIndex, Count)> {
        self.history
            .last()
            .and_then(|r| r.fatalities_observed.map(|y| (r.month_index, y)))
    }

    pub fn horizon_month(&self, month_index: MonthIndex) -> Option<&CountryMonthRecord> {
        self.horizon
            .binary_search_by_key(&month_index, |r| r.month_index)
            .ok()
            .map(|i| &self.horizon[i])
    }
}

#[derive(Debug, Clone, Default)]
pub struct PanelStore {
    countries: BTreeMap<CountryId, CountryPanel>,
}

impl PanelStore {
    /// Build the store from ingestion rows.
    ///
    /// Fails when a country's identity is inconsistent across rows,
    /// when a (country, month) key repeats, or when a horizon row does
    /// not come strictly after the country's last historical month.
    pub fn from_rows(rows: Vec<PanelRow>) -> ForecastResult<Self> {
        let mut grouped: BTreeMap<CountryId, (Country, RegionFlags, Vec<PanelRow>)> =
            BTreeMap::new();

        for row in rows {
            let country = Country {
                country_id: row.country_id,
                name:       row.name.clone(),
                isoab:      row.isoab.clone(),
            };
            let entry = grouped
                .entry(row.country_id)
                .or_insert_with(|| (country.clone(), row.regions, Vec::new()));
            if entry.0 != country {
                return Err(ForecastError::InvalidPanel(format!(
                    "country {} appears as both {}/{} and {}/{}",
                    row.country_id, entry.0.name, entry.0.isoab, country.name, country.isoab
                )));
            }
            entry.1.in_africa |= row.regions.in_africa;
            entry.1.in_middle_east |= row.regions.in_middle_east;
            entry.2.push(row);
        }

        let mut countries = BTreeMap::new();
        for (country_id, (country, regions, mut rows)) in grouped {
            rows.sort_by_key(|r| r.month_index);
            if let Some(w) = rows.windows(2).find(|w| w[0].month_index == w[1].month_index) {
                return Err(ForecastError::InvalidPanel(format!(
                    "country {country_id} has duplicate rows for month {}",
                    w[0].month_index
                )));
            }

            let mut history: Vec<CountryMonthRecord> = Vec::new();
            let mut horizon: Vec<CountryMonthRecord> = Vec::new();
            for row in rows {
                match row.fatalities {
                    Some(y) => {
                        if let Some(first) = horizon.first() {
                            return Err(ForecastError::InvalidPanel(format!(
                                "country {country_id} has observed month {} after horizon month {}",
                                row.month_index, first.month_index
                            )));
                        }
                        let lag1_fatalities = history
                            .last()
                            .filter(|prev| prev.month_index == row.month_index - 1)
                            .and_then(|prev| prev.fatalities_observed);
                        history.push(CountryMonthRecord {
                            country_id,
                            month_index: row.month_index,
                            fatalities_observed: Some(y),
                            lag1_fatalities,
                            covariates: row.covariates,
                        });
                    }
                    None => horizon.push(CountryMonthRecord {
                        country_id,
                        month_index: row.month_index,
                        fatalities_observed: None,
                        lag1_fatalities: None,
                        covariates: row.covariates,
                    }),
                }
            }

            countries.insert(country_id, CountryPanel { country, regions, history, horizon });
        }

        log::debug!(
            "panel: {} countries, {} historical rows, {} horizon rows",
            countries.len(),
            countries.values().map(|c| c.history.len()).sum::<usize>(),
            countries.values().map(|c| c.horizon.len()).sum::<usize>(),
        );
        Ok(Self { countries })
    }

    /// Read a JSON array of `PanelRow`s.
    pub fn load_json(path: impl AsRef<Path>) -> ForecastResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let rows: Vec<PanelRow> = serde_json::from_str(&content)?;
        Self::from_rows(rows)
    }

    pub fn country(&self, country_id: CountryId) -> Option<&CountryPanel> {
        self.countries.get(&country_id)
    }

    pub fn countries(&self) -> impl Iterator<Item = &CountryPanel> {
        self.countries.values()
    }

    pub fn country_ids(&self) -> Vec<CountryId> {
        self.countries.keys().copied().collect()
    }

    /// Countries that have at least one forecast-horizon row.
    pub fn forecast_countries(&self) -> Vec<CountryId> {
        self.countries
            .values()
            .filter(|c| !c.horizon.is_empty())
            .map(|c| c.country.country_id)
            .collect()
    }

    /// Countries flagged as Africa or Middle East.
    pub fn regional_countries(&self) -> Vec<CountryId> {
        self.countries
            .values()
            .filter(|c| c.regions.in_africa || c.regions.in_middle_east)
            .map(|c| c.country.country_id)
            .collect()
    }

    pub fn historical_rows(&self) -> impl Iterator<Item = &CountryMonthRecord> {
        self.countries.values().flat_map(|c| c.history.iter())
    }

    pub fn historical_row_count(&self) -> usize {
        self.countries.values().map(|c| c.history.len()).sum()
    }
}

/// Calendar month of a month index: the last day of that month,
/// where month 1 is the month containing `dataset_start`.
pub fn calendar_month(dataset_start: NaiveDate, month_index: MonthIndex) -> Option<NaiveDate> {
    if month_index < 1 {
        return None;
    }
    let first = dataset_start.with_day0(0)?;
    let next = first.checked_add_months(Months::new(u32::try_from(month_index).ok()?))?;
    next.pred_opt()
}
