//! Hourly carbon and renewable data.
//!
//! The environment consumes one row per simulated hour, in timestamp order.
//! Each row carries, per region: carbon intensity, renewable share, the
//! datacenter class tag, and the hydro/solar/wind generation mix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from carbon-table construction and lookup.
#[derive(Debug, Error)]
pub enum CarbonError {
    #[error("carbon table has no rows")]
    Empty,

    #[error("row {row} has {got} regions, expected {expected}")]
    RaggedRow { row: usize, got: usize, expected: usize },

    #[error("unknown region index {0}")]
    UnknownRegion(usize),

    #[error("failed to parse carbon table: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Datacenter class tag from the dataset.
///
/// `DG` marks hours where the site runs predominantly on low-carbon
/// generation; `DB` is everything else. The environment derives the binary
/// green flag from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatacenterClass {
    DG,
    DB,
}

/// One region's figures for one hour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionHour {
    /// Grid carbon intensity in gCO2 per kWh.
    pub carbon_intensity_g_per_kwh: f64,
    /// Share of consumption covered by renewables, in [0, 1].
    pub renewable_pct: f64,
    /// Green/brown class tag for this hour.
    pub datacenter_type: DatacenterClass,
    /// Hydro generation in MW.
    pub hydro_mw: f64,
    /// Solar generation in MW.
    pub solar_mw: f64,
    /// Wind generation in MW.
    pub wind_mw: f64,
}

impl RegionHour {
    /// Whether this hour is tagged green.
    pub fn is_green(&self) -> bool {
        self.datacenter_type == DatacenterClass::DG
    }
}

/// The full hourly table: `rows[hour][region]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonTable {
    /// Region names, in column order.
    pub regions: Vec<String>,
    /// Hour index of the first row (timestamps are hour offsets in this model).
    pub start_hour: u64,
    /// One entry per hour, each with one record per region.
    pub rows: Vec<Vec<RegionHour>>,
}

impl CarbonTable {
    /// Builds a table from pre-assembled rows, validating rectangular shape.
    pub fn new(
        regions: Vec<String>,
        rows: Vec<Vec<RegionHour>>,
    ) -> Result<Self, CarbonError> {
        if rows.is_empty() {
            return Err(CarbonError::Empty);
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != regions.len() {
                return Err(CarbonError::RaggedRow {
                    row: i,
                    got: row.len(),
                    expected: regions.len(),
                });
            }
        }
        Ok(Self { regions, start_hour: 0, rows })
    }

    /// Parses the JSON interchange format produced by the dataset pipeline.
    pub fn from_json(json: &str) -> Result<Self, CarbonError> {
        let table: CarbonTable = serde_json::from_str(json)?;
        let start_hour = table.start_hour;
        let mut validated = Self::new(table.regions, table.rows)?;
        validated.start_hour = start_hour;
        Ok(validated)
    }

    /// Number of hours covered.
    pub fn hours(&self) -> usize {
        self.rows.len()
    }

    /// Number of regions per row.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Record for one region at one hour, if the table still covers it.
    pub fn record(&self, region: usize, hour: usize) -> Option<&RegionHour> {
        self.rows.get(hour)?.get(region)
    }

    /// Renewable-share forecast for the next `horizon` hours after `hour`.
    ///
    /// Hours past the end of the table repeat the last known value, so a
    /// short tail never changes the observation width.
    pub fn renewable_forecast(&self, region: usize, hour: usize, horizon: usize) -> Vec<f64> {
        let last = self.rows.len().saturating_sub(1);
        (1..=horizon)
            .map(|k| {
                let h = (hour + k).min(last);
                self.rows[h]
                    .get(region)
                    .map(|r| r.renewable_pct)
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Generates a seeded synthetic table with a diurnal solar bell, flat
    /// hydro, and noisy wind. Region 1 (when present) is biased toward
    /// hydro-heavy, low-carbon hours to exercise green-tag behavior.
    pub fn synthetic(regions: &[&str], hours: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::with_capacity(hours);
        for hour in 0..hours {
            let hour_of_day = (hour % 24) as f64;
            // solar bell peaking at 13:00
            let solar_factor = (-((hour_of_day - 13.0) / 4.0).powi(2)).exp();
            let mut row = Vec::with_capacity(regions.len());
            for region in 0..regions.len() {
                let hydro_mw = if region == 1 { 9000.0 } else { 800.0 + 200.0 * region as f64 };
                let solar_mw = 3000.0 * solar_factor * (1.0 + 0.1 * rng.gen::<f64>());
                let wind_mw = 1500.0 * rng.gen::<f64>();
                let total = hydro_mw + solar_mw + wind_mw + 6000.0;
                let renewable_pct = ((hydro_mw + solar_mw + wind_mw) / total).clamp(0.0, 1.0);
                let carbon = 650.0 * (1.0 - renewable_pct) + 20.0;
                let class = if renewable_pct > 0.55 {
                    DatacenterClass::DG
                } else {
                    DatacenterClass::DB
                };
                row.push(RegionHour {
                    carbon_intensity_g_per_kwh: carbon,
                    renewable_pct,
                    datacenter_type: class,
                    hydro_mw,
                    solar_mw,
                    wind_mw,
                });
            }
            rows.push(row);
        }
        Self {
            regions: regions.iter().map(|r| (*r).to_string()).collect(),
            start_hour: 0,
            rows,
        }
    }

    /// Drops every row at or after `hours`, for failure-injection tests.
    pub fn truncated(mut self, hours: usize) -> Self {
        self.rows.truncate(hours);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_is_rectangular_and_reproducible() {
        let a = CarbonTable::synthetic(&["DE", "NO", "ES"], 48, 9);
        let b = CarbonTable::synthetic(&["DE", "NO", "ES"], 48, 9);
        assert_eq!(a, b);
        assert_eq!(a.hours(), 48);
        for row in &a.rows {
            assert_eq!(row.len(), 3);
        }
    }

    #[test]
    fn hydro_region_is_mostly_green() {
        let t = CarbonTable::synthetic(&["DE", "NO", "ES"], 72, 1);
        let green_hours = (0..t.hours())
            .filter(|h| t.record(1, *h).unwrap().is_green())
            .count();
        assert!(green_hours > t.hours() / 2);
    }

    #[test]
    fn record_out_of_range_is_none() {
        let t = CarbonTable::synthetic(&["DE"], 10, 0);
        assert!(t.record(0, 10).is_none());
        assert!(t.record(1, 0).is_none());
    }

    #[test]
    fn forecast_has_requested_horizon_and_clamps_tail() {
        let t = CarbonTable::synthetic(&["DE", "NO"], 5, 0);
        let f = t.renewable_forecast(0, 3, 4);
        assert_eq!(f.len(), 4);
        // hours 4.. clamp to the final row
        assert_eq!(f[1], f[2]);
        assert_eq!(f[2], f[3]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let row0 = vec![
            RegionHour {
                carbon_intensity_g_per_kwh: 100.0,
                renewable_pct: 0.5,
                datacenter_type: DatacenterClass::DB,
                hydro_mw: 0.0,
                solar_mw: 0.0,
                wind_mw: 0.0,
            };
            2
        ];
        let row1 = vec![row0[0]];
        let err = CarbonTable::new(vec!["A".into(), "B".into()], vec![row0, row1]);
        assert!(matches!(err, Err(CarbonError::RaggedRow { row: 1, .. })));
    }

    #[test]
    fn json_round_trip() {
        let t = CarbonTable::synthetic(&["DE", "NO"], 6, 3);
        let json = serde_json::to_string(&t).unwrap();
        let back = CarbonTable::from_json(&json).unwrap();
        assert_eq!(t, back);
    }
}
