//! Observation encoding for the placement environment.
//!
//! The observation is a flat `Vec<f64>` with the following published layout
//! (all slice boundaries derivable from [`ObservationLayout`]):
//!
//! ```text
//! [request(7)] ++ [dc_0(8)] ++ .. ++ [dc_{D-1}(8)]
//!             ++ [forecast_0(F)] ++ .. ++ [forecast_{D-1}(F)]
//!             ++ [reward_{t-W}(3)] ++ .. ++ [reward_{t-1}(3)]
//! ```
//!
//! Request block: tier one-hot (4), `lat/90`, `lon/180`, hour-of-day / 24.
//! Datacenter block: `carbon/1000`, renewable share, `pue - 1`, CPU
//! utilization, RAM utilization, remaining-capacity fraction,
//! `geodesic(user, dc) / 20015 km`, green flag. Forecast blocks carry the
//! next `F` hourly renewable shares per datacenter; the reward window lists
//! the last `W` reward vectors oldest first, zero-padded at episode start.

use super::datacenter::DatacenterState;
use crate::types::{PlacementRequest, VmTier};

/// Half the Earth's circumference; an upper bound on any geodesic.
pub const MAX_GEODESIC_KM: f64 = 20_015.0;

/// Dimensions and slice boundaries of the observation vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationLayout {
    /// Number of datacenters D.
    pub n_datacenters: usize,
    /// Forecast hours F per datacenter.
    pub forecast_horizon: usize,
    /// Recent reward vectors W in the window.
    pub reward_window: usize,
}

impl ObservationLayout {
    /// Features in the request block.
    pub const REQUEST_DIM: usize = VmTier::COUNT + 3;

    /// Features per datacenter block.
    pub const DC_DIM: usize = 8;

    /// Start of datacenter block `i`.
    pub fn dc_offset(&self, i: usize) -> usize {
        Self::REQUEST_DIM + i * Self::DC_DIM
    }

    /// Start of the forecast region.
    pub fn forecast_offset(&self) -> usize {
        Self::REQUEST_DIM + self.n_datacenters * Self::DC_DIM
    }

    /// Start of the recent-reward window.
    pub fn reward_offset(&self) -> usize {
        self.forecast_offset() + self.n_datacenters * self.forecast_horizon
    }

    /// Total observation dimension; must equal the network input width.
    pub fn dim(&self) -> usize {
        self.reward_offset() + self.reward_window * 3
    }
}

/// Assembles observation vectors.
pub struct ObservationBuilder;

impl ObservationBuilder {
    /// Builds the observation for the current request and datacenter states.
    ///
    /// `recent_rewards` holds at most `layout.reward_window` vectors, oldest
    /// first; missing leading entries are zero-padded.
    pub fn build(
        request: &PlacementRequest,
        datacenters: &[DatacenterState],
        recent_rewards: &[[f64; 3]],
        layout: &ObservationLayout,
    ) -> Vec<f64> {
        debug_assert_eq!(datacenters.len(), layout.n_datacenters);
        let mut obs = Vec::with_capacity(layout.dim());

        // request block
        obs.extend(request.tier.one_hot());
        obs.push(request.user.lat / 90.0);
        obs.push(request.user.lon / 180.0);
        obs.push((request.arrival_hour % 24.0) / 24.0);

        // per-datacenter blocks
        for dc in datacenters {
            obs.push(dc.carbon_intensity / 1000.0);
            obs.push(dc.renewable_pct);
            obs.push(dc.spec.pue - 1.0);
            obs.push(dc.cpu_utilization());
            obs.push(dc.ram_utilization());
            obs.push(dc.capacity_fraction());
            obs.push(request.user.geodesic_km(&dc.spec.location) / MAX_GEODESIC_KM);
            obs.push(if dc.green { 1.0 } else { 0.0 });
        }

        // forecast blocks, zero-padded to the horizon
        for dc in datacenters {
            for k in 0..layout.forecast_horizon {
                obs.push(dc.forecast.get(k).copied().unwrap_or(0.0));
            }
        }

        // recent rewards, oldest first, zero-padded at the front
        let pad = layout.reward_window.saturating_sub(recent_rewards.len());
        for _ in 0..pad {
            obs.extend([0.0; 3]);
        }
        for r in recent_rewards.iter().rev().take(layout.reward_window).rev() {
            obs.extend(*r);
        }

        debug_assert_eq!(obs.len(), layout.dim());
        obs
    }
}
