//! Reward computation for the placement environment.
//!
//! Each step yields three scalars, one per objective, normalized so that
//! larger is better: each component is a clipped penalty in `[-1, 0]`, plus
//! a small green bonus on the energy and carbon components when an accepted
//! placement lands in a green-tagged datacenter.

use super::config::EnvConfig;
use super::datacenter::DatacenterState;
use crate::simulator::PlacementOutcome;
use crate::types::{GeoLocation, Objective};

/// The per-step reward triple `(energy, carbon, latency)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RewardVector {
    pub energy: f64,
    pub carbon: f64,
    pub latency: f64,
}

impl RewardVector {
    /// Components in objective order.
    pub fn as_array(&self) -> [f64; 3] {
        [self.energy, self.carbon, self.latency]
    }

    /// Component for one objective.
    pub fn get(&self, objective: Objective) -> f64 {
        self.as_array()[objective.index()]
    }
}

/// Computes step rewards.
pub struct RewardComputer;

impl RewardComputer {
    /// Rewards for one placement outcome at the datacenter that received it.
    ///
    /// # Components
    ///
    /// 1. **Energy**: `-clip(energy / E_norm, 0, 1)` on the reported
    ///    marginal facility energy.
    /// 2. **Carbon**: `-clip(energy · intensity · PUE / C_norm, 0, 1)` at the
    ///    receiving site's current grid intensity.
    /// 3. **Latency**: `-clip(geodesic(user, site) / L_norm, 0, 1)`; never
    ///    positive.
    ///
    /// The green bonus is added to the energy and carbon components only for
    /// accepted placements at green-tagged sites.
    pub fn compute(
        outcome: &PlacementOutcome,
        datacenter: &DatacenterState,
        user: &GeoLocation,
        config: &EnvConfig,
    ) -> RewardVector {
        let energy_kwh = if outcome.accepted { outcome.energy_kwh } else { 0.0 };
        let carbon_g = energy_kwh * datacenter.carbon_intensity * datacenter.spec.pue;
        let distance_km = user.geodesic_km(&datacenter.spec.location);

        let bonus = if outcome.accepted && datacenter.green {
            config.green_bonus
        } else {
            0.0
        };

        RewardVector {
            energy: -(energy_kwh / config.e_norm_kwh).clamp(0.0, 1.0) + bonus,
            carbon: -(carbon_g / config.c_norm_g).clamp(0.0, 1.0) + bonus,
            latency: -(distance_km / config.l_norm_km).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DatacenterSpec, GeoLocation};

    fn datacenter(green: bool) -> DatacenterState {
        let mut dc = DatacenterState::new(DatacenterSpec {
            id: 0,
            region: "NO".to_string(),
            location: GeoLocation::new(59.9, 10.7),
            pue: 1.2,
            capacity: 10,
            total_cores: 512,
            total_ram_gb: 1024,
        });
        dc.carbon_intensity = 400.0;
        dc.green = green;
        dc
    }

    fn user() -> GeoLocation {
        GeoLocation::new(50.1, 8.7)
    }

    #[test]
    fn rewards_are_bounded() {
        let cfg = EnvConfig::default();
        let outcome = PlacementOutcome { accepted: true, energy_kwh: 1_000.0 };
        let r = RewardComputer::compute(&outcome, &datacenter(false), &user(), &cfg);
        // clipping bounds each penalty at -1 even for absurd energy
        assert!((r.energy - (-1.0)).abs() < 1e-12);
        assert!((r.carbon - (-1.0)).abs() < 1e-12);
        assert!(r.latency <= 0.0 && r.latency >= -1.0);
    }

    #[test]
    fn green_bonus_applies_to_energy_and_carbon_only() {
        let cfg = EnvConfig::default();
        let outcome = PlacementOutcome { accepted: true, energy_kwh: 2.0 };
        let plain = RewardComputer::compute(&outcome, &datacenter(false), &user(), &cfg);
        let green = RewardComputer::compute(&outcome, &datacenter(true), &user(), &cfg);
        assert!((green.energy - plain.energy - cfg.green_bonus).abs() < 1e-12);
        assert!((green.carbon - plain.carbon - cfg.green_bonus).abs() < 1e-12);
        assert_eq!(green.latency, plain.latency);
    }

    #[test]
    fn rejected_placement_gets_no_bonus() {
        let cfg = EnvConfig::default();
        let outcome = PlacementOutcome { accepted: false, energy_kwh: 0.0 };
        let r = RewardComputer::compute(&outcome, &datacenter(true), &user(), &cfg);
        assert_eq!(r.energy, 0.0);
        assert_eq!(r.carbon, 0.0);
        assert!(r.latency < 0.0);
    }

    #[test]
    fn components_never_exceed_green_bonus() {
        let cfg = EnvConfig::default();
        let outcome = PlacementOutcome { accepted: true, energy_kwh: 0.0 };
        let r = RewardComputer::compute(&outcome, &datacenter(true), &user(), &cfg);
        assert!(r.energy <= cfg.green_bonus);
        assert!(r.carbon <= cfg.green_bonus);
        assert!(r.latency <= 0.0);
    }
}
