//! Greedy carbon-first baseline.
//!
//! Decodes the published observation layout and sends each request to the
//! capacity-feasible datacenter with the lowest current carbon intensity,
//! breaking ties by distance to the user. A competitive rule-based baseline
//! against which learned policies are compared.

use super::trait_::Policy;
use crate::env::ObservationLayout;

/// Carbon-greedy datacenter selection over the observation vector.
pub struct GreedyCarbonPolicy {
    layout: ObservationLayout,
}

impl GreedyCarbonPolicy {
    /// Creates a baseline for environments with the given layout.
    pub fn new(layout: ObservationLayout) -> Self {
        Self { layout }
    }
}

impl Policy for GreedyCarbonPolicy {
    fn select_action(&mut self, observation: &[f64]) -> usize {
        let mut best: Option<(f64, f64, usize)> = None;
        let mut best_infeasible: Option<(f64, f64, usize)> = None;

        for i in 0..self.layout.n_datacenters {
            let base = self.layout.dc_offset(i);
            if base + ObservationLayout::DC_DIM > observation.len() {
                break;
            }
            let carbon = observation[base];
            let capacity_fraction = observation[base + 5];
            let distance = observation[base + 6];
            let key = (carbon, distance, i);

            let slot = if capacity_fraction > 0.0 { &mut best } else { &mut best_infeasible };
            let better = match slot {
                Some((c, d, j)) => {
                    key.0.total_cmp(c).then(key.1.total_cmp(d)).then(i.cmp(j)).is_lt()
                }
                None => true,
            };
            if better {
                *slot = Some(key);
            }
        }

        // With every site full the choice no longer matters; the environment
        // records the rejection.
        best.or(best_infeasible).map(|(_, _, i)| i).unwrap_or(0)
    }

    fn name(&self) -> &str {
        "greedy_carbon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ObservationLayout {
        ObservationLayout { n_datacenters: 3, forecast_horizon: 0, reward_window: 0 }
    }

    fn obs_with(dcs: &[(f64, f64, f64)]) -> Vec<f64> {
        // (carbon, capacity_fraction, distance) per datacenter
        let l = layout();
        let mut obs = vec![0.0; l.dim()];
        for (i, (carbon, cap, dist)) in dcs.iter().enumerate() {
            let base = l.dc_offset(i);
            obs[base] = *carbon;
            obs[base + 5] = *cap;
            obs[base + 6] = *dist;
        }
        obs
    }

    #[test]
    fn picks_lowest_carbon_feasible() {
        let mut policy = GreedyCarbonPolicy::new(layout());
        let obs = obs_with(&[(0.5, 1.0, 0.1), (0.1, 1.0, 0.3), (0.3, 1.0, 0.2)]);
        assert_eq!(policy.select_action(&obs), 1);
    }

    #[test]
    fn skips_full_datacenters() {
        let mut policy = GreedyCarbonPolicy::new(layout());
        let obs = obs_with(&[(0.5, 1.0, 0.1), (0.1, 0.0, 0.3), (0.3, 1.0, 0.2)]);
        assert_eq!(policy.select_action(&obs), 2);
    }

    #[test]
    fn breaks_carbon_ties_by_distance() {
        let mut policy = GreedyCarbonPolicy::new(layout());
        let obs = obs_with(&[(0.2, 1.0, 0.4), (0.2, 1.0, 0.1), (0.9, 1.0, 0.0)]);
        assert_eq!(policy.select_action(&obs), 1);
    }

    #[test]
    fn all_full_still_returns_valid_action() {
        let mut policy = GreedyCarbonPolicy::new(layout());
        let obs = obs_with(&[(0.5, 0.0, 0.1), (0.1, 0.0, 0.3), (0.3, 0.0, 0.2)]);
        let a = policy.select_action(&obs);
        assert!(a < 3);
    }
}
