//! Workload generation: the stream of placement requests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{GeoLocation, PlacementRequest, VmTier};

/// Source of placement requests, consumed by the environment one per step.
pub trait Workload: Send {
    /// Reseeds the generator for a new episode.
    fn reset(&mut self, seed: u64);

    /// Produces the next request. Arrival times are non-decreasing.
    fn next_request(&mut self) -> PlacementRequest;
}

/// Seeded request generator with weighted tiers and jittered user centers.
///
/// Requests arrive at the expected rate of `lambda` per hour; the arrival
/// clock advances deterministically by `1/lambda`, matching the environment's
/// wallclock-free hourly model.
pub struct PoissonWorkload {
    /// Expected VM arrivals per hour.
    lambda: f64,
    /// Population centers users are drawn from.
    centers: Vec<GeoLocation>,
    /// Uniform jitter applied to each coordinate, in degrees.
    jitter_deg: f64,
    /// Relative draw weight per tier, in `VmTier::all()` order.
    tier_weights: [f64; VmTier::COUNT],
    rng: StdRng,
    clock_hours: f64,
}

impl PoissonWorkload {
    /// Creates a generator over the given user centers.
    pub fn new(lambda: f64, centers: Vec<GeoLocation>, seed: u64) -> Self {
        assert!(lambda > 0.0, "lambda must be positive");
        assert!(!centers.is_empty(), "at least one user center required");
        Self {
            lambda,
            centers,
            jitter_deg: 2.0,
            // small tiers dominate real request mixes
            tier_weights: [0.4, 0.3, 0.2, 0.1],
            rng: StdRng::seed_from_u64(seed),
            clock_hours: 0.0,
        }
    }

    /// Overrides the tier draw weights.
    pub fn with_tier_weights(mut self, weights: [f64; VmTier::COUNT]) -> Self {
        self.tier_weights = weights;
        self
    }

    fn draw_tier(&mut self) -> VmTier {
        let total: f64 = self.tier_weights.iter().sum();
        let mut u = self.rng.gen::<f64>() * total;
        for tier in VmTier::all() {
            let w = self.tier_weights[tier.index()];
            if u < w {
                return tier;
            }
            u -= w;
        }
        VmTier::XLarge
    }
}

impl Workload for PoissonWorkload {
    fn reset(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.clock_hours = 0.0;
    }

    fn next_request(&mut self) -> PlacementRequest {
        let tier = self.draw_tier();
        let center = self.centers[self.rng.gen_range(0..self.centers.len())];
        let user = GeoLocation::new(
            center.lat + (self.rng.gen::<f64>() - 0.5) * 2.0 * self.jitter_deg,
            center.lon + (self.rng.gen::<f64>() - 0.5) * 2.0 * self.jitter_deg,
        );
        let arrival_hour = self.clock_hours;
        self.clock_hours += 1.0 / self.lambda;
        PlacementRequest { tier, user, arrival_hour }
    }
}
