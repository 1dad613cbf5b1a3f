//! Preference vectors on the 3-simplex.
//!
//! A preference weights the three objectives when scalarizing advantages.
//! Stage 1 trains one policy per spread-out preference; Stage 2 uses
//! concentrated preferences to push sparse front regions outward.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Objective;

/// Errors from preference construction.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PreferenceError {
    #[error("preference weights must be finite and non-negative, got {0:?}")]
    InvalidWeights([f64; 3]),

    #[error("preference weights must have positive sum, got {0:?}")]
    ZeroSum([f64; 3]),
}

/// A point on the 3-simplex: three non-negative weights summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preference([f64; 3]);

impl Preference {
    /// Creates a preference, normalizing the weights to sum to 1.
    pub fn new(weights: [f64; 3]) -> Result<Self, PreferenceError> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(PreferenceError::InvalidWeights(weights));
        }
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return Err(PreferenceError::ZeroSum(weights));
        }
        Ok(Self([weights[0] / sum, weights[1] / sum, weights[2] / sum]))
    }

    /// Equal weight on every objective.
    pub fn uniform() -> Self {
        Self([1.0 / 3.0; 3])
    }

    /// Returns the weights in objective order (energy, carbon, latency).
    pub fn weights(&self) -> [f64; 3] {
        self.0
    }

    /// Weight assigned to one objective.
    pub fn weight(&self, objective: Objective) -> f64 {
        self.0[objective.index()]
    }

    /// Scalarizes a per-objective vector into a single value.
    pub fn scalarize(&self, components: [f64; 3]) -> f64 {
        self.0[0] * components[0] + self.0[1] * components[1] + self.0[2] * components[2]
    }

    /// Draws one preference uniformly from the simplex.
    ///
    /// Uses the exponential-spacings construction: three independent
    /// `-ln(u)` draws normalized by their sum are Dirichlet(1,1,1).
    pub fn sample_uniform(rng: &mut impl Rng) -> Self {
        let mut draws = [0.0; 3];
        for d in &mut draws {
            // gen() is in [0, 1); flip to (0, 1] so the log is finite
            *d = -(1.0 - rng.gen::<f64>()).ln();
        }
        let sum: f64 = draws.iter().sum();
        Self([draws[0] / sum, draws[1] / sum, draws[2] / sum])
    }

    /// Generates `m` reproducible, well-spread preferences for Stage 1.
    ///
    /// The three vertex-leaning anchors come first so small `m` still spans
    /// the simplex; the remainder is seeded uniform sampling.
    pub fn spread(m: usize, seed: u64) -> Vec<Preference> {
        let anchors = [
            Self([0.6, 0.2, 0.2]),
            Self([0.2, 0.6, 0.2]),
            Self([0.2, 0.2, 0.6]),
        ];
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::with_capacity(m);
        for i in 0..m {
            if i < anchors.len() {
                out.push(anchors[i]);
            } else {
                out.push(Self::sample_uniform(&mut rng));
            }
        }
        out
    }

    /// A preference concentrating `weight` on one objective and splitting the
    /// remainder evenly over the other two. Used by Stage-2 extension.
    pub fn concentrated(objective: Objective, weight: f64) -> Self {
        let weight = weight.clamp(0.0, 1.0);
        let rest = (1.0 - weight) / 2.0;
        let mut w = [rest; 3];
        w[objective.index()] = weight;
        Self(w)
    }
}

impl Default for Preference {
    fn default() -> Self {
        Self::uniform()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_on_simplex(p: &Preference) {
        let w = p.weights();
        assert!(w.iter().all(|x| *x >= 0.0));
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn new_normalizes() {
        let p = Preference::new([2.0, 1.0, 1.0]).unwrap();
        assert!((p.weights()[0] - 0.5).abs() < 1e-12);
        assert_on_simplex(&p);
    }

    #[test]
    fn new_rejects_negative_and_nan() {
        assert!(Preference::new([-0.1, 0.6, 0.5]).is_err());
        assert!(Preference::new([f64::NAN, 0.5, 0.5]).is_err());
        assert!(Preference::new([0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn sample_stays_on_simplex() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_on_simplex(&Preference::sample_uniform(&mut rng));
        }
    }

    #[test]
    fn spread_is_reproducible() {
        let a = Preference::spread(8, 42);
        let b = Preference::spread(8, 42);
        assert_eq!(a, b);
        let c = Preference::spread(8, 43);
        assert_ne!(a, c);
    }

    #[test]
    fn spread_anchors_cover_vertices() {
        let prefs = Preference::spread(3, 0);
        for (i, obj) in Objective::all().iter().enumerate() {
            assert!(prefs[i].weight(*obj) > 0.5);
        }
    }

    #[test]
    fn concentrated_puts_weight_on_target() {
        let p = Preference::concentrated(Objective::Carbon, 0.7);
        assert!((p.weight(Objective::Carbon) - 0.7).abs() < 1e-12);
        assert!((p.weight(Objective::Energy) - 0.15).abs() < 1e-12);
        assert_on_simplex(&p);
    }

    #[test]
    fn scalarize_is_dot_product() {
        let p = Preference::new([0.5, 0.25, 0.25]).unwrap();
        let v = p.scalarize([1.0, 2.0, 4.0]);
        assert!((v - 2.0).abs() < 1e-12);
    }
}
