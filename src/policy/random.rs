//! Random policy for testing and baselines.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::trait_::Policy;

/// Uniformly random datacenter selection.
///
/// Used for sanity checks and as a lower-bound baseline.
pub struct RandomPolicy {
    action_dim: usize,
    rng: StdRng,
}

impl RandomPolicy {
    /// Creates a random policy with an entropy-seeded stream.
    pub fn new(action_dim: usize) -> Self {
        Self { action_dim, rng: StdRng::from_entropy() }
    }

    /// Creates a reproducible random policy.
    pub fn seeded(action_dim: usize, seed: u64) -> Self {
        Self { action_dim, rng: StdRng::seed_from_u64(seed) }
    }
}

impl Policy for RandomPolicy {
    fn select_action(&mut self, _observation: &[f64]) -> usize {
        self.rng.gen_range(0..self.action_dim)
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_stay_in_range() {
        let mut policy = RandomPolicy::seeded(5, 1);
        for _ in 0..100 {
            assert!(policy.select_action(&[]) < 5);
        }
    }

    #[test]
    fn seeded_policy_is_reproducible() {
        let mut a = RandomPolicy::seeded(5, 9);
        let mut b = RandomPolicy::seeded(5, 9);
        for _ in 0..50 {
            assert_eq!(a.select_action(&[]), b.select_action(&[]));
        }
    }
}
