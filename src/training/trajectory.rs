//! Rollout storage with per-objective rewards and value estimates.

use crate::types::Objective;

/// One environment transition as seen by the learner.
#[derive(Debug, Clone)]
pub struct TrajectoryStep {
    /// Observation the action was taken from.
    pub observation: Vec<f64>,
    /// Chosen datacenter index.
    pub action: usize,
    /// Log-probability of the action under the behavior policy.
    pub log_prob: f64,
    /// Per-objective rewards `(energy, carbon, latency)`.
    pub rewards: [f64; 3],
    /// Per-objective value estimates at the observation.
    pub values: [f64; 3],
    /// Whether the episode ended on this step.
    pub done: bool,
}

/// An ordered rollout window, produced by one collection phase and consumed
/// by exactly one update.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    /// Creates an empty trajectory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition.
    pub fn push(&mut self, step: TrajectoryStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Discards all stored transitions.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Reward column for one objective.
    pub fn rewards_for(&self, objective: Objective) -> Vec<f64> {
        let j = objective.index();
        self.steps.iter().map(|s| s.rewards[j]).collect()
    }

    /// Value column for one objective.
    pub fn values_for(&self, objective: Objective) -> Vec<f64> {
        let j = objective.index();
        self.steps.iter().map(|s| s.values[j]).collect()
    }

    /// Terminal flags.
    pub fn dones(&self) -> Vec<bool> {
        self.steps.iter().map(|s| s.done).collect()
    }

    /// Per-objective GAE advantages and returns.
    ///
    /// Advantages are normalized to zero mean and unit variance per
    /// objective before scalarization, as the update rule requires.
    pub fn advantages_and_returns(
        &self,
        gamma: f64,
        gae_lambda: f64,
    ) -> ([Vec<f64>; 3], [Vec<f64>; 3]) {
        let dones = self.dones();
        let mut advantages: [Vec<f64>; 3] = Default::default();
        let mut returns: [Vec<f64>; 3] = Default::default();
        for objective in Objective::all() {
            let j = objective.index();
            let (mut adv, ret) = compute_gae(
                &self.rewards_for(objective),
                &self.values_for(objective),
                &dones,
                gamma,
                gae_lambda,
            );
            normalize_in_place(&mut adv);
            advantages[j] = adv;
            returns[j] = ret;
        }
        (advantages, returns)
    }
}

/// Computes GAE-λ advantages and discounted returns, right-to-left.
///
/// # Returns
///
/// `(advantages, returns)` where `returns = advantages + values`.
pub fn compute_gae(
    rewards: &[f64],
    values: &[f64],
    dones: &[bool],
    gamma: f64,
    gae_lambda: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = rewards.len();
    assert_eq!(values.len(), n);
    assert_eq!(dones.len(), n);

    let mut advantages = vec![0.0; n];
    let mut gae = 0.0;

    for t in (0..n).rev() {
        let next_value = if t + 1 < n { values[t + 1] } else { 0.0 };
        let next_non_terminal = if dones[t] { 0.0 } else { 1.0 };

        let delta = rewards[t] + gamma * next_value * next_non_terminal - values[t];
        gae = delta + gamma * gae_lambda * next_non_terminal * gae;
        advantages[t] = gae;
    }

    let returns: Vec<f64> = advantages
        .iter()
        .zip(values.iter())
        .map(|(a, v)| a + v)
        .collect();

    (advantages, returns)
}

/// Normalizes a slice to zero mean and unit variance.
pub fn normalize_in_place(xs: &mut [f64]) {
    if xs.is_empty() {
        return;
    }
    let mean: f64 = xs.iter().sum::<f64>() / xs.len() as f64;
    let var: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
    let std = (var + 1e-8).sqrt();
    for x in xs.iter_mut() {
        *x = (*x - mean) / std;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(rewards: [f64; 3], values: [f64; 3], done: bool) -> TrajectoryStep {
        TrajectoryStep {
            observation: vec![0.0; 4],
            action: 0,
            log_prob: -0.5,
            rewards,
            values,
            done,
        }
    }

    #[test]
    fn gae_basic() {
        let rewards = vec![1.0, 1.0, 1.0];
        let values = vec![0.5, 0.5, 0.5];
        let dones = vec![false, false, true];
        let (advantages, returns) = compute_gae(&rewards, &values, &dones, 0.99, 0.95);

        assert_eq!(advantages.len(), 3);
        assert_eq!(returns.len(), 3);
        // last step (done): delta = 1.0 + 0 - 0.5 = 0.5
        assert!((advantages[2] - 0.5).abs() < 1e-10);
    }

    #[test]
    fn gae_with_lambda_zero_is_td_error() {
        let rewards = vec![1.0, 2.0];
        let values = vec![0.5, 1.0];
        let dones = vec![false, true];
        let (advantages, _) = compute_gae(&rewards, &values, &dones, 0.99, 0.0);

        // t=1: delta = 2.0 - 1.0 = 1.0
        assert!((advantages[1] - 1.0).abs() < 1e-10);
        // t=0: delta = 1.0 + 0.99*1.0 - 0.5 = 1.49
        assert!((advantages[0] - 1.49).abs() < 1e-10);
    }

    #[test]
    fn terminal_cuts_bootstrap() {
        let rewards = vec![0.0, 10.0];
        let values = vec![5.0, 0.0];
        let dones = vec![true, true];
        let (advantages, _) = compute_gae(&rewards, &values, &dones, 0.99, 0.95);
        // episode boundary at t=0 must not see t=1's value
        assert!((advantages[0] - (-5.0)).abs() < 1e-10);
    }

    #[test]
    fn normalize_zero_mean_unit_variance() {
        let mut xs = vec![1.0, 2.0, 3.0, 4.0];
        normalize_in_place(&mut xs);
        let mean: f64 = xs.iter().sum::<f64>() / xs.len() as f64;
        assert!(mean.abs() < 1e-9);
        let var: f64 = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / xs.len() as f64;
        assert!((var - 1.0).abs() < 1e-6);
    }

    #[test]
    fn per_objective_columns_are_independent() {
        let mut traj = Trajectory::new();
        traj.push(step([1.0, 0.0, -1.0], [0.1, 0.2, 0.3], false));
        traj.push(step([2.0, 0.0, -2.0], [0.1, 0.2, 0.3], true));
        assert_eq!(traj.rewards_for(Objective::Energy), vec![1.0, 2.0]);
        assert_eq!(traj.rewards_for(Objective::Carbon), vec![0.0, 0.0]);
        assert_eq!(traj.values_for(Objective::Latency), vec![0.3, 0.3]);
    }

    #[test]
    fn advantages_are_normalized_per_objective() {
        let mut traj = Trajectory::new();
        for i in 0..8 {
            traj.push(step(
                [i as f64, -(i as f64), 0.5],
                [0.0, 0.0, 0.0],
                i == 7,
            ));
        }
        let (advantages, returns) = traj.advantages_and_returns(0.99, 0.95);
        for j in 0..3 {
            assert_eq!(advantages[j].len(), 8);
            assert_eq!(returns[j].len(), 8);
            let mean: f64 = advantages[j].iter().sum::<f64>() / 8.0;
            assert!(mean.abs() < 1e-9);
        }
    }
}
