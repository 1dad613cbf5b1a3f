//! Neural networks for the placement policy and value heads (tch-rs).
//!
//! Only available with the `rl-nn` feature.

use tch::{nn, nn::Module, Device, Kind, TchError, Tensor};

/// Floor for log-probabilities, keeping `exp`/ratio arithmetic away from
/// `-inf` after the stabilized softmax.
const LOG_PROB_FLOOR: f64 = -20.0;

/// MLP policy network mapping observations to action logits.
///
/// Architecture: `obs_dim → 128 → 64 → action_dim` with ReLU activations.
pub struct PolicyNetwork {
    vs: nn::VarStore,
    net: nn::Sequential,
    obs_dim: usize,
    action_dim: usize,
}

impl PolicyNetwork {
    /// Creates a new policy network.
    pub fn new(obs_dim: usize, action_dim: usize, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let net = nn::seq()
            .add(nn::linear(p / "l1", obs_dim as i64, 128, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "l2", 128, 64, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "l3", 64, action_dim as i64, Default::default()));

        Self { vs, net, obs_dim, action_dim }
    }

    /// Forward pass: stabilized log-probabilities over actions.
    ///
    /// Subtracts the max logit before the softmax and clamps the result away
    /// from `-inf` so downstream ratios stay finite.
    pub fn log_probs(&self, obs: &Tensor) -> Tensor {
        let logits = self.net.forward(obs);
        let (max_logits, _) = logits.max_dim(-1, true);
        let stabilized = &logits - &max_logits;
        stabilized.log_softmax(-1, Kind::Float).clamp_min(LOG_PROB_FLOOR)
    }

    /// Samples actions from the policy distribution.
    pub fn sample_actions(&self, obs: &Tensor) -> (Tensor, Tensor) {
        let log_probs = self.log_probs(obs);
        let probs = log_probs.exp();
        let actions = probs.multinomial(1, true).squeeze_dim(-1);
        let selected = log_probs
            .gather(-1, &actions.unsqueeze(-1), false)
            .squeeze_dim(-1);
        (actions, selected)
    }

    /// Deterministic mode: highest-logit action per row.
    pub fn argmax_actions(&self, obs: &Tensor) -> Tensor {
        self.log_probs(obs).argmax(-1, false)
    }

    /// Log-probabilities of the given actions.
    pub fn log_prob(&self, obs: &Tensor, actions: &Tensor) -> Tensor {
        self.log_probs(obs)
            .gather(-1, &actions.unsqueeze(-1), false)
            .squeeze_dim(-1)
    }

    /// Entropy of the policy distribution per row.
    pub fn entropy(&self, obs: &Tensor) -> Tensor {
        let log_probs = self.log_probs(obs);
        let probs = log_probs.exp();
        -(probs * log_probs).sum_dim_intlist([-1].as_slice(), false, Kind::Float)
    }

    /// Mean `KL(self ‖ base)` over the batch.
    ///
    /// The base distribution is detached; gradients flow only through this
    /// network, which is what the Stage-2 drift penalty needs.
    pub fn kl_divergence(&self, base: &PolicyNetwork, obs: &Tensor) -> Tensor {
        let log_p = self.log_probs(obs);
        let log_q = base.log_probs(obs).detach();
        let p = log_p.exp();
        (p * (&log_p - &log_q))
            .sum_dim_intlist([-1].as_slice(), false, Kind::Float)
            .mean(Kind::Float)
    }

    /// Copies all parameters from another network of the same shape.
    pub fn copy_from(&mut self, other: &PolicyNetwork) -> Result<(), TchError> {
        self.vs.copy(&other.vs)
    }

    /// Observation dimension the network was built for.
    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    /// Number of actions.
    pub fn action_dim(&self) -> usize {
        self.action_dim
    }

    /// Variable store, for optimizers, checkpointing, and gradient clipping.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

/// MLP value head for a single objective.
///
/// Architecture: `obs_dim → 128 → 64 → 1`. The three heads of a learner are
/// fully parameter-independent.
pub struct ValueHead {
    vs: nn::VarStore,
    net: nn::Sequential,
}

impl ValueHead {
    /// Creates a new value head.
    pub fn new(obs_dim: usize, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = &vs.root();
        let net = nn::seq()
            .add(nn::linear(p / "l1", obs_dim as i64, 128, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "l2", 128, 64, Default::default()))
            .add_fn(|x| x.relu())
            .add(nn::linear(p / "l3", 64, 1, Default::default()));

        Self { vs, net }
    }

    /// Forward pass: one value estimate per row.
    pub fn forward(&self, obs: &Tensor) -> Tensor {
        self.net.forward(obs).squeeze_dim(-1)
    }

    /// Copies all parameters from another head of the same shape.
    pub fn copy_from(&mut self, other: &ValueHead) -> Result<(), TchError> {
        self.vs.copy(&other.vs)
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_log_probs_shape_and_normalization() {
        let net = PolicyNetwork::new(30, 5, Device::Cpu);
        let obs = Tensor::randn([4, 30], (Kind::Float, Device::Cpu));
        let log_probs = net.log_probs(&obs);
        assert_eq!(log_probs.size(), &[4, 5]);
        let sums = log_probs.exp().sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        let sums: Vec<f64> = sums.try_into().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-4, "probabilities sum to {}", s);
        }
    }

    #[test]
    fn argmax_is_deterministic() {
        let net = PolicyNetwork::new(12, 3, Device::Cpu);
        let obs = Tensor::randn([6, 12], (Kind::Float, Device::Cpu));
        let a: Vec<i64> = net.argmax_actions(&obs).try_into().unwrap();
        let b: Vec<i64> = net.argmax_actions(&obs).try_into().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn value_head_shape() {
        let head = ValueHead::new(30, Device::Cpu);
        let obs = Tensor::randn([4, 30], (Kind::Float, Device::Cpu));
        assert_eq!(head.forward(&obs).size(), &[4]);
    }

    #[test]
    fn copy_from_matches_outputs() {
        let src = PolicyNetwork::new(10, 4, Device::Cpu);
        let mut dst = PolicyNetwork::new(10, 4, Device::Cpu);
        dst.copy_from(&src).unwrap();
        let obs = Tensor::randn([3, 10], (Kind::Float, Device::Cpu));
        let a: Vec<f64> = src.log_probs(&obs).reshape([-1]).try_into().unwrap();
        let b: Vec<f64> = dst.log_probs(&obs).reshape([-1]).try_into().unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn kl_to_identical_network_is_zero() {
        let src = PolicyNetwork::new(10, 4, Device::Cpu);
        let mut dst = PolicyNetwork::new(10, 4, Device::Cpu);
        dst.copy_from(&src).unwrap();
        let obs = Tensor::randn([8, 10], (Kind::Float, Device::Cpu));
        let kl = dst.kl_divergence(&src, &obs).double_value(&[]);
        assert!(kl.abs() < 1e-6, "kl {}", kl);
    }
}
