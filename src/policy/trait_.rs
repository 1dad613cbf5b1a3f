//! Policy trait for the placement environment.

/// Selects a target datacenter for the current request.
///
/// Actions are datacenter indices in `[0, D)`; the environment applies its
/// fallback rule when the chosen site has no remaining capacity.
pub trait Policy {
    /// Selects one action given the current observation.
    fn select_action(&mut self, observation: &[f64]) -> usize;

    /// Returns a human-readable name for this policy.
    fn name(&self) -> &str;
}
