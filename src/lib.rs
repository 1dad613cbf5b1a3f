//! viridian — carbon-aware multi-objective VM placement via reinforcement
//! learning.
//!
//! Places a stream of VM requests across geographically distributed
//! datacenters while jointly minimizing energy consumption, carbon
//! emissions, and user latency, and maintains a Pareto front of placement
//! policies over those three objectives.
//!
//! # Architecture
//!
//! - **Environment** ([`env::PlacementEnv`]): the placement MDP. Each step
//!   routes one VM request through the external simulator, enforces
//!   per-datacenter capacity with a deterministic fallback, and yields a
//!   three-component reward.
//! - **Pareto front** ([`pareto::ParetoFront`]): non-dominated set of
//!   evaluated policies with crowding-distance, hypervolume, and
//!   expected-utility operations.
//! - **Learner** (`training::MultiObjectiveLearner`): PPO policy with
//!   three independent value heads, scalarizing per-objective advantages
//!   under a fixed preference vector.
//! - **Trainer** (`training::ParetoTrainer`): two-stage front
//!   construction — diversified initialization, then targeted extension of
//!   sparse regions under drift-constrained clones.
//!
//! # Feature flags
//!
//! - `rl-nn`: enables the neural learner and trainer via `tch-rs`. Without
//!   it, the environment, Pareto front, baselines, and trajectory math are
//!   still available.
//! - `cli`: builds the `viridian-train` binary (implies `rl-nn`).
//!
//! # Quick start
//!
//! ```ignore
//! use viridian::carbon::CarbonTable;
//! use viridian::env::{EnvConfig, PlacementEnv};
//! use viridian::policy::GreedyCarbonPolicy;
//! use viridian::simulator::EnergyModelSimulator;
//! use viridian::types::DatacenterSpec;
//! use viridian::workload::PoissonWorkload;
//!
//! let fleet = DatacenterSpec::reference_fleet();
//! let table = CarbonTable::synthetic(&["DE", "NO", "ES", "FR", "NL"], 24, 42);
//! let workload = PoissonWorkload::new(10.0, user_centers, 42);
//! let mut env = PlacementEnv::new(
//!     EnvConfig::default(), fleet, table,
//!     Box::new(EnergyModelSimulator::new()), Box::new(workload), 42,
//! )?;
//! let mut baseline = GreedyCarbonPolicy::new(env.layout());
//! let outcome = env.evaluate(&mut baseline)?;
//! println!("objectives: {:?}", outcome.objectives);
//! ```

pub mod carbon;
pub mod env;
pub mod pareto;
pub mod policy;
pub mod preference;
pub mod simulator;
pub mod training;
pub mod types;
pub mod workload;

// Public re-exports
pub use carbon::CarbonTable;
pub use env::{EnvConfig, PlacementEnv, StepResult};
pub use pareto::{ParetoEntry, ParetoFront, Stage};
pub use policy::{GreedyCarbonPolicy, Policy, RandomPolicy};
pub use preference::Preference;
pub use simulator::{EnergyModelSimulator, Simulator};
pub use types::{DatacenterSpec, GeoLocation, Objective, PlacementRequest, VmTier};
pub use workload::{PoissonWorkload, Workload};

#[cfg(feature = "rl-nn")]
pub use training::{MultiObjectiveLearner, ParetoTrainer, TrainerConfig};
