//! Training infrastructure for the multi-objective placement learner.
//!
//! The trajectory buffer and GAE math are plain records and always built;
//! the neural learner and the two-stage Pareto trainer require `tch` and are
//! gated behind the `rl-nn` feature.

pub mod trajectory;

#[cfg(feature = "rl-nn")]
pub mod learner;
#[cfg(feature = "rl-nn")]
pub mod network;
#[cfg(feature = "rl-nn")]
pub mod trainer;

pub use trajectory::{compute_gae, normalize_in_place, Trajectory, TrajectoryStep};

#[cfg(feature = "rl-nn")]
pub use learner::{LearnerConfig, LearnerError, MultiObjectiveLearner, UpdateStats};
#[cfg(feature = "rl-nn")]
pub use network::{PolicyNetwork, ValueHead};
#[cfg(feature = "rl-nn")]
pub use trainer::{
    CancelToken, ParetoTrainer, PolicyMetadata, TrainerConfig, TrainerError, TrainingSummary,
};
