//! The placement MDP.
//!
//! Wraps the external simulator, workload, and carbon table into the
//! reset/step/evaluate interface the trainer drives.

pub mod config;
pub mod datacenter;
pub mod environment;
pub mod observation;
pub mod reward;

pub use config::EnvConfig;
pub use datacenter::DatacenterState;
pub use environment::{
    EnvError, EpisodeStats, EvaluationOutcome, Phase, PlacementEnv, StepInfo, StepResult,
};
pub use observation::{ObservationBuilder, ObservationLayout};
pub use reward::{RewardComputer, RewardVector};
