//! Two-stage Pareto-front construction.
//!
//! Stage 1 trains `M` policies under spread-out preference vectors and
//! offers each evaluation to the front. Stage 2 picks the `N` sparsest
//! front entries and, per entry and objective, trains a drift-constrained
//! clone under a concentrated preference. All training is strictly
//! sequential; the single simulator connection is never contended.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::Device;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::learner::{LearnerConfig, LearnerError, MultiObjectiveLearner};
use super::trajectory::{Trajectory, TrajectoryStep};
use crate::env::{EnvError, PlacementEnv};
use crate::pareto::{ParetoEntry, ParetoError, ParetoFront, Stage};
use crate::preference::Preference;
use crate::types::Objective;

/// Errors terminating a training run.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("training cancelled")]
    Cancelled,

    #[error("episode failed {0} times in a row")]
    EpisodeRetriesExhausted(u32),

    #[error("{0} consecutive non-finite update batches")]
    UnstableTraining(u32),

    #[error("checkpoint write failed at {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Learner(#[from] LearnerError),

    #[error(transparent)]
    Pareto(#[from] ParetoError),
}

/// Cooperative cancellation flag, honored at rollout boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; the trainer stops at the next rollout boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts and budgets for the two-stage run.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Stage-1 policy count M.
    pub stage1_policies: usize,
    /// Timesteps per Stage-1 policy T₁.
    pub stage1_timesteps: u64,
    /// Stage-2 seed count N.
    pub stage2_seeds: usize,
    /// Timesteps per Stage-2 extension T₂.
    pub stage2_timesteps: u64,
    /// Environment steps per rollout window.
    pub rollout_len: usize,
    /// Drift constraint γ_d for Stage-2 clones.
    pub drift_coef: f64,
    /// Weight concentrated on the target objective in Stage 2.
    pub extension_weight: f64,
    /// Simplex samples for the expected-utility report.
    pub utility_samples: usize,
    /// Run seed; fans out to preferences, networks, and shuffles.
    pub seed: u64,
    /// Run output directory.
    pub output_dir: PathBuf,
    /// Episode retries before a simulator failure becomes fatal.
    pub max_episode_retries: u32,
    /// Consecutive non-finite batches before training aborts.
    pub max_nan_batches: u32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            stage1_policies: 5,
            stage1_timesteps: 20_000,
            stage2_seeds: 2,
            stage2_timesteps: 10_000,
            rollout_len: 256,
            drift_coef: 1.0,
            extension_weight: 0.7,
            utility_samples: 1_000,
            seed: 42,
            output_dir: PathBuf::from("runs/viridian"),
            max_episode_retries: 3,
            max_nan_batches: 5,
        }
    }
}

/// Authoritative per-policy record written next to the parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub stage: Stage,
    pub preference: [f64; 3],
    pub objectives: [f64; 3],
    pub policy_ref: String,
}

/// Report written to `final_results.json` and returned from `run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub hypervolume: f64,
    pub expected_utility: f64,
    pub hypervolume_reference: [f64; 3],
    pub front_size: usize,
    pub stage1_inserted: usize,
    pub stage2_inserted: usize,
    pub failed_episodes: u64,
    pub nan_batches: u64,
    pub runtime_seconds: f64,
}

/// Drives the two-stage construction over one environment.
pub struct ParetoTrainer {
    env: PlacementEnv,
    front: ParetoFront,
    cfg: TrainerConfig,
    learner_cfg: LearnerConfig,
    cancel: CancelToken,
    device: Device,
    all_objectives: Vec<[f64; 3]>,
    failed_episodes: u64,
    nan_batches: u64,
    stage1_inserted: usize,
    stage2_inserted: usize,
}

impl ParetoTrainer {
    /// Creates a trainer over a constructed environment.
    pub fn new(env: PlacementEnv, cfg: TrainerConfig, learner_cfg: LearnerConfig) -> Self {
        Self {
            env,
            front: ParetoFront::new(),
            cfg,
            learner_cfg,
            cancel: CancelToken::new(),
            device: Device::Cpu,
            all_objectives: Vec::new(),
            failed_episodes: 0,
            nan_batches: 0,
            stage1_inserted: 0,
            stage2_inserted: 0,
        }
    }

    /// Token the caller can use to request cancellation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The front built so far.
    pub fn front(&self) -> &ParetoFront {
        &self.front
    }

    /// Runs Stage 1 and Stage 2 to completion and writes the final report.
    pub fn run(&mut self) -> Result<TrainingSummary, TrainerError> {
        let started = Instant::now();
        tch::manual_seed(self.cfg.seed as i64);
        self.create_dir(&self.cfg.output_dir.clone())?;

        // Stage 1: diversified initialization
        let preferences = Preference::spread(self.cfg.stage1_policies, self.cfg.seed);
        for (i, preference) in preferences.iter().enumerate() {
            self.check_cancelled()?;
            info!(policy = i, weights = ?preference.weights(), "stage 1 policy");
            let mut learner = MultiObjectiveLearner::new(
                self.env.observation_dim(),
                self.env.n_datacenters(),
                self.learner_cfg.clone(),
                self.cfg.seed.wrapping_add(i as u64),
                self.device,
            )?;
            self.train_policy(&mut learner, preference, self.cfg.stage1_timesteps)?;
            let objectives = self.evaluate(&mut learner)?;
            let policy_ref = format!("stage1/policy_{i}");
            self.checkpoint(&learner, &policy_ref, Stage::Initialization, preference, objectives)?;
            if self.offer(objectives, Stage::Initialization, preference, policy_ref)? {
                self.stage1_inserted += 1;
            }
        }

        // Stage 2: targeted extension of sparse regions
        let seeds: Vec<ParetoEntry> = self
            .front
            .select_sparse(self.cfg.stage2_seeds)
            .into_iter()
            .cloned()
            .collect();
        for (s, seed_entry) in seeds.iter().enumerate() {
            for objective in Objective::all() {
                self.check_cancelled()?;
                info!(seed = s, %objective, base = %seed_entry.policy_ref, "stage 2 extension");
                let preference =
                    Preference::concentrated(objective, self.cfg.extension_weight);

                let mut base = MultiObjectiveLearner::new(
                    self.env.observation_dim(),
                    self.env.n_datacenters(),
                    self.learner_cfg.clone(),
                    self.cfg.seed,
                    self.device,
                )?;
                base.load(&self.cfg.output_dir.join(&seed_entry.policy_ref))?;
                let clone_seed = self
                    .cfg
                    .seed
                    .wrapping_add(1000 + (s * Objective::COUNT + objective.index()) as u64);
                let mut learner =
                    MultiObjectiveLearner::clone_from(&base, self.cfg.drift_coef, clone_seed)?;

                self.train_policy(&mut learner, &preference, self.cfg.stage2_timesteps)?;
                let objectives = self.evaluate(&mut learner)?;
                let policy_ref = format!("stage2/policy_{s}_{objective}");
                self.checkpoint(&learner, &policy_ref, Stage::Extension, &preference, objectives)?;
                if self.offer(objectives, Stage::Extension, &preference, policy_ref)? {
                    self.stage2_inserted += 1;
                }
            }
        }

        let summary = self.finalize(started)?;
        info!(
            front_size = summary.front_size,
            hypervolume = summary.hypervolume,
            "training complete"
        );
        Ok(summary)
    }

    fn finalize(&mut self, started: Instant) -> Result<TrainingSummary, TrainerError> {
        let reference = self.hypervolume_reference();
        let mut rng = StdRng::seed_from_u64(self.cfg.seed);
        let summary = TrainingSummary {
            hypervolume: self.front.hypervolume(reference),
            expected_utility: self.front.expected_utility(self.cfg.utility_samples, &mut rng),
            hypervolume_reference: reference,
            front_size: self.front.len(),
            stage1_inserted: self.stage1_inserted,
            stage2_inserted: self.stage2_inserted,
            failed_episodes: self.failed_episodes,
            nan_batches: self.nan_batches,
            runtime_seconds: started.elapsed().as_secs_f64(),
        };
        let path = self.cfg.output_dir.join("final_results.json");
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|e| TrainerError::Checkpoint { path: path.clone(), source: e.into() })?;
        self.write_with_retry(&path, json.as_bytes())?;
        Ok(summary)
    }

    /// Elementwise worst of every recorded evaluation, padded by 10 %.
    fn hypervolume_reference(&self) -> [f64; 3] {
        let mut reference = [1.0; 3];
        for objectives in &self.all_objectives {
            for i in 0..3 {
                reference[i] = reference[i].max(objectives[i]);
            }
        }
        for r in &mut reference {
            *r *= 1.1;
        }
        reference
    }

    fn check_cancelled(&mut self) -> Result<(), TrainerError> {
        if self.cancel.is_cancelled() {
            warn!("cancellation requested; stopping at rollout boundary");
            self.write_front_manifest()?;
            return Err(TrainerError::Cancelled);
        }
        Ok(())
    }

    fn train_policy(
        &mut self,
        learner: &mut MultiObjectiveLearner,
        preference: &Preference,
        timesteps: u64,
    ) -> Result<(), TrainerError> {
        let mut collected = 0u64;
        let mut observation: Vec<f64> = Vec::new();
        let mut needs_reset = true;
        let mut consecutive_nan = 0u32;

        while collected < timesteps {
            self.check_cancelled()?;
            let trajectory =
                self.collect_rollout(learner, &mut observation, &mut needs_reset)?;
            collected += trajectory.len() as u64;

            match learner.update(&trajectory, preference) {
                Ok(stats) => {
                    consecutive_nan = 0;
                    debug!(
                        collected,
                        policy_loss = stats.policy_loss,
                        value_loss = stats.value_loss,
                        "update"
                    );
                }
                Err(LearnerError::NonFiniteLoss { component }) => {
                    consecutive_nan += 1;
                    self.nan_batches += 1;
                    warn!(component, consecutive = consecutive_nan, "skipping non-finite batch");
                    if consecutive_nan >= self.cfg.max_nan_batches {
                        self.write_front_manifest()?;
                        return Err(TrainerError::UnstableTraining(consecutive_nan));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Collects one rollout window, retrying the episode on simulator
    /// failures up to the configured bound. A failed attempt discards its
    /// partial trajectory.
    fn collect_rollout(
        &mut self,
        learner: &MultiObjectiveLearner,
        observation: &mut Vec<f64>,
        needs_reset: &mut bool,
    ) -> Result<Trajectory, TrainerError> {
        let mut attempts = 0u32;
        loop {
            match self.try_collect(learner, observation, needs_reset) {
                Ok(trajectory) => return Ok(trajectory),
                Err(e @ EnvError::InvalidAction { .. }) => return Err(e.into()),
                Err(e) => {
                    attempts += 1;
                    self.failed_episodes += 1;
                    *needs_reset = true;
                    warn!(attempt = attempts, error = %e, "episode failed; retrying");
                    if attempts > self.cfg.max_episode_retries {
                        self.write_front_manifest()?;
                        return Err(TrainerError::EpisodeRetriesExhausted(attempts));
                    }
                }
            }
        }
    }

    fn try_collect(
        &mut self,
        learner: &MultiObjectiveLearner,
        observation: &mut Vec<f64>,
        needs_reset: &mut bool,
    ) -> Result<Trajectory, EnvError> {
        let mut trajectory = Trajectory::new();
        if *needs_reset {
            *observation = self.env.reset()?;
            *needs_reset = false;
        }
        for _ in 0..self.cfg.rollout_len {
            let (action, log_prob) = learner.act(observation);
            let values = learner.values(observation);
            let result = self.env.step(action)?;
            trajectory.push(TrajectoryStep {
                observation: std::mem::replace(observation, result.observation),
                action,
                log_prob,
                rewards: result.reward.as_array(),
                values,
                done: result.done,
            });
            if result.done {
                *observation = self.env.reset()?;
            }
        }
        Ok(trajectory)
    }

    fn evaluate(
        &mut self,
        learner: &mut MultiObjectiveLearner,
    ) -> Result<[f64; 3], TrainerError> {
        learner.set_greedy(true);
        let outcome = self.env.evaluate(learner);
        learner.set_greedy(false);
        let outcome = outcome?;
        self.all_objectives.push(outcome.objectives);
        debug!(objectives = ?outcome.objectives, success_rate = outcome.stats.success_rate(), "evaluation");
        Ok(outcome.objectives)
    }

    /// Offers an evaluated policy to the front and rewrites the manifest.
    /// Non-finite objectives are rejected with a warning, not a failure.
    fn offer(
        &mut self,
        objectives: [f64; 3],
        stage: Stage,
        preference: &Preference,
        policy_ref: String,
    ) -> Result<bool, TrainerError> {
        let entry = ParetoEntry {
            objectives,
            stage,
            preference: preference.weights(),
            policy_ref,
        };
        let inserted = match self.front.insert(entry) {
            Ok(inserted) => {
                if inserted {
                    info!(?objectives, "front accepted entry");
                } else {
                    debug!(?objectives, "entry dominated; not inserted");
                }
                inserted
            }
            Err(ParetoError::NonFiniteObjectives(o)) => {
                warn!(objectives = ?o, "rejected non-finite objective vector");
                false
            }
            Err(e) => return Err(e.into()),
        };
        self.write_front_manifest()?;
        Ok(inserted)
    }

    fn checkpoint(
        &mut self,
        learner: &MultiObjectiveLearner,
        policy_ref: &str,
        stage: Stage,
        preference: &Preference,
        objectives: [f64; 3],
    ) -> Result<(), TrainerError> {
        let dir = self.cfg.output_dir.join(policy_ref);
        match self.checkpoint_once(learner, &dir, policy_ref, stage, preference, objectives) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "checkpoint write failed; retrying once");
                self.checkpoint_once(learner, &dir, policy_ref, stage, preference, objectives)
            }
        }
    }

    fn checkpoint_once(
        &self,
        learner: &MultiObjectiveLearner,
        dir: &Path,
        policy_ref: &str,
        stage: Stage,
        preference: &Preference,
        objectives: [f64; 3],
    ) -> Result<(), TrainerError> {
        fs::create_dir_all(dir).map_err(|e| TrainerError::Checkpoint {
            path: dir.to_path_buf(),
            source: e,
        })?;
        learner.save(dir)?;
        let metadata = PolicyMetadata {
            stage,
            preference: preference.weights(),
            objectives,
            policy_ref: policy_ref.to_string(),
        };
        let path = dir.join("metadata.json");
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| TrainerError::Checkpoint { path: path.clone(), source: e.into() })?;
        fs::write(&path, json)
            .map_err(|e| TrainerError::Checkpoint { path, source: e })?;
        info!(dir = %dir.display(), "checkpoint written");
        Ok(())
    }

    fn write_front_manifest(&self) -> Result<(), TrainerError> {
        let json = self.front.to_json()?;
        let path = self.cfg.output_dir.join("pareto_front.json");
        self.write_with_retry(&path, json.as_bytes())
    }

    fn write_with_retry(&self, path: &Path, bytes: &[u8]) -> Result<(), TrainerError> {
        if let Err(first) = fs::write(path, bytes) {
            warn!(path = %path.display(), error = %first, "write failed; retrying once");
            fs::write(path, bytes).map_err(|e| TrainerError::Checkpoint {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn create_dir(&self, dir: &Path) -> Result<(), TrainerError> {
        fs::create_dir_all(dir).map_err(|e| TrainerError::Checkpoint {
            path: dir.to_path_buf(),
            source: e,
        })
    }
}
