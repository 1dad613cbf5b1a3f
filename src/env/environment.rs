//! The placement environment.
//!
//! Implements the MDP loop: draw request → act → submit to simulator →
//! reward → capacity accounting → clock advance → next observation.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::{debug, warn};

use super::config::EnvConfig;
use super::datacenter::DatacenterState;
use super::observation::{ObservationBuilder, ObservationLayout};
use super::reward::{RewardComputer, RewardVector};
use crate::carbon::CarbonTable;
use crate::policy::Policy;
use crate::simulator::{SimulationResults, Simulator, SimulatorError};
use crate::types::{DatacenterSpec, GeoLocation, PlacementRequest};
use crate::workload::Workload;

/// Errors surfaced by the environment.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("action {action} out of range for {n_datacenters} datacenters")]
    InvalidAction { action: usize, n_datacenters: usize },

    #[error("environment not ready to step (phase {phase:?})")]
    NotReady { phase: Phase },

    #[error("carbon dataset exhausted at hour {hour}")]
    DatasetExhausted { hour: usize },

    #[error("datacenter region {0:?} missing from carbon table")]
    UnknownRegion(String),

    #[error(transparent)]
    Simulator(#[from] SimulatorError),
}

/// Environment lifecycle phase.
///
/// `Reset` moves any phase to `Ready`, the first step to `Running`, and the
/// terminal step to `Done`; stepping in `Uninitialized` or `Done` is an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Ready,
    Running,
    Done,
}

/// Per-step report alongside the reward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Datacenter the agent selected.
    pub chosen: usize,
    /// Datacenter that actually received the submission.
    pub placed: usize,
    /// Whether the capacity fallback redirected the placement.
    pub fallback: bool,
    /// Whether the simulator accepted the VM.
    pub accepted: bool,
    /// Marginal facility energy reported for the placement, kWh.
    pub energy_kwh: f64,
}

/// Result of a single environment step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Observation after the step.
    pub observation: Vec<f64>,
    /// Three-component reward for the step.
    pub reward: RewardVector,
    /// Whether the episode just ended.
    pub done: bool,
    /// Placement details.
    pub info: StepInfo,
}

/// Running totals for one episode, in physical units.
#[derive(Debug, Clone, Default)]
pub struct EpisodeStats {
    pub placements: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub fallbacks: u64,
    pub energy_kwh: f64,
    pub carbon_g: f64,
    pub latency_km_sum: f64,
    /// VMs received per datacenter, counting fallback redirects.
    pub per_datacenter_received: Vec<u64>,
}

impl EpisodeStats {
    fn new(n_datacenters: usize) -> Self {
        Self { per_datacenter_received: vec![0; n_datacenters], ..Self::default() }
    }

    /// The episode objective vector `(Σ kWh, Σ gCO2, mean km)`, minimization.
    pub fn objectives(&self) -> [f64; 3] {
        let steps = self.placements.max(1) as f64;
        [self.energy_kwh, self.carbon_g, self.latency_km_sum / steps]
    }

    /// Fraction of placements accepted.
    pub fn success_rate(&self) -> f64 {
        if self.placements == 0 {
            1.0
        } else {
            self.accepted as f64 / self.placements as f64
        }
    }
}

/// One deterministic evaluation episode.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    /// `(energy kWh, carbon g, mean latency km)` in physical units.
    pub objectives: [f64; 3],
    /// Full episode totals as accounted by the environment.
    pub stats: EpisodeStats,
    /// End-of-episode aggregates reported by the simulator.
    pub simulator: SimulationResults,
}

/// The placement MDP over a fixed set of datacenters.
pub struct PlacementEnv {
    cfg: EnvConfig,
    states: Vec<DatacenterState>,
    region_indices: Vec<usize>,
    table: CarbonTable,
    sim: Box<dyn Simulator>,
    workload: Box<dyn Workload>,
    layout: ObservationLayout,
    episode_seed: u64,
    phase: Phase,
    clock_hours: f64,
    hour_index: usize,
    current_request: Option<PlacementRequest>,
    recent_rewards: VecDeque<[f64; 3]>,
    stats: EpisodeStats,
}

impl PlacementEnv {
    /// Creates an environment over the given fleet, dataset, simulator, and
    /// workload. `seed` drives the per-episode workload streams.
    pub fn new(
        cfg: EnvConfig,
        specs: Vec<DatacenterSpec>,
        table: CarbonTable,
        sim: Box<dyn Simulator>,
        workload: Box<dyn Workload>,
        seed: u64,
    ) -> Result<Self, EnvError> {
        let region_indices = specs
            .iter()
            .map(|spec| {
                table
                    .regions
                    .iter()
                    .position(|r| *r == spec.region)
                    .ok_or_else(|| EnvError::UnknownRegion(spec.region.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let layout = ObservationLayout {
            n_datacenters: specs.len(),
            forecast_horizon: cfg.forecast_horizon,
            reward_window: cfg.reward_window,
        };
        let n = specs.len();
        Ok(Self {
            cfg,
            states: specs.into_iter().map(DatacenterState::new).collect(),
            region_indices,
            table,
            sim,
            workload,
            layout,
            episode_seed: seed,
            phase: Phase::Uninitialized,
            clock_hours: 0.0,
            hour_index: 0,
            current_request: None,
            recent_rewards: VecDeque::new(),
            stats: EpisodeStats::new(n),
        })
    }

    /// The published observation layout.
    pub fn layout(&self) -> ObservationLayout {
        self.layout
    }

    /// Observation dimensionality; the required network input width.
    pub fn observation_dim(&self) -> usize {
        self.layout.dim()
    }

    /// Number of datacenters D; the action space is `[0, D)`.
    pub fn n_datacenters(&self) -> usize {
        self.states.len()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Totals for the episode in progress (or just finished).
    pub fn stats(&self) -> &EpisodeStats {
        &self.stats
    }

    /// Per-datacenter runtime state, for inspection.
    pub fn datacenters(&self) -> &[DatacenterState] {
        &self.states
    }

    /// Starts a new episode and returns the initial observation.
    pub fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
        self.sim.initialize()?;
        for state in &self.states {
            self.sim
                .create_datacenter(state.spec.id, state.spec.capacity, state.spec.pue)?;
        }
        for state in &mut self.states {
            state.reset();
        }
        self.clock_hours = 0.0;
        self.hour_index = 0;
        self.refresh_datacenters()?;

        self.workload.reset(self.episode_seed);
        self.episode_seed = self.episode_seed.wrapping_add(1);

        self.stats = EpisodeStats::new(self.states.len());
        self.recent_rewards.clear();
        self.current_request = Some(self.workload.next_request());
        self.phase = Phase::Ready;
        Ok(self.observation())
    }

    /// Executes one placement step.
    pub fn step(&mut self, action: usize) -> Result<StepResult, EnvError> {
        if !matches!(self.phase, Phase::Ready | Phase::Running) {
            return Err(EnvError::NotReady { phase: self.phase });
        }
        let n = self.states.len();
        if action >= n {
            return Err(EnvError::InvalidAction { action, n_datacenters: n });
        }
        let Some(request) = self.current_request else {
            return Err(EnvError::NotReady { phase: self.phase });
        };

        // capacity enforcement: redirect if the chosen site is full
        let chosen = action;
        let target = if self.states[chosen].has_capacity() {
            chosen
        } else {
            self.fallback_target(&request.user).unwrap_or(chosen)
        };
        let fallback = target != chosen;
        if fallback {
            debug!(chosen, target, "capacity fallback redirect");
        }

        let outcome = match self.sim.submit_vm(&request, target) {
            Ok(outcome) => outcome,
            Err(e) => {
                // fatal to the episode; the trainer may reset and retry
                self.phase = Phase::Done;
                return Err(e.into());
            }
        };

        let reward =
            RewardComputer::compute(&outcome, &self.states[target], &request.user, &self.cfg);

        self.stats.placements += 1;
        self.stats.latency_km_sum +=
            request.user.geodesic_km(&self.states[target].spec.location);
        if fallback {
            self.stats.fallbacks += 1;
        }
        if outcome.accepted {
            let carbon_g = outcome.energy_kwh
                * self.states[target].carbon_intensity
                * self.states[target].spec.pue;
            self.states[target].record_placement(request.tier);
            self.stats.accepted += 1;
            self.stats.per_datacenter_received[target] += 1;
            self.stats.energy_kwh += outcome.energy_kwh;
            self.stats.carbon_g += carbon_g;
        } else {
            self.stats.rejected += 1;
            warn!(chosen, target, "placement rejected by simulator");
        }

        self.recent_rewards.push_back(reward.as_array());
        while self.recent_rewards.len() > self.cfg.reward_window {
            self.recent_rewards.pop_front();
        }

        // wallclock-free hourly model
        self.clock_hours += self.cfg.hour_step();
        let done = self.stats.placements >= self.cfg.total_placements();
        if done {
            self.phase = Phase::Done;
            self.sim.run_simulation()?;
        } else {
            let hour = self.clock_hours.floor() as usize;
            if hour > self.hour_index {
                self.hour_index = hour;
                if let Err(e) = self.refresh_datacenters() {
                    self.phase = Phase::Done;
                    return Err(e);
                }
            }
            self.current_request = Some(self.workload.next_request());
            self.phase = Phase::Running;
        }

        Ok(StepResult {
            observation: self.observation(),
            reward,
            done,
            info: StepInfo {
                chosen,
                placed: target,
                fallback,
                accepted: outcome.accepted,
                energy_kwh: outcome.energy_kwh,
            },
        })
    }

    /// Runs one full episode under `policy` and returns physical-unit
    /// objectives suitable for the Pareto front.
    ///
    /// The policy is expected to be in deterministic mode; the environment
    /// itself adds no stochasticity beyond the workload stream.
    pub fn evaluate(&mut self, policy: &mut dyn Policy) -> Result<EvaluationOutcome, EnvError> {
        let mut obs = self.reset()?;
        loop {
            let action = policy.select_action(&obs);
            let result = self.step(action)?;
            obs = result.observation;
            if result.done {
                break;
            }
        }
        let stats = self.stats.clone();
        let simulator = self.sim.get_results()?;
        Ok(EvaluationOutcome { objectives: stats.objectives(), stats, simulator })
    }

    /// Lowest-carbon capacity-feasible datacenter, ties broken by geodesic
    /// distance to the user, then by index.
    fn fallback_target(&self, user: &GeoLocation) -> Option<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.has_capacity())
            .min_by(|(i, a), (j, b)| {
                a.carbon_intensity
                    .total_cmp(&b.carbon_intensity)
                    .then_with(|| {
                        user.geodesic_km(&a.spec.location)
                            .total_cmp(&user.geodesic_km(&b.spec.location))
                    })
                    .then(i.cmp(j))
            })
            .map(|(i, _)| i)
    }

    fn refresh_datacenters(&mut self) -> Result<(), EnvError> {
        for (state, region) in self.states.iter_mut().zip(&self.region_indices) {
            let record = self
                .table
                .record(*region, self.hour_index)
                .copied()
                .ok_or(EnvError::DatasetExhausted { hour: self.hour_index })?;
            let forecast = self.table.renewable_forecast(
                *region,
                self.hour_index,
                self.cfg.forecast_horizon,
            );
            state.refresh(&record, forecast);
        }
        Ok(())
    }

    fn observation(&self) -> Vec<f64> {
        let request = self
            .current_request
            .expect("observation requested before first reset");
        let recent: Vec<[f64; 3]> = self.recent_rewards.iter().copied().collect();
        ObservationBuilder::build(&request, &self.states, &recent, &self.layout)
    }
}
