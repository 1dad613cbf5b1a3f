//! Two-stage Pareto training driver.
//!
//! Wires the reference fleet, carbon data, simulator, and workload into a
//! [`ParetoTrainer`] run. Exit codes: 0 on clean completion, 1 on
//! unrecoverable failure, 2 on cancellation.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use viridian::carbon::CarbonTable;
use viridian::env::{EnvConfig, PlacementEnv};
use viridian::simulator::EnergyModelSimulator;
use viridian::training::{
    LearnerConfig, ParetoTrainer, TrainerConfig, TrainerError, TrainingSummary,
};
use viridian::types::{DatacenterSpec, GeoLocation};
use viridian::workload::PoissonWorkload;

/// Train a Pareto front of carbon-aware VM placement policies.
#[derive(Parser, Debug)]
#[command(name = "viridian-train", version)]
struct Args {
    /// Simulated hours per episode.
    #[arg(long, default_value_t = 24)]
    hours: u32,

    /// Expected VM arrivals per hour.
    #[arg(long, default_value_t = 10.0)]
    vms_per_hour: f64,

    /// Number of Stage-1 policies (M).
    #[arg(long, default_value_t = 5)]
    stage1_policies: usize,

    /// Timesteps per Stage-1 policy (T1).
    #[arg(long, default_value_t = 20_000)]
    stage1_timesteps: u64,

    /// Number of Stage-2 seed entries (N).
    #[arg(long, default_value_t = 2)]
    stage2_seeds: usize,

    /// Timesteps per Stage-2 extension (T2).
    #[arg(long, default_value_t = 10_000)]
    stage2_timesteps: u64,

    /// Drift constraint for Stage-2 clones.
    #[arg(long, default_value_t = 1.0)]
    drift_coef: f64,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output directory for checkpoints and manifests.
    #[arg(long, default_value = "runs/viridian")]
    output_dir: PathBuf,

    /// JSON carbon table to train against; a synthetic table is generated
    /// when omitted.
    #[arg(long)]
    carbon_data: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(summary) => {
            println!(
                "front size {}, hypervolume {:.6}, expected utility {:.6} ({:.1}s)",
                summary.front_size,
                summary.hypervolume,
                summary.expected_utility,
                summary.runtime_seconds
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            if matches!(err.downcast_ref::<TrainerError>(), Some(TrainerError::Cancelled)) {
                eprintln!("cancelled");
                return ExitCode::from(2);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<TrainingSummary> {
    let fleet = DatacenterSpec::reference_fleet();
    let regions: Vec<&str> = fleet.iter().map(|dc| dc.region.as_str()).collect();

    let table = match &args.carbon_data {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading carbon table {}", path.display()))?;
            CarbonTable::from_json(&json).context("parsing carbon table")?
        }
        None => CarbonTable::synthetic(&regions, args.hours as usize, args.seed),
    };

    let env_cfg = EnvConfig {
        hours: args.hours,
        vms_per_hour: args.vms_per_hour,
        ..EnvConfig::default()
    };
    let workload = PoissonWorkload::new(
        args.vms_per_hour,
        vec![
            GeoLocation::new(52.5, 13.4), // Berlin
            GeoLocation::new(48.9, 2.4),  // Paris
            GeoLocation::new(41.4, 2.2),  // Barcelona
            GeoLocation::new(51.5, -0.1), // London
        ],
        args.seed,
    );
    let env = PlacementEnv::new(
        env_cfg,
        fleet,
        table,
        Box::new(EnergyModelSimulator::new()),
        Box::new(workload),
        args.seed,
    )
    .context("constructing environment")?;

    let trainer_cfg = TrainerConfig {
        stage1_policies: args.stage1_policies,
        stage1_timesteps: args.stage1_timesteps,
        stage2_seeds: args.stage2_seeds,
        stage2_timesteps: args.stage2_timesteps,
        drift_coef: args.drift_coef,
        seed: args.seed,
        output_dir: args.output_dir,
        ..TrainerConfig::default()
    };

    let mut trainer = ParetoTrainer::new(env, trainer_cfg, LearnerConfig::default());
    trainer.run().map_err(Into::into)
}
