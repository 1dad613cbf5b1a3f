//! Simulator seam and the in-process reference implementation.
//!
//! The environment talks to the datacenter simulator only through the
//! [`Simulator`] trait, whose methods mirror the external CloudSim bridge:
//! initialize, register datacenters, submit placements, run, collect
//! aggregates. [`EnergyModelSimulator`] is a self-contained implementation
//! with a per-tier energy model, used by tests, demos, and the CLI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PlacementRequest;

/// Errors surfaced by simulator implementations.
///
/// Timeout and disconnect exist for out-of-process bridges; the environment
/// treats both as fatal to the current episode.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("simulator call timed out after {0} ms")]
    Timeout(u64),

    #[error("simulator connection lost: {0}")]
    Disconnected(String),

    #[error("datacenter {0} is not registered")]
    UnknownDatacenter(usize),

    #[error("simulator not initialized")]
    NotInitialized,
}

/// Outcome of a single VM submission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementOutcome {
    /// Whether the VM was accepted by the target datacenter.
    pub accepted: bool,
    /// Marginal facility energy attributed to this VM over its lifetime, kWh.
    pub energy_kwh: f64,
}

/// End-of-episode aggregates from the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResults {
    pub total_it_energy_kwh: f64,
    pub total_facility_energy_kwh: f64,
    pub average_pue: f64,
    pub success_count: u64,
    /// Fraction of slots in use per datacenter, in registration order.
    pub per_datacenter_utilization: Vec<f64>,
}

/// Capability interface consumed by the placement environment.
pub trait Simulator: Send {
    /// Readies the simulator for a new episode, clearing prior state.
    fn initialize(&mut self) -> Result<(), SimulatorError>;

    /// Registers a datacenter. Idempotent within an episode.
    fn create_datacenter(
        &mut self,
        id: usize,
        server_count: u32,
        pue: f64,
    ) -> Result<(), SimulatorError>;

    /// Attempts a placement, returning acceptance and marginal energy.
    fn submit_vm(
        &mut self,
        request: &PlacementRequest,
        target: usize,
    ) -> Result<PlacementOutcome, SimulatorError>;

    /// Advances simulator time to the end of the episode.
    fn run_simulation(&mut self) -> Result<(), SimulatorError>;

    /// Retrieves end-of-episode aggregates.
    fn get_results(&mut self) -> Result<SimulationResults, SimulatorError>;
}

#[derive(Debug, Clone)]
struct SimulatedSite {
    slots: u32,
    used: u32,
    pue: f64,
    it_energy_kwh: f64,
    facility_energy_kwh: f64,
}

/// In-process simulator with a deterministic per-tier energy model.
///
/// A VM's IT energy is its tier power draw times its nominal lifetime;
/// facility energy multiplies by the site PUE. Each site accepts VMs until
/// its registered slot count is exhausted.
#[derive(Debug, Default)]
pub struct EnergyModelSimulator {
    sites: Vec<SimulatedSite>,
    initialized: bool,
    success_count: u64,
}

impl EnergyModelSimulator {
    /// Creates an uninitialized simulator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Simulator for EnergyModelSimulator {
    fn initialize(&mut self) -> Result<(), SimulatorError> {
        self.sites.clear();
        self.success_count = 0;
        self.initialized = true;
        Ok(())
    }

    fn create_datacenter(
        &mut self,
        id: usize,
        server_count: u32,
        pue: f64,
    ) -> Result<(), SimulatorError> {
        if !self.initialized {
            return Err(SimulatorError::NotInitialized);
        }
        if id < self.sites.len() {
            // idempotent re-registration keeps existing occupancy
            return Ok(());
        }
        while self.sites.len() <= id {
            self.sites.push(SimulatedSite {
                slots: server_count,
                used: 0,
                pue,
                it_energy_kwh: 0.0,
                facility_energy_kwh: 0.0,
            });
        }
        Ok(())
    }

    fn submit_vm(
        &mut self,
        request: &PlacementRequest,
        target: usize,
    ) -> Result<PlacementOutcome, SimulatorError> {
        if !self.initialized {
            return Err(SimulatorError::NotInitialized);
        }
        let site = self
            .sites
            .get_mut(target)
            .ok_or(SimulatorError::UnknownDatacenter(target))?;

        if site.used >= site.slots {
            return Ok(PlacementOutcome { accepted: false, energy_kwh: 0.0 });
        }

        let it_energy = request.tier.it_power_kw() * request.tier.mean_lifetime_hours();
        let facility_energy = it_energy * site.pue;
        site.used += 1;
        site.it_energy_kwh += it_energy;
        site.facility_energy_kwh += facility_energy;
        self.success_count += 1;

        Ok(PlacementOutcome { accepted: true, energy_kwh: facility_energy })
    }

    fn run_simulation(&mut self) -> Result<(), SimulatorError> {
        if !self.initialized {
            return Err(SimulatorError::NotInitialized);
        }
        Ok(())
    }

    fn get_results(&mut self) -> Result<SimulationResults, SimulatorError> {
        if !self.initialized {
            return Err(SimulatorError::NotInitialized);
        }
        let total_it: f64 = self.sites.iter().map(|s| s.it_energy_kwh).sum();
        let total_facility: f64 = self.sites.iter().map(|s| s.facility_energy_kwh).sum();
        let average_pue = if total_it > 0.0 { total_facility / total_it } else { 1.0 };
        Ok(SimulationResults {
            total_it_energy_kwh: total_it,
            total_facility_energy_kwh: total_facility,
            average_pue,
            success_count: self.success_count,
            per_datacenter_utilization: self
                .sites
                .iter()
                .map(|s| {
                    if s.slots > 0 {
                        s.used as f64 / s.slots as f64
                    } else {
                        0.0
                    }
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoLocation, VmTier};

    fn request(tier: VmTier) -> PlacementRequest {
        PlacementRequest {
            tier,
            user: GeoLocation::new(48.0, 2.0),
            arrival_hour: 0.0,
        }
    }

    fn ready_sim(slots: u32) -> EnergyModelSimulator {
        let mut sim = EnergyModelSimulator::new();
        sim.initialize().unwrap();
        sim.create_datacenter(0, slots, 1.2).unwrap();
        sim
    }

    #[test]
    fn requires_initialize() {
        let mut sim = EnergyModelSimulator::new();
        assert!(matches!(
            sim.create_datacenter(0, 4, 1.2),
            Err(SimulatorError::NotInitialized)
        ));
    }

    #[test]
    fn energy_scales_with_pue() {
        let mut sim = ready_sim(4);
        let out = sim.submit_vm(&request(VmTier::Small), 0).unwrap();
        assert!(out.accepted);
        let it = VmTier::Small.it_power_kw() * VmTier::Small.mean_lifetime_hours();
        assert!((out.energy_kwh - it * 1.2).abs() < 1e-9);
    }

    #[test]
    fn rejects_when_full() {
        let mut sim = ready_sim(2);
        assert!(sim.submit_vm(&request(VmTier::Small), 0).unwrap().accepted);
        assert!(sim.submit_vm(&request(VmTier::Small), 0).unwrap().accepted);
        let out = sim.submit_vm(&request(VmTier::Small), 0).unwrap();
        assert!(!out.accepted);
        assert_eq!(out.energy_kwh, 0.0);
    }

    #[test]
    fn unknown_target_is_an_error() {
        let mut sim = ready_sim(2);
        assert!(matches!(
            sim.submit_vm(&request(VmTier::Small), 9),
            Err(SimulatorError::UnknownDatacenter(9))
        ));
    }

    #[test]
    fn results_aggregate_energy_and_utilization() {
        let mut sim = ready_sim(4);
        sim.create_datacenter(1, 4, 1.5).unwrap();
        sim.submit_vm(&request(VmTier::Small), 0).unwrap();
        sim.submit_vm(&request(VmTier::Medium), 1).unwrap();
        sim.run_simulation().unwrap();
        let res = sim.get_results().unwrap();
        assert_eq!(res.success_count, 2);
        assert_eq!(res.per_datacenter_utilization, vec![0.25, 0.25]);
        assert!(res.total_facility_energy_kwh > res.total_it_energy_kwh);
        assert!(res.average_pue > 1.0);
    }

    #[test]
    fn initialize_clears_occupancy() {
        let mut sim = ready_sim(1);
        sim.submit_vm(&request(VmTier::Small), 0).unwrap();
        sim.initialize().unwrap();
        sim.create_datacenter(0, 1, 1.2).unwrap();
        assert!(sim.submit_vm(&request(VmTier::Small), 0).unwrap().accepted);
    }
}
