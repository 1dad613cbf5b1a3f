//! Per-datacenter runtime state.

use crate::carbon::RegionHour;
use crate::types::{DatacenterSpec, VmTier};

/// Mutable per-episode state layered over a static [`DatacenterSpec`].
///
/// Remaining capacity is non-negative and non-increasing within an episode;
/// [`DatacenterState::reset`] restores it at episode start. Carbon fields
/// are refreshed once per simulated hour from the dataset.
#[derive(Debug, Clone)]
pub struct DatacenterState {
    /// Static site description.
    pub spec: DatacenterSpec,
    /// VMs still placeable this episode.
    pub remaining_capacity: u32,
    /// Current grid carbon intensity, gCO2/kWh.
    pub carbon_intensity: f64,
    /// Current renewable share in [0, 1].
    pub renewable_pct: f64,
    /// Green tag for the current hour, derived from the dataset class.
    pub green: bool,
    /// Renewable-share forecast for the next hours.
    pub forecast: Vec<f64>,
    /// Cores currently committed to placed VMs.
    pub placed_cores: u32,
    /// RAM (GB) currently committed to placed VMs.
    pub placed_ram_gb: u32,
    /// VMs this site actually received this episode (including fallbacks).
    pub received: u64,
}

impl DatacenterState {
    /// Creates a fresh state for one site.
    pub fn new(spec: DatacenterSpec) -> Self {
        let capacity = spec.capacity;
        Self {
            spec,
            remaining_capacity: capacity,
            carbon_intensity: 0.0,
            renewable_pct: 0.0,
            green: false,
            forecast: Vec::new(),
            placed_cores: 0,
            placed_ram_gb: 0,
            received: 0,
        }
    }

    /// Restores capacity and occupancy for a new episode.
    pub fn reset(&mut self) {
        self.remaining_capacity = self.spec.capacity;
        self.placed_cores = 0;
        self.placed_ram_gb = 0;
        self.received = 0;
    }

    /// Applies one hour of carbon data.
    pub fn refresh(&mut self, record: &RegionHour, forecast: Vec<f64>) {
        self.carbon_intensity = record.carbon_intensity_g_per_kwh;
        self.renewable_pct = record.renewable_pct;
        self.green = record.is_green();
        self.forecast = forecast;
    }

    /// Whether another VM fits this episode.
    pub fn has_capacity(&self) -> bool {
        self.remaining_capacity > 0
    }

    /// Fraction of the episode capacity still available.
    pub fn capacity_fraction(&self) -> f64 {
        if self.spec.capacity == 0 {
            0.0
        } else {
            self.remaining_capacity as f64 / self.spec.capacity as f64
        }
    }

    /// CPU utilization in [0, 1].
    pub fn cpu_utilization(&self) -> f64 {
        if self.spec.total_cores == 0 {
            0.0
        } else {
            (self.placed_cores as f64 / self.spec.total_cores as f64).min(1.0)
        }
    }

    /// RAM utilization in [0, 1].
    pub fn ram_utilization(&self) -> f64 {
        if self.spec.total_ram_gb == 0 {
            0.0
        } else {
            (self.placed_ram_gb as f64 / self.spec.total_ram_gb as f64).min(1.0)
        }
    }

    /// Accounts for an accepted placement.
    pub fn record_placement(&mut self, tier: VmTier) {
        debug_assert!(self.remaining_capacity > 0, "placement past declared capacity");
        self.remaining_capacity = self.remaining_capacity.saturating_sub(1);
        self.placed_cores += tier.cores();
        self.placed_ram_gb += tier.ram_gb();
        self.received += 1;
    }
}
