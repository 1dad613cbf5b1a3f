//! Core types for the placement system.
//!
//! Defines VM resource tiers, geographic locations, placement requests,
//! static datacenter descriptions, and the three optimization objectives.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers, used by the haversine geodesic.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// VM resource tier, one of a small closed set with fixed demands.
///
/// Each tier pins core count, RAM, storage, and bandwidth. Tiers are the
/// only request-side degree of freedom besides the user location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmTier {
    Small,
    Medium,
    Large,
    XLarge,
}

impl VmTier {
    /// Number of tiers, fixed by the closed set above.
    pub const COUNT: usize = 4;

    /// Returns all tiers in index order.
    pub fn all() -> [VmTier; Self::COUNT] {
        [VmTier::Small, VmTier::Medium, VmTier::Large, VmTier::XLarge]
    }

    /// Returns the index of this tier (0=Small .. 3=XLarge).
    pub fn index(&self) -> usize {
        match self {
            VmTier::Small => 0,
            VmTier::Medium => 1,
            VmTier::Large => 2,
            VmTier::XLarge => 3,
        }
    }

    /// One-hot encoding of this tier.
    pub fn one_hot(&self) -> [f64; Self::COUNT] {
        let mut v = [0.0; Self::COUNT];
        v[self.index()] = 1.0;
        v
    }

    /// Requested CPU cores.
    pub fn cores(&self) -> u32 {
        match self {
            VmTier::Small => 2,
            VmTier::Medium => 4,
            VmTier::Large => 8,
            VmTier::XLarge => 16,
        }
    }

    /// Requested RAM in GB.
    pub fn ram_gb(&self) -> u32 {
        match self {
            VmTier::Small => 4,
            VmTier::Medium => 8,
            VmTier::Large => 16,
            VmTier::XLarge => 32,
        }
    }

    /// Requested storage in GB.
    pub fn storage_gb(&self) -> u32 {
        match self {
            VmTier::Small => 50,
            VmTier::Medium => 100,
            VmTier::Large => 250,
            VmTier::XLarge => 500,
        }
    }

    /// Requested network bandwidth in Mbps.
    pub fn bandwidth_mbps(&self) -> u32 {
        match self {
            VmTier::Small => 100,
            VmTier::Medium => 250,
            VmTier::Large => 500,
            VmTier::XLarge => 1000,
        }
    }

    /// IT power draw of a fully loaded VM of this tier, in kW.
    pub fn it_power_kw(&self) -> f64 {
        self.cores() as f64 * 0.025
    }

    /// Nominal VM lifetime in hours, used by the reference energy model.
    pub fn mean_lifetime_hours(&self) -> f64 {
        match self {
            VmTier::Small => 24.0,
            VmTier::Medium => 24.0,
            VmTier::Large => 48.0,
            VmTier::XLarge => 72.0,
        }
    }
}

impl fmt::Display for VmTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmTier::Small => write!(f, "small"),
            VmTier::Medium => write!(f, "medium"),
            VmTier::Large => write!(f, "large"),
            VmTier::XLarge => write!(f, "xlarge"),
        }
    }
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

impl GeoLocation {
    /// Creates a new location.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to another location in kilometers (haversine).
    pub fn geodesic_km(&self, other: &GeoLocation) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

impl fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.lat, self.lon)
    }
}

/// One VM arrival: tier, originating user location, and arrival time.
///
/// Created by the workload generator, consumed once by the environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRequest {
    /// Requested resource tier.
    pub tier: VmTier,
    /// Location of the requesting user.
    pub user: GeoLocation,
    /// Arrival time in simulated hours since episode start.
    pub arrival_hour: f64,
}

/// Static description of a datacenter site.
///
/// Runtime state (carbon intensity, remaining capacity, utilization) lives in
/// [`crate::env::DatacenterState`]; this record never changes mid-run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatacenterSpec {
    /// Dense index, also the action id selecting this datacenter.
    pub id: usize,
    /// Region name, and the column key into the carbon table.
    pub region: String,
    /// Site coordinates.
    pub location: GeoLocation,
    /// Power usage effectiveness, facility energy over IT energy (>= 1).
    pub pue: f64,
    /// Number of VMs placeable per episode.
    pub capacity: u32,
    /// Total CPU cores across the site, for utilization accounting.
    pub total_cores: u32,
    /// Total RAM in GB across the site.
    pub total_ram_gb: u32,
}

impl DatacenterSpec {
    /// Five-site European fleet used by the CLI and scenario tests.
    ///
    /// Capacities are per-episode placement budgets; cores/RAM are sized so
    /// that a full episode cannot exhaust them before the slot count does.
    pub fn reference_fleet() -> Vec<DatacenterSpec> {
        let sites = [
            ("DE", 50.110, 8.682, 1.35),
            ("NO", 59.913, 10.752, 1.15),
            ("ES", 40.416, -3.703, 1.40),
            ("FR", 48.856, 2.352, 1.30),
            ("NL", 52.370, 4.895, 1.25),
        ];
        sites
            .iter()
            .enumerate()
            .map(|(id, (region, lat, lon, pue))| DatacenterSpec {
                id,
                region: (*region).to_string(),
                location: GeoLocation::new(*lat, *lon),
                pue: *pue,
                capacity: 120,
                total_cores: 4096,
                total_ram_gb: 8192,
            })
            .collect()
    }
}

/// One of the three optimization objectives, in fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Energy,
    Carbon,
    Latency,
}

impl Objective {
    /// Number of objectives.
    pub const COUNT: usize = 3;

    /// Returns all objectives in index order.
    pub fn all() -> [Objective; Self::COUNT] {
        [Objective::Energy, Objective::Carbon, Objective::Latency]
    }

    /// Returns the index of this objective (0=Energy, 1=Carbon, 2=Latency).
    pub fn index(&self) -> usize {
        match self {
            Objective::Energy => 0,
            Objective::Carbon => 1,
            Objective::Latency => 2,
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Objective::Energy => write!(f, "energy"),
            Objective::Carbon => write!(f, "carbon"),
            Objective::Latency => write!(f, "latency"),
        }
    }
}
