//! Pareto front over the three placement objectives.
//!
//! Maintains a non-dominated set of objective vectors (minimization) with
//! per-entry metadata, and provides the front-quality operations used by the
//! two-stage trainer: crowding-distance sparsity ranking for seed selection,
//! hypervolume and expected utility for reporting, and an ordered JSON
//! representation for the on-disk manifest.

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::preference::Preference;

/// Absolute tolerance for dominance and duplicate tests, guarding against
/// float noise in evaluated objectives.
pub const DOMINANCE_EPS: f64 = 1e-9;

/// Errors from front operations.
#[derive(Debug, Error)]
pub enum ParetoError {
    #[error("objective vector contains non-finite components: {0:?}")]
    NonFiniteObjectives([f64; 3]),

    #[error("failed to serialize pareto front: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse pareto front: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Which construction stage produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Stage 1: diversified initialization.
    Initialization,
    /// Stage 2: targeted extension of sparse regions.
    Extension,
}

/// One candidate solution: an objective vector plus provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoEntry {
    /// `(energy, carbon, latency)`, treated as minimization targets.
    pub objectives: [f64; 3],
    /// Construction stage.
    pub stage: Stage,
    /// Preference the policy was trained under.
    pub preference: [f64; 3],
    /// Handle to the trained policy parameters (run-relative path).
    pub policy_ref: String,
}

/// Returns true when `a` weakly dominates `b` under minimization:
/// `a <= b` everywhere (within `eps`) and strictly better in one component.
pub fn dominates(a: &[f64; 3], b: &[f64; 3], eps: f64) -> bool {
    let mut strictly_better = false;
    for i in 0..3 {
        if a[i] > b[i] + eps {
            return false;
        }
        if a[i] < b[i] - eps {
            strictly_better = true;
        }
    }
    strictly_better
}

fn duplicates(a: &[f64; 3], b: &[f64; 3], eps: f64) -> bool {
    (0..3).all(|i| (a[i] - b[i]).abs() <= eps)
}

/// A non-dominated set of [`ParetoEntry`] values, in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ParetoFront {
    entries: Vec<ParetoEntry>,
    eps: f64,
}

impl ParetoFront {
    /// Creates an empty front with the default dominance tolerance.
    pub fn new() -> Self {
        Self::with_tolerance(DOMINANCE_EPS)
    }

    /// Creates an empty front with a custom tolerance.
    pub fn with_tolerance(eps: f64) -> Self {
        Self { entries: Vec::new(), eps }
    }

    /// Current entries, oldest insertion first.
    pub fn entries(&self) -> &[ParetoEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offers an entry to the front.
    ///
    /// Returns `Ok(false)` if an existing entry weakly dominates or
    /// duplicates the candidate. Otherwise evicts every entry the candidate
    /// weakly dominates, appends it, and returns `Ok(true)`. The front is
    /// never partially updated: non-finite objectives are rejected up front.
    pub fn insert(&mut self, entry: ParetoEntry) -> Result<bool, ParetoError> {
        if entry.objectives.iter().any(|v| !v.is_finite()) {
            return Err(ParetoError::NonFiniteObjectives(entry.objectives));
        }
        for existing in &self.entries {
            if dominates(&existing.objectives, &entry.objectives, self.eps)
                || duplicates(&existing.objectives, &entry.objectives, self.eps)
            {
                return Ok(false);
            }
        }
        let eps = self.eps;
        self.entries
            .retain(|e| !dominates(&entry.objectives, &e.objectives, eps));
        self.entries.push(entry);
        Ok(true)
    }

    /// NSGA-II crowding distance per entry, aligned with [`Self::entries`].
    ///
    /// For each objective the front is sorted along that axis; the two
    /// extreme entries get infinite distance and each interior entry
    /// accumulates the span-normalized gap between its neighbors.
    pub fn crowding_distances(&self) -> Vec<f64> {
        let n = self.entries.len();
        if n <= 2 {
            return vec![f64::INFINITY; n];
        }
        let mut dist = vec![0.0; n];
        for m in 0..3 {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|a, b| {
                self.entries[*a].objectives[m].total_cmp(&self.entries[*b].objectives[m])
            });
            dist[order[0]] = f64::INFINITY;
            dist[order[n - 1]] = f64::INFINITY;
            let span = self.entries[order[n - 1]].objectives[m]
                - self.entries[order[0]].objectives[m];
            if span <= self.eps {
                continue;
            }
            for i in 1..n - 1 {
                let gap = self.entries[order[i + 1]].objectives[m]
                    - self.entries[order[i - 1]].objectives[m];
                dist[order[i]] += gap / span;
            }
        }
        dist
    }

    /// Returns the `n` sparsest entries by crowding distance, ties broken by
    /// insertion order. Returns everything when the front is small enough.
    pub fn select_sparse(&self, n: usize) -> Vec<&ParetoEntry> {
        if self.entries.len() <= n {
            return self.entries.iter().collect();
        }
        let dist = self.crowding_distances();
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        order.sort_by(|a, b| dist[*b].total_cmp(&dist[*a]).then(a.cmp(b)));
        order.truncate(n);
        order.into_iter().map(|i| &self.entries[i]).collect()
    }

    /// Exact hypervolume dominated by the front within the reference box.
    ///
    /// Sweeps the third objective and accumulates 2-D slab areas; adequate
    /// for the small fronts this system maintains. Entries at or beyond the
    /// reference in any component contribute nothing.
    pub fn hypervolume(&self, reference: [f64; 3]) -> f64 {
        let mut points: Vec<[f64; 3]> = self
            .entries
            .iter()
            .map(|e| e.objectives)
            .filter(|o| (0..3).all(|i| o[i] < reference[i]))
            .collect();
        if points.is_empty() {
            return 0.0;
        }
        points.sort_by(|a, b| a[2].total_cmp(&b[2]));

        let mut volume = 0.0;
        for k in 0..points.len() {
            let z_lo = points[k][2];
            let z_hi = if k + 1 < points.len() { points[k + 1][2] } else { reference[2] };
            if z_hi <= z_lo {
                continue;
            }
            let slab: Vec<(f64, f64)> =
                points[..=k].iter().map(|p| (p[0], p[1])).collect();
            volume += (z_hi - z_lo) * area_2d(&slab, (reference[0], reference[1]));
        }
        volume
    }

    /// Expected utility: mean over `samples` uniform preference draws of the
    /// best scalarized value `-(w . o)` available in the front.
    pub fn expected_utility(&self, samples: usize, rng: &mut impl Rng) -> f64 {
        if self.entries.is_empty() || samples == 0 {
            return 0.0;
        }
        let mut total = 0.0;
        for _ in 0..samples {
            let w = Preference::sample_uniform(rng);
            let best = self
                .entries
                .iter()
                .map(|e| -w.scalarize(e.objectives))
                .fold(f64::NEG_INFINITY, f64::max);
            total += best;
        }
        total / samples as f64
    }

    /// Serializes the front to JSON, preserving insertion order.
    pub fn to_json(&self) -> Result<String, ParetoError> {
        serde_json::to_string_pretty(&self.entries).map_err(ParetoError::Serialize)
    }

    /// Restores a front from its JSON form, preserving listed order.
    pub fn from_json(json: &str) -> Result<Self, ParetoError> {
        let entries: Vec<ParetoEntry> =
            serde_json::from_str(json).map_err(ParetoError::Parse)?;
        Ok(Self { entries, eps: DOMINANCE_EPS })
    }
}

/// Area dominated by `points` (minimization) within the 2-D reference box.
fn area_2d(points: &[(f64, f64)], reference: (f64, f64)) -> f64 {
    let mut pts: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| *x < reference.0 && *y < reference.1)
        .collect();
    pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let mut area = 0.0;
    let mut best_y = f64::INFINITY;
    for i in 0..pts.len() {
        let (x, y) = pts[i];
        if y >= best_y {
            continue; // dominated in the plane
        }
        best_y = y;
        // x-extent runs to the next point that improves y, or the reference
        let x_next = pts[i + 1..]
            .iter()
            .find(|(_, ny)| *ny < best_y)
            .map(|(nx, _)| *nx)
            .unwrap_or(reference.0);
        area += (x_next - x) * (reference.1 - y);
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entry(objectives: [f64; 3]) -> ParetoEntry {
        ParetoEntry {
            objectives,
            stage: Stage::Initialization,
            preference: [1.0 / 3.0; 3],
            policy_ref: "stage1/policy_0".to_string(),
        }
    }

    #[test]
    fn insert_keeps_non_dominated() {
        let mut front = ParetoFront::new();
        assert!(front.insert(entry([1.0, 2.0, 3.0])).unwrap());
        assert!(front.insert(entry([2.0, 1.0, 3.0])).unwrap());
        assert_eq!(front.len(), 2);
    }

    #[test]
    fn insert_rejects_dominated_candidate() {
        let mut front = ParetoFront::new();
        front.insert(entry([1.0, 1.0, 1.0])).unwrap();
        assert!(!front.insert(entry([2.0, 2.0, 2.0])).unwrap());
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn insert_evicts_dominated_entries() {
        let mut front = ParetoFront::new();
        front.insert(entry([2.0, 2.0, 2.0])).unwrap();
        front.insert(entry([3.0, 1.0, 3.0])).unwrap();
        assert!(front.insert(entry([1.0, 1.0, 1.0])).unwrap());
        assert_eq!(front.len(), 1);
        assert_eq!(front.entries()[0].objectives, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn insert_collapses_duplicates() {
        let mut front = ParetoFront::new();
        front.insert(entry([1.0, 2.0, 3.0])).unwrap();
        assert!(!front.insert(entry([1.0 + 1e-12, 2.0, 3.0])).unwrap());
        assert_eq!(front.len(), 1);
    }

    #[test]
    fn insert_rejects_non_finite() {
        let mut front = ParetoFront::new();
        assert!(matches!(
            front.insert(entry([f64::NAN, 1.0, 1.0])),
            Err(ParetoError::NonFiniteObjectives(_))
        ));
        assert!(matches!(
            front.insert(entry([f64::INFINITY, 1.0, 1.0])),
            Err(ParetoError::NonFiniteObjectives(_))
        ));
        assert!(front.is_empty());
    }

    #[test]
    fn dominance_respects_tolerance() {
        let a = [1.0, 1.0, 1.0];
        let b = [1.0 + 1e-12, 1.0, 1.0];
        assert!(!dominates(&a, &b, DOMINANCE_EPS));
        assert!(dominates(&a, &[1.0, 1.0, 2.0], DOMINANCE_EPS));
    }

    #[test]
    fn crowding_endpoints_are_infinite() {
        let mut front = ParetoFront::new();
        front.insert(entry([0.0, 4.0, 1.0])).unwrap();
        front.insert(entry([1.0, 3.0, 1.0])).unwrap();
        front.insert(entry([2.0, 2.0, 1.0])).unwrap();
        front.insert(entry([4.0, 0.0, 1.0])).unwrap();
        let d = front.crowding_distances();
        assert!(d[0].is_infinite());
        assert!(d[3].is_infinite());
        assert!(d[1].is_finite() && d[1] > 0.0);
        // the wider gap around index 2 makes it sparser than index 1
        assert!(d[2] > d[1]);
    }

    #[test]
    fn select_sparse_returns_all_when_small() {
        let mut front = ParetoFront::new();
        front.insert(entry([1.0, 2.0, 3.0])).unwrap();
        front.insert(entry([2.0, 1.0, 3.0])).unwrap();
        assert_eq!(front.select_sparse(5).len(), 2);
    }

    #[test]
    fn select_sparse_prefers_isolated_entries() {
        let mut front = ParetoFront::new();
        front.insert(entry([0.0, 10.0, 0.0])).unwrap();
        front.insert(entry([1.0, 9.0, 0.0])).unwrap();
        front.insert(entry([2.0, 8.0, 0.0])).unwrap();
        front.insert(entry([10.0, 0.0, 0.0])).unwrap();
        let picked = front.select_sparse(2);
        assert_eq!(picked.len(), 2);
        // both picks must be extreme (infinite-distance) entries
        for e in picked {
            assert!(e.objectives[0] == 0.0 || e.objectives[0] == 10.0);
        }
    }

    #[test]
    fn hypervolume_single_point() {
        let mut front = ParetoFront::new();
        front.insert(entry([1.0, 1.0, 1.0])).unwrap();
        let hv = front.hypervolume([2.0, 2.0, 2.0]);
        assert!((hv - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hypervolume_two_points_unions_boxes() {
        let mut front = ParetoFront::new();
        front.insert(entry([0.0, 1.0, 0.0])).unwrap();
        front.insert(entry([1.0, 0.0, 0.0])).unwrap();
        // boxes [0,2]x[1,2]x[0,2] and [1,2]x[0,2]x[0,2]: 4 + 4 - 2 overlap = 6
        let hv = front.hypervolume([2.0, 2.0, 2.0]);
        assert!((hv - 6.0).abs() < 1e-9, "got {}", hv);
    }

    #[test]
    fn hypervolume_ignores_points_outside_reference() {
        let mut front = ParetoFront::new();
        front.insert(entry([1.0, 1.0, 5.0])).unwrap();
        assert_eq!(front.hypervolume([2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn expected_utility_prefers_better_front() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut good = ParetoFront::new();
        good.insert(entry([1.0, 1.0, 1.0])).unwrap();
        let mut bad = ParetoFront::new();
        bad.insert(entry([5.0, 5.0, 5.0])).unwrap();
        let eu_good = good.expected_utility(200, &mut rng);
        let eu_bad = bad.expected_utility(200, &mut rng);
        assert!(eu_good > eu_bad);
    }

    #[test]
    fn json_round_trip_preserves_order_and_metadata() {
        let mut front = ParetoFront::new();
        front.insert(entry([3.0, 1.0, 2.0])).unwrap();
        front
            .insert(ParetoEntry {
                objectives: [1.0, 3.0, 2.0],
                stage: Stage::Extension,
                preference: [0.7, 0.15, 0.15],
                policy_ref: "stage2/policy_0_energy".to_string(),
            })
            .unwrap();
        let json = front.to_json().unwrap();
        let back = ParetoFront::from_json(&json).unwrap();
        assert_eq!(front.entries(), back.entries());
        // serialization is byte-stable
        assert_eq!(json, back.to_json().unwrap());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn objective_vec() -> impl Strategy<Value = [f64; 3]> {
            [0.0..100.0f64, 0.0..100.0f64, 0.0..100.0f64]
        }

        proptest! {
            #[test]
            fn front_is_always_mutually_non_dominated(
                objs in proptest::collection::vec(objective_vec(), 1..40)
            ) {
                let mut front = ParetoFront::new();
                for o in objs {
                    front.insert(entry(o)).unwrap();
                }
                let entries = front.entries();
                for i in 0..entries.len() {
                    for j in 0..entries.len() {
                        if i != j {
                            prop_assert!(!dominates(
                                &entries[i].objectives,
                                &entries[j].objectives,
                                DOMINANCE_EPS
                            ));
                        }
                    }
                }
            }

            #[test]
            fn hypervolume_is_monotone_across_inserts(
                objs in proptest::collection::vec(objective_vec(), 1..25)
            ) {
                let reference = [110.0, 110.0, 110.0];
                let mut front = ParetoFront::new();
                let mut last_hv = 0.0;
                for o in objs {
                    let inserted = front.insert(entry(o)).unwrap();
                    let hv = front.hypervolume(reference);
                    if inserted {
                        prop_assert!(hv >= last_hv - 1e-9);
                    }
                    last_hv = hv;
                }
            }

            #[test]
            fn round_trip_preserves_entries(
                objs in proptest::collection::vec(objective_vec(), 1..20)
            ) {
                let mut front = ParetoFront::new();
                for o in objs {
                    front.insert(entry(o)).unwrap();
                }
                let back = ParetoFront::from_json(&front.to_json().unwrap()).unwrap();
                prop_assert_eq!(front.entries(), back.entries());
            }
        }
    }
}
