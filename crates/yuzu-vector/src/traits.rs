//! The interface vector index variants expose to the planner and schema
//! registry.

use crate::neighbors::Neighbor;
use crate::{Metric, Result};
use yuzu_intern::InternedStr;

/// Candidate filter consulted during inline-filtered search.
pub type FilterFn<'a> = &'a (dyn Fn(&InternedStr) -> bool + Sync);

/// Common interface for vector indices (flat scan and layered graph).
///
/// # Thread safety
///
/// Implementations must be `Send + Sync`; searches run on reader workers
/// concurrently with mutations from writer workers. Each implementation
/// wraps capacity changes in its resize lock and takes it shared for
/// reads, per the protocol in the crate docs.
pub trait KnnIndex: Send + Sync {
    /// Vector dimensionality.
    fn dimensions(&self) -> usize;

    /// Distance metric.
    fn metric(&self) -> Metric;

    /// Number of tracked records.
    fn record_count(&self) -> usize;

    /// Current kernel capacity in records.
    fn capacity(&self) -> usize;

    /// Index `payload` (raw float32 bytes) under `key`.
    ///
    /// Returns false when the payload was rejected without error (the
    /// record simply isn't indexed). Errors on byte-length mismatch.
    fn add_record(&self, key: &InternedStr, payload: &[u8]) -> Result<bool>;

    /// Replace `key`'s payload. Returns false when the stored payload is
    /// byte-identical (no-op). An empty payload degrades to removal.
    fn modify_record(&self, key: &InternedStr, payload: &[u8]) -> Result<bool>;

    /// Drop `key`. Returns false when the key was not tracked.
    fn remove_record(&self, key: &InternedStr) -> Result<bool>;

    /// K nearest neighbors of `query`, ascending by distance with ties
    /// broken by key. `ef_runtime` overrides the index default beam width
    /// where the kernel has one. `filter` restricts candidates.
    fn search(
        &self,
        query: &[u8],
        k: usize,
        ef_runtime: Option<usize>,
        filter: Option<FilterFn<'_>>,
    ) -> Result<Vec<Neighbor>>;

    /// Validate and preprocess a query payload (normalizing under cosine)
    /// so per-candidate scoring can reuse it.
    fn prepare_query(&self, query: &[u8]) -> Result<Vec<f32>>;

    /// Distance from a prepared query to a tracked record; used by the
    /// pre-filter plan.
    fn distance_prepared(&self, key: &InternedStr, prepared: &[f32]) -> Result<f32>;

    fn compute_distance(&self, key: &InternedStr, query: &[u8]) -> Result<f32> {
        let prepared = self.prepare_query(query)?;
        self.distance_prepared(key, &prepared)
    }

    fn is_tracked(&self, key: &InternedStr) -> bool;

    fn internal_id(&self, key: &InternedStr) -> Option<u64>;

    fn key_of(&self, internal_id: u64) -> Option<InternedStr>;

    /// Magnitude tracked with the record (cosine only; sentinel otherwise).
    fn magnitude_of(&self, key: &InternedStr) -> Option<f32>;

    /// The record bytes as the host stored them (denormalized under
    /// cosine).
    fn value_bytes(&self, key: &InternedStr) -> Result<Vec<u8>>;

    /// Type-specific info fields for the host `info` command.
    fn info(&self) -> Vec<(String, String)>;

    /// Serialize kernel internals (payloads and structure) to an opaque
    /// blob. The key↔id tuples are saved separately by the schema.
    fn save_kernel(&self) -> Result<Vec<u8>>;

    /// Rebuild kernel internals from `blob`, after the bijection was
    /// reinstated via [`KnnIndex::load_tracked`].
    fn load_kernel(&self, blob: &[u8]) -> Result<()>;

    /// `(internal_id, key, magnitude)` tuples for snapshots.
    fn tracked_tuples(&self) -> Vec<(u64, InternedStr, f32)>;

    /// Reinstate the key↔id bijection from snapshot tuples. `None`
    /// magnitudes mark older snapshots and trigger lazy recompute.
    fn load_tracked(&self, tuples: Vec<(u64, InternedStr, Option<f32>)>) -> Result<()>;

    fn for_each_tracked_key(&self, f: &mut dyn FnMut(&InternedStr));
}
