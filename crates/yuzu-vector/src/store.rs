//! Record tracking shared by all vector index variants.
//!
//! `VectorStore` owns the external key ↔ internal id bijection, the interned
//! payload handles, and the magnitude bookkeeping that cosine indices need
//! to reconstruct original vectors. Internal ids are issued monotonically
//! and never reused within a session.

use crate::distance::{floats_from_payload, normalize_in_place, payload_from_floats, Metric};
use crate::{Result, VectorError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use yuzu_intern::{InternStore, InternedStr, SlabArena};

/// Magnitude sentinel for indices that do not normalize.
pub const NO_MAGNITUDE: f32 = -1.0;

/// Magnitude sentinel for records restored from snapshots that predate
/// magnitude tracking; recomputed on the next write touching the record.
pub const UNKNOWN_MAGNITUDE: f32 = f32::NEG_INFINITY;

struct Tracked {
    internal_id: u64,
    magnitude: f32,
    /// None only between bijection restore and kernel-blob load.
    payload: Option<InternedStr>,
}

struct Meta {
    by_key: HashMap<InternedStr, Tracked>,
    by_id: HashMap<u64, InternedStr>,
    next_id: u64,
}

/// Key/id/magnitude tracking for one vector index.
pub struct VectorStore {
    dims: usize,
    metric: Metric,
    intern: Arc<InternStore>,
    arena: Arc<SlabArena>,
    meta: RwLock<Meta>,
}

impl VectorStore {
    pub fn new(
        dims: usize,
        metric: Metric,
        slots_per_block: usize,
        intern: Arc<InternStore>,
    ) -> Self {
        Self {
            dims,
            metric,
            intern,
            arena: SlabArena::new(dims * 4, slots_per_block),
            meta: RwLock::new(Meta {
                by_key: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn normalizes(&self) -> bool {
        self.metric.normalizes()
    }

    /// Expected payload length in bytes.
    pub fn data_len(&self) -> usize {
        self.dims * 4
    }

    fn check_len(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.data_len() {
            return Err(VectorError::DimensionMismatch {
                expected: self.data_len(),
                actual: payload.len(),
            });
        }
        Ok(())
    }

    /// Intern a payload, normalizing it first for cosine indices.
    ///
    /// Returns the interned (possibly normalized) payload and the magnitude
    /// to track with it: the pre-normalization L2 norm under cosine (0 for
    /// the zero vector), [`NO_MAGNITUDE`] otherwise.
    pub fn intern_vector(&self, payload: &[u8]) -> Result<(InternedStr, f32)> {
        self.check_len(payload)?;
        if self.normalizes() {
            let mut floats = floats_from_payload(payload);
            let magnitude = normalize_in_place(&mut floats);
            let normalized = payload_from_floats(&floats);
            let interned = self.intern.intern_in(&normalized, &self.arena)?;
            Ok((interned, magnitude))
        } else {
            let interned = self.intern.intern_in(payload, &self.arena)?;
            Ok((interned, NO_MAGNITUDE))
        }
    }

    /// Validate and convert a query payload, normalizing for cosine.
    pub fn prepare_query(&self, query: &[u8]) -> Result<Vec<f32>> {
        self.check_len(query)?;
        let mut floats = floats_from_payload(query);
        if self.normalizes() {
            normalize_in_place(&mut floats);
        }
        Ok(floats)
    }

    /// Start tracking `key`, issuing a fresh internal id.
    pub fn track(&self, key: &InternedStr, magnitude: f32, payload: InternedStr) -> Result<u64> {
        if key.is_empty() {
            return Err(VectorError::InvalidArgument("key can't be empty".to_string()));
        }
        let mut meta = self.meta.write();
        if meta.by_key.contains_key(key) {
            return Err(VectorError::Conflict(format!(
                "record already tracked: {:?}",
                String::from_utf8_lossy(key.as_bytes())
            )));
        }
        let id = meta.next_id;
        meta.next_id += 1;
        meta.by_key.insert(
            key.clone(),
            Tracked {
                internal_id: id,
                magnitude,
                payload: Some(payload),
            },
        );
        meta.by_id.insert(id, key.clone());
        Ok(id)
    }

    /// Stop tracking `key`. Returns the freed internal id, or None when the
    /// key was unknown.
    pub fn untrack(&self, key: &InternedStr) -> Result<Option<u64>> {
        if key.is_empty() {
            return Ok(None);
        }
        let mut meta = self.meta.write();
        let Some(tracked) = meta.by_key.remove(key) else {
            return Ok(None);
        };
        let id = tracked.internal_id;
        if meta.by_id.remove(&id).is_none() {
            return Err(VectorError::Internal(
                "key was tracked but its internal id was not".to_string(),
            ));
        }
        Ok(Some(id))
    }

    /// Replace `key`'s payload and magnitude, keeping its internal id.
    pub fn update(&self, key: &InternedStr, magnitude: f32, payload: InternedStr) -> Result<u64> {
        let mut meta = self.meta.write();
        let tracked = meta.by_key.get_mut(key).ok_or_else(|| {
            VectorError::NotFound(format!(
                "{:?}",
                String::from_utf8_lossy(key.as_bytes())
            ))
        })?;
        tracked.magnitude = magnitude;
        tracked.payload = Some(payload);
        Ok(tracked.internal_id)
    }

    pub fn is_tracked(&self, key: &InternedStr) -> bool {
        self.meta.read().by_key.contains_key(key)
    }

    pub fn id_of(&self, key: &InternedStr) -> Option<u64> {
        self.meta.read().by_key.get(key).map(|t| t.internal_id)
    }

    pub fn key_of(&self, internal_id: u64) -> Option<InternedStr> {
        self.meta.read().by_id.get(&internal_id).cloned()
    }

    pub fn payload_of(&self, key: &InternedStr) -> Option<InternedStr> {
        self.meta.read().by_key.get(key).and_then(|t| t.payload.clone())
    }

    pub fn magnitude_of(&self, key: &InternedStr) -> Option<f32> {
        self.meta.read().by_key.get(key).map(|t| t.magnitude)
    }

    pub fn record_count(&self) -> usize {
        self.meta.read().by_id.len()
    }

    /// The record's bytes as the host stored them: the denormalized vector
    /// for cosine indices, the raw payload otherwise.
    pub fn denormalized_value(&self, key: &InternedStr) -> Result<Vec<u8>> {
        let meta = self.meta.read();
        let tracked = meta.by_key.get(key).ok_or_else(|| {
            VectorError::NotFound(format!(
                "{:?}",
                String::from_utf8_lossy(key.as_bytes())
            ))
        })?;
        let payload = tracked.payload.as_ref().ok_or_else(|| {
            VectorError::Internal("payload not yet loaded for record".to_string())
        })?;
        if !self.normalizes() {
            return Ok(payload.as_bytes().to_vec());
        }
        if tracked.magnitude == UNKNOWN_MAGNITUDE {
            return Err(VectorError::MagnitudeUnknown);
        }
        if tracked.magnitude < 0.0 {
            return Err(VectorError::Internal("magnitude is not initialized".to_string()));
        }
        let mut floats = floats_from_payload(payload.as_bytes());
        for f in floats.iter_mut() {
            *f *= tracked.magnitude;
        }
        Ok(payload_from_floats(&floats))
    }

    /// `(internal_id, key, magnitude)` tuples ordered by id, for snapshots.
    pub fn tracked_tuples(&self) -> Vec<(u64, InternedStr, f32)> {
        let meta = self.meta.read();
        let mut tuples: Vec<_> = meta
            .by_key
            .iter()
            .map(|(k, t)| (t.internal_id, k.clone(), t.magnitude))
            .collect();
        tuples.sort_by_key(|(id, _, _)| *id);
        tuples
    }

    /// Reinstate the bijection from snapshot tuples. Payloads arrive later
    /// through [`VectorStore::restore_payload`]. A magnitude of `None`
    /// (older snapshot) becomes [`UNKNOWN_MAGNITUDE`] on normalizing
    /// indices.
    pub fn load_tracked(&self, tuples: Vec<(u64, InternedStr, Option<f32>)>) -> Result<()> {
        let mut meta = self.meta.write();
        for (id, key, magnitude) in tuples {
            if meta.by_id.contains_key(&id) {
                return Err(VectorError::Conflict(format!("duplicate internal id: {}", id)));
            }
            if meta.by_key.contains_key(&key) {
                return Err(VectorError::Conflict(format!(
                    "duplicate key in snapshot: {:?}",
                    String::from_utf8_lossy(key.as_bytes())
                )));
            }
            let magnitude = magnitude.unwrap_or(if self.normalizes() {
                UNKNOWN_MAGNITUDE
            } else {
                NO_MAGNITUDE
            });
            meta.next_id = meta.next_id.max(id + 1);
            meta.by_key.insert(
                key.clone(),
                Tracked {
                    internal_id: id,
                    magnitude,
                    payload: None,
                },
            );
            meta.by_id.insert(id, key);
        }
        Ok(())
    }

    /// Attach a payload (from a kernel blob) to a restored record.
    pub fn restore_payload(&self, internal_id: u64, payload: &[u8]) -> Result<InternedStr> {
        self.check_len(payload)?;
        let interned = self.intern.intern_in(payload, &self.arena)?;
        let mut meta = self.meta.write();
        let key = meta.by_id.get(&internal_id).cloned().ok_or_else(|| {
            VectorError::Conflict(format!(
                "kernel blob references unknown internal id: {}",
                internal_id
            ))
        })?;
        let tracked = meta
            .by_key
            .get_mut(&key)
            .ok_or_else(|| VectorError::Internal("bijection out of sync".to_string()))?;
        tracked.payload = Some(interned.clone());
        Ok(interned)
    }

    pub fn for_each_key(&self, f: &mut dyn FnMut(&InternedStr)) {
        let meta = self.meta.read();
        for key in meta.by_key.keys() {
            f(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(metric: Metric) -> (Arc<InternStore>, VectorStore) {
        let intern = Arc::new(InternStore::new());
        let store = VectorStore::new(4, metric, 16, Arc::clone(&intern));
        (intern, store)
    }

    #[test]
    fn test_bijection() {
        let (intern, store) = setup(Metric::L2);
        let a = intern.intern(b"a");
        let b = intern.intern(b"b");
        let payload = payload_from_floats(&[1.0, 0.0, 0.0, 0.0]);

        let (vec_a, mag_a) = store.intern_vector(&payload).unwrap();
        assert_eq!(mag_a, NO_MAGNITUDE);
        let id_a = store.track(&a, mag_a, vec_a).unwrap();
        let (vec_b, mag_b) = store.intern_vector(&payload).unwrap();
        let id_b = store.track(&b, mag_b, vec_b).unwrap();

        assert_ne!(id_a, id_b);
        assert_eq!(store.id_of(&a), Some(id_a));
        assert!(store.key_of(id_a).unwrap().ptr_eq(&a));
        assert_eq!(store.id_of(&store.key_of(id_b).unwrap()), Some(id_b));
    }

    #[test]
    fn test_ids_never_reused() {
        let (intern, store) = setup(Metric::L2);
        let payload = payload_from_floats(&[0.0; 4]);
        let a = intern.intern(b"a");
        let (v, m) = store.intern_vector(&payload).unwrap();
        let first = store.track(&a, m, v).unwrap();
        store.untrack(&a).unwrap();
        let (v, m) = store.intern_vector(&payload).unwrap();
        let second = store.track(&a, m, v).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_empty_key_rejected() {
        let (intern, store) = setup(Metric::L2);
        let empty = intern.intern(b"");
        let (v, m) = store
            .intern_vector(&payload_from_floats(&[0.0; 4]))
            .unwrap();
        assert!(matches!(
            store.track(&empty, m, v),
            Err(VectorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let (_, store) = setup(Metric::L2);
        assert!(matches!(
            store.intern_vector(&[0u8; 7]),
            Err(VectorError::DimensionMismatch { expected: 16, actual: 7 })
        ));
        assert!(store.prepare_query(&[0u8; 16]).is_ok());
        assert!(store.prepare_query(&[0u8; 12]).is_err());
    }

    #[test]
    fn test_cosine_normalizes_and_denormalizes() {
        let (intern, store) = setup(Metric::Cosine);
        let key = intern.intern(b"k");
        let original = [3.0f32, 0.0, 4.0, 0.0];
        let payload = payload_from_floats(&original);
        let (vec, magnitude) = store.intern_vector(&payload).unwrap();
        assert!((magnitude - 5.0).abs() < 1e-6);
        let unit = floats_from_payload(vec.as_bytes());
        let norm: f32 = unit.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        store.track(&key, magnitude, vec).unwrap();
        let back = floats_from_payload(&store.denormalized_value(&key).unwrap());
        for (b, o) in back.iter().zip(original.iter()) {
            assert!((b - o).abs() <= 1e-6 * o.abs().max(1.0));
        }
    }

    #[test]
    fn test_zero_vector_cosine() {
        let (intern, store) = setup(Metric::Cosine);
        let key = intern.intern(b"z");
        let payload = payload_from_floats(&[0.0; 4]);
        let (vec, magnitude) = store.intern_vector(&payload).unwrap();
        assert_eq!(magnitude, 0.0);
        store.track(&key, magnitude, vec).unwrap();
        // Zero magnitude denormalizes to the zero vector.
        assert_eq!(
            floats_from_payload(&store.denormalized_value(&key).unwrap()),
            vec![0.0; 4]
        );
    }

    #[test]
    fn test_load_tracked_conflicts() {
        let (intern, store) = setup(Metric::L2);
        let a = intern.intern(b"a");
        let b = intern.intern(b"b");
        assert!(store
            .load_tracked(vec![(7, a.clone(), Some(NO_MAGNITUDE))])
            .is_ok());
        assert!(matches!(
            store.load_tracked(vec![(7, b, Some(NO_MAGNITUDE))]),
            Err(VectorError::Conflict(_))
        ));
        // Next issued id skips past the loaded one.
        let (v, m) = store
            .intern_vector(&payload_from_floats(&[0.0; 4]))
            .unwrap();
        let c = intern.intern(b"c");
        assert_eq!(store.track(&c, m, v).unwrap(), 8);
    }

    #[test]
    fn test_unknown_magnitude_after_old_snapshot() {
        let (intern, store) = setup(Metric::Cosine);
        let key = intern.intern(b"k");
        store.load_tracked(vec![(0, key.clone(), None)]).unwrap();
        store
            .restore_payload(0, &payload_from_floats(&[1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(matches!(
            store.denormalized_value(&key),
            Err(VectorError::MagnitudeUnknown)
        ));
    }
}
