//! Externalization: serving index-owned vector bytes back to the host.
//!
//! The host can ask for a field's current value without a dictionary
//! round-trip; for cosine indices the answer is the denormalized vector
//! (stored unit vector × magnitude). Generated buffers go through a small
//! LRU so they stay alive until the host deep-copies them, even if a
//! concurrent mutation replaces the record meanwhile.
//!
//! Access is main-thread-only by construction: the cache sits inside a
//! [`MainThreadCell`], and the buffers are `Rc`s.

use std::cell::{Cell, UnsafeCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread::ThreadId;
use yuzu_intern::InternedStr;
use yuzu_vector::{KnnIndex, VectorError};

/// Cell owned by the thread that created it. Any access from another
/// thread panics, which is what makes it sound to share the containing
/// struct across threads.
pub struct MainThreadCell<T> {
    owner: ThreadId,
    borrowed: Cell<bool>,
    value: UnsafeCell<T>,
}

// SAFETY: the runtime owner check in `with` rejects every thread except
// the constructing one, and the borrow flag rejects re-entrancy, so the
// inner value is only ever touched single-threaded and unaliased.
unsafe impl<T> Sync for MainThreadCell<T> {}
unsafe impl<T> Send for MainThreadCell<T> {}

impl<T> MainThreadCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            owner: std::thread::current().id(),
            borrowed: Cell::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// # Panics
    ///
    /// Panics when called from a thread other than the constructing one,
    /// or re-entrantly.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        assert_eq!(
            std::thread::current().id(),
            self.owner,
            "main-thread-only value accessed from another thread"
        );
        assert!(!self.borrowed.replace(true), "re-entrant access");
        // SAFETY: owner thread + borrow flag give exclusive access.
        let result = f(unsafe { &mut *self.value.get() });
        self.borrowed.set(false);
        result
    }
}

/// Counters surfaced under `info`.
#[derive(Debug, Default, Clone)]
pub struct ExternalizerStats {
    pub generated_values: u64,
    pub fallback_fetches: u64,
    pub lru_evictions: u64,
}

/// LRU of generated buffers plus externalization stats.
pub struct Externalizer {
    capacity: usize,
    buffers: VecDeque<Rc<Vec<u8>>>,
    stats: ExternalizerStats,
}

impl Externalizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: VecDeque::new(),
            stats: ExternalizerStats::default(),
        }
    }

    /// Materialize the host-visible bytes of `key`'s vector field.
    ///
    /// Serves from the index (denormalizing when needed). When the record
    /// was restored from an old snapshot and its magnitude is still
    /// unknown, falls back to `fetch_primary` (a read of the primary key
    /// space); the magnitude recomputes on the record's next write.
    pub fn materialize(
        &mut self,
        index: &dyn KnnIndex,
        key: &InternedStr,
        fetch_primary: &dyn Fn() -> Option<Vec<u8>>,
    ) -> Option<Rc<Vec<u8>>> {
        let bytes = match index.value_bytes(key) {
            Ok(bytes) => bytes,
            Err(VectorError::MagnitudeUnknown) => {
                self.stats.fallback_fetches += 1;
                fetch_primary()?
            }
            Err(_) => return None,
        };
        let buffer = Rc::new(bytes);
        self.retain(Rc::clone(&buffer));
        self.stats.generated_values += 1;
        Some(buffer)
    }

    fn retain(&mut self, buffer: Rc<Vec<u8>>) {
        self.buffers.push_back(buffer);
        while self.buffers.len() > self.capacity {
            self.buffers.pop_front();
            self.stats.lru_evictions += 1;
        }
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn stats(&self) -> &ExternalizerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use yuzu_intern::InternStore;
    use yuzu_vector::{floats_from_payload, payload_from_floats, FlatIndex, Metric};

    #[test]
    fn test_main_thread_cell_same_thread() {
        let cell = MainThreadCell::new(1);
        cell.with(|v| *v += 1);
        assert_eq!(cell.with(|v| *v), 2);
    }

    #[test]
    fn test_main_thread_cell_rejects_other_thread() {
        let cell = Arc::new(MainThreadCell::new(0u32));
        let remote = Arc::clone(&cell);
        let result = std::thread::spawn(move || {
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                remote.with(|v| *v);
            }));
            caught.is_err()
        })
        .join()
        .unwrap();
        assert!(result);
    }

    #[test]
    fn test_materialize_denormalizes() {
        let intern = Arc::new(InternStore::new());
        let index = FlatIndex::new(2, Metric::Cosine, 8, Arc::clone(&intern));
        let key = intern.intern(b"k");
        index
            .add_record(&key, &payload_from_floats(&[3.0, 4.0]))
            .unwrap();

        let mut externalizer = Externalizer::new(4);
        let buffer = externalizer
            .materialize(&index, &key, &|| None)
            .expect("materializes from the index");
        let floats = floats_from_payload(&buffer);
        assert!((floats[0] - 3.0).abs() < 1e-5);
        assert!((floats[1] - 4.0).abs() < 1e-5);
        assert_eq!(externalizer.stats().fallback_fetches, 0);
    }

    #[test]
    fn test_magnitude_unknown_falls_back_to_primary() {
        let intern = Arc::new(InternStore::new());
        let index = FlatIndex::new(2, Metric::Cosine, 8, Arc::clone(&intern));
        let key = intern.intern(b"k");
        // Restored bijection without a magnitude, payload loaded.
        index.load_tracked(vec![(0, key.clone(), None)]).unwrap();
        index
            .load_kernel(
                &bincode::serialize(&FlatBlobMirror {
                    rows: vec![(0u64, payload_from_floats(&[0.6, 0.8]))],
                })
                .unwrap(),
            )
            .unwrap();

        let primary = payload_from_floats(&[3.0, 4.0]);
        let mut externalizer = Externalizer::new(4);
        let buffer = externalizer
            .materialize(&index, &key, &|| Some(primary.clone()))
            .expect("falls back to the primary record");
        assert_eq!(*buffer, primary);
        assert_eq!(externalizer.stats().fallback_fetches, 1);
    }

    // Mirrors the flat kernel blob layout for the fallback test.
    #[derive(serde::Serialize)]
    struct FlatBlobMirror {
        rows: Vec<(u64, Vec<u8>)>,
    }

    #[test]
    fn test_lru_keeps_buffers_alive_until_evicted() {
        let intern = Arc::new(InternStore::new());
        let index = FlatIndex::new(2, Metric::L2, 8, Arc::clone(&intern));
        let key = intern.intern(b"k");
        index
            .add_record(&key, &payload_from_floats(&[1.0, 2.0]))
            .unwrap();

        let mut externalizer = Externalizer::new(2);
        let first = externalizer.materialize(&index, &key, &|| None).unwrap();
        for _ in 0..4 {
            externalizer.materialize(&index, &key, &|| None).unwrap();
        }
        assert_eq!(externalizer.live_buffers(), 2);
        assert_eq!(externalizer.stats().lru_evictions, 3);
        // The caller's clone outlives eviction.
        assert_eq!(floats_from_payload(&first), vec![1.0, 2.0]);
    }
}
