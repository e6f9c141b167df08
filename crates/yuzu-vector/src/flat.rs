//! Flat (exact) vector index.
//!
//! Linear scan over all live rows. O(n · d) per search but exact, and the
//! baseline the graph index is measured against. Row storage is
//! preallocated in `block_size` chunks; growth happens under the exclusive
//! side of the resize lock while searches and scans hold it shared.

use crate::neighbors::{Neighbor, NeighborHeap};
use crate::store::VectorStore;
use crate::traits::{FilterFn, KnnIndex};
use crate::{Metric, Result, VectorError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use yuzu_intern::{InternStore, InternedStr};

struct FlatRow {
    internal_id: u64,
    key: InternedStr,
    payload: InternedStr,
    magnitude: f32,
}

struct FlatRows {
    slots: Vec<Option<FlatRow>>,
    slot_by_id: HashMap<u64, usize>,
    free: Vec<usize>,
    live: usize,
}

impl FlatRows {
    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Exact KNN index backed by a linear scan.
pub struct FlatIndex {
    store: VectorStore,
    block_size: usize,
    resize: RwLock<()>,
    rows: RwLock<FlatRows>,
}

/// Serialized kernel contents: payload bytes per internal id.
#[derive(Serialize, Deserialize)]
struct FlatKernelBlob {
    rows: Vec<(u64, Vec<u8>)>,
}

impl FlatIndex {
    pub fn new(dims: usize, metric: Metric, block_size: usize, intern: Arc<InternStore>) -> Self {
        let block_size = block_size.max(1);
        Self {
            store: VectorStore::new(dims, metric, block_size, intern),
            block_size,
            resize: RwLock::new(()),
            rows: RwLock::new(FlatRows {
                slots: Vec::new(),
                slot_by_id: HashMap::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Grow row storage by one block under the exclusive resize lock.
    fn grow(&self) {
        let _resize = self.resize.write();
        let mut rows = self.rows.write();
        if rows.free.is_empty() {
            let capacity = rows.capacity();
            tracing::warn!(
                capacity,
                expand_by = self.block_size,
                "resizing flat index"
            );
            for i in 0..self.block_size {
                rows.free.push(capacity + self.block_size - 1 - i);
            }
            let new_capacity = capacity + self.block_size;
            rows.slots.resize_with(new_capacity, || None);
        }
    }

    fn insert_row(&self, row: FlatRow) {
        loop {
            {
                let _resize = self.resize.read();
                let mut rows = self.rows.write();
                if let Some(slot) = rows.free.pop() {
                    rows.slot_by_id.insert(row.internal_id, slot);
                    rows.slots[slot] = Some(row);
                    rows.live += 1;
                    return;
                }
            }
            self.grow();
        }
    }
}

impl KnnIndex for FlatIndex {
    fn dimensions(&self) -> usize {
        self.store.dims()
    }

    fn metric(&self) -> Metric {
        self.store.metric()
    }

    fn record_count(&self) -> usize {
        self.store.record_count()
    }

    fn capacity(&self) -> usize {
        self.rows.read().capacity()
    }

    fn add_record(&self, key: &InternedStr, payload: &[u8]) -> Result<bool> {
        let (vector, magnitude) = self.store.intern_vector(payload)?;
        let internal_id = self.store.track(key, magnitude, vector.clone())?;
        self.insert_row(FlatRow {
            internal_id,
            key: key.clone(),
            payload: vector,
            magnitude,
        });
        Ok(true)
    }

    fn modify_record(&self, key: &InternedStr, payload: &[u8]) -> Result<bool> {
        if payload.is_empty() {
            // A record whose vector field vanished degrades to removal.
            self.remove_record(key)?;
            return Ok(false);
        }
        let (vector, magnitude) = self.store.intern_vector(payload)?;
        match self.store.payload_of(key) {
            Some(existing) if existing.ptr_eq(&vector) => return Ok(false),
            Some(_) => {}
            None => {
                return Err(VectorError::NotFound(format!(
                    "{:?}",
                    String::from_utf8_lossy(key.as_bytes())
                )))
            }
        }
        let internal_id = self.store.update(key, magnitude, vector.clone())?;
        let _resize = self.resize.read();
        let mut rows = self.rows.write();
        let slot = rows.slot_by_id.get(&internal_id).copied().ok_or_else(|| {
            VectorError::Internal(format!("missing row for internal id {}", internal_id))
        })?;
        if let Some(row) = rows.slots[slot].as_mut() {
            row.payload = vector;
            row.magnitude = magnitude;
        }
        Ok(true)
    }

    fn remove_record(&self, key: &InternedStr) -> Result<bool> {
        let Some(internal_id) = self.store.untrack(key)? else {
            return Ok(false);
        };
        let _resize = self.resize.read();
        let mut rows = self.rows.write();
        if let Some(slot) = rows.slot_by_id.remove(&internal_id) {
            rows.slots[slot] = None;
            rows.free.push(slot);
            rows.live -= 1;
        }
        Ok(true)
    }

    fn search(
        &self,
        query: &[u8],
        k: usize,
        _ef_runtime: Option<usize>,
        filter: Option<FilterFn<'_>>,
    ) -> Result<Vec<Neighbor>> {
        let prepared = self.store.prepare_query(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let normalizes = self.store.normalizes();
        let _resize = self.resize.read();
        let rows = self.rows.read();
        let mut heap = NeighborHeap::new(k);
        for row in rows.slots.iter().flatten() {
            if normalizes && row.magnitude == 0.0 {
                // Zero vectors have no direction; no valid cosine distance.
                continue;
            }
            if let Some(filter) = filter {
                if !filter(&row.key) {
                    continue;
                }
            }
            let floats = crate::distance::floats_from_payload(row.payload.as_bytes());
            let distance = self.store.metric().distance(&prepared, &floats);
            heap.push(Neighbor::new(row.key.clone(), distance));
        }
        Ok(heap.into_sorted())
    }

    fn prepare_query(&self, query: &[u8]) -> Result<Vec<f32>> {
        self.store.prepare_query(query)
    }

    fn distance_prepared(&self, key: &InternedStr, prepared: &[f32]) -> Result<f32> {
        let payload = self.store.payload_of(key).ok_or_else(|| {
            VectorError::NotFound(format!(
                "{:?}",
                String::from_utf8_lossy(key.as_bytes())
            ))
        })?;
        let floats = crate::distance::floats_from_payload(payload.as_bytes());
        Ok(self.store.metric().distance(prepared, &floats))
    }

    fn is_tracked(&self, key: &InternedStr) -> bool {
        self.store.is_tracked(key)
    }

    fn internal_id(&self, key: &InternedStr) -> Option<u64> {
        self.store.id_of(key)
    }

    fn key_of(&self, internal_id: u64) -> Option<InternedStr> {
        self.store.key_of(internal_id)
    }

    fn magnitude_of(&self, key: &InternedStr) -> Option<f32> {
        self.store.magnitude_of(key)
    }

    fn value_bytes(&self, key: &InternedStr) -> Result<Vec<u8>> {
        self.store.denormalized_value(key)
    }

    fn info(&self) -> Vec<(String, String)> {
        vec![
            ("type".to_string(), "VECTOR".to_string()),
            ("algorithm".to_string(), "FLAT".to_string()),
            ("dimensions".to_string(), self.store.dims().to_string()),
            ("distance_metric".to_string(), self.store.metric().as_str().to_string()),
            ("block_size".to_string(), self.block_size.to_string()),
            ("capacity".to_string(), self.capacity().to_string()),
            ("size".to_string(), self.record_count().to_string()),
        ]
    }

    fn save_kernel(&self) -> Result<Vec<u8>> {
        let _resize = self.resize.read();
        let rows = self.rows.read();
        let mut blob = FlatKernelBlob { rows: Vec::with_capacity(rows.live) };
        for row in rows.slots.iter().flatten() {
            blob.rows.push((row.internal_id, row.payload.as_bytes().to_vec()));
        }
        blob.rows.sort_by_key(|(id, _)| *id);
        bincode::serialize(&blob).map_err(|e| VectorError::Internal(e.to_string()))
    }

    fn load_kernel(&self, blob: &[u8]) -> Result<()> {
        let blob: FlatKernelBlob =
            bincode::deserialize(blob).map_err(|e| VectorError::Internal(e.to_string()))?;
        for (internal_id, payload) in blob.rows {
            let interned = self.store.restore_payload(internal_id, &payload)?;
            let key = self.store.key_of(internal_id).ok_or_else(|| {
                VectorError::Internal("bijection out of sync during kernel load".to_string())
            })?;
            let magnitude = self.store.magnitude_of(&key).unwrap_or(crate::store::NO_MAGNITUDE);
            self.insert_row(FlatRow {
                internal_id,
                key,
                payload: interned,
                magnitude,
            });
        }
        Ok(())
    }

    fn tracked_tuples(&self) -> Vec<(u64, InternedStr, f32)> {
        self.store.tracked_tuples()
    }

    fn load_tracked(&self, tuples: Vec<(u64, InternedStr, Option<f32>)>) -> Result<()> {
        self.store.load_tracked(tuples)
    }

    fn for_each_tracked_key(&self, f: &mut dyn FnMut(&InternedStr)) {
        self.store.for_each_key(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::payload_from_floats;

    fn setup(metric: Metric) -> (Arc<InternStore>, FlatIndex) {
        let intern = Arc::new(InternStore::new());
        let index = FlatIndex::new(4, metric, 4, Arc::clone(&intern));
        (intern, index)
    }

    fn insert(index: &FlatIndex, intern: &InternStore, name: &str, floats: &[f32]) -> InternedStr {
        let key = intern.intern(name.as_bytes());
        index.add_record(&key, &payload_from_floats(floats)).unwrap();
        key
    }

    #[test]
    fn test_empty_search() {
        let (_, index) = setup(Metric::L2);
        let hits = index
            .search(&payload_from_floats(&[1.0, 0.0, 0.0, 0.0]), 3, None, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_exact_match() {
        let (intern, index) = setup(Metric::Cosine);
        insert(&index, &intern, "a", &[1.0, 0.0, 0.0, 0.0]);
        let hits = index
            .search(&payload_from_floats(&[1.0, 0.0, 0.0, 0.0]), 1, None, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.as_bytes(), b"a");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_search_order_and_k() {
        let (intern, index) = setup(Metric::L2);
        for i in 0..10 {
            insert(&index, &intern, &format!("k{}", i), &[i as f32 / 10.0, 0.0, 0.0, 0.0]);
        }
        let hits = index
            .search(&payload_from_floats(&[1.0, 0.0, 0.0, 0.0]), 3, None, None)
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|n| n.key.as_bytes().to_vec()).collect();
        assert_eq!(keys, vec![b"k9".to_vec(), b"k8".to_vec(), b"k7".to_vec()]);
    }

    #[test]
    fn test_filtered_search() {
        let (intern, index) = setup(Metric::L2);
        for i in 0..10 {
            insert(&index, &intern, &format!("k{}", i), &[i as f32, 0.0, 0.0, 0.0]);
        }
        let allow = |key: &InternedStr| key.as_bytes()[1] % 2 == 0;
        let hits = index
            .search(
                &payload_from_floats(&[0.0, 0.0, 0.0, 0.0]),
                3,
                None,
                Some(&allow),
            )
            .unwrap();
        let keys: Vec<_> = hits.iter().map(|n| n.key.as_bytes().to_vec()).collect();
        assert_eq!(keys, vec![b"k0".to_vec(), b"k2".to_vec(), b"k4".to_vec()]);
    }

    #[test]
    fn test_modify_no_op_detection() {
        let (intern, index) = setup(Metric::L2);
        let key = insert(&index, &intern, "a", &[1.0, 2.0, 3.0, 4.0]);
        assert!(!index
            .modify_record(&key, &payload_from_floats(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap());
        assert!(index
            .modify_record(&key, &payload_from_floats(&[4.0, 3.0, 2.0, 1.0]))
            .unwrap());
    }

    #[test]
    fn test_modify_empty_degrades_to_remove() {
        let (intern, index) = setup(Metric::L2);
        let key = insert(&index, &intern, "a", &[1.0, 2.0, 3.0, 4.0]);
        assert!(!index.modify_record(&key, &[]).unwrap());
        assert!(!index.is_tracked(&key));
        assert_eq!(index.record_count(), 0);
    }

    #[test]
    fn test_remove_clears_both_directions() {
        let (intern, index) = setup(Metric::L2);
        let key = insert(&index, &intern, "a", &[1.0, 0.0, 0.0, 0.0]);
        let id = index.internal_id(&key).unwrap();
        assert!(index.remove_record(&key).unwrap());
        assert!(index.internal_id(&key).is_none());
        assert!(index.key_of(id).is_none());
        assert!(!index.remove_record(&key).unwrap());
    }

    #[test]
    fn test_grows_by_block_size() {
        let (intern, index) = setup(Metric::L2);
        assert_eq!(index.capacity(), 0);
        for i in 0..5 {
            insert(&index, &intern, &format!("k{}", i), &[i as f32, 0.0, 0.0, 0.0]);
        }
        assert_eq!(index.capacity(), 8);
        assert_eq!(index.record_count(), 5);
    }

    #[test]
    fn test_zero_magnitude_skipped_in_cosine_search() {
        let (intern, index) = setup(Metric::Cosine);
        insert(&index, &intern, "zero", &[0.0, 0.0, 0.0, 0.0]);
        insert(&index, &intern, "unit", &[0.0, 1.0, 0.0, 0.0]);
        let hits = index
            .search(&payload_from_floats(&[0.0, 1.0, 0.0, 0.0]), 10, None, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key.as_bytes(), b"unit");
    }

    #[test]
    fn test_distance_prepared_matches_search() {
        let (intern, index) = setup(Metric::L2);
        let key = insert(&index, &intern, "a", &[1.0, 1.0, 0.0, 0.0]);
        let query = payload_from_floats(&[0.0, 0.0, 0.0, 0.0]);
        let prepared = index.prepare_query(&query).unwrap();
        let direct = index.distance_prepared(&key, &prepared).unwrap();
        let searched = index.search(&query, 1, None, None).unwrap()[0].distance;
        assert!((direct - searched).abs() < 1e-6);
    }

    #[test]
    fn test_kernel_save_load_round_trip() {
        let (intern, index) = setup(Metric::Cosine);
        let keys: Vec<_> = (0..6)
            .map(|i| {
                insert(
                    &index,
                    &intern,
                    &format!("k{}", i),
                    &[1.0 + i as f32, 0.0, 1.0, 0.0],
                )
            })
            .collect();
        let tuples = index.tracked_tuples();
        let blob = index.save_kernel().unwrap();

        let restored = FlatIndex::new(4, Metric::Cosine, 4, Arc::new(InternStore::new()));
        restored
            .load_tracked(tuples.into_iter().map(|(id, k, m)| (id, k, Some(m))).collect())
            .unwrap();
        restored.load_kernel(&blob).unwrap();

        assert_eq!(restored.record_count(), 6);
        for key in &keys {
            assert_eq!(
                restored.value_bytes(key).unwrap(),
                index.value_bytes(key).unwrap()
            );
            assert_eq!(restored.internal_id(key), index.internal_id(key));
        }
    }

    #[test]
    fn test_concurrent_add_and_search() {
        use std::thread;

        let intern = Arc::new(InternStore::new());
        let index = Arc::new(FlatIndex::new(4, Metric::L2, 2, Arc::clone(&intern)));
        let mut handles = Vec::new();
        for t in 0..4 {
            let index = Arc::clone(&index);
            let intern = Arc::clone(&intern);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let key = intern.intern(format!("t{}:{}", t, i).as_bytes());
                    index
                        .add_record(&key, &payload_from_floats(&[i as f32, 0.0, 0.0, 0.0]))
                        .unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    let _ = index.search(&payload_from_floats(&[0.0; 4]), 5, None, None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.record_count(), 200);
    }
}
