//! Graph index implementation.

use crate::graph::{random_layer, Layers, Neighbors, NodeId};
use crate::HnswError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use yuzu_intern::{InternStore, InternedStr};
use yuzu_vector::{
    floats_from_payload, FilterFn, KnnIndex, Metric, Neighbor, NeighborHeap, VectorError,
    VectorStore,
};

/// Graph construction and search parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Max connections per node in layers above 0.
    pub m: usize,

    /// Max connections in layer 0 (typically 2·M).
    pub m_max0: usize,

    /// Beam width during construction. Higher = better graph, slower build.
    pub ef_construction: usize,

    /// Default beam width during search; queries may override it.
    pub ef_runtime: usize,

    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 200,
            ef_runtime: 10,
            max_layers: 16,
        }
    }
}

/// Candidate during layer search.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    node_id: NodeId,
    distance: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

struct GraphNode {
    key: InternedStr,
    payload: InternedStr,
    magnitude: f32,
    max_layer: usize,
}

/// Approximate KNN index over a layered small-world graph.
///
/// Node slots are indexed by the record's internal id and preallocated in
/// `block_size` chunks; capacity growth takes the resize lock exclusively
/// while searches hold it shared. A narrow mutex serializes structural
/// mutation within shared mode.
pub struct HnswIndex {
    config: GraphConfig,
    block_size: usize,
    store: VectorStore,
    resize: RwLock<()>,
    mutate: Mutex<()>,
    nodes: RwLock<Vec<Option<GraphNode>>>,
    layers: Layers,
    entry_point: RwLock<Option<NodeId>>,
    max_layer: RwLock<usize>,
}

/// Serialized kernel contents: payload bytes per internal id. Edges are
/// rebuilt by re-wiring on load.
#[derive(Serialize, Deserialize)]
struct GraphKernelBlob {
    rows: Vec<(u64, Vec<u8>)>,
}

impl HnswIndex {
    pub fn new(
        dims: usize,
        metric: Metric,
        block_size: usize,
        config: GraphConfig,
        intern: Arc<InternStore>,
    ) -> Self {
        let block_size = block_size.max(1);
        let layers = Layers::new(config.max_layers, config.m, config.m_max0);
        Self {
            config,
            block_size,
            store: VectorStore::new(dims, metric, block_size, intern),
            resize: RwLock::new(()),
            mutate: Mutex::new(()),
            nodes: RwLock::new(Vec::new()),
            layers,
            entry_point: RwLock::new(None),
            max_layer: RwLock::new(0),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Grow node storage until `id` has a slot, one block at a time.
    fn ensure_slot(&self, id: NodeId) {
        loop {
            {
                let _resize = self.resize.read();
                if (id as usize) < self.nodes.read().len() {
                    return;
                }
            }
            let _resize = self.resize.write();
            let mut nodes = self.nodes.write();
            if (id as usize) < nodes.len() {
                continue;
            }
            let capacity = nodes.len();
            tracing::debug!(capacity, expand_by = self.block_size, "resizing graph index");
            nodes.resize_with(capacity + self.block_size, || None);
        }
    }

    fn distance_to_node(&self, query: &[f32], node_id: NodeId) -> f32 {
        let nodes = self.nodes.read();
        match nodes.get(node_id as usize).and_then(|n| n.as_ref()) {
            Some(node) => {
                let floats = floats_from_payload(node.payload.as_bytes());
                self.store.metric().distance(query, &floats)
            }
            None => f32::MAX,
        }
    }

    /// Beam search within one layer.
    ///
    /// Traversal explores every reachable node inside the beam; `result_ok`
    /// only gates which nodes may enter the result set, so filtered
    /// searches still navigate through non-matching regions.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: Vec<NodeId>,
        ef: usize,
        layer: usize,
        result_ok: Option<&dyn Fn(NodeId) -> bool>,
    ) -> Vec<Candidate> {
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();

        let admit = |id: NodeId| result_ok.map_or(true, |f| f(id));

        for ep in entry_points {
            let dist = self.distance_to_node(query, ep);
            let candidate = Candidate {
                node_id: ep,
                distance: dist,
            };
            candidates.push(Reverse(candidate.clone()));
            if admit(ep) {
                results.push(candidate);
            }
            visited.insert(ep);
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.distance > worst.distance {
                        break;
                    }
                }
            }

            let Some(layer_graph) = self.layers.get(layer) else {
                break;
            };
            let Some(neighbors) = layer_graph.neighbors(current.node_id) else {
                continue;
            };
            for &neighbor_id in neighbors.iter() {
                if !visited.insert(neighbor_id) {
                    continue;
                }
                let dist = self.distance_to_node(query, neighbor_id);
                let beats_worst = results.len() < ef
                    || results.peek().map(|w| dist < w.distance).unwrap_or(true);
                if beats_worst {
                    let candidate = Candidate {
                        node_id: neighbor_id,
                        distance: dist,
                    };
                    candidates.push(Reverse(candidate.clone()));
                    if admit(neighbor_id) {
                        results.push(candidate);
                        while results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut result_vec: Vec<_> = results.into_iter().collect();
        result_vec.sort();
        result_vec
    }

    fn select_neighbors(&self, candidates: &[Candidate], m: usize) -> Vec<NodeId> {
        candidates.iter().take(m).map(|c| c.node_id).collect()
    }

    /// Wire `node_id` into its neighbors at `layer`, shrinking any
    /// neighborhood that ends up over the layer's max degree.
    fn connect_node(&self, node_id: NodeId, neighbors: Vec<NodeId>, layer: usize) {
        let Some(layer_graph) = self.layers.get(layer) else {
            return;
        };
        let max_degree = layer_graph.max_degree();
        for &neighbor_id in &neighbors {
            layer_graph.add_edge(node_id, neighbor_id);
        }
        for &neighbor_id in &neighbors {
            let Some(nn) = layer_graph.neighbors(neighbor_id) else {
                continue;
            };
            if nn.len() <= max_degree {
                continue;
            }
            let nodes = self.nodes.read();
            let Some(anchor) = nodes.get(neighbor_id as usize).and_then(|n| n.as_ref()) else {
                continue;
            };
            let anchor_floats = floats_from_payload(anchor.payload.as_bytes());
            let mut scored: Vec<Candidate> = nn
                .iter()
                .filter_map(|&nn_id| {
                    nodes.get(nn_id as usize).and_then(|n| n.as_ref()).map(|n| Candidate {
                        node_id: nn_id,
                        distance: self
                            .store
                            .metric()
                            .distance(&anchor_floats, &floats_from_payload(n.payload.as_bytes())),
                    })
                })
                .collect();
            scored.sort();
            let mut shrunk = Neighbors::with_capacity(max_degree);
            for candidate in scored.into_iter().take(max_degree) {
                shrunk.add(candidate.node_id);
            }
            layer_graph.set_neighbors(neighbor_id, shrunk);
        }
    }

    /// Insert `node_id` (already placed in the node table) into the layer
    /// stack. Caller holds the resize lock shared and the mutate lock.
    fn wire_node(&self, node_id: NodeId, node_layer: usize, vector: &[f32]) {
        let (entry_point, current_max_layer) = {
            let ep = *self.entry_point.read();
            let ml = *self.max_layer.read();
            (ep, ml)
        };

        let Some(entry_point) = entry_point else {
            *self.entry_point.write() = Some(node_id);
            *self.max_layer.write() = node_layer;
            for layer in 0..=node_layer {
                if let Some(layer_graph) = self.layers.get(layer) {
                    layer_graph.set_neighbors(node_id, Neighbors::new());
                }
            }
            return;
        };

        let mut ep = vec![entry_point];
        for layer in (node_layer + 1..=current_max_layer).rev() {
            let found = self.search_layer(vector, ep.clone(), 1, layer, None);
            if let Some(closest) = found.first() {
                ep = vec![closest.node_id];
            }
        }

        for layer in (0..=node_layer.min(current_max_layer)).rev() {
            let found =
                self.search_layer(vector, ep.clone(), self.config.ef_construction, layer, None);
            let m = if layer == 0 { self.config.m_max0 } else { self.config.m };
            let chosen = self.select_neighbors(&found, m);
            if let Some(layer_graph) = self.layers.get(layer) {
                if !layer_graph.contains(node_id) {
                    layer_graph.set_neighbors(node_id, Neighbors::new());
                }
            }
            self.connect_node(node_id, chosen, layer);
            ep = found.first().map(|c| vec![c.node_id]).unwrap_or(vec![entry_point]);
        }

        if node_layer > current_max_layer {
            *self.entry_point.write() = Some(node_id);
            *self.max_layer.write() = node_layer;
        }
    }

    fn place_and_wire(&self, node_id: NodeId, node: GraphNode, node_layer: usize) {
        self.ensure_slot(node_id);
        let _resize = self.resize.read();
        let _mutate = self.mutate.lock();
        let vector = floats_from_payload(node.payload.as_bytes());
        self.nodes.write()[node_id as usize] = Some(node);
        self.wire_node(node_id, node_layer, &vector);
    }

    /// Detach `node_id` from the graph and clear its slot. Caller holds the
    /// resize lock shared and the mutate lock.
    fn unwire_node(&self, node_id: NodeId) {
        self.layers.remove_node(node_id);
        {
            let mut nodes = self.nodes.write();
            if let Some(slot) = nodes.get_mut(node_id as usize) {
                *slot = None;
            }
        }
        if *self.entry_point.read() == Some(node_id) {
            // Promote the surviving node with the tallest layer stack.
            let nodes = self.nodes.read();
            let replacement = nodes
                .iter()
                .enumerate()
                .filter_map(|(id, n)| n.as_ref().map(|n| (id as NodeId, n.max_layer)))
                .max_by_key(|&(id, layer)| (layer, std::cmp::Reverse(id)));
            match replacement {
                Some((id, layer)) => {
                    *self.entry_point.write() = Some(id);
                    *self.max_layer.write() = layer;
                }
                None => {
                    *self.entry_point.write() = None;
                    *self.max_layer.write() = 0;
                }
            }
        }
    }
}

impl KnnIndex for HnswIndex {
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
        self.nodes.read().len()
    }

    fn add_record(&self, key: &InternedStr, payload: &[u8]) -> yuzu_vector::Result<bool> {
        let (vector, magnitude) = self.store.intern_vector(payload)?;
        let internal_id = self.store.track(key, magnitude, vector.clone())?;
        let node_layer = random_layer(self.config.m, self.config.max_layers);
        self.place_and_wire(
            internal_id,
            GraphNode {
                key: key.clone(),
                payload: vector,
                magnitude,
                max_layer: node_layer,
            },
            node_layer,
        );
        Ok(true)
    }

    fn modify_record(&self, key: &InternedStr, payload: &[u8]) -> yuzu_vector::Result<bool> {
        if payload.is_empty() {
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
        // Re-wire at the node's original level so its layer membership
        // stays consistent.
        let _resize = self.resize.read();
        let _mutate = self.mutate.lock();
        let node_layer = {
            let nodes = self.nodes.read();
            nodes
                .get(internal_id as usize)
                .and_then(|n| n.as_ref())
                .map(|n| n.max_layer)
                .ok_or_else(|| {
                    VectorError::Internal(format!("missing graph node for id {}", internal_id))
                })?
        };
        self.layers.remove_node(internal_id);
        {
            let mut nodes = self.nodes.write();
            if let Some(Some(node)) = nodes.get_mut(internal_id as usize) {
                node.payload = vector.clone();
                node.magnitude = magnitude;
            }
        }
        let floats = floats_from_payload(vector.as_bytes());
        self.wire_node(internal_id, node_layer, &floats);
        Ok(true)
    }

    fn remove_record(&self, key: &InternedStr) -> yuzu_vector::Result<bool> {
        let Some(internal_id) = self.store.untrack(key)? else {
            return Ok(false);
        };
        let _resize = self.resize.read();
        let _mutate = self.mutate.lock();
        self.unwire_node(internal_id);
        Ok(true)
    }

    fn search(
        &self,
        query: &[u8],
        k: usize,
        ef_runtime: Option<usize>,
        filter: Option<FilterFn<'_>>,
    ) -> yuzu_vector::Result<Vec<Neighbor>> {
        let prepared = self.store.prepare_query(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let _resize = self.resize.read();
        let Some(entry_point) = *self.entry_point.read() else {
            return Ok(Vec::new());
        };
        let current_max_layer = *self.max_layer.read();

        let mut ep = vec![entry_point];
        for layer in (1..=current_max_layer).rev() {
            let found = self.search_layer(&prepared, ep.clone(), 1, layer, None);
            if let Some(closest) = found.first() {
                ep = vec![closest.node_id];
            }
        }

        let normalizes = self.store.normalizes();
        let result_ok = |id: NodeId| {
            let nodes = self.nodes.read();
            let Some(node) = nodes.get(id as usize).and_then(|n| n.as_ref()) else {
                return false;
            };
            if normalizes && node.magnitude == 0.0 {
                return false;
            }
            filter.map_or(true, |f| f(&node.key))
        };
        let ef = ef_runtime.unwrap_or(self.config.ef_runtime).max(k);
        let found = self.search_layer(&prepared, ep, ef, 0, Some(&result_ok));

        let nodes = self.nodes.read();
        let mut heap = NeighborHeap::new(k);
        for candidate in found {
            if let Some(node) = nodes.get(candidate.node_id as usize).and_then(|n| n.as_ref()) {
                heap.push(Neighbor::new(node.key.clone(), candidate.distance));
            }
        }
        Ok(heap.into_sorted())
    }

    fn prepare_query(&self, query: &[u8]) -> yuzu_vector::Result<Vec<f32>> {
        self.store.prepare_query(query)
    }

    fn distance_prepared(&self, key: &InternedStr, prepared: &[f32]) -> yuzu_vector::Result<f32> {
        let payload = self.store.payload_of(key).ok_or_else(|| {
            VectorError::NotFound(format!(
                "{:?}",
                String::from_utf8_lossy(key.as_bytes())
            ))
        })?;
        let floats = floats_from_payload(payload.as_bytes());
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

    fn value_bytes(&self, key: &InternedStr) -> yuzu_vector::Result<Vec<u8>> {
        self.store.denormalized_value(key)
    }

    fn info(&self) -> Vec<(String, String)> {
        vec![
            ("type".to_string(), "VECTOR".to_string()),
            ("algorithm".to_string(), "HNSW".to_string()),
            ("m".to_string(), self.config.m.to_string()),
            ("ef_construction".to_string(), self.config.ef_construction.to_string()),
            ("ef_runtime".to_string(), self.config.ef_runtime.to_string()),
            ("dimensions".to_string(), self.store.dims().to_string()),
            ("distance_metric".to_string(), self.store.metric().as_str().to_string()),
            ("block_size".to_string(), self.block_size.to_string()),
            ("capacity".to_string(), self.capacity().to_string()),
            ("size".to_string(), self.record_count().to_string()),
        ]
    }

    fn save_kernel(&self) -> yuzu_vector::Result<Vec<u8>> {
        let _resize = self.resize.read();
        let nodes = self.nodes.read();
        let mut blob = GraphKernelBlob { rows: Vec::new() };
        for (id, node) in nodes.iter().enumerate() {
            if let Some(node) = node {
                blob.rows.push((id as u64, node.payload.as_bytes().to_vec()));
            }
        }
        bincode::serialize(&blob).map_err(|e| VectorError::Internal(e.to_string()))
    }

    fn load_kernel(&self, blob: &[u8]) -> yuzu_vector::Result<()> {
        let blob: GraphKernelBlob = bincode::deserialize(blob)
            .map_err(|e| HnswError::Serialization(e.to_string()))
            .map_err(|e| VectorError::Internal(e.to_string()))?;
        for (internal_id, payload) in blob.rows {
            let interned = self.store.restore_payload(internal_id, &payload)?;
            let key = self.store.key_of(internal_id).ok_or_else(|| {
                VectorError::Internal("bijection out of sync during kernel load".to_string())
            })?;
            let magnitude = self
                .store
                .magnitude_of(&key)
                .unwrap_or(yuzu_vector::NO_MAGNITUDE);
            let node_layer = random_layer(self.config.m, self.config.max_layers);
            self.place_and_wire(
                internal_id,
                GraphNode {
                    key,
                    payload: interned,
                    magnitude,
                    max_layer: node_layer,
                },
                node_layer,
            );
        }
        Ok(())
    }

    fn tracked_tuples(&self) -> Vec<(u64, InternedStr, f32)> {
        self.store.tracked_tuples()
    }

    fn load_tracked(
        &self,
        tuples: Vec<(u64, InternedStr, Option<f32>)>,
    ) -> yuzu_vector::Result<()> {
        self.store.load_tracked(tuples)
    }

    fn for_each_tracked_key(&self, f: &mut dyn FnMut(&InternedStr)) {
        self.store.for_each_key(f)
    }
}
