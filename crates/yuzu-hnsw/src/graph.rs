//! Layered adjacency storage for the graph index.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Node identifier: the record's internal id in the vector store.
pub type NodeId = u64;

/// Neighbor list for a node at a specific layer.
#[derive(Debug, Clone, Default)]
pub struct Neighbors {
    ids: Vec<NodeId>,
}

impl Neighbors {
    pub fn new() -> Self {
        Self { ids: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
        }
    }

    /// Add a neighbor. Returns false if already present.
    pub fn add(&mut self, id: NodeId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn remove(&mut self, id: NodeId) -> bool {
        if let Some(pos) = self.ids.iter().position(|&x| x == id) {
            self.ids.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.ids.iter()
    }

    pub fn into_ids(self) -> Vec<NodeId> {
        self.ids
    }
}

/// Adjacency lists for a single layer.
pub struct LayerGraph {
    adjacency: RwLock<HashMap<NodeId, Neighbors>>,
    max_degree: usize,
}

impl LayerGraph {
    pub fn new(max_degree: usize) -> Self {
        Self {
            adjacency: RwLock::new(HashMap::new()),
            max_degree,
        }
    }

    pub fn neighbors(&self, node_id: NodeId) -> Option<Neighbors> {
        self.adjacency.read().get(&node_id).cloned()
    }

    pub fn set_neighbors(&self, node_id: NodeId, neighbors: Neighbors) {
        self.adjacency.write().insert(node_id, neighbors);
    }

    /// Add a bidirectional edge.
    pub fn add_edge(&self, from: NodeId, to: NodeId) {
        let mut adj = self.adjacency.write();
        adj.entry(from).or_default().add(to);
        adj.entry(to).or_default().add(from);
    }

    /// Remove a node and all back-references to it.
    pub fn remove_node(&self, node_id: NodeId) {
        let mut adj = self.adjacency.write();
        if let Some(neighbors) = adj.remove(&node_id) {
            for neighbor_id in neighbors.into_ids() {
                if let Some(nn) = adj.get_mut(&neighbor_id) {
                    nn.remove(node_id);
                }
            }
        }
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.adjacency.read().contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.adjacency.read().len()
    }

    pub fn max_degree(&self) -> usize {
        self.max_degree
    }
}

/// The full layer stack. Layer 0 allows `m_max0` connections, the rest `m`.
pub struct Layers {
    layers: Vec<LayerGraph>,
}

impl Layers {
    pub fn new(max_layers: usize, m: usize, m_max0: usize) -> Self {
        let layers = (0..max_layers)
            .map(|layer| LayerGraph::new(if layer == 0 { m_max0 } else { m }))
            .collect();
        Self { layers }
    }

    pub fn get(&self, layer: usize) -> Option<&LayerGraph> {
        self.layers.get(layer)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn remove_node(&self, node_id: NodeId) {
        for layer in &self.layers {
            layer.remove_node(node_id);
        }
    }
}

/// Draw the top layer for a new node: geometric with rate 1/ln(M).
pub fn random_layer(m: usize, max_layers: usize) -> usize {
    use rand::Rng;

    let m_l = 1.0 / (m as f64).ln();
    let uniform: f64 = rand::thread_rng().gen_range(0.0001..1.0);
    let layer = (-uniform.ln() * m_l).floor() as usize;
    layer.min(max_layers - 1)
}
