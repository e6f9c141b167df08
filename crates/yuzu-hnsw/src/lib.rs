//! Layered small-world graph index for yuzu.
//!
//! Approximate nearest neighbor search over the shared vector record store.
//! The graph is a stack of navigable small-world layers:
//!
//! - Higher layers hold exponentially fewer nodes
//! - Search descends from an entry point, narrowing with a beam of width
//!   `ef`
//! - Inserts wire a node into each layer up to its drawn level and shrink
//!   overfull neighborhoods
//!
//! # Parameters
//!
//! - `m`: max connections per node per layer (default: 16)
//! - `m_max0`: max connections in layer 0 (default: 32)
//! - `ef_construction`: beam width while building (default: 200)
//! - `ef_runtime`: default beam width while searching, overridable per
//!   query (default: 10)
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use yuzu_hnsw::{GraphConfig, HnswIndex};
//! use yuzu_intern::InternStore;
//! use yuzu_vector::{KnnIndex, Metric, payload_from_floats};
//!
//! let intern = Arc::new(InternStore::new());
//! let index = HnswIndex::new(4, Metric::L2, 1024, GraphConfig::default(), Arc::clone(&intern));
//! let key = intern.intern(b"doc:1");
//! index.add_record(&key, &payload_from_floats(&[1.0, 0.0, 0.0, 0.0])).unwrap();
//! let hits = index.search(&payload_from_floats(&[1.0, 0.0, 0.0, 0.0]), 1, None, None).unwrap();
//! assert_eq!(hits[0].key.as_bytes(), b"doc:1");
//! ```

mod graph;
mod index;

pub use index::{GraphConfig, HnswIndex};

/// Error type for graph-index operations.
#[derive(Debug, thiserror::Error)]
pub enum HnswError {
    #[error("vector error: {0}")]
    Vector(#[from] yuzu_vector::VectorError),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for graph-index operations.
pub type Result<T> = std::result::Result<T, HnswError>;
