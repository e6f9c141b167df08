//! Vector similarity search for yuzu.
//!
//! This crate provides the pieces every vector index variant shares:
//!
//! - **Distance kernels**: L2, inner product, cosine (stored as inner
//!   product over unit-normalized payloads)
//! - **`VectorStore`**: external key ↔ internal id tracking with magnitude
//!   bookkeeping and slab-arena payload interning
//! - **`KnnIndex` trait**: the interface the query executor and schema
//!   registry program against
//! - **`FlatIndex`**: exact linear-scan search with block-sized capacity
//!   growth
//!
//! The graph-based approximate index lives in `yuzu-hnsw` and builds on the
//! same store and trait.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use yuzu_intern::InternStore;
//! use yuzu_vector::{FlatIndex, KnnIndex, Metric};
//!
//! let intern = Arc::new(InternStore::new());
//! let index = FlatIndex::new(4, Metric::L2, 1024, Arc::clone(&intern));
//! let key = intern.intern(b"doc:1");
//! index.add_record(&key, &yuzu_vector::payload_from_floats(&[1.0, 0.0, 0.0, 0.0])).unwrap();
//! let hits = index.search(&yuzu_vector::payload_from_floats(&[1.0, 0.0, 0.0, 0.0]), 1, None, None).unwrap();
//! assert_eq!(hits.len(), 1);
//! ```

mod distance;
mod flat;
mod neighbors;
mod store;
mod traits;

pub use distance::{
    dot_product, euclidean_distance, floats_from_payload, ip_distance, normalize_in_place,
    payload_from_floats, payload_from_text, Metric,
};
pub use flat::FlatIndex;
pub use neighbors::{Neighbor, NeighborHeap};
pub use store::{VectorStore, NO_MAGNITUDE, UNKNOWN_MAGNITUDE};
pub use traits::{FilterFn, KnnIndex};

/// Error type for vector index operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("payload size mismatch: expected {expected} bytes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflicting record state: {0}")]
    Conflict(String),

    #[error("magnitude not yet recomputed for this record")]
    MagnitudeUnknown,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("intern error: {0}")]
    Intern(#[from] yuzu_intern::InternError),
}

/// Result type for vector index operations.
pub type Result<T> = std::result::Result<T, VectorError>;
