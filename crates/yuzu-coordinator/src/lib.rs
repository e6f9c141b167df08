//! Cluster fan-out for yuzu.
//!
//! A clustered deployment partitions the key space; every query fans out
//! to one node per partition and merges the per-partition neighbor lists
//! into a global top-k. This crate provides:
//!
//! - **`PartitionTransport`**: the RPC seam, with an in-memory
//!   implementation for tests (real deployments plug a gRPC binding in
//!   here)
//! - **`PartitionClient`**: retry with exponential backoff over the
//!   transport, honoring the query deadline
//! - **`search_fanout`**: concurrent per-partition dispatch plus a bounded
//!   K-way merge
//! - **`MetadataRegistry`**: schema metadata versioning with
//!   fingerprint-based pull-and-reconcile
//! - **query/request conversion** so the predicate travels as text and is
//!   parsed once per partition

mod client;
mod converter;
mod fanout;
mod metadata;
mod transport;
mod types;

pub use client::{PartitionClient, RetryPolicy};
pub use converter::{local_query_from_request, to_partition_request, LocalQuery};
pub use fanout::{merge_top_k, search_fanout};
pub use metadata::{handle_metadata_broadcast, MetadataRegistry};
pub use transport::{InMemoryTransport, PartitionTransport};
pub use types::{
    GlobalMetadata, MetadataEntry, MetadataHeader, PartitionNeighbor, PartitionSearchRequest,
    PartitionSearchResponse, PartitionTarget, RpcError, RpcErrorKind,
};

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A partition kept failing after the retry budget was spent.
    #[error("partition {partition} failed after {attempts} attempts: {source}")]
    PartialFailure {
        partition: String,
        attempts: u32,
        #[source]
        source: RpcError,
    },

    #[error("fan-out deadline exceeded")]
    DeadlineExceeded {
        /// Neighbors merged from the partitions that did answer.
        partial: Vec<PartitionNeighbor>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
