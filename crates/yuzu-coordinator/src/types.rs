//! Wire types for the fan-out protocol.

use serde::{Deserialize, Serialize};

/// One reachable node serving a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionTarget {
    /// Stable partition identifier.
    pub partition: String,
    /// Node address (scheme is the transport's business).
    pub address: String,
}

/// A per-partition search request. The predicate travels as text so each
/// partition parses it once against its own schema registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSearchRequest {
    pub index_name: String,
    pub attribute_alias: String,
    pub filter: String,
    pub query_vector: Vec<u8>,
    pub k: usize,
    /// Remaining budget when the request was issued.
    pub timeout_ms: u64,
    pub ef_runtime: Option<usize>,
    pub no_content: bool,
}

/// One neighbor from a partition, already scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionNeighbor {
    pub key: Vec<u8>,
    pub distance: f32,
    pub attributes: Vec<(String, Vec<u8>)>,
}

impl PartitionNeighbor {
    pub fn new(key: impl AsRef<[u8]>, distance: f32) -> Self {
        Self {
            key: key.as_ref().to_vec(),
            distance,
            attributes: Vec::new(),
        }
    }
}

/// Ordered neighbor list from one partition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionSearchResponse {
    pub neighbors: Vec<PartitionNeighbor>,
}

/// Top-level metadata version header, broadcast over the metadata channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataHeader {
    pub version: u64,
    pub fingerprint: u64,
}

/// One metadata entry (a schema definition, typically). A tombstone has
/// `fingerprint == 0` and `encoding_version == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub name: String,
    pub version: u64,
    pub fingerprint: u64,
    pub encoding_version: u32,
    pub payload: Vec<u8>,
}

impl MetadataEntry {
    pub fn is_tombstone(&self) -> bool {
        self.fingerprint == 0 && self.encoding_version == 0
    }
}

/// Full metadata pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalMetadata {
    pub header: MetadataHeader,
    pub entries: Vec<MetadataEntry>,
}

/// RPC failure classification, mirroring the transport's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    Unavailable,
    Unknown,
    ResourceExhausted,
    Internal,
    DataLoss,
    InvalidArgument,
    NotFound,
    DeadlineExceeded,
}

impl RpcErrorKind {
    /// Whether the retry policy may reissue the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcErrorKind::Unavailable
                | RpcErrorKind::Unknown
                | RpcErrorKind::ResourceExhausted
                | RpcErrorKind::Internal
                | RpcErrorKind::DataLoss
        )
    }
}

/// An RPC failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unavailable, message)
    }
}
