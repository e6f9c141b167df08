//! Transport abstraction for fan-out RPCs.
//!
//! The trait keeps the coordinator testable and deployment-agnostic: a
//! production binding wraps a gRPC channel per peer, tests use
//! [`InMemoryTransport`] with scripted partitions and failure injection.

use crate::types::{
    GlobalMetadata, MetadataHeader, PartitionSearchRequest, PartitionSearchResponse,
    PartitionTarget, RpcError, RpcErrorKind,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Fan-out RPC surface.
///
/// Implementations handle connection management and serialization; the
/// retry policy lives above, in [`crate::PartitionClient`]. All methods
/// may take network-scale time.
#[async_trait]
pub trait PartitionTransport: Send + Sync {
    /// Run a KNN search on one partition.
    async fn search_index_partition(
        &self,
        target: &PartitionTarget,
        request: PartitionSearchRequest,
    ) -> Result<PartitionSearchResponse, RpcError>;

    /// Pull a peer's full metadata registry.
    async fn get_global_metadata(
        &self,
        target: &PartitionTarget,
    ) -> Result<GlobalMetadata, RpcError>;

    /// Multicast a version header; receivers pull when their fingerprint
    /// differs.
    async fn broadcast_metadata(
        &self,
        targets: &[PartitionTarget],
        header: MetadataHeader,
    ) -> Result<(), RpcError>;
}

type SearchHandler =
    Box<dyn Fn(&PartitionSearchRequest) -> Result<PartitionSearchResponse, RpcError> + Send + Sync>;

struct PartitionState {
    handler: SearchHandler,
    /// Failures to inject before the handler runs, consumed in order.
    scripted_failures: Vec<RpcErrorKind>,
    calls: u64,
}

/// In-process transport for tests: per-partition response handlers plus
/// scripted failure injection.
pub struct InMemoryTransport {
    partitions: Mutex<HashMap<String, PartitionState>>,
    metadata: Mutex<HashMap<String, GlobalMetadata>>,
    broadcasts: Mutex<Vec<MetadataHeader>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            metadata: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    /// Register a partition that answers with `handler`.
    pub fn register(
        &self,
        partition: &str,
        handler: impl Fn(&PartitionSearchRequest) -> Result<PartitionSearchResponse, RpcError>
            + Send
            + Sync
            + 'static,
    ) {
        self.partitions.lock().insert(
            partition.to_string(),
            PartitionState {
                handler: Box::new(handler),
                scripted_failures: Vec::new(),
                calls: 0,
            },
        );
    }

    /// Make the next `times` calls to `partition` fail with `kind`.
    pub fn fail_next(&self, partition: &str, kind: RpcErrorKind, times: usize) {
        if let Some(state) = self.partitions.lock().get_mut(partition) {
            state.scripted_failures.extend(std::iter::repeat(kind).take(times));
        }
    }

    /// How many search calls `partition` has seen (including injected
    /// failures).
    pub fn call_count(&self, partition: &str) -> u64 {
        self.partitions.lock().get(partition).map_or(0, |s| s.calls)
    }

    pub fn set_metadata(&self, partition: &str, metadata: GlobalMetadata) {
        self.metadata.lock().insert(partition.to_string(), metadata);
    }

    pub fn broadcast_headers(&self) -> Vec<MetadataHeader> {
        self.broadcasts.lock().clone()
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PartitionTransport for InMemoryTransport {
    async fn search_index_partition(
        &self,
        target: &PartitionTarget,
        request: PartitionSearchRequest,
    ) -> Result<PartitionSearchResponse, RpcError> {
        let mut partitions = self.partitions.lock();
        let state = partitions.get_mut(&target.partition).ok_or_else(|| {
            RpcError::unavailable(format!("no such partition: {}", target.partition))
        })?;
        state.calls += 1;
        if !state.scripted_failures.is_empty() {
            let kind = state.scripted_failures.remove(0);
            return Err(RpcError::new(kind, "scripted failure"));
        }
        (state.handler)(&request)
    }

    async fn get_global_metadata(
        &self,
        target: &PartitionTarget,
    ) -> Result<GlobalMetadata, RpcError> {
        self.metadata
            .lock()
            .get(&target.partition)
            .cloned()
            .ok_or_else(|| {
                RpcError::unavailable(format!("no metadata for partition: {}", target.partition))
            })
    }

    async fn broadcast_metadata(
        &self,
        _targets: &[PartitionTarget],
        header: MetadataHeader,
    ) -> Result<(), RpcError> {
        self.broadcasts.lock().push(header);
        Ok(())
    }
}
