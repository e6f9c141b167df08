//! Conversion between a node-local query and the partition request.
//!
//! The filter crosses the wire as its original text, so each partition
//! parses it once against its own schema registry instead of shipping a
//! structured tree whose index handles would not survive serialization.

use crate::types::PartitionSearchRequest;
use std::time::Duration;

/// The coordinator-facing shape of a local query.
#[derive(Debug, Clone)]
pub struct LocalQuery {
    pub index_name: String,
    pub attribute_alias: String,
    pub filter: String,
    pub query_vector: Vec<u8>,
    pub k: usize,
    pub timeout: Duration,
    pub ef_runtime: Option<usize>,
    pub no_content: bool,
}

/// Build the per-partition request, charging `elapsed` against the query's
/// timeout.
pub fn to_partition_request(query: &LocalQuery, elapsed: Duration) -> PartitionSearchRequest {
    let remaining = query.timeout.saturating_sub(elapsed);
    PartitionSearchRequest {
        index_name: query.index_name.clone(),
        attribute_alias: query.attribute_alias.clone(),
        filter: query.filter.clone(),
        query_vector: query.query_vector.clone(),
        k: query.k,
        timeout_ms: remaining.as_millis() as u64,
        ef_runtime: query.ef_runtime,
        no_content: query.no_content,
    }
}

/// Rehydrate a local query on the serving partition.
pub fn local_query_from_request(request: &PartitionSearchRequest) -> LocalQuery {
    LocalQuery {
        index_name: request.index_name.clone(),
        attribute_alias: request.attribute_alias.clone(),
        filter: request.filter.clone(),
        query_vector: request.query_vector.clone(),
        k: request.k,
        timeout: Duration::from_millis(request.timeout_ms),
        ef_runtime: request.ef_runtime,
        no_content: request.no_content,
    }
}
