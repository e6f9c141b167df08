//! Fan-out dispatch and bounded K-way merge.

use crate::client::PartitionClient;
use crate::types::{
    PartitionNeighbor, PartitionSearchRequest, PartitionTarget, RpcErrorKind,
};
use crate::{CoordinatorError, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Issue the request to every target concurrently and merge the answers
/// into the global top-k.
///
/// Any partition that exhausts its retries fails the whole query with
/// [`CoordinatorError::PartialFailure`]; a deadline-bounded partition
/// failure instead surfaces [`CoordinatorError::DeadlineExceeded`]
/// carrying what the merge had.
pub async fn search_fanout(
    client: Arc<PartitionClient>,
    targets: Vec<PartitionTarget>,
    request: PartitionSearchRequest,
    deadline: Instant,
) -> Result<Vec<PartitionNeighbor>> {
    let k = request.k;
    let mut tasks = JoinSet::new();
    for target in targets {
        let client = Arc::clone(&client);
        let mut request = request.clone();
        let remaining = deadline.saturating_duration_since(Instant::now());
        request.timeout_ms = remaining.as_millis() as u64;
        tasks.spawn(async move {
            let outcome = client
                .search_index_partition(&target, request, deadline)
                .await;
            (target, outcome)
        });
    }

    let mut lists: Vec<Vec<PartitionNeighbor>> = Vec::new();
    let mut failure: Option<CoordinatorError> = None;
    let mut deadline_hit = false;
    while let Some(joined) = tasks.join_next().await {
        let (target, outcome) = joined
            .map_err(|e| CoordinatorError::Internal(format!("fan-out task failed: {}", e)))?;
        match outcome {
            Ok(response) => lists.push(response.neighbors),
            Err((error, attempts)) => {
                tracing::warn!(
                    partition = %target.partition,
                    attempts,
                    %error,
                    "partition search failed"
                );
                if error.kind == RpcErrorKind::DeadlineExceeded {
                    deadline_hit = true;
                } else if failure.is_none() {
                    failure = Some(CoordinatorError::PartialFailure {
                        partition: target.partition,
                        attempts,
                        source: error,
                    });
                }
            }
        }
    }

    if let Some(failure) = failure {
        return Err(failure);
    }
    let merged = merge_top_k(lists, k);
    if deadline_hit {
        return Err(CoordinatorError::DeadlineExceeded { partial: merged });
    }
    Ok(merged)
}

struct MergeHead {
    neighbor: PartitionNeighbor,
    list: usize,
    offset: usize,
}

impl PartialEq for MergeHead {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead {}

impl PartialOrd for MergeHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the closest neighbor (ties
        // by key) pops first.
        other
            .neighbor
            .distance
            .total_cmp(&self.neighbor.distance)
            .then_with(|| other.neighbor.key.cmp(&self.neighbor.key))
    }
}

/// Bounded K-way merge over per-partition neighbor lists (each sorted
/// ascending), keeping the global top-k by distance with ties broken by
/// key.
pub fn merge_top_k(lists: Vec<Vec<PartitionNeighbor>>, k: usize) -> Vec<PartitionNeighbor> {
    let mut heads: BinaryHeap<MergeHead> = BinaryHeap::new();
    for (list_index, list) in lists.iter().enumerate() {
        if let Some(first) = list.first() {
            heads.push(MergeHead {
                neighbor: first.clone(),
                list: list_index,
                offset: 0,
            });
        }
    }
    let mut merged = Vec::with_capacity(k.min(lists.iter().map(Vec::len).sum()));
    while merged.len() < k {
        let Some(head) = heads.pop() else { break };
        if let Some(next) = lists[head.list].get(head.offset + 1) {
            heads.push(MergeHead {
                neighbor: next.clone(),
                list: head.list,
                offset: head.offset + 1,
            });
        }
        merged.push(head.neighbor);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use crate::types::PartitionSearchResponse;
    use std::time::Duration;

    fn target(partition: &str) -> PartitionTarget {
        PartitionTarget {
            partition: partition.to_string(),
            address: format!("mem://{}", partition),
        }
    }

    fn request(k: usize) -> PartitionSearchRequest {
        PartitionSearchRequest {
            index_name: "idx".to_string(),
            attribute_alias: "v".to_string(),
            filter: "*".to_string(),
            query_vector: vec![0; 8],
            k,
            timeout_ms: 1_000,
            ef_runtime: None,
            no_content: true,
        }
    }

    fn keys(neighbors: &[PartitionNeighbor]) -> Vec<String> {
        neighbors
            .iter()
            .map(|n| String::from_utf8_lossy(&n.key).to_string())
            .collect()
    }

    #[test]
    fn test_two_partition_merge() {
        let merged = merge_top_k(
            vec![
                vec![
                    PartitionNeighbor::new("a", 0.1),
                    PartitionNeighbor::new("b", 0.3),
                ],
                vec![
                    PartitionNeighbor::new("c", 0.2),
                    PartitionNeighbor::new("d", 0.4),
                ],
            ],
            3,
        );
        assert_eq!(keys(&merged), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_merge_tie_break_by_key() {
        let merged = merge_top_k(
            vec![
                vec![PartitionNeighbor::new("zz", 0.5)],
                vec![PartitionNeighbor::new("aa", 0.5)],
            ],
            2,
        );
        assert_eq!(keys(&merged), vec!["aa", "zz"]);
    }

    #[test]
    fn test_merge_short_lists() {
        let merged = merge_top_k(vec![vec![], vec![PartitionNeighbor::new("a", 0.1)]], 5);
        assert_eq!(keys(&merged), vec!["a"]);
        assert!(merge_top_k(vec![], 5).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_merges_partitions() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.register("p0", |_| {
            Ok(PartitionSearchResponse {
                neighbors: vec![
                    PartitionNeighbor::new("a", 0.1),
                    PartitionNeighbor::new("b", 0.3),
                ],
            })
        });
        transport.register("p1", |_| {
            Ok(PartitionSearchResponse {
                neighbors: vec![
                    PartitionNeighbor::new("c", 0.2),
                    PartitionNeighbor::new("d", 0.4),
                ],
            })
        });
        let client = Arc::new(PartitionClient::new(transport));

        let merged = search_fanout(
            client,
            vec![target("p0"), target("p1")],
            request(3),
            Instant::now() + Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(keys(&merged), vec!["a", "c", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_retries_then_succeeds() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.register("p0", |_| {
            Ok(PartitionSearchResponse {
                neighbors: vec![PartitionNeighbor::new("a", 0.1)],
            })
        });
        transport.fail_next("p0", RpcErrorKind::Unavailable, 2);
        let client = Arc::new(PartitionClient::new(transport.clone()));

        let merged = search_fanout(
            client,
            vec![target("p0")],
            request(1),
            Instant::now() + Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(keys(&merged), vec!["a"]);
        assert_eq!(transport.call_count("p0"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_partial_failure() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.register("p0", |_| {
            Ok(PartitionSearchResponse {
                neighbors: vec![PartitionNeighbor::new("a", 0.1)],
            })
        });
        transport.register("p1", |_| {
            Err(crate::types::RpcError::new(
                RpcErrorKind::DataLoss,
                "partition lost",
            ))
        });
        let client = Arc::new(PartitionClient::new(transport));

        let error = search_fanout(
            client,
            vec![target("p0"), target("p1")],
            request(2),
            Instant::now() + Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        match error {
            CoordinatorError::PartialFailure { partition, attempts, .. } => {
                assert_eq!(partition, "p1");
                assert_eq!(attempts, 5);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
    }
}
