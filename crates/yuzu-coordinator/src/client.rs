//! Retrying partition client.
//!
//! Wraps a transport with the fan-out retry policy: up to 5 attempts,
//! 100 ms initial backoff, multiplier 1.0, capped at 1 s, retrying only
//! the status kinds the policy marks transient. Retries never sleep past
//! the caller's deadline.

use crate::transport::PartitionTransport;
use crate::types::{
    GlobalMetadata, MetadataHeader, PartitionSearchRequest, PartitionSearchResponse,
    PartitionTarget, RpcError, RpcErrorKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry schedule for partition RPCs.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 1.0,
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let backoff = self.initial_backoff.mul_f64(factor.max(0.0));
        backoff.min(self.max_backoff)
    }
}

/// Transport wrapper applying the retry policy.
pub struct PartitionClient {
    transport: Arc<dyn PartitionTransport>,
    policy: RetryPolicy,
}

impl PartitionClient {
    pub fn new(transport: Arc<dyn PartitionTransport>) -> Self {
        Self::with_policy(transport, RetryPolicy::default())
    }

    pub fn with_policy(transport: Arc<dyn PartitionTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Search one partition, retrying transient failures until the retry
    /// budget or `deadline` runs out. Returns the attempt count alongside
    /// the last error so callers can report it.
    pub async fn search_index_partition(
        &self,
        target: &PartitionTarget,
        request: PartitionSearchRequest,
        deadline: Instant,
    ) -> Result<PartitionSearchResponse, (RpcError, u32)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if Instant::now() >= deadline {
                return Err((
                    RpcError::new(RpcErrorKind::DeadlineExceeded, "deadline before dispatch"),
                    attempt,
                ));
            }
            match self
                .transport
                .search_index_partition(target, request.clone())
                .await
            {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !error.kind.is_retryable() || attempt >= self.policy.max_attempts {
                        return Err((error, attempt));
                    }
                    let backoff = self.policy.backoff_for(attempt);
                    if Instant::now() + backoff >= deadline {
                        return Err((error, attempt));
                    }
                    tracing::debug!(
                        partition = %target.partition,
                        attempt,
                        ?backoff,
                        error = %error,
                        "retrying partition search"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    pub async fn get_global_metadata(
        &self,
        target: &PartitionTarget,
    ) -> Result<GlobalMetadata, RpcError> {
        self.transport.get_global_metadata(target).await
    }

    pub async fn broadcast_metadata(
        &self,
        targets: &[PartitionTarget],
        header: MetadataHeader,
    ) -> Result<(), RpcError> {
        self.transport.broadcast_metadata(targets, header).await
    }
}
