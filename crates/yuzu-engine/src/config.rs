//! Engine configuration.
//!
//! Every knob has a serde default, so embedders can deserialize a partial
//! config (or use `Default`) and nothing is required at startup. All values
//! surface through the host `info` command.

use serde::{Deserialize, Serialize};

/// Tuning knobs for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fraction of the index below which a predicate's estimated match
    /// count selects the pre-filter plan.
    #[serde(default = "default_pre_filter_threshold")]
    pub pre_filter_threshold: f64,

    /// Default beam width for graph searches; queries may override.
    #[serde(default = "default_ef_runtime")]
    pub default_ef_runtime: usize,

    /// Writer pool size for the mutation pipeline.
    #[serde(default = "default_writer_pool_size")]
    pub writer_pool_size: usize,

    /// Reader pool size for asynchronous query dispatch.
    #[serde(default = "default_reader_pool_size")]
    pub reader_pool_size: usize,

    /// Capacity growth increment for vector indices, in records.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Externalization cache capacity, in generated buffers.
    #[serde(default = "default_lru_capacity")]
    pub lru_capacity: usize,

    /// Writer queue depth that triggers back-pressure (only enforced with
    /// the `blocking-writes` feature).
    #[serde(default = "default_writer_high_water")]
    pub writer_high_water: usize,
}

fn default_pre_filter_threshold() -> f64 {
    0.01
}
fn default_ef_runtime() -> usize {
    10
}
fn default_writer_pool_size() -> usize {
    4
}
fn default_reader_pool_size() -> usize {
    4
}
fn default_block_size() -> usize {
    1024
}
fn default_lru_capacity() -> usize {
    100
}
fn default_writer_high_water() -> usize {
    10_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_filter_threshold: default_pre_filter_threshold(),
            default_ef_runtime: default_ef_runtime(),
            writer_pool_size: default_writer_pool_size(),
            reader_pool_size: default_reader_pool_size(),
            block_size: default_block_size(),
            lru_capacity: default_lru_capacity(),
            writer_high_water: default_writer_high_water(),
        }
    }
}

impl EngineConfig {
    /// Key/value pairs for the host `info` command.
    pub fn info(&self) -> Vec<(String, String)> {
        vec![
            (
                "pre_filter_threshold".to_string(),
                self.pre_filter_threshold.to_string(),
            ),
            ("default_ef_runtime".to_string(), self.default_ef_runtime.to_string()),
            ("writer_pool_size".to_string(), self.writer_pool_size.to_string()),
            ("reader_pool_size".to_string(), self.reader_pool_size.to_string()),
            ("block_size".to_string(), self.block_size.to_string()),
            ("lru_capacity".to_string(), self.lru_capacity.to_string()),
            ("writer_high_water".to_string(), self.writer_high_water.to_string()),
        ]
    }
}
