//! Engine statistics.
//!
//! Counters are kept twice on purpose: local atomics feed the host `info`
//! command (the Meter ABI is write-only), while the meter feeds whatever
//! telemetry backend the embedder wires up.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use yuzu_observe::{Counter, Meter, NoopMeter, SearchEvent};

pub struct EngineMetrics {
    meter: Arc<dyn Meter>,

    query_success: AtomicU64,
    query_failure: AtomicU64,
    query_timeout: AtomicU64,
    mutations_applied: AtomicU64,
    mutations_coalesced: AtomicU64,
    mutations_deferred: AtomicU64,
    mutation_failures: AtomicU64,

    meter_query_success: Box<dyn Counter>,
    meter_query_failure: Box<dyn Counter>,
    meter_query_timeout: Box<dyn Counter>,
    meter_mutations_applied: Box<dyn Counter>,
    meter_mutations_coalesced: Box<dyn Counter>,
}

impl EngineMetrics {
    pub fn new(meter: Arc<dyn Meter>) -> Self {
        Self {
            meter_query_success: meter.counter("yuzu_query_success_total", &[]),
            meter_query_failure: meter.counter("yuzu_query_failure_total", &[]),
            meter_query_timeout: meter.counter("yuzu_query_timeout_total", &[]),
            meter_mutations_applied: meter.counter("yuzu_mutations_applied_total", &[]),
            meter_mutations_coalesced: meter.counter("yuzu_mutations_coalesced_total", &[]),
            meter,
            query_success: AtomicU64::new(0),
            query_failure: AtomicU64::new(0),
            query_timeout: AtomicU64::new(0),
            mutations_applied: AtomicU64::new(0),
            mutations_coalesced: AtomicU64::new(0),
            mutations_deferred: AtomicU64::new(0),
            mutation_failures: AtomicU64::new(0),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopMeter))
    }

    pub fn emit(&self, event: SearchEvent) {
        self.meter.emit(event);
    }

    pub fn note_query_success(&self) {
        self.query_success.fetch_add(1, Ordering::Relaxed);
        self.meter_query_success.inc(1);
    }

    pub fn note_query_failure(&self) {
        self.query_failure.fetch_add(1, Ordering::Relaxed);
        self.meter_query_failure.inc(1);
    }

    pub fn note_query_timeout(&self) {
        self.query_timeout.fetch_add(1, Ordering::Relaxed);
        self.meter_query_timeout.inc(1);
    }

    pub fn note_mutation_applied(&self) {
        self.mutations_applied.fetch_add(1, Ordering::Relaxed);
        self.meter_mutations_applied.inc(1);
    }

    pub fn note_mutation_coalesced(&self) {
        self.mutations_coalesced.fetch_add(1, Ordering::Relaxed);
        self.meter_mutations_coalesced.inc(1);
    }

    pub fn note_mutation_deferred(&self) {
        self.mutations_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_mutation_failure(&self) {
        self.mutation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mutations_applied(&self) -> u64 {
        self.mutations_applied.load(Ordering::Relaxed)
    }

    pub fn mutations_coalesced(&self) -> u64 {
        self.mutations_coalesced.load(Ordering::Relaxed)
    }

    pub fn query_successes(&self) -> u64 {
        self.query_success.load(Ordering::Relaxed)
    }

    /// Key/value pairs for the host `info` command.
    pub fn info(&self) -> Vec<(String, String)> {
        vec![
            ("query_success".to_string(), self.query_success.load(Ordering::Relaxed).to_string()),
            ("query_failure".to_string(), self.query_failure.load(Ordering::Relaxed).to_string()),
            ("query_timeout".to_string(), self.query_timeout.load(Ordering::Relaxed).to_string()),
            (
                "mutations_applied".to_string(),
                self.mutations_applied.load(Ordering::Relaxed).to_string(),
            ),
            (
                "mutations_coalesced".to_string(),
                self.mutations_coalesced.load(Ordering::Relaxed).to_string(),
            ),
            (
                "mutations_deferred".to_string(),
                self.mutations_deferred.load(Ordering::Relaxed).to_string(),
            ),
            (
                "mutation_failures".to_string(),
                self.mutation_failures.load(Ordering::Relaxed).to_string(),
            ),
        ]
    }
}
