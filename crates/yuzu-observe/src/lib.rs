//! yuzu-observe: vendor-neutral observability ABI.
//!
//! Engine crates depend only on these traits and event types. Backends
//! (Prometheus, host-store info sections) live with the embedder.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: SearchEvent);
}

/// A do-nothing meter for tests and embedders who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: SearchEvent) {}
}

/// Typed events for live inspection (keys and vector payloads never
/// included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum SearchEvent {
    Query(QueryEvt),
    Mutation(MutationEvt),
    Fanout(FanoutEvt),
    Index(IndexEvt),
}

#[derive(Clone, Debug)]
pub struct QueryEvt {
    pub schema: u32,
    pub kind: QueryKind,
}
#[derive(Clone, Debug)]
pub enum QueryKind {
    Planned { prefilter: bool, estimate: u64 },
    Finished { results: u32, micros: u64 },
    TimedOut,
    Failed,
}

#[derive(Clone, Debug)]
pub struct MutationEvt {
    pub schema: u32,
    pub kind: MutationKind,
}
#[derive(Clone, Debug)]
pub enum MutationKind {
    Enqueued,
    Coalesced,
    Applied { reprocessed: bool },
    Deferred,
    DrainedBatch { keys: u32 },
    Failed,
}

#[derive(Clone, Debug)]
pub struct FanoutEvt {
    pub kind: FanoutKind,
}
#[derive(Clone, Debug)]
pub enum FanoutKind {
    Dispatched { partitions: u32 },
    Retry { attempt: u32 },
    PartitionFailed,
    Merged { results: u32 },
    MetadataPulled,
    MetadataReconciled { changed: bool },
}

#[derive(Clone, Debug)]
pub struct IndexEvt {
    pub kind: IndexKind,
}
#[derive(Clone, Debug)]
pub enum IndexKind {
    Resized { capacity: u64 },
    BackfillFinished { keys: u64 },
    SnapshotSaved { bytes: u64 },
    SnapshotLoaded { keys: u64 },
}
