//! Mutation pipeline: coalescing key notifications onto a writer pool.
//!
//! The host's main thread snapshots a key's field values when it observes
//! a write, then hands the snapshot here. Each `(schema, key)` owns one
//! in-flight slot: an empty slot enqueues a writer-pool job, an occupied
//! one just overwrites the pending snapshot (last writer wins). A worker
//! swaps the snapshot out, applies it to every attribute index, and
//! re-checks for a newer snapshot before going idle, so at most one worker
//! ever touches a given key.
//!
//! States per key: Idle → Enqueued → Processing → {Idle | Enqueued}.

use crate::metrics::EngineMetrics;
use crate::schema::IndexSchema;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use yuzu_intern::InternedStr;

/// One snapshot of a key's watched fields: identifier → bytes. `None`
/// models a deleted key.
pub type FieldSnapshot = Option<HashMap<String, Vec<u8>>>;

/// Per-key in-flight slot.
#[derive(Default)]
pub struct KeySlot {
    pub(crate) pending: Option<FieldSnapshot>,
    pub(crate) enqueued: bool,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Gate {
    paused: Mutex<bool>,
    unpaused: Condvar,
}

/// Fixed-size worker pool over an MPMC channel.
///
/// `pause`/`resume` gate job execution (not submission); tests use them to
/// pile up coalescable work.
pub struct WorkerPool {
    sender: Option<crossbeam_channel::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    queued: Arc<AtomicUsize>,
    gate: Arc<Gate>,
}

impl WorkerPool {
    pub fn new(name: &str, size: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let queued = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Gate {
            paused: Mutex::new(false),
            unpaused: Condvar::new(),
        });
        let workers = (0..size.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                let queued = Arc::clone(&queued);
                let gate = Arc::clone(&gate);
                std::thread::Builder::new()
                    .name(format!("{}-{}", name, i))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            {
                                let mut paused = gate.paused.lock();
                                while *paused {
                                    gate.unpaused.wait(&mut paused);
                                }
                            }
                            job();
                            queued.fetch_sub(1, Ordering::AcqRel);
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            sender: Some(sender),
            workers,
            queued,
            gate,
        }
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        if let Some(sender) = &self.sender {
            // Send only fails after shutdown.
            if sender.send(Box::new(job)).is_err() {
                self.queued.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Jobs submitted but not yet started.
    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Hold workers before their next job.
    pub fn pause(&self) {
        *self.gate.paused.lock() = true;
    }

    pub fn resume(&self) {
        let mut paused = self.gate.paused.lock();
        *paused = false;
        self.gate.unpaused.notify_all();
    }

    /// Busy-wait until every submitted job has finished. Used at shutdown
    /// and by tests; the granularity is a scheduler tick.
    pub fn drain(&self) {
        while self.queued.load(Ordering::Acquire) > 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.resume();
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Coalescing dispatcher from key notifications to the writer pool.
pub struct MutationPipeline {
    pool: WorkerPool,
    #[allow(dead_code)]
    high_water: usize,
}

impl MutationPipeline {
    pub fn new(writer_pool_size: usize, high_water: usize) -> Self {
        Self {
            pool: WorkerPool::new("yuzu-writer", writer_pool_size),
            high_water,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Record `snapshot` as the pending state for `(schema, key)` and make
    /// sure a worker will process it. Called from the main thread.
    pub fn submit(
        &self,
        schema: Arc<IndexSchema>,
        key: InternedStr,
        snapshot: FieldSnapshot,
        metrics: Arc<EngineMetrics>,
    ) {
        #[cfg(feature = "blocking-writes")]
        while self.pool.queued_len() >= self.high_water {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        {
            let mut slots = schema.mutations.lock();
            let slot = slots.entry(key.clone()).or_default();
            let had_pending = slot.pending.is_some();
            slot.pending = Some(snapshot);
            if slot.enqueued {
                // A worker already owns this key; the newer snapshot wins
                // without a second enqueue.
                if had_pending {
                    metrics.note_mutation_coalesced();
                }
                return;
            }
            slot.enqueued = true;
        }
        let pipeline_schema = schema;
        self.pool.submit(move || {
            Self::process_key(&pipeline_schema, &key, &metrics);
        });
    }

    /// Worker side: apply the pending snapshot, looping while newer ones
    /// arrive, then clear the slot.
    fn process_key(schema: &Arc<IndexSchema>, key: &InternedStr, metrics: &EngineMetrics) {
        loop {
            let snapshot = {
                let mut slots = schema.mutations.lock();
                match slots.get_mut(key) {
                    Some(slot) => slot.pending.take(),
                    None => None,
                }
            };
            if let Some(snapshot) = snapshot {
                schema.apply_snapshot(key, &snapshot, metrics);
            }
            let mut slots = schema.mutations.lock();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.pending.is_some() {
                // A newer snapshot landed while we were applying.
                continue;
            }
            slot.enqueued = false;
            slots.remove(key);
            return;
        }
    }
}
