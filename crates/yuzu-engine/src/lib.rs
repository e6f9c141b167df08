//! The yuzu engine: vector search hosted inside a key-value store.
//!
//! [`Engine`] owns everything the host embeds: the intern store, the schema
//! registry, the mutation pipeline with its writer pool, the
//! externalization cache, metrics, and configuration. The host drives it
//! with three kinds of calls:
//!
//! - **Mutations**: `notify_key_changed` on the main thread whenever a
//!   watched key is written or deleted; the pipeline coalesces per-key and
//!   applies to every attribute index on writer workers.
//! - **Queries**: `search` parses the filter, plans pre-filter vs. inline
//!   filter, runs the KNN, and windows the reply.
//! - **Lifecycle**: schema creation (with backfill over the existing key
//!   space), snapshot save/restore, and shutdown draining.
//!
//! ```
//! use std::sync::Arc;
//! use yuzu_engine::{
//!     AttributeKindSpec, AttributeSpec, Engine, EngineConfig, MemorySource, QueryRequest,
//!     SchemaSpec,
//! };
//! use yuzu_vector::{payload_from_floats, Metric};
//!
//! let source = Arc::new(MemorySource::new());
//! let engine = Engine::new(EngineConfig::default(), source.clone());
//! engine
//!     .create_schema(SchemaSpec {
//!         name: "idx".into(),
//!         attributes: vec![AttributeSpec {
//!             alias: "vec".into(),
//!             identifier: "vec".into(),
//!             kind: AttributeKindSpec::VectorFlat { dims: 2, metric: Metric::L2, block_size: None },
//!         }],
//!     })
//!     .unwrap();
//! source.put("doc:1", "vec", payload_from_floats(&[1.0, 0.0]));
//! engine.notify_key_changed("idx", b"doc:1").unwrap();
//! engine.drain();
//! let reply = engine
//!     .search("idx", QueryRequest::new("vec", payload_from_floats(&[1.0, 0.0]), 1))
//!     .unwrap();
//! assert_eq!(reply.total, 1);
//! ```

mod config;
mod engine;
mod error;
mod externalizer;
mod metrics;
mod mutation;
mod schema;
mod snapshot;
mod source;

pub use config::EngineConfig;
pub use engine::{Engine, QueryRequest};
pub use error::{EngineError, Result};
pub use externalizer::{Externalizer, MainThreadCell};
pub use metrics::EngineMetrics;
pub use mutation::{FieldSnapshot, MutationPipeline, WorkerPool};
pub use schema::{
    Attribute, AttributeIndex, AttributeKindSpec, AttributeMeta, AttributeSpec, IndexSchema,
    SchemaSpec,
};
pub use snapshot::{
    restore_schema_snapshot, save_schema_snapshot, snapshot_from_bytes, snapshot_to_bytes,
    AlgorithmTag, AttributePayload, AttributeSnapshot, SchemaSnapshot, TrackedKeyEntry,
};
pub use source::{MemorySource, RecordSource};
