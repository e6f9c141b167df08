//! Schema persistence model.
//!
//! The snapshot records semantics, not framing: per vector index the
//! key↔id↔magnitude tuples plus an opaque kernel blob, per numeric index
//! the `(key, value)` pairs, per tag index the `(key, raw_string)` pairs.
//! Restore reinstates the vector bijection first, then hands the kernel
//! its blob; a duplicate internal id is fatal to the schema load. Entries
//! from snapshots that predate magnitude tracking come back with no
//! magnitude and are flagged unknown until the record's next write.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::schema::{Attribute, AttributeIndex, AttributeMeta, IndexSchema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use yuzu_hnsw::{GraphConfig, HnswIndex};
use yuzu_index::{NumericIndex, TagIndex};
use yuzu_intern::{fnv1a_64, InternStore};
use yuzu_vector::{FlatIndex, KnnIndex, Metric};

pub const SCHEMA_VERSION: u32 = 1;
pub const ENCODING_VERSION: u32 = 1;

/// Vector kernel variant and its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AlgorithmTag {
    Graph {
        m: usize,
        m_max0: usize,
        ef_construction: usize,
        ef_runtime: usize,
        max_layers: usize,
    },
    Flat,
}

/// One tracked vector record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedKeyEntry {
    pub internal_id: u64,
    pub key: Vec<u8>,
    /// None in snapshots that predate magnitude tracking.
    pub magnitude: Option<f32>,
}

/// Per-attribute snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttributePayload {
    Vector {
        algorithm: AlgorithmTag,
        dims: usize,
        metric: Metric,
        capacity: usize,
        block_size: usize,
        tracked: Vec<TrackedKeyEntry>,
        kernel_blob: Vec<u8>,
    },
    Numeric {
        entries: Vec<(Vec<u8>, f64)>,
    },
    Tag {
        separator: char,
        case_sensitive: bool,
        entries: Vec<(Vec<u8>, String)>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub alias: String,
    pub identifier: String,
    pub payload: AttributePayload,
}

/// A schema's full auxiliary blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub schema_version: u32,
    pub encoding_version: u32,
    /// Content hash over the serialized attributes; feeds cluster
    /// metadata reconciliation.
    pub fingerprint: u64,
    pub name: String,
    pub attributes: Vec<AttributeSnapshot>,
}

/// Capture a schema's current indexed state.
pub fn save_schema_snapshot(schema: &IndexSchema) -> Result<SchemaSnapshot> {
    let mut attributes = Vec::with_capacity(schema.attributes().len());
    for attribute in schema.attributes() {
        let payload = match (&attribute.index, &attribute.meta) {
            (AttributeIndex::Vector(index), meta) => {
                let algorithm = match meta {
                    AttributeMeta::Hnsw { config, .. } => AlgorithmTag::Graph {
                        m: config.m,
                        m_max0: config.m_max0,
                        ef_construction: config.ef_construction,
                        ef_runtime: config.ef_runtime,
                        max_layers: config.max_layers,
                    },
                    AttributeMeta::Flat { .. } => AlgorithmTag::Flat,
                    _ => {
                        return Err(EngineError::Internal(format!(
                            "vector attribute {} has non-vector metadata",
                            attribute.alias
                        )))
                    }
                };
                let block_size = match meta {
                    AttributeMeta::Hnsw { block_size, .. }
                    | AttributeMeta::Flat { block_size } => *block_size,
                    _ => 0,
                };
                let tracked = index
                    .tracked_tuples()
                    .into_iter()
                    .map(|(internal_id, key, magnitude)| TrackedKeyEntry {
                        internal_id,
                        key: key.as_bytes().to_vec(),
                        magnitude: Some(magnitude),
                    })
                    .collect();
                AttributePayload::Vector {
                    algorithm,
                    dims: index.dimensions(),
                    metric: index.metric(),
                    capacity: index.capacity(),
                    block_size,
                    tracked,
                    kernel_blob: index.save_kernel()?,
                }
            }
            (AttributeIndex::Numeric(index), _) => AttributePayload::Numeric {
                entries: index
                    .tracked_entries()
                    .into_iter()
                    .map(|(key, value)| (key.as_bytes().to_vec(), value))
                    .collect(),
            },
            (AttributeIndex::Tag(index), meta) => {
                let (separator, case_sensitive) = match meta {
                    AttributeMeta::Tag {
                        separator,
                        case_sensitive,
                    } => (*separator, *case_sensitive),
                    _ => (index.separator(), index.case_sensitive()),
                };
                AttributePayload::Tag {
                    separator,
                    case_sensitive,
                    entries: index
                        .tracked_entries()
                        .into_iter()
                        .map(|(key, raw)| (key.as_bytes().to_vec(), raw))
                        .collect(),
                }
            }
        };
        attributes.push(AttributeSnapshot {
            alias: attribute.alias.clone(),
            identifier: attribute.identifier.clone(),
            payload,
        });
    }
    let fingerprint = fingerprint_of(&attributes)?;
    Ok(SchemaSnapshot {
        schema_version: SCHEMA_VERSION,
        encoding_version: ENCODING_VERSION,
        fingerprint,
        name: schema.name().to_string(),
        attributes,
    })
}

fn fingerprint_of(attributes: &[AttributeSnapshot]) -> Result<u64> {
    let bytes =
        bincode::serialize(attributes).map_err(|e| EngineError::Internal(e.to_string()))?;
    Ok(fnv1a_64(&bytes))
}

/// Rebuild a schema from its snapshot. The caller registers the result.
pub fn restore_schema_snapshot(
    snapshot: &SchemaSnapshot,
    intern: &Arc<InternStore>,
    config: &EngineConfig,
) -> Result<IndexSchema> {
    let mut attributes = Vec::with_capacity(snapshot.attributes.len());
    for attribute in &snapshot.attributes {
        let (index, meta) = match &attribute.payload {
            AttributePayload::Vector {
                algorithm,
                dims,
                metric,
                block_size,
                tracked,
                kernel_blob,
                ..
            } => {
                let block_size = if *block_size == 0 {
                    config.block_size
                } else {
                    *block_size
                };
                let index: Arc<dyn KnnIndex> = match algorithm {
                    AlgorithmTag::Graph {
                        m,
                        m_max0,
                        ef_construction,
                        ef_runtime,
                        max_layers,
                    } => Arc::new(HnswIndex::new(
                        *dims,
                        *metric,
                        block_size,
                        GraphConfig {
                            m: *m,
                            m_max0: *m_max0,
                            ef_construction: *ef_construction,
                            ef_runtime: *ef_runtime,
                            max_layers: *max_layers,
                        },
                        Arc::clone(intern),
                    )),
                    AlgorithmTag::Flat => Arc::new(FlatIndex::new(
                        *dims,
                        *metric,
                        block_size,
                        Arc::clone(intern),
                    )),
                };
                let tuples = tracked
                    .iter()
                    .map(|entry| {
                        (
                            entry.internal_id,
                            intern.intern(&entry.key),
                            entry.magnitude,
                        )
                    })
                    .collect();
                // Bijection first; a duplicate id is fatal to the load.
                index.load_tracked(tuples)?;
                index.load_kernel(kernel_blob)?;
                let meta = match algorithm {
                    AlgorithmTag::Graph {
                        m,
                        m_max0,
                        ef_construction,
                        ef_runtime,
                        max_layers,
                    } => AttributeMeta::Hnsw {
                        config: GraphConfig {
                            m: *m,
                            m_max0: *m_max0,
                            ef_construction: *ef_construction,
                            ef_runtime: *ef_runtime,
                            max_layers: *max_layers,
                        },
                        block_size,
                    },
                    AlgorithmTag::Flat => AttributeMeta::Flat { block_size },
                };
                (AttributeIndex::Vector(index), meta)
            }
            AttributePayload::Numeric { entries } => {
                let index = Arc::new(NumericIndex::new());
                for (key, value) in entries {
                    let key = intern.intern(key);
                    index.add_record(&key, format!("{}", value).as_bytes())?;
                }
                (AttributeIndex::Numeric(index), AttributeMeta::Numeric)
            }
            AttributePayload::Tag {
                separator,
                case_sensitive,
                entries,
            } => {
                let index = Arc::new(TagIndex::new(*separator, *case_sensitive));
                for (key, raw) in entries {
                    let key = intern.intern(key);
                    index.add_record(&key, raw.as_bytes())?;
                }
                (
                    AttributeIndex::Tag(index),
                    AttributeMeta::Tag {
                        separator: *separator,
                        case_sensitive: *case_sensitive,
                    },
                )
            }
        };
        attributes.push(Attribute::new(
            attribute.alias.clone(),
            attribute.identifier.clone(),
            index,
            meta,
        ));
    }
    IndexSchema::new(snapshot.name.clone(), attributes)
}

pub fn snapshot_to_bytes(snapshot: &SchemaSnapshot) -> Result<Vec<u8>> {
    bincode::serialize(snapshot).map_err(|e| EngineError::Internal(e.to_string()))
}

pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<SchemaSnapshot> {
    bincode::deserialize(bytes).map_err(|e| EngineError::Parse(e.to_string()))
}
