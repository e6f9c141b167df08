//! The engine facade.
//!
//! One `Engine` value owns what the original design kept as process-wide
//! services: the intern store, schema registry, mutation pipeline, reader
//! pool, externalization cache, metrics, and config. Teardown drains the
//! pools before the indices drop.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::externalizer::{Externalizer, MainThreadCell};
use crate::metrics::EngineMetrics;
use crate::mutation::{FieldSnapshot, MutationPipeline, WorkerPool};
use crate::schema::{
    Attribute, AttributeIndex, AttributeKindSpec, AttributeMeta, IndexSchema, SchemaSpec,
};
use crate::snapshot::{restore_schema_snapshot, save_schema_snapshot, SchemaSnapshot};
use crate::source::RecordSource;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use yuzu_hnsw::{GraphConfig, HnswIndex};
use yuzu_index::{NumericIndex, TagIndex};
use yuzu_intern::{InternStore, InternedStr};
use yuzu_observe::{Meter, NoopMeter, QueryEvt, QueryKind, SearchEvent};
use yuzu_query::{
    build_reply, execute_knn, FilterParser, LimitWindow, QueryError, QueryPlan, ReturnAttribute,
    SearchParams, SearchReply,
};
use yuzu_vector::{FlatIndex, KnnIndex};

/// A hybrid search request, as the host command layer hands it over.
pub struct QueryRequest {
    pub attribute_alias: String,
    /// Filter expression; `*` matches everything.
    pub filter: String,
    /// Raw float32 query payload.
    pub query: Vec<u8>,
    pub k: usize,
    /// `(alias, returned-as)` pairs; empty returns the score plus every
    /// attribute.
    pub return_fields: Vec<(String, Option<String>)>,
    pub limit: LimitWindow,
    pub timeout: Duration,
    pub no_content: bool,
    pub local_only: bool,
    pub ef_runtime: Option<usize>,
    /// Alias the distance is returned under; defaults to
    /// `__<attribute>_score`.
    pub score_as: Option<String>,
}

impl QueryRequest {
    pub fn new(attribute_alias: impl Into<String>, query: Vec<u8>, k: usize) -> Self {
        Self {
            attribute_alias: attribute_alias.into(),
            filter: "*".to_string(),
            query,
            k,
            return_fields: Vec::new(),
            limit: LimitWindow::default(),
            timeout: Duration::from_secs(1),
            no_content: false,
            local_only: false,
            ef_runtime: None,
            score_as: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_limit(mut self, first_index: usize, number: usize) -> Self {
        self.limit = LimitWindow { first_index, number };
        self
    }

    pub fn no_content(mut self) -> Self {
        self.no_content = true;
        self
    }
}

/// The embedded search engine.
pub struct Engine {
    config: EngineConfig,
    intern: Arc<InternStore>,
    schemas: RwLock<HashMap<String, Arc<IndexSchema>>>,
    pipeline: MutationPipeline,
    readers: WorkerPool,
    metrics: Arc<EngineMetrics>,
    externalizer: MainThreadCell<Externalizer>,
    source: Arc<dyn RecordSource>,
    /// Set between `begin_batch`/`end_batch`; main-thread state.
    in_batch: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig, source: Arc<dyn RecordSource>) -> Arc<Self> {
        Self::with_meter(config, source, Arc::new(NoopMeter))
    }

    pub fn with_meter(
        config: EngineConfig,
        source: Arc<dyn RecordSource>,
        meter: Arc<dyn Meter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline: MutationPipeline::new(config.writer_pool_size, config.writer_high_water),
            readers: WorkerPool::new("yuzu-reader", config.reader_pool_size),
            externalizer: MainThreadCell::new(Externalizer::new(config.lru_capacity)),
            metrics: Arc::new(EngineMetrics::new(meter)),
            intern: Arc::new(InternStore::new()),
            schemas: RwLock::new(HashMap::new()),
            source,
            in_batch: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn intern_store(&self) -> &Arc<InternStore> {
        &self.intern
    }

    /// Create a schema and schedule a backfill pass over the existing key
    /// space. Queries are served immediately; `IndexSchema::is_ready`
    /// flips once backfill finishes.
    pub fn create_schema(&self, spec: SchemaSpec) -> Result<Arc<IndexSchema>> {
        let mut attributes = Vec::with_capacity(spec.attributes.len());
        for attribute in spec.attributes {
            let (index, meta) = self.build_attribute_index(attribute.kind)?;
            attributes.push(Attribute::new(
                attribute.alias,
                attribute.identifier,
                index,
                meta,
            ));
        }
        let schema = Arc::new(IndexSchema::new(spec.name.clone(), attributes)?);
        {
            let mut schemas = self.schemas.write();
            if schemas.contains_key(&spec.name) {
                return Err(EngineError::Conflict(format!(
                    "schema already exists: {}",
                    spec.name
                )));
            }
            schemas.insert(spec.name.clone(), Arc::clone(&schema));
        }
        self.backfill(&schema);
        Ok(schema)
    }

    fn build_attribute_index(
        &self,
        kind: AttributeKindSpec,
    ) -> Result<(AttributeIndex, AttributeMeta)> {
        Ok(match kind {
            AttributeKindSpec::VectorHnsw { dims, metric, config } => {
                let mut graph_config = config.unwrap_or_default();
                if graph_config.ef_runtime == GraphConfig::default().ef_runtime {
                    graph_config.ef_runtime = self.config.default_ef_runtime;
                }
                let block_size = self.config.block_size;
                let index: Arc<dyn KnnIndex> = Arc::new(HnswIndex::new(
                    dims,
                    metric,
                    block_size,
                    graph_config.clone(),
                    Arc::clone(&self.intern),
                ));
                (
                    AttributeIndex::Vector(index),
                    AttributeMeta::Hnsw {
                        config: graph_config,
                        block_size,
                    },
                )
            }
            AttributeKindSpec::VectorFlat { dims, metric, block_size } => {
                let block_size = block_size.unwrap_or(self.config.block_size);
                let index: Arc<dyn KnnIndex> = Arc::new(FlatIndex::new(
                    dims,
                    metric,
                    block_size,
                    Arc::clone(&self.intern),
                ));
                (
                    AttributeIndex::Vector(index),
                    AttributeMeta::Flat { block_size },
                )
            }
            AttributeKindSpec::Numeric => (
                AttributeIndex::Numeric(Arc::new(NumericIndex::new())),
                AttributeMeta::Numeric,
            ),
            AttributeKindSpec::Tag {
                separator,
                case_sensitive,
            } => (
                AttributeIndex::Tag(Arc::new(TagIndex::new(separator, case_sensitive))),
                AttributeMeta::Tag {
                    separator,
                    case_sensitive,
                },
            ),
        })
    }

    fn backfill(&self, schema: &Arc<IndexSchema>) {
        let mut keys: Vec<Vec<u8>> = Vec::new();
        self.source.scan_keys(&mut |key| keys.push(key.to_vec()));
        schema.begin_backfill(keys.len());
        for key in keys {
            let snapshot = self.snapshot_fields(schema, &key);
            let interned = self.intern.intern(&key);
            self.pipeline.submit(
                Arc::clone(schema),
                interned,
                snapshot,
                Arc::clone(&self.metrics),
            );
        }
    }

    pub fn drop_schema(&self, name: &str) -> Result<()> {
        self.schemas
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("unknown schema: {}", name)))
    }

    pub fn schema(&self, name: &str) -> Result<Arc<IndexSchema>> {
        self.schemas
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("unknown schema: {}", name)))
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    /// Read the current values of every watched identifier for `key`.
    /// Runs on the notifying (main) thread so the snapshot observes the
    /// host's ordering.
    fn snapshot_fields(&self, schema: &IndexSchema, key: &[u8]) -> FieldSnapshot {
        if !self.source.exists(key) {
            return None;
        }
        let mut fields = HashMap::new();
        for attribute in schema.attributes() {
            if let Some(value) = self.source.field(key, &attribute.identifier) {
                fields.insert(attribute.identifier.clone(), value);
            }
        }
        Some(fields)
    }

    /// Host notification: `key` in `schema_name`'s key space was written
    /// or deleted. Main thread only.
    pub fn notify_key_changed(&self, schema_name: &str, key: &[u8]) -> Result<()> {
        let schema = self.schema(schema_name)?;
        let interned = self.intern.intern(key);
        if self.in_batch.load(Ordering::Acquire) {
            // Inside a multi-command batch: defer so indices observe the
            // batch atomically.
            schema.deferred.lock().insert(interned);
            self.metrics.note_mutation_deferred();
            return Ok(());
        }
        let snapshot = self.snapshot_fields(&schema, key);
        self.pipeline
            .submit(schema, interned, snapshot, Arc::clone(&self.metrics));
        Ok(())
    }

    /// Enter a multi-command batch; notifications defer until
    /// [`Engine::end_batch`].
    pub fn begin_batch(&self) {
        self.in_batch.store(true, Ordering::Release);
    }

    /// Leave the batch and drain every deferred key, snapshotting now so
    /// the batch is observed whole.
    pub fn end_batch(&self) {
        self.in_batch.store(false, Ordering::Release);
        let schemas: Vec<Arc<IndexSchema>> = self.schemas.read().values().cloned().collect();
        for schema in schemas {
            let deferred: Vec<InternedStr> = {
                let mut set = schema.deferred.lock();
                std::mem::take(&mut *set).into_iter().collect()
            };
            for key in deferred {
                let snapshot = self.snapshot_fields(&schema, key.as_bytes());
                self.pipeline.submit(
                    Arc::clone(&schema),
                    key,
                    snapshot,
                    Arc::clone(&self.metrics),
                );
            }
        }
    }

    /// Block until all submitted mutations have been applied.
    pub fn drain(&self) {
        self.pipeline.pool().drain();
    }

    /// Writer pool handle (pause/resume for tests, depth for info).
    pub fn writer_pool(&self) -> &WorkerPool {
        self.pipeline.pool()
    }

    /// Execute a hybrid KNN query synchronously.
    pub fn search(&self, schema_name: &str, request: QueryRequest) -> Result<SearchReply> {
        let outcome = self.search_inner(schema_name, request);
        match &outcome {
            Ok(_) => self.metrics.note_query_success(),
            Err(EngineError::DeadlineExceeded { .. }) => self.metrics.note_query_timeout(),
            Err(_) => self.metrics.note_query_failure(),
        }
        outcome
    }

    /// Execute on the reader pool, delivering the reply to `done`.
    pub fn search_async(
        self: &Arc<Self>,
        schema_name: &str,
        request: QueryRequest,
        done: impl FnOnce(Result<SearchReply>) + Send + 'static,
    ) {
        let engine = Arc::clone(self);
        let schema_name = schema_name.to_string();
        self.readers.submit(move || {
            done(engine.search(&schema_name, request));
        });
    }

    fn search_inner(&self, schema_name: &str, request: QueryRequest) -> Result<SearchReply> {
        let schema = self.schema(schema_name)?;
        let index = schema.vector_index(&request.attribute_alias)?;

        let parsed = FilterParser::new(schema.as_ref(), &request.filter).parse()?;
        let score_as = request
            .score_as
            .clone()
            .unwrap_or_else(|| format!("__{}_score", request.attribute_alias));

        let mut return_attributes: Vec<ReturnAttribute> = Vec::new();
        if request.return_fields.is_empty() {
            if !request.no_content {
                return_attributes.push(ReturnAttribute {
                    identifier: score_as.clone(),
                    alias: score_as.clone(),
                });
                for attribute in schema.attributes() {
                    return_attributes.push(ReturnAttribute {
                        identifier: attribute.identifier.clone(),
                        alias: attribute.alias.clone(),
                    });
                }
            }
        } else {
            for (alias, returned_as) in &request.return_fields {
                let identifier = if *alias == score_as {
                    score_as.clone()
                } else {
                    schema.identifier_of(alias)?.to_string()
                };
                return_attributes.push(ReturnAttribute {
                    identifier,
                    alias: returned_as.clone().unwrap_or_else(|| alias.clone()),
                });
            }
        }

        let mut params = SearchParams::new(
            request.attribute_alias.clone(),
            request.query.clone(),
            request.k,
        )
        .with_predicate(parsed.predicate);
        params.limit = request.limit;
        params.no_content = request.no_content;
        params.local_only = request.local_only;
        params.timeout = request.timeout;
        params.score_as = score_as.clone();
        params.ef_runtime = request.ef_runtime;
        params.return_attributes = return_attributes;

        let deadline = Instant::now() + request.timeout;
        let fetch = |key: &InternedStr, identifier: &str| -> Option<Vec<u8>> {
            if let Some(vector_index) = schema.vector_attribute_for_identifier(identifier) {
                if let Ok(bytes) = vector_index.value_bytes(key) {
                    return Some(bytes);
                }
            }
            self.source.field(key.as_bytes(), identifier)
        };

        match execute_knn(
            index.as_ref(),
            &params,
            self.config.pre_filter_threshold,
            Some(deadline),
        ) {
            Ok(outcome) => {
                self.metrics.emit(SearchEvent::Query(QueryEvt {
                    schema: 0,
                    kind: QueryKind::Planned {
                        prefilter: outcome.plan == QueryPlan::PreFilter,
                        estimate: outcome.estimate as u64,
                    },
                }));
                Ok(build_reply(
                    &outcome.neighbors,
                    params.k,
                    &params.limit,
                    &params.score_as,
                    &params.return_attributes,
                    params.no_content,
                    &fetch,
                ))
            }
            Err(QueryError::DeadlineExceeded { partial }) => {
                let reply = build_reply(
                    &partial,
                    params.k,
                    &params.limit,
                    &params.score_as,
                    &params.return_attributes,
                    params.no_content,
                    &fetch,
                );
                Err(EngineError::DeadlineExceeded {
                    partial: Some(reply),
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Materialize a vector field's host-visible bytes without a primary
    /// dictionary read. Main thread only.
    pub fn materialize_vector(
        &self,
        schema_name: &str,
        alias: &str,
        key: &[u8],
    ) -> Result<Option<Rc<Vec<u8>>>> {
        let schema = self.schema(schema_name)?;
        let index = schema.vector_index(alias)?;
        let identifier = schema.identifier_of(alias)?.to_string();
        let interned = self.intern.intern(key);
        let source = Arc::clone(&self.source);
        let key_bytes = key.to_vec();
        Ok(self.externalizer.with(|externalizer| {
            externalizer.materialize(index.as_ref(), &interned, &|| {
                source.field(&key_bytes, &identifier)
            })
        }))
    }

    /// Info block: config, stats, and per-schema sections.
    pub fn info(&self) -> Vec<(String, String)> {
        let mut out = self.config.info();
        out.extend(self.metrics.info());
        out.push((
            "writer_queue_depth".to_string(),
            self.pipeline.pool().queued_len().to_string(),
        ));
        out.push((
            "interned_strings".to_string(),
            self.intern.live_count().to_string(),
        ));
        let schemas = self.schemas.read();
        out.push(("schemas".to_string(), schemas.len().to_string()));
        for schema in schemas.values() {
            out.extend(schema.info());
        }
        out
    }

    /// Capture one schema's snapshot.
    pub fn save_schema(&self, name: &str) -> Result<SchemaSnapshot> {
        let schema = self.schema(name)?;
        save_schema_snapshot(schema.as_ref())
    }

    /// Restore a schema from its snapshot. No backfill runs; the snapshot
    /// is the state.
    pub fn load_schema(&self, snapshot: &SchemaSnapshot) -> Result<Arc<IndexSchema>> {
        let schema = Arc::new(restore_schema_snapshot(
            snapshot,
            &self.intern,
            &self.config,
        )?);
        let mut schemas = self.schemas.write();
        if schemas.contains_key(snapshot.name.as_str()) {
            return Err(EngineError::Conflict(format!(
                "schema already exists: {}",
                snapshot.name
            )));
        }
        schemas.insert(snapshot.name.clone(), Arc::clone(&schema));
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use yuzu_vector::{payload_from_floats, Metric};

    fn vector_schema_spec(name: &str) -> SchemaSpec {
        SchemaSpec {
            name: name.to_string(),
            attributes: vec![crate::schema::AttributeSpec {
                alias: "vec".to_string(),
                identifier: "vec".to_string(),
                kind: AttributeKindSpec::VectorFlat {
                    dims: 2,
                    metric: Metric::L2,
                    block_size: Some(8),
                },
            }],
        }
    }

    #[test]
    fn test_create_search_and_drop() {
        let source = Arc::new(MemorySource::new());
        let engine = Engine::new(EngineConfig::default(), source.clone());
        engine.create_schema(vector_schema_spec("idx")).unwrap();

        source.put("a", "vec", payload_from_floats(&[1.0, 0.0]));
        engine.notify_key_changed("idx", b"a").unwrap();
        engine.drain();

        let reply = engine
            .search("idx", QueryRequest::new("vec", payload_from_floats(&[1.0, 0.0]), 1))
            .unwrap();
        assert_eq!(reply.total, 1);
        assert_eq!(reply.rows[0].key.as_bytes(), b"a");

        engine.drop_schema("idx").unwrap();
        assert!(matches!(
            engine.search("idx", QueryRequest::new("vec", payload_from_floats(&[1.0, 0.0]), 1)),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_backfill_indexes_existing_keys() {
        let source = Arc::new(MemorySource::new());
        for i in 0..10 {
            source.put(
                format!("k{}", i),
                "vec",
                payload_from_floats(&[i as f32, 0.0]),
            );
        }
        let engine = Engine::new(EngineConfig::default(), source);
        let schema = engine.create_schema(vector_schema_spec("idx")).unwrap();
        engine.drain();
        assert!(schema.is_ready());
        assert_eq!(schema.vector_index("vec").unwrap().record_count(), 10);
    }

    #[test]
    fn test_batch_defers_until_end() {
        let source = Arc::new(MemorySource::new());
        let engine = Engine::new(EngineConfig::default(), source.clone());
        let schema = engine.create_schema(vector_schema_spec("idx")).unwrap();

        engine.begin_batch();
        source.put("a", "vec", payload_from_floats(&[1.0, 0.0]));
        engine.notify_key_changed("idx", b"a").unwrap();
        // Another write to the same key inside the batch: the drain
        // snapshots the final state once.
        source.put("a", "vec", payload_from_floats(&[2.0, 0.0]));
        engine.notify_key_changed("idx", b"a").unwrap();
        engine.drain();
        assert_eq!(schema.vector_index("vec").unwrap().record_count(), 0);

        engine.end_batch();
        engine.drain();
        let index = schema.vector_index("vec").unwrap();
        assert_eq!(index.record_count(), 1);
        let key = engine.intern_store().intern(b"a");
        assert_eq!(
            index.value_bytes(&key).unwrap(),
            payload_from_floats(&[2.0, 0.0])
        );
    }

    #[test]
    fn test_deleted_key_removed_from_indices() {
        let source = Arc::new(MemorySource::new());
        let engine = Engine::new(EngineConfig::default(), source.clone());
        let schema = engine.create_schema(vector_schema_spec("idx")).unwrap();

        source.put("a", "vec", payload_from_floats(&[1.0, 0.0]));
        engine.notify_key_changed("idx", b"a").unwrap();
        engine.drain();
        source.delete("a");
        engine.notify_key_changed("idx", b"a").unwrap();
        engine.drain();
        assert_eq!(schema.vector_index("vec").unwrap().record_count(), 0);
    }

    #[test]
    fn test_info_surfaces_config_and_stats() {
        let source = Arc::new(MemorySource::new());
        let engine = Engine::new(EngineConfig::default(), source);
        engine.create_schema(vector_schema_spec("idx")).unwrap();
        let info = engine.info();
        assert!(info.iter().any(|(k, _)| k == "pre_filter_threshold"));
        assert!(info.iter().any(|(k, _)| k == "query_success"));
        assert!(info.iter().any(|(k, v)| k == "name" && v == "idx"));
    }

    #[test]
    fn test_materialize_vector() {
        let source = Arc::new(MemorySource::new());
        let engine = Engine::new(EngineConfig::default(), source.clone());
        engine.create_schema(vector_schema_spec("idx")).unwrap();
        source.put("a", "vec", payload_from_floats(&[1.5, 2.5]));
        engine.notify_key_changed("idx", b"a").unwrap();
        engine.drain();

        let bytes = engine
            .materialize_vector("idx", "vec", b"a")
            .unwrap()
            .expect("vector materializes");
        assert_eq!(*bytes, payload_from_floats(&[1.5, 2.5]));
    }
}
