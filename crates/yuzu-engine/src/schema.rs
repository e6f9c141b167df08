//! Index schema: the attribute registry for one searchable key space.
//!
//! A schema maps user-visible aliases to stored identifiers and index
//! handles. Indices are a tagged variant with one method per verb; no
//! dispatch hierarchy beyond that. The schema also owns the per-key
//! mutation slots the pipeline coalesces through, and the `ready` bit the
//! backfill pass flips once the pre-existing key space is indexed.

use crate::error::{EngineError, Result};
use crate::metrics::EngineMetrics;
use crate::mutation::{FieldSnapshot, KeySlot};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use yuzu_hnsw::GraphConfig;
use yuzu_index::{NumericIndex, TagIndex};
use yuzu_intern::InternedStr;
use yuzu_query::{FieldKind, FieldLookup, FieldTarget};
use yuzu_vector::{KnnIndex, Metric};

/// How one attribute should be indexed.
pub enum AttributeKindSpec {
    VectorHnsw {
        dims: usize,
        metric: Metric,
        config: Option<GraphConfig>,
    },
    VectorFlat {
        dims: usize,
        metric: Metric,
        block_size: Option<usize>,
    },
    Numeric,
    Tag {
        separator: char,
        case_sensitive: bool,
    },
}

/// One attribute in a schema definition.
pub struct AttributeSpec {
    pub alias: String,
    pub identifier: String,
    pub kind: AttributeKindSpec,
}

/// A schema definition, as the host's create-index command describes it.
pub struct SchemaSpec {
    pub name: String,
    pub attributes: Vec<AttributeSpec>,
}

/// Tagged index variant with one method per verb.
#[derive(Clone)]
pub enum AttributeIndex {
    Vector(Arc<dyn KnnIndex>),
    Numeric(Arc<NumericIndex>),
    Tag(Arc<TagIndex>),
}

impl AttributeIndex {
    pub fn is_tracked(&self, key: &InternedStr) -> bool {
        match self {
            AttributeIndex::Vector(index) => index.is_tracked(key),
            AttributeIndex::Numeric(index) => index.is_tracked(key),
            AttributeIndex::Tag(index) => index.is_tracked(key),
        }
    }

    pub fn add_record(&self, key: &InternedStr, data: &[u8]) -> Result<bool> {
        match self {
            AttributeIndex::Vector(index) => Ok(index.add_record(key, data)?),
            AttributeIndex::Numeric(index) => Ok(index.add_record(key, data)?),
            AttributeIndex::Tag(index) => Ok(index.add_record(key, data)?),
        }
    }

    pub fn modify_record(&self, key: &InternedStr, data: &[u8]) -> Result<bool> {
        match self {
            AttributeIndex::Vector(index) => Ok(index.modify_record(key, data)?),
            AttributeIndex::Numeric(index) => Ok(index.modify_record(key, data)?),
            AttributeIndex::Tag(index) => Ok(index.modify_record(key, data)?),
        }
    }

    pub fn remove_record(&self, key: &InternedStr) -> Result<bool> {
        match self {
            AttributeIndex::Vector(index) => Ok(index.remove_record(key)?),
            AttributeIndex::Numeric(index) => Ok(index.remove_record(key)?),
            AttributeIndex::Tag(index) => Ok(index.remove_record(key)?),
        }
    }

    /// Record that the key exists but lacks this attribute (what negated
    /// predicates enumerate). Vector indices keep no untracked set.
    pub fn track_missing(&self, key: &InternedStr) {
        match self {
            AttributeIndex::Vector(_) => {}
            AttributeIndex::Numeric(index) => index.track_missing(key),
            AttributeIndex::Tag(index) => index.track_missing(key),
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            AttributeIndex::Vector(index) => index.record_count(),
            AttributeIndex::Numeric(index) => index.record_count(),
            AttributeIndex::Tag(index) => index.record_count(),
        }
    }

    pub fn info(&self) -> Vec<(String, String)> {
        match self {
            AttributeIndex::Vector(index) => index.info(),
            AttributeIndex::Numeric(index) => index.info(),
            AttributeIndex::Tag(index) => index.info(),
        }
    }
}

/// Creation-time shape of an attribute index, kept for persistence.
#[derive(Debug, Clone)]
pub enum AttributeMeta {
    Hnsw { config: GraphConfig, block_size: usize },
    Flat { block_size: usize },
    Numeric,
    Tag { separator: char, case_sensitive: bool },
}

/// One registered attribute.
pub struct Attribute {
    pub alias: String,
    pub identifier: String,
    pub index: AttributeIndex,
    pub meta: AttributeMeta,
}

impl Attribute {
    pub fn new(
        alias: impl Into<String>,
        identifier: impl Into<String>,
        index: AttributeIndex,
        meta: AttributeMeta,
    ) -> Self {
        Self {
            alias: alias.into(),
            identifier: identifier.into(),
            index,
            meta,
        }
    }
}

/// The attribute registry plus per-key mutation state for one schema.
pub struct IndexSchema {
    name: String,
    attributes: Vec<Attribute>,
    by_alias: HashMap<String, usize>,
    ready: AtomicBool,
    backfill_remaining: AtomicUsize,
    /// Per-key in-flight mutation slots (see the pipeline).
    pub(crate) mutations: Mutex<HashMap<InternedStr, KeySlot>>,
    /// Keys touched inside a multi-command batch, drained at batch end.
    pub(crate) deferred: Mutex<BTreeSet<InternedStr>>,
}

impl IndexSchema {
    pub(crate) fn new(name: String, attributes: Vec<Attribute>) -> Result<Self> {
        let mut by_alias = HashMap::new();
        for (i, attribute) in attributes.iter().enumerate() {
            if by_alias.insert(attribute.alias.clone(), i).is_some() {
                return Err(EngineError::InvalidArgument(format!(
                    "duplicate attribute alias: {}",
                    attribute.alias
                )));
            }
        }
        Ok(Self {
            name,
            attributes,
            by_alias,
            ready: AtomicBool::new(true),
            backfill_remaining: AtomicUsize::new(0),
            mutations: Mutex::new(HashMap::new()),
            deferred: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, alias: &str) -> Option<&Attribute> {
        self.by_alias.get(alias).map(|&i| &self.attributes[i])
    }

    /// The stored identifier behind an alias.
    pub fn identifier_of(&self, alias: &str) -> Result<&str> {
        self.attribute(alias)
            .map(|a| a.identifier.as_str())
            .ok_or_else(|| EngineError::NotFound(format!("unknown attribute: {}", alias)))
    }

    /// The vector index behind an alias.
    pub fn vector_index(&self, alias: &str) -> Result<Arc<dyn KnnIndex>> {
        match self.attribute(alias).map(|a| &a.index) {
            Some(AttributeIndex::Vector(index)) => Ok(Arc::clone(index)),
            Some(_) => Err(EngineError::InvalidArgument(format!(
                "attribute {} is not a vector index",
                alias
            ))),
            None => Err(EngineError::NotFound(format!("unknown attribute: {}", alias))),
        }
    }

    /// Identifiers of all vector attributes; used when a reply needs to
    /// know whether a field can be served from an index.
    pub fn vector_attribute_for_identifier(&self, identifier: &str) -> Option<Arc<dyn KnnIndex>> {
        self.attributes.iter().find_map(|a| match &a.index {
            AttributeIndex::Vector(index) if a.identifier == identifier => {
                Some(Arc::clone(index))
            }
            _ => None,
        })
    }

    /// True once backfill over the pre-existing key space has finished.
    /// Queries are served during backfill but may return partial results.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn begin_backfill(&self, keys: usize) {
        if keys == 0 {
            self.ready.store(true, Ordering::Release);
            return;
        }
        self.ready.store(false, Ordering::Release);
        self.backfill_remaining.store(keys, Ordering::Release);
    }

    fn note_mutation_done(&self) {
        if self.ready.load(Ordering::Acquire) {
            return;
        }
        let previous = self.backfill_remaining.fetch_sub(1, Ordering::AcqRel);
        if previous <= 1 {
            self.ready.store(true, Ordering::Release);
            tracing::debug!(schema = %self.name, "backfill finished");
        }
    }

    /// Apply one snapshot of field values to every attribute index.
    /// `None` fields model a deleted key. Per-index failures are logged
    /// and counted, never fatal to the pipeline.
    pub(crate) fn apply_snapshot(
        &self,
        key: &InternedStr,
        fields: &FieldSnapshot,
        metrics: &EngineMetrics,
    ) {
        for attribute in &self.attributes {
            let result = match fields {
                None => match attribute.index.remove_record(key) {
                    Ok(_) => Ok(()),
                    // Deleting a key this index never held is not a fault.
                    Err(EngineError::NotFound(_)) => Ok(()),
                    Err(error) => Err(error),
                },
                Some(map) => match map.get(attribute.identifier.as_str()) {
                    Some(data) => {
                        let applied = if attribute.index.is_tracked(key) {
                            attribute.index.modify_record(key, data)
                        } else {
                            attribute.index.add_record(key, data)
                        };
                        match applied {
                            Err(EngineError::Parse(message)) => {
                                // Unparseable attribute: the key still
                                // belongs to the schema, so negations must
                                // see it.
                                attribute.index.track_missing(key);
                                Err(EngineError::Parse(message))
                            }
                            other => other.map(|_| ()),
                        }
                    }
                    None => {
                        if attribute.index.is_tracked(key) {
                            let _ = attribute.index.remove_record(key);
                        }
                        attribute.index.track_missing(key);
                        Ok(())
                    }
                },
            };
            if let Err(error) = result {
                metrics.note_mutation_failure();
                tracing::warn!(
                    schema = %self.name,
                    attribute = %attribute.alias,
                    %error,
                    "failed to apply mutation"
                );
            }
        }
        metrics.note_mutation_applied();
        self.note_mutation_done();
    }

    /// Info block for the host `info` command.
    pub fn info(&self) -> Vec<(String, String)> {
        let mut out = vec![
            ("name".to_string(), self.name.clone()),
            ("ready".to_string(), self.is_ready().to_string()),
            ("attributes".to_string(), self.attributes.len().to_string()),
        ];
        for attribute in &self.attributes {
            out.push(("alias".to_string(), attribute.alias.clone()));
            out.push(("identifier".to_string(), attribute.identifier.clone()));
            out.extend(attribute.index.info());
        }
        out
    }
}

impl FieldLookup for IndexSchema {
    fn lookup_field(&self, alias: &str) -> Option<FieldTarget> {
        let attribute = self.attribute(alias)?;
        let kind = match &attribute.index {
            AttributeIndex::Vector(_) => FieldKind::Vector,
            AttributeIndex::Numeric(index) => FieldKind::Numeric(Arc::clone(index)),
            AttributeIndex::Tag(index) => FieldKind::Tag(Arc::clone(index)),
        };
        Some(FieldTarget {
            identifier: attribute.identifier.clone(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use yuzu_intern::InternStore;
    use yuzu_vector::FlatIndex;

    fn schema_with_numeric_and_vector() -> (Arc<InternStore>, IndexSchema) {
        let intern = Arc::new(InternStore::new());
        let attributes = vec![
            Attribute::new(
                "price",
                "price",
                AttributeIndex::Numeric(Arc::new(NumericIndex::new())),
                AttributeMeta::Numeric,
            ),
            Attribute::new(
                "vec",
                "embedding",
                AttributeIndex::Vector(Arc::new(FlatIndex::new(
                    2,
                    Metric::L2,
                    8,
                    Arc::clone(&intern),
                ))),
                AttributeMeta::Flat { block_size: 8 },
            ),
        ];
        let schema = IndexSchema::new("idx".to_string(), attributes).unwrap();
        (intern, schema)
    }

    #[test]
    fn test_alias_resolution() {
        let (_, schema) = schema_with_numeric_and_vector();
        assert_eq!(schema.identifier_of("vec").unwrap(), "embedding");
        assert!(schema.vector_index("vec").is_ok());
        assert!(matches!(
            schema.vector_index("price"),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            schema.identifier_of("ghost"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let attributes = vec![
            Attribute::new(
                "a",
                "x",
                AttributeIndex::Numeric(Arc::new(NumericIndex::new())),
                AttributeMeta::Numeric,
            ),
            Attribute::new(
                "a",
                "y",
                AttributeIndex::Numeric(Arc::new(NumericIndex::new())),
                AttributeMeta::Numeric,
            ),
        ];
        assert!(IndexSchema::new("idx".to_string(), attributes).is_err());
    }

    #[test]
    fn test_apply_snapshot_add_modify_delete() {
        let (intern, schema) = schema_with_numeric_and_vector();
        let metrics = EngineMetrics::noop();
        let key = intern.intern(b"doc");

        let mut fields = HashMap::new();
        fields.insert("price".to_string(), b"5".to_vec());
        fields.insert(
            "embedding".to_string(),
            yuzu_vector::payload_from_floats(&[1.0, 2.0]),
        );
        schema.apply_snapshot(&key, &Some(fields.clone()), &metrics);
        assert_eq!(schema.attribute("price").unwrap().index.record_count(), 1);
        assert_eq!(schema.attribute("vec").unwrap().index.record_count(), 1);

        fields.insert("price".to_string(), b"9".to_vec());
        schema.apply_snapshot(&key, &Some(fields), &metrics);
        let AttributeIndex::Numeric(numeric) = &schema.attribute("price").unwrap().index else {
            unreachable!()
        };
        assert_eq!(numeric.value_of(&key), Some(9.0));

        schema.apply_snapshot(&key, &None, &metrics);
        assert_eq!(schema.attribute("price").unwrap().index.record_count(), 0);
        assert_eq!(schema.attribute("vec").unwrap().index.record_count(), 0);
        assert_eq!(metrics.mutations_applied(), 3);
    }

    #[test]
    fn test_missing_field_goes_untracked() {
        let (intern, schema) = schema_with_numeric_and_vector();
        let metrics = EngineMetrics::noop();
        let key = intern.intern(b"doc");
        let mut fields = HashMap::new();
        fields.insert(
            "embedding".to_string(),
            yuzu_vector::payload_from_floats(&[1.0, 2.0]),
        );
        schema.apply_snapshot(&key, &Some(fields), &metrics);

        let AttributeIndex::Numeric(numeric) = &schema.attribute("price").unwrap().index else {
            unreachable!()
        };
        // The key lacks `price`, so negated range filters must surface it.
        assert_eq!(numeric.fetch_negated(0.0, 100.0, true, true).len(), 1);
    }

    #[test]
    fn test_unparseable_numeric_tracked_as_missing() {
        let (intern, schema) = schema_with_numeric_and_vector();
        let metrics = EngineMetrics::noop();
        let key = intern.intern(b"doc");
        let mut fields = HashMap::new();
        fields.insert("price".to_string(), b"not-a-number".to_vec());
        schema.apply_snapshot(&key, &Some(fields), &metrics);

        let AttributeIndex::Numeric(numeric) = &schema.attribute("price").unwrap().index else {
            unreachable!()
        };
        assert_eq!(numeric.record_count(), 0);
        assert_eq!(numeric.fetch_negated(0.0, 1.0, true, true).len(), 1);
    }

    #[test]
    fn test_backfill_ready_bit() {
        let (intern, schema) = schema_with_numeric_and_vector();
        let metrics = EngineMetrics::noop();
        schema.begin_backfill(2);
        assert!(!schema.is_ready());
        let k1 = intern.intern(b"k1");
        let k2 = intern.intern(b"k2");
        schema.apply_snapshot(&k1, &None, &metrics);
        assert!(!schema.is_ready());
        schema.apply_snapshot(&k2, &None, &metrics);
        assert!(schema.is_ready());
    }
}
