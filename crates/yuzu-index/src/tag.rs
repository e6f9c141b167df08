//! Tag secondary index.
//!
//! A tag attribute is a delimited string ("red, green , blue"). The index
//! parses it into a tag set at the configured separator, optionally case
//! folding, and maintains per-tag posting lists. Captured tag sets are
//! shared `Arc`s so inline predicate evaluation never copies them.

use crate::{IndexError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use yuzu_intern::InternedStr;

struct TrackedTags {
    tags: Arc<BTreeSet<String>>,
    /// Original attribute string, kept for persistence.
    raw: String,
}

struct TagInner {
    tracked: HashMap<InternedStr, TrackedTags>,
    posting: HashMap<String, BTreeSet<InternedStr>>,
    untracked: BTreeSet<InternedStr>,
}

/// Tag attribute index.
pub struct TagIndex {
    separator: char,
    case_sensitive: bool,
    inner: Mutex<TagInner>,
}

impl TagIndex {
    pub fn new(separator: char, case_sensitive: bool) -> Self {
        Self {
            separator,
            case_sensitive,
            inner: Mutex::new(TagInner {
                tracked: HashMap::new(),
                posting: HashMap::new(),
                untracked: BTreeSet::new(),
            }),
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Split `raw` at the separator, trim whitespace, fold case when the
    /// field is insensitive, drop empties. Query tags go through the same
    /// path so they compare like stored tags.
    pub fn parse_tags(&self, raw: &str) -> BTreeSet<String> {
        raw.split(self.separator)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                if self.case_sensitive {
                    t.to_string()
                } else {
                    t.to_lowercase()
                }
            })
            .collect()
    }

    /// Index `key` under the tags parsed from `raw`. A value that parses to
    /// an empty tag set leaves the key untracked and returns false.
    pub fn add_record(&self, key: &InternedStr, raw: &[u8]) -> Result<bool> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| IndexError::Parse("tag value is not valid UTF-8".to_string()))?;
        let tags = self.parse_tags(text);
        let mut inner = self.inner.lock();
        if tags.is_empty() {
            if let Some(prev) = inner.tracked.remove(key) {
                unpost(&mut inner, key, &prev.tags);
            }
            inner.untracked.insert(key.clone());
            return Ok(false);
        }
        inner.untracked.remove(key);
        if let Some(prev) = inner.tracked.get(key) {
            if *prev.tags == tags {
                return Ok(false);
            }
            let prev_tags = Arc::clone(&prev.tags);
            unpost(&mut inner, key, &prev_tags);
        }
        for tag in &tags {
            inner
                .posting
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        inner.tracked.insert(
            key.clone(),
            TrackedTags {
                tags: Arc::new(tags),
                raw: text.to_string(),
            },
        );
        Ok(true)
    }

    pub fn modify_record(&self, key: &InternedStr, raw: &[u8]) -> Result<bool> {
        self.add_record(key, raw)
    }

    pub fn remove_record(&self, key: &InternedStr) -> Result<bool> {
        let mut inner = self.inner.lock();
        if let Some(prev) = inner.tracked.remove(key) {
            unpost(&mut inner, key, &prev.tags);
            return Ok(true);
        }
        if inner.untracked.remove(key) {
            return Ok(true);
        }
        Err(IndexError::NotFound(format!(
            "{:?}",
            String::from_utf8_lossy(key.as_bytes())
        )))
    }

    /// Record that `key` exists in the schema but has no usable tag value.
    pub fn track_missing(&self, key: &InternedStr) {
        let mut inner = self.inner.lock();
        if !inner.tracked.contains_key(key) {
            inner.untracked.insert(key.clone());
        }
    }

    pub fn is_tracked(&self, key: &InternedStr) -> bool {
        self.inner.lock().tracked.contains_key(key)
    }

    /// Shared handle to `key`'s tag set for inline evaluation.
    pub fn tags_of(&self, key: &InternedStr) -> Option<Arc<BTreeSet<String>>> {
        self.inner.lock().tracked.get(key).map(|t| Arc::clone(&t.tags))
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().tracked.len()
    }

    /// Keys whose tag set intersects `tags`, in key order.
    pub fn fetch_matching(&self, tags: &BTreeSet<String>) -> Vec<InternedStr> {
        let inner = self.inner.lock();
        let mut keys = BTreeSet::new();
        for tag in tags {
            if let Some(posting) = inner.posting.get(tag) {
                keys.extend(posting.iter().cloned());
            }
        }
        keys.into_iter().collect()
    }

    /// Keys whose tag set does not intersect `tags`, union the untracked
    /// set, in key order.
    pub fn fetch_negated(&self, tags: &BTreeSet<String>) -> Vec<InternedStr> {
        let inner = self.inner.lock();
        let mut keys: BTreeSet<InternedStr> = inner
            .tracked
            .iter()
            .filter(|(_, tracked)| tracked.tags.is_disjoint(tags))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(inner.untracked.iter().cloned());
        keys.into_iter().collect()
    }

    /// Upper-bound estimate of keys matching `tags`: the sum of posting-list
    /// sizes, capped at the tracked count.
    pub fn estimate_matching(&self, tags: &BTreeSet<String>) -> usize {
        let inner = self.inner.lock();
        let sum: usize = tags
            .iter()
            .map(|t| inner.posting.get(t).map_or(0, |p| p.len()))
            .sum();
        sum.min(inner.tracked.len())
    }

    /// Snapshot of `(key, raw_tag_string)` pairs for persistence.
    pub fn tracked_entries(&self) -> Vec<(InternedStr, String)> {
        let inner = self.inner.lock();
        inner
            .tracked
            .iter()
            .map(|(k, t)| (k.clone(), t.raw.clone()))
            .collect()
    }

    pub fn for_each_tracked_key(&self, mut f: impl FnMut(&InternedStr)) {
        let inner = self.inner.lock();
        for key in inner.tracked.keys() {
            f(key);
        }
    }

    pub fn info(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        vec![
            ("type".to_string(), "TAG".to_string()),
            ("size".to_string(), inner.tracked.len().to_string()),
            ("distinct_tags".to_string(), inner.posting.len().to_string()),
            ("separator".to_string(), self.separator.to_string()),
            ("case_sensitive".to_string(), self.case_sensitive.to_string()),
        ]
    }
}

fn unpost(inner: &mut TagInner, key: &InternedStr, tags: &BTreeSet<String>) {
    for tag in tags {
        if let Some(posting) = inner.posting.get_mut(tag) {
            posting.remove(key);
            if posting.is_empty() {
                inner.posting.remove(tag);
            }
        }
    }
}
