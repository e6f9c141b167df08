//! Numeric secondary index.
//!
//! Ordered multi-map from attribute value to the keys holding it, paired
//! with a [`RangeCountTree`] over the value multiset. The map answers range
//! iteration, the tree answers range counts; one mutex guards both so they
//! change atomically.

use crate::range_tree::RangeCountTree;
use crate::{IndexError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use yuzu_intern::InternedStr;

/// f64 wrapper ordered by `total_cmp`, usable as a BTreeMap key.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ValueKey(f64);

impl Eq for ValueKey {}

impl PartialOrd for ValueKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ValueKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

struct NumericInner {
    /// key -> current value.
    tracked: HashMap<InternedStr, f64>,
    /// Keys the schema owns that lack this attribute; consulted by negated
    /// predicates.
    untracked: BTreeSet<InternedStr>,
    /// value -> keys at that value, ascending. Key sets are BTreeSets so
    /// iteration order within a value group is deterministic.
    by_value: BTreeMap<ValueKey, BTreeSet<InternedStr>>,
    counts: RangeCountTree,
}

/// Numeric attribute index.
pub struct NumericIndex {
    inner: Mutex<NumericInner>,
}

impl NumericIndex {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NumericInner {
                tracked: HashMap::new(),
                untracked: BTreeSet::new(),
                by_value: BTreeMap::new(),
                counts: RangeCountTree::new(),
            }),
        }
    }

    fn parse_value(raw: &[u8]) -> Result<f64> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| IndexError::Parse("numeric value is not valid UTF-8".to_string()))?;
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| IndexError::Parse(format!("not a number: {:?}", text)))?;
        if !value.is_finite() {
            return Err(IndexError::Parse(format!("non-finite number: {}", value)));
        }
        Ok(value)
    }

    /// Index `key` at the value parsed from `raw`.
    ///
    /// Re-adding an identical `(key, value)` pair is an idempotent no-op
    /// returning false; a differing value replaces the previous one.
    pub fn add_record(&self, key: &InternedStr, raw: &[u8]) -> Result<bool> {
        let value = Self::parse_value(raw)?;
        let mut inner = self.inner.lock();
        inner.untracked.remove(key);
        match inner.tracked.get(key).copied() {
            Some(old) if old.total_cmp(&value).is_eq() => Ok(false),
            Some(old) => {
                detach(&mut inner, key, old);
                attach(&mut inner, key, value);
                Ok(true)
            }
            None => {
                attach(&mut inner, key, value);
                Ok(true)
            }
        }
    }

    /// Replace `key`'s value. Returns false when the value is unchanged.
    pub fn modify_record(&self, key: &InternedStr, raw: &[u8]) -> Result<bool> {
        self.add_record(key, raw)
    }

    /// Drop `key` from the index.
    pub fn remove_record(&self, key: &InternedStr) -> Result<bool> {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.tracked.remove(key) {
            detach_value_only(&mut inner, key, old);
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

    /// Record that `key` exists in the schema but carries no value for this
    /// attribute.
    pub fn track_missing(&self, key: &InternedStr) {
        let mut inner = self.inner.lock();
        if !inner.tracked.contains_key(key) {
            inner.untracked.insert(key.clone());
        }
    }

    pub fn is_tracked(&self, key: &InternedStr) -> bool {
        self.inner.lock().tracked.contains_key(key)
    }

    /// Current value of `key`, if indexed.
    pub fn value_of(&self, key: &InternedStr) -> Option<f64> {
        self.inner.lock().tracked.get(key).copied()
    }

    /// Number of keys carrying a value.
    pub fn record_count(&self) -> usize {
        self.inner.lock().tracked.len()
    }

    /// O(log N) count of keys whose value lies in the range.
    pub fn count_range(&self, lo: f64, hi: f64, lo_inclusive: bool, hi_inclusive: bool) -> usize {
        self.inner
            .lock()
            .counts
            .count_range(lo, hi, lo_inclusive, hi_inclusive)
    }

    /// Keys whose value lies in the range, ascending by value then by key
    /// within a value group.
    pub fn fetch_range(
        &self,
        lo: f64,
        hi: f64,
        lo_inclusive: bool,
        hi_inclusive: bool,
    ) -> Vec<InternedStr> {
        let inner = self.inner.lock();
        range_keys(&inner.by_value, lo, hi, lo_inclusive, hi_inclusive)
    }

    /// Keys outside the range, union the untracked set.
    pub fn fetch_negated(
        &self,
        lo: f64,
        hi: f64,
        lo_inclusive: bool,
        hi_inclusive: bool,
    ) -> Vec<InternedStr> {
        let inner = self.inner.lock();
        // Below-range keys, then above-range keys, then untracked.
        let mut keys = range_keys(&inner.by_value, f64::NEG_INFINITY, lo, true, !lo_inclusive);
        keys.extend(range_keys(
            &inner.by_value,
            hi,
            f64::INFINITY,
            !hi_inclusive,
            true,
        ));
        keys.extend(inner.untracked.iter().cloned());
        keys
    }

    /// Snapshot of all `(key, value)` pairs for persistence.
    pub fn tracked_entries(&self) -> Vec<(InternedStr, f64)> {
        let inner = self.inner.lock();
        inner
            .tracked
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn for_each_tracked_key(&self, mut f: impl FnMut(&InternedStr)) {
        let inner = self.inner.lock();
        for key in inner.tracked.keys() {
            f(key);
        }
    }

    /// Info fields for the host `info` command.
    pub fn info(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock();
        vec![
            ("type".to_string(), "NUMERIC".to_string()),
            ("size".to_string(), inner.tracked.len().to_string()),
            ("untracked".to_string(), inner.untracked.len().to_string()),
        ]
    }
}

impl Default for NumericIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn attach(inner: &mut NumericInner, key: &InternedStr, value: f64) {
    inner.tracked.insert(key.clone(), value);
    inner
        .by_value
        .entry(ValueKey(value))
        .or_default()
        .insert(key.clone());
    inner.counts.add(value);
}

fn detach(inner: &mut NumericInner, key: &InternedStr, old: f64) {
    inner.tracked.remove(key);
    detach_value_only(inner, key, old);
}

fn detach_value_only(inner: &mut NumericInner, key: &InternedStr, old: f64) {
    if let Some(group) = inner.by_value.get_mut(&ValueKey(old)) {
        group.remove(key);
        if group.is_empty() {
            inner.by_value.remove(&ValueKey(old));
        }
    }
    inner.counts.remove(old);
}

fn range_keys(
    by_value: &BTreeMap<ValueKey, BTreeSet<InternedStr>>,
    lo: f64,
    hi: f64,
    lo_inclusive: bool,
    hi_inclusive: bool,
) -> Vec<InternedStr> {
    if lo > hi || (lo == hi && !(lo_inclusive && hi_inclusive)) {
        return Vec::new();
    }
    let start = if lo_inclusive {
        Bound::Included(ValueKey(lo))
    } else {
        Bound::Excluded(ValueKey(lo))
    };
    let end = if hi_inclusive {
        Bound::Included(ValueKey(hi))
    } else {
        Bound::Excluded(ValueKey(hi))
    };
    by_value
        .range((start, end))
        .flat_map(|(_, keys)| keys.iter().cloned())
        .collect()
}
