//! Sharded intern store.
//!
//! Buckets hold weak handles: dropping the last `InternedStr` frees the
//! bytes (or returns the slab slot) immediately, and the dead weak entry is
//! swept out of its bucket on the next intern that touches it.

use crate::slab::{SlabArena, SlabSlot};
use crate::{fnv1a_64, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

const SHARD_COUNT: usize = 16;

enum Storage {
    Inline(Box<[u8]>),
    Slab(SlabSlot),
}

struct Entry {
    hash: u64,
    storage: Storage,
}

impl Entry {
    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Inline(b) => b,
            Storage::Slab(slot) => slot.as_bytes(),
        }
    }
}

/// Immutable, reference-counted, content-deduplicated byte string.
///
/// Equality and ordering are over the content; two handles from the same
/// store with equal content share one allocation.
#[derive(Clone)]
pub struct InternedStr {
    entry: Arc<Entry>,
}

impl InternedStr {
    /// Borrow the underlying bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.entry.bytes()
    }

    /// Content length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// True if the content is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// True if both handles share the same allocation.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Precomputed content hash.
    #[inline]
    pub fn content_hash(&self) -> u64 {
        self.entry.hash
    }
}

impl PartialEq for InternedStr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.entry.hash == other.entry.hash && self.as_bytes() == other.as_bytes())
    }
}

impl Eq for InternedStr {}

impl Hash for InternedStr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.entry.hash);
    }
}

impl PartialOrd for InternedStr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternedStr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Debug for InternedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternedStr({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl AsRef<[u8]> for InternedStr {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Thread-safe deduplication store.
///
/// Interning takes one shard lock; reads through the returned handle take
/// no locks at all.
pub struct InternStore {
    shards: Vec<Mutex<HashMap<u64, Vec<Weak<Entry>>>>>,
}

impl InternStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    /// Intern `bytes`, storing them inline on first sight.
    pub fn intern(&self, bytes: &[u8]) -> InternedStr {
        self.intern_with::<_, std::convert::Infallible>(bytes, |b| Ok(Storage::Inline(b.into())))
            .unwrap_or_else(|e| match e {})
    }

    /// Intern `bytes` into `arena` slots. Content already interned (in any
    /// storage) is shared instead of re-allocated.
    pub fn intern_in(&self, bytes: &[u8], arena: &Arc<SlabArena>) -> Result<InternedStr> {
        self.intern_with(bytes, |b| arena.alloc(b).map(Storage::Slab))
    }

    fn intern_with<F, E>(&self, bytes: &[u8], make: F) -> std::result::Result<InternedStr, E>
    where
        F: FnOnce(&[u8]) -> std::result::Result<Storage, E>,
    {
        let hash = fnv1a_64(bytes);
        let mut shard = self.shards[hash as usize % SHARD_COUNT].lock();
        let bucket = shard.entry(hash).or_default();
        bucket.retain(|weak| weak.strong_count() > 0);
        for weak in bucket.iter() {
            if let Some(entry) = weak.upgrade() {
                if entry.bytes() == bytes {
                    return Ok(InternedStr { entry });
                }
            }
        }
        let entry = Arc::new(Entry {
            hash,
            storage: make(bytes)?,
        });
        bucket.push(Arc::downgrade(&entry));
        Ok(InternedStr { entry })
    }

    /// Count of live interned strings. Linear in bucket count; intended for
    /// info reporting and tests.
    pub fn live_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .values()
                    .map(|bucket| bucket.iter().filter(|w| w.strong_count() > 0).count())
                    .sum::<usize>()
            })
            .sum()
    }
}

impl Default for InternStore {
    fn default() -> Self {
        Self::new()
    }
}
