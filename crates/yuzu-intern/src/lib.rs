//! Interned byte strings for yuzu.
//!
//! Index entries reference user keys and vector payloads many times over.
//! Interning stores one copy of each distinct byte sequence and hands out
//! cheap reference-counted handles:
//!
//! - **`InternedStr`**: immutable, content-hashed handle; equality and hash
//!   are over the bytes, lifetime is the longest holder.
//! - **`InternStore`**: sharded, thread-safe deduplication map. Reads after
//!   intern are lock-free (the handle owns its bytes).
//! - **`SlabArena`**: fixed-slot arena so equal-length vector payloads share
//!   dense blocks, which keeps brute-force scans cache-friendly. Slots
//!   return to a free list when the last handle drops.
//!
//! # Example
//!
//! ```
//! use yuzu_intern::InternStore;
//!
//! let store = InternStore::new();
//! let a = store.intern(b"doc:1");
//! let b = store.intern(b"doc:1");
//! assert!(a.ptr_eq(&b));
//! assert_eq!(a.as_bytes(), b"doc:1");
//! ```

mod slab;
mod store;

pub use slab::{SlabArena, SlabSlot};
pub use store::{InternStore, InternedStr};

/// Error type for intern operations.
#[derive(Debug, thiserror::Error)]
pub enum InternError {
    #[error("slot size mismatch: arena holds {expected} byte slots, got {actual}")]
    SlotSize { expected: usize, actual: usize },
}

/// Result type for intern operations.
pub type Result<T> = std::result::Result<T, InternError>;

/// FNV-1a 64-bit content hash.
///
/// Stable across processes, which also makes it usable as a fingerprint for
/// metadata reconciliation.
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
