//! Secondary indices over scalar attributes for yuzu.
//!
//! Two index families back the filter language:
//!
//! - **`NumericIndex`**: ordered multi-map from attribute value to key set,
//!   paired with an order-statistic tree so range counts cost O(log N).
//! - **`TagIndex`**: set-valued attribute with posting lists per tag and
//!   optional case folding.
//!
//! Both track an *untracked* key set (keys the schema knows about that lack
//! the attribute), which is what makes negated predicates answerable.
//! Fetch methods snapshot matching keys under the index lock, so callers
//! iterate without holding it.

mod numeric;
mod range_tree;
mod tag;

pub use numeric::NumericIndex;
pub use range_tree::RangeCountTree;
pub use tag::TagIndex;

/// Error type for secondary-index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to parse attribute value: {0}")]
    Parse(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for secondary-index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
