//! Filter language, hybrid planning, and query execution for yuzu.
//!
//! A hybrid query is "the K nearest neighbors of this vector, restricted to
//! records matching this predicate". The pieces:
//!
//! - **Predicate tree** ([`Predicate`]): immutable expression over numeric
//!   ranges and tag sets, evaluated through a visitor whose only state is
//!   the key under test.
//! - **Filter parser** ([`FilterParser`]): the `@field:[lo hi]` /
//!   `@field:{a|b}` expression language with OR (`|`), implicit AND
//!   (adjacency), negation (`-`) and grouping.
//! - **Planner** ([`plan`]): estimates how many records qualify and picks
//!   pre-filtering (enumerate keys, then score) or inline filtering (let
//!   the vector search consult the predicate per candidate).
//! - **Executor** ([`search`]): runs the chosen plan under a deadline and
//!   windows the reply.

mod parser;
mod plan;
mod predicate;
mod reply;
mod search;

pub use parser::{
    FieldKind, FieldLookup, FieldTarget, FilterParseError, FilterParser, ParseErrorKind,
    ParsedFilter,
};
pub use plan::{candidate_keys, choose_plan, estimate_qualified, QueryPlan};
pub use predicate::{
    InlineEvaluator, NumericPredicate, Predicate, PredicateEvaluator, TagPredicate,
};
pub use reply::{build_reply, format_score, ReplyRow, SearchReply};
pub use search::{execute_knn, KnnOutcome, LimitWindow, ReturnAttribute, SearchParams};

use yuzu_vector::Neighbor;

/// Error type for query planning and execution.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] FilterParseError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("query deadline exceeded")]
    DeadlineExceeded {
        /// Neighbors accumulated before the deadline fired.
        partial: Vec<Neighbor>,
    },

    #[error("vector index error: {0}")]
    Vector(#[from] yuzu_vector::VectorError),

    #[error("secondary index error: {0}")]
    Index(#[from] yuzu_index::IndexError),
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
