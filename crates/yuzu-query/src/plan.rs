//! Pre-filter vs. inline-filter plan selection.
//!
//! The planner estimates how many records qualify under a predicate using
//! the secondary indices' O(log N) counts, composes estimates upward, and
//! compares against a fraction of the index size. Sparse predicates
//! pre-filter (enumerate keys, score each); dense ones filter inline during
//! the vector search.

use crate::predicate::Predicate;
use yuzu_intern::InternedStr;

/// The executor strategy chosen for a hybrid query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPlan {
    /// Enumerate predicate-matching keys, then score them directly.
    PreFilter,
    /// Run the vector search with a per-candidate predicate functor.
    InlineFilter,
}

/// Estimated number of records qualifying under `predicate`, given `total`
/// records in the vector index.
pub fn estimate_qualified(predicate: &Predicate, total: usize) -> usize {
    match predicate {
        Predicate::Numeric(p) => {
            p.index
                .count_range(p.start, p.end, p.start_inclusive, p.end_inclusive)
        }
        Predicate::Tag(p) => p.index.estimate_matching(&p.tags),
        Predicate::And(l, r) => estimate_qualified(l, total).min(estimate_qualified(r, total)),
        Predicate::Or(l, r) => {
            (estimate_qualified(l, total) + estimate_qualified(r, total)).min(total)
        }
        Predicate::Not(inner) => total.saturating_sub(estimate_qualified(inner, total)),
    }
}

/// Pick a plan: pre-filter when the estimate stays within
/// `threshold · total`.
pub fn choose_plan(estimate: usize, total: usize, threshold: f64) -> QueryPlan {
    if (estimate as f64) <= threshold * (total as f64) {
        QueryPlan::PreFilter
    } else {
        QueryPlan::InlineFilter
    }
}

/// Candidate key stream for the pre-filter plan.
///
/// Yields a superset of the qualifying keys (the executor re-checks the
/// full predicate per key): AND streams its cheaper side, OR concatenates,
/// and negation pushes down to the leaves' negated fetchers via De Morgan.
/// Duplicates are possible; the executor deduplicates.
pub fn candidate_keys(predicate: &Predicate) -> Vec<InternedStr> {
    collect(predicate, false)
}

fn collect(predicate: &Predicate, negated: bool) -> Vec<InternedStr> {
    match predicate {
        Predicate::Numeric(p) => {
            if negated {
                p.index
                    .fetch_negated(p.start, p.end, p.start_inclusive, p.end_inclusive)
            } else {
                p.index
                    .fetch_range(p.start, p.end, p.start_inclusive, p.end_inclusive)
            }
        }
        Predicate::Tag(p) => {
            if negated {
                p.index.fetch_negated(&p.tags)
            } else {
                p.index.fetch_matching(&p.tags)
            }
        }
        Predicate::Not(inner) => collect(inner, !negated),
        Predicate::And(l, r) if !negated => cheaper_side(l, r, negated),
        Predicate::Or(l, r) if !negated => {
            let mut keys = collect(l, negated);
            keys.extend(collect(r, negated));
            keys
        }
        // De Morgan under negation: -(a AND b) = -a OR -b, -(a OR b) = -a AND -b.
        Predicate::And(l, r) => {
            let mut keys = collect(l, true);
            keys.extend(collect(r, true));
            keys
        }
        Predicate::Or(l, r) => cheaper_side(l, r, true),
    }
}

fn cheaper_side(l: &Predicate, r: &Predicate, negated: bool) -> Vec<InternedStr> {
    // Stream whichever side promises fewer keys; correctness is preserved
    // because the executor evaluates the whole predicate per key.
    let left = collect(l, negated);
    let right = collect(r, negated);
    if left.len() <= right.len() {
        left
    } else {
        right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{NumericPredicate, TagPredicate};
    use std::sync::Arc;
    use yuzu_index::{NumericIndex, TagIndex};
    use yuzu_intern::InternStore;

    struct Fixture {
        store: InternStore,
        numeric: Arc<NumericIndex>,
        tags: Arc<TagIndex>,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                store: InternStore::new(),
                numeric: Arc::new(NumericIndex::new()),
                tags: Arc::new(TagIndex::new(',', false)),
            };
            for i in 0..100 {
                let key = fixture.store.intern(format!("k{:03}", i).as_bytes());
                fixture
                    .numeric
                    .add_record(&key, format!("{}", i).as_bytes())
                    .unwrap();
                let color = if i < 5 { "red" } else { "blue" };
                fixture.tags.add_record(&key, color.as_bytes()).unwrap();
            }
            fixture
        }

        fn price(&self, lo: f64, hi: f64) -> Predicate {
            Predicate::Numeric(NumericPredicate {
                index: Arc::clone(&self.numeric),
                identifier: "price".to_string(),
                start: lo,
                start_inclusive: true,
                end: hi,
                end_inclusive: true,
            })
        }

        fn color(&self, tag: &str) -> Predicate {
            Predicate::Tag(TagPredicate {
                index: Arc::clone(&self.tags),
                identifier: "color".to_string(),
                raw: tag.to_string(),
                tags: [tag.to_string()].into_iter().collect(),
            })
        }
    }

    #[test]
    fn test_leaf_estimates() {
        let f = Fixture::new();
        assert_eq!(estimate_qualified(&f.price(10.0, 19.0), 100), 10);
        assert_eq!(estimate_qualified(&f.color("red"), 100), 5);
        assert_eq!(estimate_qualified(&f.color("missing"), 100), 0);
    }

    #[test]
    fn test_composed_estimates() {
        let f = Fixture::new();
        let and = Predicate::And(Box::new(f.price(0.0, 49.0)), Box::new(f.color("red")));
        assert_eq!(estimate_qualified(&and, 100), 5);

        let or = Predicate::Or(Box::new(f.price(0.0, 49.0)), Box::new(f.color("blue")));
        assert_eq!(estimate_qualified(&or, 100), 100);

        let not = Predicate::Not(Box::new(f.color("red")));
        assert_eq!(estimate_qualified(&not, 100), 95);
    }

    #[test]
    fn test_plan_threshold() {
        assert_eq!(choose_plan(1, 1000, 0.01), QueryPlan::PreFilter);
        assert_eq!(choose_plan(10, 1000, 0.01), QueryPlan::PreFilter);
        assert_eq!(choose_plan(11, 1000, 0.01), QueryPlan::InlineFilter);
        // An empty index always pre-filters (estimate 0).
        assert_eq!(choose_plan(0, 0, 0.01), QueryPlan::PreFilter);
    }

    #[test]
    fn test_candidate_keys_and_picks_cheaper_side() {
        let f = Fixture::new();
        let and = Predicate::And(Box::new(f.price(0.0, 49.0)), Box::new(f.color("red")));
        let keys = candidate_keys(&and);
        // The red posting list (5 keys) is cheaper than the 50-key range.
        assert_eq!(keys.len(), 5);
    }

    #[test]
    fn test_candidate_keys_or_unions() {
        let f = Fixture::new();
        let or = Predicate::Or(Box::new(f.price(0.0, 9.0)), Box::new(f.color("red")));
        let keys = candidate_keys(&or);
        // 10 + 5 with 5 duplicates; deduplication is the executor's job.
        assert_eq!(keys.len(), 15);
    }

    #[test]
    fn test_negation_pushdown() {
        let f = Fixture::new();
        // -(price in [0,94]) leaves 5 keys.
        let not = Predicate::Not(Box::new(f.price(0.0, 94.0)));
        assert_eq!(candidate_keys(&not).len(), 5);

        // -(red OR price<=4) = -red AND -(price<=4): cheaper side has 95.
        let not_or = Predicate::Not(Box::new(Predicate::Or(
            Box::new(f.color("red")),
            Box::new(f.price(0.0, 4.0)),
        )));
        assert_eq!(candidate_keys(&not_or).len(), 95);

        // Double negation cancels.
        let double = Predicate::Not(Box::new(Predicate::Not(Box::new(f.color("red")))));
        assert_eq!(candidate_keys(&double).len(), 5);
    }
}
