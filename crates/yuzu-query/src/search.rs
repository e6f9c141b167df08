//! Hybrid query executor.
//!
//! Runs a KNN query with an optional predicate under the plan the planner
//! picked. The pre-filter path streams candidate keys from the secondary
//! indices, re-checks the full predicate per key, and scores survivors into
//! a bounded heap; the inline path hands the vector index a predicate
//! functor. Deadline checks sit ahead of each expensive stretch and return
//! whatever partial results accumulated.

use crate::plan::{candidate_keys, choose_plan, estimate_qualified, QueryPlan};
use crate::predicate::{InlineEvaluator, Predicate};
use crate::{QueryError, Result};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use yuzu_intern::InternedStr;
use yuzu_vector::{KnnIndex, Neighbor, NeighborHeap};

/// Reply window: skip `first_index` rows, return at most `number`.
#[derive(Debug, Clone, Copy)]
pub struct LimitWindow {
    pub first_index: usize,
    pub number: usize,
}

impl Default for LimitWindow {
    fn default() -> Self {
        Self {
            first_index: 0,
            number: 10,
        }
    }
}

/// One projected attribute: the stored identifier and the alias it returns
/// under.
#[derive(Debug, Clone)]
pub struct ReturnAttribute {
    pub identifier: String,
    pub alias: String,
}

/// Everything a hybrid KNN query carries.
pub struct SearchParams {
    /// Alias of the vector attribute being searched.
    pub attribute_alias: String,
    /// Raw float32 query payload.
    pub query: Vec<u8>,
    pub k: usize,
    /// None = match-all.
    pub predicate: Option<Predicate>,
    pub return_attributes: Vec<ReturnAttribute>,
    pub limit: LimitWindow,
    /// Alias the distance materializes under.
    pub score_as: String,
    pub timeout: Duration,
    pub no_content: bool,
    /// Skip cluster fan-out and answer from local partitions only.
    pub local_only: bool,
    /// Per-query beam width override for graph indices.
    pub ef_runtime: Option<usize>,
}

impl SearchParams {
    pub fn new(attribute_alias: impl Into<String>, query: Vec<u8>, k: usize) -> Self {
        let attribute_alias = attribute_alias.into();
        Self {
            score_as: format!("__{}_score", attribute_alias),
            attribute_alias,
            query,
            k,
            predicate: None,
            return_attributes: Vec::new(),
            limit: LimitWindow::default(),
            timeout: Duration::from_secs(1),
            no_content: false,
            local_only: false,
            ef_runtime: None,
        }
    }

    pub fn with_predicate(mut self, predicate: Option<Predicate>) -> Self {
        self.predicate = predicate;
        self
    }
}

/// Executor result plus the planning decision, for metrics and info.
#[derive(Debug)]
pub struct KnnOutcome {
    pub neighbors: Vec<Neighbor>,
    pub plan: QueryPlan,
    pub estimate: usize,
}

/// Execute the KNN portion of a query against one vector index.
pub fn execute_knn(
    index: &dyn KnnIndex,
    params: &SearchParams,
    pre_filter_threshold: f64,
    deadline: Option<Instant>,
) -> Result<KnnOutcome> {
    let expired = |d: Option<Instant>| d.map_or(false, |d| Instant::now() >= d);
    if expired(deadline) {
        return Err(QueryError::DeadlineExceeded { partial: Vec::new() });
    }

    let total = index.record_count();
    let Some(predicate) = &params.predicate else {
        let neighbors = index.search(&params.query, params.k, params.ef_runtime, None)?;
        return Ok(KnnOutcome {
            neighbors,
            plan: QueryPlan::InlineFilter,
            estimate: total,
        });
    };

    let estimate = estimate_qualified(predicate, total);
    let plan = choose_plan(estimate, total, pre_filter_threshold);
    tracing::debug!(?plan, estimate, total, "hybrid query planned");

    match plan {
        QueryPlan::PreFilter => {
            let prepared = index.prepare_query(&params.query)?;
            let normalizes = index.metric().normalizes();
            let mut heap = NeighborHeap::new(params.k);
            let mut seen: HashSet<InternedStr> = HashSet::new();
            for (i, key) in candidate_keys(predicate).into_iter().enumerate() {
                if i % 64 == 0 && expired(deadline) {
                    return Err(QueryError::DeadlineExceeded {
                        partial: heap.into_sorted(),
                    });
                }
                if !seen.insert(key.clone()) {
                    continue;
                }
                if !InlineEvaluator::matches(&key, predicate) {
                    continue;
                }
                if normalizes && index.magnitude_of(&key) == Some(0.0) {
                    continue;
                }
                // A key can vanish between the fetch and scoring; that is
                // a skip, not an error.
                match index.distance_prepared(&key, &prepared) {
                    Ok(distance) => heap.push(Neighbor::new(key, distance)),
                    Err(_) => continue,
                }
            }
            Ok(KnnOutcome {
                neighbors: heap.into_sorted(),
                plan,
                estimate,
            })
        }
        QueryPlan::InlineFilter => {
            let filter = |key: &InternedStr| InlineEvaluator::matches(key, predicate);
            let neighbors =
                index.search(&params.query, params.k, params.ef_runtime, Some(&filter))?;
            if expired(deadline) {
                return Err(QueryError::DeadlineExceeded { partial: neighbors });
            }
            Ok(KnnOutcome {
                neighbors,
                plan,
                estimate,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{NumericPredicate, TagPredicate};
    use std::sync::Arc;
    use yuzu_index::{NumericIndex, TagIndex};
    use yuzu_intern::InternStore;
    use yuzu_vector::{payload_from_floats, FlatIndex, Metric};

    struct Fixture {
        intern: Arc<InternStore>,
        vectors: FlatIndex,
        price: Arc<NumericIndex>,
        color: Arc<TagIndex>,
    }

    impl Fixture {
        /// Ten keys k0..k9 with v=[i/10,0,0,0], price=i, color red for
        /// even i, blue for odd.
        fn new() -> Self {
            let intern = Arc::new(InternStore::new());
            let fixture = Self {
                vectors: FlatIndex::new(4, Metric::L2, 16, Arc::clone(&intern)),
                price: Arc::new(NumericIndex::new()),
                color: Arc::new(TagIndex::new(',', false)),
                intern,
            };
            for i in 0..10 {
                let key = fixture.intern.intern(format!("k{}", i).as_bytes());
                fixture
                    .vectors
                    .add_record(&key, &payload_from_floats(&[i as f32 / 10.0, 0.0, 0.0, 0.0]))
                    .unwrap();
                fixture
                    .price
                    .add_record(&key, format!("{}", i).as_bytes())
                    .unwrap();
                let tag = if i % 2 == 0 { "red" } else { "blue" };
                fixture.color.add_record(&key, tag.as_bytes()).unwrap();
            }
            fixture
        }

        fn price_range(&self, lo: f64, hi: f64) -> Predicate {
            Predicate::Numeric(NumericPredicate {
                index: Arc::clone(&self.price),
                identifier: "price".to_string(),
                start: lo,
                start_inclusive: true,
                end: hi,
                end_inclusive: true,
            })
        }

        fn color_is(&self, tag: &str) -> Predicate {
            Predicate::Tag(TagPredicate {
                index: Arc::clone(&self.color),
                identifier: "color".to_string(),
                raw: tag.to_string(),
                tags: [tag.to_string()].into_iter().collect(),
            })
        }

        fn query(&self) -> Vec<u8> {
            payload_from_floats(&[1.0, 0.0, 0.0, 0.0])
        }
    }

    fn keys(neighbors: &[Neighbor]) -> Vec<String> {
        neighbors
            .iter()
            .map(|n| String::from_utf8_lossy(n.key.as_bytes()).to_string())
            .collect()
    }

    #[test]
    fn test_match_all() {
        let f = Fixture::new();
        let params = SearchParams::new("v", f.query(), 3);
        let outcome = execute_knn(&f.vectors, &params, 0.01, None).unwrap();
        assert_eq!(keys(&outcome.neighbors), vec!["k9", "k8", "k7"]);
    }

    #[test]
    fn test_hybrid_range_filter() {
        let f = Fixture::new();
        let params =
            SearchParams::new("v", f.query(), 3).with_predicate(Some(f.price_range(3.0, 7.0)));
        // Force each plan in turn; both must agree.
        let pre = execute_knn(&f.vectors, &params, 1.0, None).unwrap();
        assert_eq!(pre.plan, QueryPlan::PreFilter);
        assert_eq!(keys(&pre.neighbors), vec!["k7", "k6", "k5"]);

        let inline = execute_knn(&f.vectors, &params, 0.0, None).unwrap();
        assert_eq!(inline.plan, QueryPlan::InlineFilter);
        assert_eq!(keys(&inline.neighbors), vec!["k7", "k6", "k5"]);
    }

    #[test]
    fn test_negated_tag_filter() {
        let f = Fixture::new();
        let params = SearchParams::new("v", f.query(), 10)
            .with_predicate(Some(Predicate::Not(Box::new(f.color_is("red")))));
        for threshold in [0.0, 1.0] {
            let outcome = execute_knn(&f.vectors, &params, threshold, None).unwrap();
            assert_eq!(keys(&outcome.neighbors), vec!["k9", "k7", "k5", "k3", "k1"]);
        }
    }

    #[test]
    fn test_composed_filter_both_plans_agree() {
        let f = Fixture::new();
        let predicate = Predicate::Or(
            Box::new(Predicate::And(
                Box::new(f.price_range(0.0, 6.0)),
                Box::new(f.color_is("red")),
            )),
            Box::new(f.price_range(9.0, 9.0)),
        );
        let params = SearchParams::new("v", f.query(), 10).with_predicate(Some(predicate));
        let pre = execute_knn(&f.vectors, &params, 1.0, None).unwrap();
        let inline = execute_knn(&f.vectors, &params, 0.0, None).unwrap();
        assert_eq!(keys(&pre.neighbors), keys(&inline.neighbors));
        assert_eq!(keys(&pre.neighbors), vec!["k9", "k6", "k4", "k2", "k0"]);
    }

    #[test]
    fn test_empty_match() {
        let f = Fixture::new();
        let params =
            SearchParams::new("v", f.query(), 5).with_predicate(Some(f.price_range(50.0, 60.0)));
        let outcome = execute_knn(&f.vectors, &params, 1.0, None).unwrap();
        assert!(outcome.neighbors.is_empty());
        assert_eq!(outcome.estimate, 0);
    }

    #[test]
    fn test_expired_deadline() {
        let f = Fixture::new();
        let params = SearchParams::new("v", f.query(), 3);
        let past = Instant::now() - Duration::from_millis(1);
        let err = execute_knn(&f.vectors, &params, 0.01, Some(past)).unwrap_err();
        assert!(matches!(err, QueryError::DeadlineExceeded { .. }));
    }

    #[test]
    fn test_prefilter_skips_untracked_vector_keys() {
        let f = Fixture::new();
        // A key indexed for price but missing from the vector index.
        let ghost = f.intern.intern(b"ghost");
        f.price.add_record(&ghost, b"5").unwrap();
        let params =
            SearchParams::new("v", f.query(), 10).with_predicate(Some(f.price_range(3.0, 7.0)));
        let outcome = execute_knn(&f.vectors, &params, 1.0, None).unwrap();
        assert_eq!(keys(&outcome.neighbors), vec!["k7", "k6", "k5", "k4", "k3"]);
    }
}
