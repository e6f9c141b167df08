//! Property test: the pre-filter and inline-filter plans return the same
//! ordered top-k for any predicate over the same data.

use proptest::prelude::*;
use std::sync::Arc;
use yuzu_index::{NumericIndex, TagIndex};
use yuzu_intern::InternStore;
use yuzu_query::{
    execute_knn, NumericPredicate, Predicate, QueryPlan, SearchParams, TagPredicate,
};
use yuzu_vector::KnnIndex;
use yuzu_vector::{payload_from_floats, FlatIndex, Metric};

struct Fixture {
    vectors: FlatIndex,
    price: Arc<NumericIndex>,
    color: Arc<TagIndex>,
}

const COLORS: [&str; 4] = ["red", "green", "blue", "amber"];

fn build_fixture(values: &[(u8, u8)]) -> Fixture {
    let intern = Arc::new(InternStore::new());
    let fixture = Fixture {
        vectors: FlatIndex::new(2, Metric::L2, 8, Arc::clone(&intern)),
        price: Arc::new(NumericIndex::new()),
        color: Arc::new(TagIndex::new(',', false)),
    };
    for (i, (price, color)) in values.iter().enumerate() {
        let key = intern.intern(format!("k{:03}", i).as_bytes());
        fixture
            .vectors
            .add_record(
                &key,
                &payload_from_floats(&[*price as f32, (*color % 7) as f32]),
            )
            .unwrap();
        fixture
            .price
            .add_record(&key, format!("{}", price).as_bytes())
            .unwrap();
        fixture
            .color
            .add_record(&key, COLORS[(*color % 4) as usize].as_bytes())
            .unwrap();
    }
    fixture
}

#[derive(Debug, Clone)]
enum PredicateSpec {
    Price(u8, u8),
    Color(u8),
    And(Box<PredicateSpec>, Box<PredicateSpec>),
    Or(Box<PredicateSpec>, Box<PredicateSpec>),
    Not(Box<PredicateSpec>),
}

fn predicate_spec() -> impl Strategy<Value = PredicateSpec> {
    let leaf = prop_oneof![
        (0u8..30, 0u8..30).prop_map(|(a, b)| PredicateSpec::Price(a.min(b), a.max(b))),
        (0u8..4).prop_map(PredicateSpec::Color),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| PredicateSpec::And(Box::new(l), Box::new(r))),
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| PredicateSpec::Or(Box::new(l), Box::new(r))),
            inner.prop_map(|p| PredicateSpec::Not(Box::new(p))),
        ]
    })
}

fn realize(spec: &PredicateSpec, fixture: &Fixture) -> Predicate {
    match spec {
        PredicateSpec::Price(lo, hi) => Predicate::Numeric(NumericPredicate {
            index: Arc::clone(&fixture.price),
            identifier: "price".to_string(),
            start: *lo as f64,
            start_inclusive: true,
            end: *hi as f64,
            end_inclusive: true,
        }),
        PredicateSpec::Color(c) => Predicate::Tag(TagPredicate {
            index: Arc::clone(&fixture.color),
            identifier: "color".to_string(),
            raw: COLORS[(*c % 4) as usize].to_string(),
            tags: [COLORS[(*c % 4) as usize].to_string()].into_iter().collect(),
        }),
        PredicateSpec::And(l, r) => Predicate::And(
            Box::new(realize(l, fixture)),
            Box::new(realize(r, fixture)),
        ),
        PredicateSpec::Or(l, r) => Predicate::Or(
            Box::new(realize(l, fixture)),
            Box::new(realize(r, fixture)),
        ),
        PredicateSpec::Not(inner) => Predicate::Not(Box::new(realize(inner, fixture))),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_prefilter_and_inline_agree(
        records in prop::collection::vec((0u8..30, 0u8..30), 1..60),
        spec in predicate_spec(),
        k in 1usize..8,
        qx in 0u8..30,
    ) {
        let fixture = build_fixture(&records);
        let query = payload_from_floats(&[qx as f32, 3.0]);

        let make_params = || {
            SearchParams::new("v", query.clone(), k)
                .with_predicate(Some(realize(&spec, &fixture)))
        };

        // threshold 1.0 forces pre-filter, threshold < 0 forces inline.
        let pre = execute_knn(&fixture.vectors, &make_params(), 1.0, None).unwrap();
        let inline = execute_knn(&fixture.vectors, &make_params(), -1.0, None).unwrap();
        prop_assert_eq!(pre.plan, QueryPlan::PreFilter);
        prop_assert_eq!(inline.plan, QueryPlan::InlineFilter);

        let pre_keys: Vec<_> = pre.neighbors.iter().map(|n| n.key.as_bytes().to_vec()).collect();
        let inline_keys: Vec<_> =
            inline.neighbors.iter().map(|n| n.key.as_bytes().to_vec()).collect();
        prop_assert_eq!(pre_keys, inline_keys);
    }
}
