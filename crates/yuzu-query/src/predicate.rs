//! Predicate tree and its evaluators.
//!
//! Predicates are immutable after parsing and reference their indices
//! through shared handles, so a query can evaluate them without touching
//! the schema again. Evaluation dispatches through [`PredicateEvaluator`];
//! the stock [`InlineEvaluator`] carries only the key under test, which is
//! what lets the inline-filter loop run without allocations.

use std::collections::BTreeSet;
use std::sync::Arc;
use yuzu_index::{NumericIndex, TagIndex};
use yuzu_intern::InternedStr;

/// Numeric range predicate: `@field:[lo hi]`.
pub struct NumericPredicate {
    pub index: Arc<NumericIndex>,
    pub identifier: String,
    pub start: f64,
    pub start_inclusive: bool,
    pub end: f64,
    pub end_inclusive: bool,
}

impl NumericPredicate {
    pub fn matches(&self, value: f64) -> bool {
        let above = if self.start_inclusive {
            value >= self.start
        } else {
            value > self.start
        };
        let below = if self.end_inclusive {
            value <= self.end
        } else {
            value < self.end
        };
        above && below
    }
}

/// Tag membership predicate: `@field:{a|b}`. Matches when the record's tag
/// set intersects the query tags.
pub struct TagPredicate {
    pub index: Arc<TagIndex>,
    pub identifier: String,
    /// Original text between the braces, kept for wire round-trips.
    pub raw: String,
    /// Parsed query tags, case-folded the same way the index folds stored
    /// tags.
    pub tags: BTreeSet<String>,
}

impl TagPredicate {
    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        !self.tags.is_disjoint(tags)
    }
}

/// Visitor for leaf predicate evaluation.
pub trait PredicateEvaluator {
    fn evaluate_numeric(&mut self, predicate: &NumericPredicate) -> bool;
    fn evaluate_tags(&mut self, predicate: &TagPredicate) -> bool;
}

/// Immutable predicate expression tree.
pub enum Predicate {
    Numeric(NumericPredicate),
    Tag(TagPredicate),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluate against `evaluator`, short-circuiting composed nodes.
    pub fn evaluate(&self, evaluator: &mut dyn PredicateEvaluator) -> bool {
        match self {
            Predicate::Numeric(p) => evaluator.evaluate_numeric(p),
            Predicate::Tag(p) => evaluator.evaluate_tags(p),
            Predicate::And(l, r) => l.evaluate(evaluator) && r.evaluate(evaluator),
            Predicate::Or(l, r) => l.evaluate(evaluator) || r.evaluate(evaluator),
            Predicate::Not(inner) => !inner.evaluate(evaluator),
        }
    }

    /// Canonical text form, re-parseable into a structurally equal tree.
    pub fn render(&self) -> String {
        match self {
            Predicate::Numeric(p) => {
                let lo = render_bound(p.start, p.start_inclusive);
                let hi = render_bound(p.end, p.end_inclusive);
                format!("@{}:[{} {}]", p.identifier, lo, hi)
            }
            Predicate::Tag(p) => {
                let items: Vec<&str> = p.tags.iter().map(String::as_str).collect();
                format!("@{}:{{{}}}", p.identifier, items.join("|"))
            }
            Predicate::And(l, r) => format!("({} {})", l.render(), r.render()),
            Predicate::Or(l, r) => format!("({} | {})", l.render(), r.render()),
            Predicate::Not(inner) => format!("-{}", inner.render()),
        }
    }
}

fn render_bound(value: f64, inclusive: bool) -> String {
    let number = if value == f64::INFINITY {
        "+inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", value)
    };
    if inclusive {
        number
    } else {
        format!("({}", number)
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Predicate::Numeric(a), Predicate::Numeric(b)) => {
                Arc::ptr_eq(&a.index, &b.index)
                    && a.identifier == b.identifier
                    && a.start.total_cmp(&b.start).is_eq()
                    && a.end.total_cmp(&b.end).is_eq()
                    && a.start_inclusive == b.start_inclusive
                    && a.end_inclusive == b.end_inclusive
            }
            (Predicate::Tag(a), Predicate::Tag(b)) => {
                Arc::ptr_eq(&a.index, &b.index)
                    && a.identifier == b.identifier
                    && a.tags == b.tags
            }
            (Predicate::And(al, ar), Predicate::And(bl, br))
            | (Predicate::Or(al, ar), Predicate::Or(bl, br)) => al == bl && ar == br,
            (Predicate::Not(a), Predicate::Not(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Evaluates leaves against the indexed state of a single key.
pub struct InlineEvaluator<'a> {
    pub key: &'a InternedStr,
}

impl<'a> InlineEvaluator<'a> {
    pub fn new(key: &'a InternedStr) -> Self {
        Self { key }
    }

    /// Convenience wrapper: does `key` satisfy `predicate`?
    pub fn matches(key: &InternedStr, predicate: &Predicate) -> bool {
        predicate.evaluate(&mut InlineEvaluator::new(key))
    }
}

impl PredicateEvaluator for InlineEvaluator<'_> {
    fn evaluate_numeric(&mut self, predicate: &NumericPredicate) -> bool {
        predicate
            .index
            .value_of(self.key)
            .map_or(false, |value| predicate.matches(value))
    }

    fn evaluate_tags(&mut self, predicate: &TagPredicate) -> bool {
        predicate
            .index
            .tags_of(self.key)
            .map_or(false, |tags| predicate.matches(&tags))
    }
}
