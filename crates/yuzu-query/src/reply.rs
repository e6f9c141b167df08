//! Reply shaping: limit windows, score formatting, attribute projection.

use crate::search::{LimitWindow, ReturnAttribute};
use std::collections::HashSet;
use yuzu_intern::InternedStr;
use yuzu_vector::Neighbor;

/// One row of a search reply.
#[derive(Debug, Clone)]
pub struct ReplyRow {
    pub key: InternedStr,
    /// `(alias, value)` pairs; empty in no-content mode.
    pub fields: Vec<(String, Vec<u8>)>,
}

/// The reply for a KNN query: a count header plus windowed rows.
#[derive(Debug, Clone)]
pub struct SearchReply {
    /// Total neighbors available: `min(k, matched)`.
    pub total: usize,
    pub rows: Vec<ReplyRow>,
}

/// Format a distance with 12 significant digits, trimming trailing zeros
/// (decimal notation in the common range, scientific outside it).
pub fn format_score(distance: f32) -> String {
    let v = distance as f64;
    if v == 0.0 {
        return "0".to_string();
    }
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let exponent = v.abs().log10().floor() as i32;
    if (-4..12).contains(&exponent) {
        let precision = (11 - exponent).max(0) as usize;
        let formatted = format!("{:.*}", precision, v);
        trim_decimal(formatted)
    } else {
        let formatted = format!("{:.11e}", v);
        trim_scientific(formatted)
    }
}

fn trim_decimal(mut s: String) -> String {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

fn trim_scientific(s: String) -> String {
    match s.split_once('e') {
        Some((mantissa, exponent)) => {
            format!("{}e{}", trim_decimal(mantissa.to_string()), exponent)
        }
        None => s,
    }
}

/// Window `neighbors` per the limit clause and project the requested
/// attributes. `fetch` resolves `(key, identifier)` to the stored value;
/// the distance materializes under the score alias.
pub fn build_reply(
    neighbors: &[Neighbor],
    k: usize,
    limit: &LimitWindow,
    score_as: &str,
    return_attributes: &[ReturnAttribute],
    no_content: bool,
    fetch: &dyn Fn(&InternedStr, &str) -> Option<Vec<u8>>,
) -> SearchReply {
    let total = neighbors.len().min(k);
    if limit.first_index >= k || limit.number == 0 {
        return SearchReply {
            total: neighbors.len(),
            rows: Vec::new(),
        };
    }
    let start = limit.first_index.min(neighbors.len());
    let count = k.min(limit.number).min(neighbors.len());
    let end = (start + count).min(neighbors.len());

    let mut rows = Vec::with_capacity(end - start);
    for neighbor in &neighbors[start..end] {
        let fields = if no_content {
            Vec::new()
        } else {
            project_fields(neighbor, score_as, return_attributes, fetch)
        };
        rows.push(ReplyRow {
            key: neighbor.key.clone(),
            fields,
        });
    }
    SearchReply { total, rows }
}

fn project_fields(
    neighbor: &Neighbor,
    score_as: &str,
    return_attributes: &[ReturnAttribute],
    fetch: &dyn Fn(&InternedStr, &str) -> Option<Vec<u8>>,
) -> Vec<(String, Vec<u8>)> {
    let mut fields = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for attribute in return_attributes {
        // Duplicates are honored in order, each identifier once.
        if !seen.insert(attribute.identifier.as_str()) {
            continue;
        }
        if attribute.identifier == score_as {
            fields.push((
                score_as.to_string(),
                format_score(neighbor.distance).into_bytes(),
            ));
            continue;
        }
        if let Some(value) = fetch(&neighbor.key, &attribute.identifier) {
            fields.push((attribute.alias.clone(), value));
        }
    }
    fields
}
