//! Distance kernels and payload conversions.
//!
//! Three metrics:
//! - **L2**: sqrt(sum((a[i] - b[i])^2))
//! - **Inner product**: 1 - (a · b), ascending like the others
//! - **Cosine**: the inner-product kernel over unit-normalized payloads; the
//!   original vector is reconstructable from the stored magnitude
//!
//! The loops process four lanes per iteration so release builds
//! auto-vectorize them.

use serde::{Deserialize, Serialize};

/// Distance metric for a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean (L2) distance.
    L2,
    /// Inner product distance: 1 - (a · b).
    InnerProduct,
    /// Cosine distance; payloads are unit-normalized on insert and scored
    /// with the inner-product kernel.
    Cosine,
}

impl Metric {
    /// True when payloads are unit-normalized on insert.
    pub fn normalizes(&self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Compute the distance between two raw vectors under this metric.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => euclidean_distance(a, b),
            Metric::InnerProduct | Metric::Cosine => ip_distance(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "L2",
            Metric::InnerProduct => "IP",
            Metric::Cosine => "COSINE",
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L2" => Ok(Metric::L2),
            "IP" => Ok(Metric::InnerProduct),
            "COSINE" => Ok(Metric::Cosine),
            other => Err(format!("unknown distance metric: {}", other)),
        }
    }
}

/// Euclidean (L2) distance.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }
    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum.sqrt()
}

/// Dot product of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");

    let mut sum = 0.0f32;
    let chunks = a.len() / 4;
    for i in 0..chunks {
        let base = i * 4;
        sum += a[base] * b[base]
            + a[base + 1] * b[base + 1]
            + a[base + 2] * b[base + 2]
            + a[base + 3] * b[base + 3];
    }
    for i in (chunks * 4)..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

/// Inner-product distance: 1 - (a · b). Over unit vectors this is the
/// cosine distance.
#[inline]
pub fn ip_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot_product(a, b)
}

/// Scale `v` to unit length in place, returning the original L2 norm.
/// A zero vector is left untouched and reported as magnitude 0.
pub fn normalize_in_place(v: &mut [f32]) -> f32 {
    let mut sum = 0.0f32;
    for &x in v.iter() {
        sum += x * x;
    }
    let magnitude = sum.sqrt();
    if magnitude == 0.0 {
        return 0.0;
    }
    let inv = 1.0 / magnitude;
    for x in v.iter_mut() {
        *x *= inv;
    }
    magnitude
}

/// Reinterpret a float32 payload as floats. Caller validates the length.
pub fn floats_from_payload(payload: &[u8]) -> Vec<f32> {
    payload
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Serialize floats into the index payload form.
pub fn payload_from_floats(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_ne_bytes());
    }
    bytes
}

/// Convert a human-readable vector string into a payload.
///
/// Accepts an optionally bracketed, comma-separated float list; brackets
/// are trimmed recursively ("[[0.1, 0.2]]" works). Returns `None` when any
/// member fails to parse.
pub fn payload_from_text(input: &str) -> Option<Vec<u8>> {
    let mut text = input.trim();
    while let Some(stripped) = text.strip_prefix('[') {
        text = stripped.strip_suffix(']').unwrap_or(stripped).trim();
    }
    let mut bytes = Vec::new();
    for member in text.split(',') {
        let member = member.trim();
        if member.is_empty() {
            continue;
        }
        let value: f32 = member.parse().ok()?;
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
        assert!(euclidean_distance(&b, &b) < 1e-6);
    }

    #[test]
    fn test_ip_distance_on_unit_vectors() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let c = [-1.0, 0.0];
        assert!(ip_distance(&a, &a).abs() < 1e-6);
        assert!((ip_distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((ip_distance(&a, &c) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_round_trip() {
        let original = [3.0f32, 4.0, 0.0, 1.0];
        let mut v = original;
        let magnitude = normalize_in_place(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        for (u, o) in v.iter().zip(original.iter()) {
            let back = u * magnitude;
            assert!((back - o).abs() <= 1e-6 * o.abs().max(1.0));
        }
    }

    #[test]
    fn test_normalize_zero_vector() {
        let mut v = [0.0f32; 4];
        assert_eq!(normalize_in_place(&mut v), 0.0);
        assert_eq!(v, [0.0f32; 4]);
    }

    #[test]
    fn test_payload_round_trip() {
        let floats = [0.25f32, -1.5, 3.75];
        let payload = payload_from_floats(&floats);
        assert_eq!(payload.len(), 12);
        assert_eq!(floats_from_payload(&payload), floats);
    }

    #[test]
    fn test_payload_from_text() {
        let payload = payload_from_text("[0.5, 1.5]").unwrap();
        assert_eq!(floats_from_payload(&payload), vec![0.5, 1.5]);

        let nested = payload_from_text("[[1, 2]]").unwrap();
        assert_eq!(floats_from_payload(&nested), vec![1.0, 2.0]);

        assert!(payload_from_text("[0.5, oops]").is_none());
    }

    #[test]
    fn test_high_dimensional() {
        let a: Vec<f32> = (0..128).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..128).map(|i| (i + 1) as f32).collect();
        let d = euclidean_distance(&a, &b);
        assert!((d - (128.0f32).sqrt()).abs() < 0.01);
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert!("manhattan".parse::<Metric>().is_err());
    }
}
