//! Similarity scoring between comparable values
//!
//! All scores are deterministic, symmetric and bounded to `[0.0, 1.0]`.
//! The method is always chosen by the caller so that expensive signals
//! (embeddings) are only computed when requested.
//!
//! | method            | text                     | vector      | properties          |
//! |-------------------|--------------------------|-------------|---------------------|
//! | `Exact`           | case-folded equality     | equality    | map equality        |
//! | `Fuzzy`           | word + char Jaccard blend | cosine     | per-key overlap     |
//! | `Cosine`          | term-frequency cosine    | cosine      | (fuzzy)             |
//! | `Jaccard`         | word Jaccard             | (fuzzy)     | key-set Jaccard     |
//! | `PropertyOverlap` | (fuzzy)                  | (fuzzy)     | per-key overlap     |
//!
//! A method with no definition for a kind falls back to that kind's fuzzy
//! scorer, so identical non-empty values score `1.0` under every method.
//! Mismatched kinds score `0.0`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::knowledge::Properties;

/// Scoring method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    /// Exact equality
    Exact,
    /// Fuzzy similarity (blended Jaccard for text)
    Fuzzy,
    /// Cosine similarity
    Cosine,
    /// Set overlap
    Jaccard,
    /// Shared-key value overlap for property maps
    PropertyOverlap,
}

impl SimilarityMethod {
    /// Whether this method has its own definition for the given input kind
    pub fn supports(&self, kind: ComparableKind) -> bool {
        use ComparableKind::*;
        match self {
            Self::Exact | Self::Fuzzy => true,
            Self::Cosine => matches!(kind, Text | Vector),
            Self::Jaccard => matches!(kind, Text | Properties),
            Self::PropertyOverlap => matches!(kind, Properties),
        }
    }
}

/// Kind of a comparable value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparableKind {
    Text,
    Vector,
    Properties,
}

/// A borrowed value that can be scored
#[derive(Debug, Clone, Copy)]
pub enum Comparable<'a> {
    Text(&'a str),
    Vector(&'a [f32]),
    Properties(&'a Properties),
}

impl Comparable<'_> {
    /// Kind of this value
    pub fn kind(&self) -> ComparableKind {
        match self {
            Self::Text(_) => ComparableKind::Text,
            Self::Vector(_) => ComparableKind::Vector,
            Self::Properties(_) => ComparableKind::Properties,
        }
    }
}

/// Score two optional values under `method`
///
/// `None`/`None` scores `1.0`; exactly one `None` scores `0.0`.
pub fn score(a: Option<Comparable<'_>>, b: Option<Comparable<'_>>, method: SimilarityMethod) -> f32 {
    let (a, b) = match (a, b) {
        (None, None) => return 1.0,
        (Some(a), Some(b)) => (a, b),
        _ => return 0.0,
    };

    let method = if method.supports(a.kind()) {
        method
    } else {
        SimilarityMethod::Fuzzy
    };

    let raw = match (a, b, method) {
        (Comparable::Text(x), Comparable::Text(y), SimilarityMethod::Exact) => {
            bool_score(exact_text_match(x, y))
        }
        (Comparable::Text(x), Comparable::Text(y), SimilarityMethod::Fuzzy) => text_similarity(x, y),
        (Comparable::Text(x), Comparable::Text(y), SimilarityMethod::Cosine) => {
            term_frequency_cosine(x, y)
        }
        (Comparable::Text(x), Comparable::Text(y), SimilarityMethod::Jaccard) => word_jaccard(x, y),

        (Comparable::Vector(x), Comparable::Vector(y), SimilarityMethod::Exact) => bool_score(x == y),
        (Comparable::Vector(x), Comparable::Vector(y), SimilarityMethod::Fuzzy)
        | (Comparable::Vector(x), Comparable::Vector(y), SimilarityMethod::Cosine) => {
            cosine_similarity(x, y)
        }

        (Comparable::Properties(x), Comparable::Properties(y), SimilarityMethod::Exact) => {
            bool_score(x == y)
        }
        (Comparable::Properties(x), Comparable::Properties(y), SimilarityMethod::Fuzzy)
        | (Comparable::Properties(x), Comparable::Properties(y), SimilarityMethod::PropertyOverlap) => {
            property_similarity(x, y)
        }
        (Comparable::Properties(x), Comparable::Properties(y), SimilarityMethod::Jaccard) => {
            let xs: BTreeSet<&str> = x.keys().map(String::as_str).collect();
            let ys: BTreeSet<&str> = y.keys().map(String::as_str).collect();
            set_jaccard(&xs, &ys)
        }

        // Kinds differ
        _ => 0.0,
    };

    clamp_unit(raw)
}

/// Case-folded, trimmed text equality
pub fn exact_text_match(a: &str, b: &str) -> bool {
    a == b || a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Blended fuzzy text similarity
///
/// Exact match scores `1.0`; otherwise the average of word-level Jaccard
/// over lowercased whitespace tokens and character-set Jaccard over
/// lowercased characters. The character term tolerates accent and
/// transliteration variants without a normalization pipeline.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    if a == b {
        return 1.0;
    }
    clamp_unit((word_jaccard(a, b) + char_jaccard(a, b)) / 2.0)
}

/// Jaccard over lowercased whitespace tokens
pub fn word_jaccard(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let xs: BTreeSet<&str> = a_lower.split_whitespace().collect();
    let ys: BTreeSet<&str> = b_lower.split_whitespace().collect();
    set_jaccard(&xs, &ys)
}

/// Jaccard over lowercased non-whitespace characters
pub fn char_jaccard(a: &str, b: &str) -> f32 {
    let xs: BTreeSet<char> = a
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let ys: BTreeSet<char> = b
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    set_jaccard(&xs, &ys)
}

/// Cosine similarity of two vectors
///
/// Empty vectors, mismatched lengths and zero magnitudes score `0.0`.
/// Negative cosines are clamped to `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    clamp_unit((dot / (norm_a * norm_b).sqrt()) as f32)
}

/// Similarity of two property maps
///
/// Averages over keys present in both maps: `1.0` for equal values, fuzzy
/// text similarity of the stringified values otherwise. Both empty scores
/// `1.0`; no shared keys scores `0.0`.
pub fn property_similarity(a: &Properties, b: &Properties) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let mut total = 0.0f32;
    let mut shared = 0usize;
    for (key, left) in a {
        let Some(right) = b.get(key) else {
            continue;
        };
        shared += 1;
        total += if left == right {
            1.0
        } else {
            text_similarity(&stringify_value(left), &stringify_value(right))
        };
    }

    if shared == 0 {
        return 0.0;
    }
    clamp_unit(total / shared as f32)
}

/// Render a JSON value as comparison text (strings without quotes)
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn term_frequency_cosine(a: &str, b: &str) -> f32 {
    if exact_text_match(a, b) {
        return 1.0;
    }
    let counts = |text: &str| -> HashMap<String, u64> {
        let mut map = HashMap::new();
        for token in text.to_lowercase().split_whitespace() {
            *map.entry(token.to_string()).or_insert(0) += 1;
        }
        map
    };
    let xs = counts(a);
    let ys = counts(b);

    let dot: u64 = xs
        .iter()
        .filter_map(|(token, x)| ys.get(token).map(|y| x * y))
        .sum();
    let norm_x: u64 = xs.values().map(|x| x * x).sum();
    let norm_y: u64 = ys.values().map(|y| y * y).sum();
    if norm_x == 0 || norm_y == 0 {
        return 0.0;
    }
    (dot as f64 / ((norm_x * norm_y) as f64).sqrt()) as f32
}

fn set_jaccard<T: Ord>(xs: &BTreeSet<T>, ys: &BTreeSet<T>) -> f32 {
    if xs.is_empty() && ys.is_empty() {
        return 1.0;
    }
    let intersection = xs.intersection(ys).count();
    let union = xs.union(ys).count();
    intersection as f32 / union as f32
}

fn bool_score(equal: bool) -> f32 {
    if equal { 1.0 } else { 0.0 }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    const METHODS: [SimilarityMethod; 5] = [
        SimilarityMethod::Exact,
        SimilarityMethod::Fuzzy,
        SimilarityMethod::Cosine,
        SimilarityMethod::Jaccard,
        SimilarityMethod::PropertyOverlap,
    ];

    #[test]
    fn test_none_handling() {
        for method in METHODS {
            assert_eq!(score(None, None, method), 1.0);
            assert_eq!(score(Some(Comparable::Text("a")), None, method), 0.0);
            assert_eq!(score(None, Some(Comparable::Text("a")), method), 0.0);
        }
    }

    #[test]
    fn test_identity_scores_one_for_every_method() {
        let map = props(json!({"age": "30", "city": "Paris"}));
        let vector = [0.3f32, -0.2, 0.9, 0.01];
        let samples = [
            Comparable::Text("Société Générale"),
            Comparable::Vector(&vector),
            Comparable::Properties(&map),
        ];
        for sample in samples {
            for method in METHODS {
                assert_eq!(
                    score(Some(sample), Some(sample), method),
                    1.0,
                    "{:?} on {:?}",
                    method,
                    sample.kind()
                );
            }
        }
    }

    #[test]
    fn test_scores_are_bounded_and_symmetric() {
        let left = props(json!({"name": "Acme Corp", "founded": 1990, "tags": ["a", "b"]}));
        let right = props(json!({"name": "ACME Corporation", "founded": 1991, "hq": "NYC"}));
        let texts = [
            ("John Smith", "Jon Smyth"),
            ("Müller GmbH", "Mueller GmbH"),
            ("", "something"),
            ("a b c", "c b a d"),
        ];
        let vectors: [(&[f32], &[f32]); 3] = [
            (&[1.0, 0.0], &[0.0, 1.0]),
            (&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]),
            (&[0.5, 0.5], &[0.4, 0.6]),
        ];

        for method in METHODS {
            for (a, b) in texts {
                let ab = score(Some(Comparable::Text(a)), Some(Comparable::Text(b)), method);
                let ba = score(Some(Comparable::Text(b)), Some(Comparable::Text(a)), method);
                assert!((0.0..=1.0).contains(&ab));
                assert_eq!(ab, ba);
            }
            for (a, b) in vectors {
                let ab = score(Some(Comparable::Vector(a)), Some(Comparable::Vector(b)), method);
                let ba = score(Some(Comparable::Vector(b)), Some(Comparable::Vector(a)), method);
                assert!((0.0..=1.0).contains(&ab));
                assert_eq!(ab, ba);
            }
            let ab = score(
                Some(Comparable::Properties(&left)),
                Some(Comparable::Properties(&right)),
                method,
            );
            let ba = score(
                Some(Comparable::Properties(&right)),
                Some(Comparable::Properties(&left)),
                method,
            );
            assert!((0.0..=1.0).contains(&ab));
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_case_fold_is_full_match() {
        assert_eq!(text_similarity("John Smith", "john smith"), 1.0);
        assert!(exact_text_match("John Smith", " john smith "));
    }

    #[test]
    fn test_fuzzy_partial_overlap() {
        let s = text_similarity("John Smith", "John Smithe");
        assert!(s > 0.5 && s < 1.0, "got {}", s);
        assert!(text_similarity("abc", "xyz") == 0.0);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[1.0, 0.0]) - 0.70710677).abs() < 1e-6);
    }

    #[test]
    fn test_property_similarity_rules() {
        let empty = Properties::new();
        assert_eq!(property_similarity(&empty, &empty), 1.0);

        let a = props(json!({"x": 1}));
        let b = props(json!({"y": 1}));
        assert_eq!(property_similarity(&a, &b), 0.0);

        let a = props(json!({"city": "Paris", "age": "30"}));
        let b = props(json!({"city": "Paris", "age": "30", "extra": true}));
        assert_eq!(property_similarity(&a, &b), 1.0);
    }

    #[test]
    fn test_undefined_method_uses_fuzzy_scorer() {
        assert!(!SimilarityMethod::PropertyOverlap.supports(ComparableKind::Text));
        let text = |a, b, method| score(Some(Comparable::Text(a)), Some(Comparable::Text(b)), method);
        assert_eq!(text("Acme", "Acme", SimilarityMethod::PropertyOverlap), 1.0);
        assert_eq!(
            text("Acme Corp", "Acme Inc", SimilarityMethod::PropertyOverlap),
            text_similarity("Acme Corp", "Acme Inc")
        );

        let (x, y) = ([1.0f32, 1.0], [1.0f32, 0.0]);
        assert_eq!(
            score(
                Some(Comparable::Vector(&x)),
                Some(Comparable::Vector(&y)),
                SimilarityMethod::Jaccard
            ),
            cosine_similarity(&x, &y)
        );
    }

    #[test]
    fn test_mismatched_kinds_score_zero() {
        let map = Properties::new();
        let s = score(
            Some(Comparable::Text("a")),
            Some(Comparable::Properties(&map)),
            SimilarityMethod::Fuzzy,
        );
        assert_eq!(s, 0.0);
    }
}
