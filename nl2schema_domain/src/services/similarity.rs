// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Name Similarity Suggestions
//!
//! Deterministic "did you mean" suggestions for entity and attribute names
//! the LLM got slightly wrong. Similarity combines token-set Jaccard overlap
//! (weight 0.6) with a character-level sequence ratio (weight 0.4); the
//! default acceptance threshold is 0.7.
//!
//! Lexical token overlap dominates deliberately: schema names differ mostly
//! by word choice (`unit_price` vs `price_per_unit`), not by typos.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::naming::{name_tokens, normalize_snake_case};

/// Default similarity threshold used by the validators.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// One suggested replacement candidate with its combined score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameSuggestion {
    pub candidate: String,
    pub similarity: f64,
}

/// Jaccard similarity over normalized name tokens.
fn lexical_jaccard(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<String> = name_tokens(a).into_iter().collect();
    let tb: BTreeSet<String> = name_tokens(b).into_iter().collect();
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

/// Character-level similarity ratio `2*LCS / (|a| + |b|)` over normalized
/// forms, a close analogue of a diff-based sequence ratio.
fn char_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_snake_case(a);
    let b = normalize_snake_case(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let n = b_bytes.len();
    let mut prev = vec![0usize; n + 1];
    let mut current = vec![0usize; n + 1];
    for &ac in a_bytes {
        for (j, &bc) in b_bytes.iter().enumerate() {
            current[j + 1] = if ac == bc {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
        current.fill(0);
    }
    let lcs = prev[n];
    (2 * lcs) as f64 / (a_bytes.len() + b_bytes.len()) as f64
}

/// Combined similarity score in `[0, 1]`.
fn combined_similarity(a: &str, b: &str) -> f64 {
    lexical_jaccard(a, b) * 0.6 + char_similarity(a, b) * 0.4
}

/// Proposes candidate names similar to `target`, best first.
///
/// Exact matches (after normalization) are skipped: the caller only asks for
/// suggestions when the name failed to resolve.
pub fn suggest_name_candidates(
    target: &str,
    candidates: &[String],
    threshold: f64,
    max_results: usize,
) -> Vec<NameSuggestion> {
    if target.trim().is_empty() || candidates.is_empty() {
        return Vec::new();
    }
    let target_norm = normalize_snake_case(target);
    if target_norm.is_empty() {
        return Vec::new();
    }

    let mut suggestions: Vec<NameSuggestion> = candidates
        .iter()
        .filter(|c| !c.trim().is_empty())
        .filter(|c| normalize_snake_case(c) != target_norm)
        .map(|c| NameSuggestion {
            candidate: c.clone(),
            similarity: (combined_similarity(target, c) * 10_000.0).round() / 10_000.0,
        })
        .filter(|s| s.similarity >= threshold)
        .collect();

    suggestions.sort_by(|x, y| {
        y.similarity
            .partial_cmp(&x.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| x.candidate.cmp(&y.candidate))
    });
    suggestions.truncate(max_results);
    suggestions
}

/// The single best suggestion at or above `threshold`, if any.
pub fn suggest_name(target: &str, candidates: &[String], threshold: f64) -> Option<String> {
    suggest_name_candidates(target, candidates, threshold, 1)
        .into_iter()
        .next()
        .map(|s| s.candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_close_name_is_suggested() {
        let candidates = names(&["unit_price", "quantity", "order_date"]);
        let suggestion = suggest_name("unitprice", &candidates, 0.7);
        assert_eq!(suggestion.as_deref(), Some("unit_price"));
    }

    #[test]
    fn test_token_permutation_is_suggested() {
        let candidates = names(&["price_per_unit"]);
        let suggestions = suggest_name_candidates("unit_price", &candidates, 0.3, 3);
        assert!(!suggestions.is_empty());
        assert_eq!(suggestions[0].candidate, "price_per_unit");
    }

    #[test]
    fn test_unrelated_name_is_not_suggested() {
        let candidates = names(&["quantity", "status"]);
        assert!(suggest_name("customer_email", &candidates, 0.7).is_none());
    }

    #[test]
    fn test_exact_match_is_skipped() {
        let candidates = names(&["status"]);
        assert!(suggest_name("status", &candidates, 0.1).is_none());
        assert!(suggest_name("Status", &candidates, 0.1).is_none());
    }

    #[test]
    fn test_results_sorted_and_truncated() {
        let candidates = names(&["order_total", "order_totals", "order_sum"]);
        let suggestions = suggest_name_candidates("order_total_amount", &candidates, 0.2, 2);
        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].similarity >= suggestions[1].similarity);
    }
}
