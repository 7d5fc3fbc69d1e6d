// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Identifier Naming
//!
//! Normalization of table and column identifiers. Junction-table names
//! suggested by the LLM are lowered to snake_case with invalid characters
//! stripped; empty results fall back to the sorted concatenation of the
//! participating entity names.

use once_cell::sync::Lazy;
use regex::Regex;

static NON_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("static regex"));
static CAMEL_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("static regex"));

/// Lowers a name to snake_case: camel boundaries become underscores, invalid
/// characters collapse to single underscores, leading/trailing underscores
/// are trimmed.
pub fn normalize_snake_case(name: &str) -> String {
    let with_boundaries = CAMEL_BOUNDARY.replace_all(name.trim(), "${1}_${2}");
    let lowered = with_boundaries.to_lowercase();
    let replaced = NON_IDENTIFIER.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// Fallback junction-table name: sorted, normalized entity names joined by
/// underscores.
pub fn junction_fallback_name(entities: &[String]) -> String {
    let mut parts: Vec<String> = entities.iter().map(|e| normalize_snake_case(e)).collect();
    parts.sort_unstable();
    parts.retain(|p| !p.is_empty());
    parts.join("_")
}

/// Tokenizes a name for similarity comparison: normalized, split on
/// underscores, stop words removed.
pub fn name_tokens(name: &str) -> Vec<String> {
    const STOP: [&str; 11] = ["the", "a", "an", "of", "for", "to", "in", "on", "by", "and", "or"];
    normalize_snake_case(name)
        .split('_')
        .filter(|t| !t.is_empty() && !STOP.contains(t))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_normalization() {
        assert_eq!(normalize_snake_case("Book Author"), "book_author");
        assert_eq!(normalize_snake_case("OrderItem"), "order_item");
        assert_eq!(normalize_snake_case("  weird--Name!! "), "weird_name");
        assert_eq!(normalize_snake_case("already_snake"), "already_snake");
        assert_eq!(normalize_snake_case(""), "");
    }

    #[test]
    fn test_junction_fallback_sorts_entities() {
        let name = junction_fallback_name(&["Order".into(), "Product".into()]);
        assert_eq!(name, "order_product");
        let name = junction_fallback_name(&["Product".into(), "Order".into()]);
        assert_eq!(name, "order_product");
    }

    #[test]
    fn test_name_tokens_drop_stop_words() {
        assert_eq!(name_tokens("date_of_birth"), vec!["date", "birth"]);
        assert_eq!(name_tokens("unitPrice"), vec!["unit", "price"]);
    }
}
