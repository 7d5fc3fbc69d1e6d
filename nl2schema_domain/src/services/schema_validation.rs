// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Schema-Anchored Validation
//!
//! Validates that names referenced by substep outputs resolve against the
//! canonical schema on the state, with similarity-based suggestions for near
//! misses. These checks are non-fatal: the adapters log the report and append
//! warnings, they never rewrite substep output.
//!
//! Three families:
//!
//! - **Entity-name validation**: every entity name in an output exists in the
//!   allowed set (case-insensitive); unknown names get "did you mean" hints.
//! - **Attribute-name validation**: every `Entity.attribute` reference
//!   resolves; suggestions on miss.
//! - **Transition validation**: before each phase, entity/attribute
//!   consistency (attributes belong to known entities, no duplicate entity
//!   names case-insensitively, duplicate attribute names warn).

use std::collections::{BTreeMap, BTreeSet};

use crate::entities::PipelineState;

use super::similarity::{suggest_name, DEFAULT_THRESHOLD};

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// invalid name → suggested replacement
    pub suggestions: BTreeMap<String, String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Folds another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.suggestions.extend(other.suggestions);
    }
}

/// Validates entity names referenced by a substep output against the allowed
/// set. `context` names the calling step for the error messages.
pub fn validate_entity_names(
    referenced: &[String],
    allowed: &[String],
    context: &str,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let allowed_lc: BTreeSet<String> = allowed.iter().map(|e| e.to_lowercase()).collect();

    for name in referenced {
        if name.is_empty() {
            continue;
        }
        if allowed_lc.contains(&name.to_lowercase()) {
            continue;
        }
        match suggest_name(name, allowed, DEFAULT_THRESHOLD) {
            Some(suggestion) => {
                report.errors.push(format!(
                    "Invalid entity name '{}' in {}. Did you mean '{}'?",
                    name, context, suggestion
                ));
                report.suggestions.insert(name.clone(), suggestion);
            }
            None => {
                report.errors.push(format!(
                    "Invalid entity name '{}' in {}. Not found in schema and no similar entity found.",
                    name, context
                ));
            }
        }
    }
    report
}

/// Validates `Entity.attribute` references against the state's attribute map.
pub fn validate_attribute_names(
    references: &[(String, String)],
    state: &PipelineState,
    context: &str,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let entity_names = state.entity_names();

    for (entity, attribute) in references {
        if entity.is_empty() || attribute.is_empty() {
            continue;
        }
        let matching_entity = entity_names
            .iter()
            .find(|e| e.eq_ignore_ascii_case(entity));
        let Some(matching_entity) = matching_entity else {
            report.errors.push(format!(
                "Invalid entity '{}' for attribute '{}' in {}",
                entity, attribute, context
            ));
            continue;
        };

        let attrs = state.attribute_names(matching_entity);
        if attrs.iter().any(|a| a.eq_ignore_ascii_case(attribute)) {
            continue;
        }
        match suggest_name(attribute, &attrs, DEFAULT_THRESHOLD) {
            Some(suggestion) => {
                report.errors.push(format!(
                    "Invalid attribute name '{}.{}' in {}. Did you mean '{}.{}'?",
                    entity, attribute, context, entity, suggestion
                ));
                report
                    .suggestions
                    .insert(format!("{}.{}", entity, attribute), suggestion);
            }
            None => {
                report.errors.push(format!(
                    "Invalid attribute name '{}.{}' in {}. Not found in schema and no similar attribute found.",
                    entity, attribute, context
                ));
            }
        }
    }
    report
}

/// All attributes belong to known entities.
pub fn validate_entity_attribute_consistency(state: &PipelineState) -> Vec<String> {
    let entity_names: BTreeSet<&str> = state.entities.iter().map(|e| e.name.as_str()).collect();
    state
        .attributes
        .keys()
        .filter(|entity| !entity_names.contains(entity.as_str()))
        .map(|entity| format!("Attributes defined for non-existent entity: {}", entity))
        .collect()
}

/// Structural consistency check run before entering `to_phase`.
///
/// Errors mean the state is structurally inconsistent (unknown attribute
/// owners, duplicate entity names); warnings cover duplicate attribute names
/// within an entity. Both are non-fatal at the orchestrator level.
pub fn validate_phase_transition(
    _from_phase: u8,
    _to_phase: u8,
    state: &PipelineState,
) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.errors.extend(validate_entity_attribute_consistency(state));

    // Duplicate entity names, case-insensitive.
    let mut seen = BTreeSet::new();
    for entity in &state.entities {
        let key = entity.name.to_lowercase();
        if key.is_empty() {
            continue;
        }
        if !seen.insert(key) {
            report.errors.push(format!(
                "Duplicate entity name (case-insensitive): {}",
                entity.name
            ));
        }
    }

    // Duplicate attribute names within one entity: warn only.
    for (entity, attrs) in &state.attributes {
        let mut seen_attrs = BTreeSet::new();
        for attr in attrs {
            let key = attr.name.to_lowercase();
            if key.is_empty() {
                continue;
            }
            if !seen_attrs.insert(key) {
                report.warnings.push(format!(
                    "Duplicate attribute name in {}: {}",
                    entity,
                    attr.name.to_lowercase()
                ));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{AttributeRecord, EntityRecord};

    fn state_with(entities: &[&str]) -> PipelineState {
        let mut state = PipelineState::seed("d");
        for name in entities {
            state.entities.push(EntityRecord::new(*name, ""));
        }
        state
    }

    #[test]
    fn test_known_entity_names_pass() {
        let report = validate_entity_names(
            &["Book".into(), "author".into()],
            &["Book".into(), "Author".into()],
            "step_1_9",
        );
        assert!(report.is_valid());
    }

    #[test]
    fn test_near_miss_gets_suggestion() {
        let report = validate_entity_names(
            &["Books".into()],
            &["Book".into(), "Member".into()],
            "step_1_9",
        );
        assert!(!report.is_valid());
        assert_eq!(report.suggestions.get("Books").map(String::as_str), Some("Book"));
        assert!(report.errors[0].contains("Did you mean"));
    }

    #[test]
    fn test_attribute_reference_resolution() {
        let mut state = state_with(&["Book"]);
        state.attributes.insert(
            "Book".into(),
            vec![AttributeRecord::new("title", ""), AttributeRecord::new("isbn", "")],
        );
        let ok = validate_attribute_names(
            &[("Book".into(), "title".into())],
            &state,
            "step_3_2",
        );
        assert!(ok.is_valid());

        let miss = validate_attribute_names(
            &[("Book".into(), "titel".into())],
            &state,
            "step_3_2",
        );
        assert!(!miss.is_valid());
        assert_eq!(
            miss.suggestions.get("Book.titel").map(String::as_str),
            Some("title")
        );
    }

    #[test]
    fn test_transition_flags_duplicates_and_orphan_attributes() {
        let mut state = state_with(&["Book", "book"]);
        state
            .attributes
            .insert("Ghost".into(), vec![AttributeRecord::new("x", "")]);
        state.attributes.insert(
            "Book".into(),
            vec![AttributeRecord::new("title", ""), AttributeRecord::new("Title", "")],
        );
        let report = validate_phase_transition(1, 2, &state);
        assert!(report.errors.iter().any(|e| e.contains("Duplicate entity name")));
        assert!(report.errors.iter().any(|e| e.contains("non-existent entity: Ghost")));
        assert!(report.warnings.iter().any(|w| w.contains("Duplicate attribute name in Book")));
    }
}
