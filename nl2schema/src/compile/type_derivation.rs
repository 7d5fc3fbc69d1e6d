// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Foreign-Key Type Derivation (Step 5.3)
//!
//! Copies the SQL type of every referenced primary-key column onto its
//! referencing FK column. Runs after independent attributes (which include
//! all primary keys) are typed, so every reference should resolve; a miss
//! is a warning and leaves the FK column for step 5.4.
//!
//! This is what establishes the FK/PK type-equality invariant the Phase 5
//! gate checks.

use std::collections::BTreeMap;

use nl2schema_domain::TypeInfo;

use super::dependency_graph::FkDependency;

/// Result of FK type derivation: the assignments to merge into `data_types`
/// plus warnings for unresolvable references.
#[derive(Debug, Default)]
pub struct FkTypeDerivation {
    pub assignments: BTreeMap<String, BTreeMap<String, TypeInfo>>,
    pub warnings: Vec<String>,
}

/// Derives FK column types from the referenced key types.
pub fn derive_fk_types(
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
    fk_dependencies: &[FkDependency],
) -> FkTypeDerivation {
    let mut derivation = FkTypeDerivation::default();

    for fk in fk_dependencies {
        let Some((entity, attribute)) = fk.attribute_key.split_once('.') else {
            continue;
        };
        let referenced_type = data_types
            .get(&fk.referenced_entity)
            .and_then(|types| types.get(&fk.referenced_attribute));

        match referenced_type {
            Some(type_info) => {
                let mut copied = type_info.clone();
                // Nullability is decided per referencing column in 5.5.
                copied.nullable = None;
                derivation
                    .assignments
                    .entry(entity.to_string())
                    .or_default()
                    .insert(attribute.to_string(), copied);
            }
            None => {
                derivation.warnings.push(format!(
                    "FK column {} references untyped key {}.{}; type left for dependent assignment",
                    fk.attribute_key, fk.referenced_entity, fk.referenced_attribute
                ));
            }
        }
    }

    derivation
}

/// Checks the FK/PK type-equality invariant over a typed schema. Returns a
/// violation message per mismatched pair.
pub fn check_fk_type_match(
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
    fk_dependencies: &[FkDependency],
) -> Vec<String> {
    let mut violations = Vec::new();
    for fk in fk_dependencies {
        let Some((entity, attribute)) = fk.attribute_key.split_once('.') else {
            continue;
        };
        let from = data_types.get(entity).and_then(|t| t.get(attribute));
        let to = data_types
            .get(&fk.referenced_entity)
            .and_then(|t| t.get(&fk.referenced_attribute));
        match (from, to) {
            (Some(from), Some(to)) if from.render() != to.render() => {
                violations.push(format!(
                    "FK type mismatch: {} is {} but references {}.{} of type {}",
                    fk.attribute_key,
                    from.render(),
                    fk.referenced_entity,
                    fk.referenced_attribute,
                    to.render()
                ));
            }
            (None, _) => violations.push(format!("FK column {} has no type", fk.attribute_key)),
            _ => {}
        }
    }
    violations
}
