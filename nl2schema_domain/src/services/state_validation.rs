// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # State Consistency & Duplication Detection
//!
//! Whole-state consistency checks run between phases, and the
//! list-duplication detector that guards the append-merged fields.
//!
//! The duplication detector exists because a node that returns the entire
//! state into an append-merged field doubles that field every superstep.
//! The engine makes that structurally impossible, but the detector stays as
//! a belt-and-braces check: for every append-merged field, if the raw length
//! exceeds twice the number of unique signatures, a duplication warning is
//! raised.

use std::collections::BTreeSet;

use crate::entities::PipelineState;

/// Validates cross-field consistency of the state.
///
/// Checks, in order: relations reference existing entities; primary-key
/// attributes exist on their entities; foreign keys connect existing
/// entities, reference declared primary keys, and have matching attribute
/// counts; every entity has at least one attribute once attributes exist.
///
/// Returns issue messages; empty means consistent.
pub fn validate_state_consistency(state: &PipelineState) -> Vec<String> {
    let mut issues = Vec::new();
    let entity_names: BTreeSet<&str> = state.entities.iter().map(|e| e.name.as_str()).collect();

    for relation in &state.relations {
        for entity in &relation.entities {
            if !entity_names.contains(entity.as_str()) {
                issues.push(format!(
                    "Relation references non-existent entity: '{}'. Relation entities: {:?}",
                    entity, relation.entities
                ));
            }
        }
    }

    for (entity, pk_attrs) in &state.primary_keys {
        if !entity_names.contains(entity.as_str()) {
            issues.push(format!("Primary key defined for non-existent entity: '{}'", entity));
            continue;
        }
        let attrs: BTreeSet<String> = state.attribute_names(entity).into_iter().collect();
        for pk in pk_attrs {
            if !attrs.contains(pk) {
                issues.push(format!(
                    "Primary key attribute '{}' does not exist for entity '{}'",
                    pk, entity
                ));
            }
        }
    }

    for fk in &state.foreign_keys {
        if !entity_names.contains(fk.from_entity.as_str()) {
            issues.push(format!(
                "Foreign key from non-existent entity: '{}' -> '{}'",
                fk.from_entity, fk.to_entity
            ));
        }
        if !entity_names.contains(fk.to_entity.as_str()) {
            issues.push(format!(
                "Foreign key references non-existent entity: '{}' -> '{}'",
                fk.from_entity, fk.to_entity
            ));
        }
        if entity_names.contains(fk.to_entity.as_str()) {
            match state.primary_keys.get(&fk.to_entity) {
                None => issues.push(format!(
                    "Foreign key references entity '{}' which has no primary key defined",
                    fk.to_entity
                )),
                Some(pk) if fk.to_attributes.len() != pk.len() => issues.push(format!(
                    "Foreign key '{}' -> '{}' has {} attributes but references PK with {} attributes",
                    fk.from_entity,
                    fk.to_entity,
                    fk.to_attributes.len(),
                    pk.len()
                )),
                _ => {}
            }
        }
        if fk.from_attributes.len() != fk.to_attributes.len() {
            issues.push(format!(
                "Foreign key '{}' -> '{}' attribute counts differ: {} vs {}",
                fk.from_entity,
                fk.to_entity,
                fk.from_attributes.len(),
                fk.to_attributes.len()
            ));
        }
    }

    if !state.attributes.is_empty() {
        for entity in &entity_names {
            let empty = state
                .attributes
                .get(*entity)
                .map(|attrs| attrs.is_empty())
                .unwrap_or(true);
            if empty {
                issues.push(format!("Entity '{}' has no attributes defined", entity));
            }
        }
    }

    issues
}

fn check_duplication<T>(
    field: &str,
    items: &[T],
    signature: impl Fn(&T) -> String,
    issues: &mut Vec<String>,
) {
    if items.is_empty() {
        return;
    }
    let unique: BTreeSet<String> = items.iter().map(signature).collect();
    if items.len() > unique.len() * 2 {
        issues.push(format!(
            "State duplication detected in {}: {} items but only {} unique signatures. \
             Likely caused by a node returning whole-state content into an append-merged field.",
            field,
            items.len(),
            unique.len()
        ));
    }
}

/// Detects accidental duplication in the append-merged list fields.
///
/// Signature functions per field: description for information needs,
/// type/entity/attributes/condition for constraints, sorted
/// determinant/dependent/table tuples for functional dependencies, the
/// statement text for DDL, and serialized values for raw SQL query records.
pub fn validate_no_list_duplication(state: &PipelineState) -> Vec<String> {
    let mut issues = Vec::new();

    check_duplication(
        "information_needs",
        &state.information_needs,
        |need| need.description.clone(),
        &mut issues,
    );
    check_duplication(
        "constraints",
        &state.constraints,
        |constraint| constraint.signature(),
        &mut issues,
    );
    check_duplication(
        "functional_dependencies",
        &state.functional_dependencies,
        |fd| fd.signature(),
        &mut issues,
    );
    check_duplication(
        "ddl_statements",
        &state.ddl_statements,
        |stmt| stmt.clone(),
        &mut issues,
    );
    check_duplication(
        "sql_queries",
        &state.sql_queries,
        |query| query.to_string(),
        &mut issues,
    );
    check_duplication(
        "entities",
        &state.entities,
        |entity| entity.name.to_lowercase(),
        &mut issues,
    );

    issues
}
