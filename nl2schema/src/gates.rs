// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase Gates
//!
//! Deterministic post-phase predicates. A gate failure is terminal: the
//! orchestrator stops the run and surfaces the last successful state with
//! the error. Gates check only what the finished phase was responsible for
//! producing; structural near-misses that downstream phases tolerate are
//! the transition validators' (non-fatal) business.

use std::collections::BTreeSet;

use nl2schema_domain::{PhaseId, PipelineError, PipelineState};

use crate::compile::dependency_graph::build_dependency_graph;
use crate::compile::strategies::{extract_independent_attributes, META_COMPILED_CONSTRAINTS};
use crate::compile::type_derivation::check_fk_type_match;

/// Runs the gate for `phase` against the phase's resulting state.
pub fn check_phase_gate(phase: PhaseId, state: &PipelineState) -> Result<(), PipelineError> {
    match phase.value() {
        1 => gate_1(state),
        2 => gate_2(state),
        3 => gate_3(state),
        4 => gate_4(state),
        5 => gate_5(state),
        6 => gate_6(state),
        7 => gate_7(state),
        8 => gate_8(state),
        9 => gate_9(state),
        _ => Ok(()),
    }
}

/// Phase 1: entities discovered, and every relation references them.
fn gate_1(state: &PipelineState) -> Result<(), PipelineError> {
    if state.entities.is_empty() {
        return Err(PipelineError::gate(1, "no entities discovered"));
    }
    let names: BTreeSet<&str> = state.entities.iter().map(|e| e.name.as_str()).collect();
    for relation in &state.relations {
        for entity in &relation.entities {
            if !names.contains(entity.as_str()) {
                return Err(PipelineError::gate(
                    1,
                    format!(
                        "relation '{}' references unknown entity '{}'",
                        relation.key(),
                        entity
                    ),
                ));
            }
        }
    }
    Ok(())
}

/// Phase 2: every entity has attributes, and key maps only name known
/// entities.
fn gate_2(state: &PipelineState) -> Result<(), PipelineError> {
    if state.attributes.is_empty() {
        return Err(PipelineError::gate(2, "no attributes discovered"));
    }
    for entity in &state.entities {
        let missing = state
            .attributes
            .get(&entity.name)
            .map(|attrs| attrs.is_empty())
            .unwrap_or(true);
        if missing {
            return Err(PipelineError::gate(
                2,
                format!("entity '{}' has no attributes", entity.name),
            ));
        }
    }
    let names: BTreeSet<&str> = state.entities.iter().map(|e| e.name.as_str()).collect();
    for entity in state.primary_keys.keys() {
        if !names.contains(entity.as_str()) {
            return Err(PipelineError::gate(
                2,
                format!("primary key declared for unknown entity '{}'", entity),
            ));
        }
    }
    Ok(())
}

/// Phase 3: ER design and a first relational schema exist.
fn gate_3(state: &PipelineState) -> Result<(), PipelineError> {
    if state.metadata_value("er_design").is_none() {
        return Err(PipelineError::gate(3, "no ER design compiled"));
    }
    if state.relational_schema().is_none() {
        return Err(PipelineError::gate(3, "no relational schema compiled"));
    }
    Ok(())
}

/// Phase 4: the canonical schema is frozen, non-empty, and every declared
/// primary-key column exists.
fn gate_4(state: &PipelineState) -> Result<(), PipelineError> {
    let Some(schema) = state.relational_schema() else {
        return Err(PipelineError::gate(4, "no relational schema compiled"));
    };
    if schema.is_empty() {
        return Err(PipelineError::gate(4, "relational schema has no tables"));
    }
    if state.frozen_schema().is_none() {
        return Err(PipelineError::gate(4, "schema was not frozen"));
    }
    let missing = schema.missing_primary_key_columns();
    if !missing.is_empty() {
        return Err(PipelineError::gate(
            4,
            format!("primary key columns missing from tables: {:?}", missing),
        ));
    }
    Ok(())
}

/// Phase 5: every column of every frozen table has a type, and FK column
/// types match the keys they reference.
fn gate_5(state: &PipelineState) -> Result<(), PipelineError> {
    let Some(schema) = state.relational_schema() else {
        return Err(PipelineError::gate(5, "no relational schema available"));
    };
    for table in &schema.tables {
        for column in &table.columns {
            if state.type_of(&table.name, &column.name).is_none() {
                return Err(PipelineError::gate(
                    5,
                    format!("column {}.{} has no assigned type", table.name, column.name),
                ));
            }
        }
    }
    let graph = build_dependency_graph(state);
    let violations = check_fk_type_match(&state.data_types, &graph.fk_dependencies);
    if !violations.is_empty() {
        return Err(PipelineError::gate(
            5,
            format!("foreign key types do not match referenced keys: {:?}", violations),
        ));
    }
    Ok(())
}

/// Phase 6: DDL compiled and every statement executed on the engine.
fn gate_6(state: &PipelineState) -> Result<(), PipelineError> {
    if state.ddl_statements.is_empty() {
        return Err(PipelineError::gate(6, "no DDL statements compiled"));
    }
    if !state.metadata_bool("schema_created") {
        return Err(PipelineError::gate(
            6,
            "schema creation on the in-memory engine did not succeed",
        ));
    }
    let expected = state
        .relational_schema()
        .map(|schema| schema.tables.len())
        .unwrap_or(0);
    let created = state
        .metadata_value("tables_created")
        .and_then(|v| v.as_array().map(Vec::len))
        .unwrap_or(0);
    if created < expected {
        return Err(PipelineError::gate(
            6,
            format!("only {} of {} tables were created", created, expected),
        ));
    }
    Ok(())
}

/// Phase 7: every surviving information need carries validated SQL.
fn gate_7(state: &PipelineState) -> Result<(), PipelineError> {
    for need in &state.information_needs {
        if need.sql_query.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(PipelineError::gate(
                7,
                format!(
                    "information need '{}' survived Phase 7 without validated SQL",
                    need.description
                ),
            ));
        }
    }
    Ok(())
}

/// Phase 8: detected constraints were compiled.
fn gate_8(state: &PipelineState) -> Result<(), PipelineError> {
    if state.metadata_value(META_COMPILED_CONSTRAINTS).is_none() {
        return Err(PipelineError::gate(8, "constraints were not compiled"));
    }
    Ok(())
}

/// Phase 9: every independent column received a generation strategy.
fn gate_9(state: &PipelineState) -> Result<(), PipelineError> {
    let independent = extract_independent_attributes(state);
    for (table, attrs) in independent {
        for attr in attrs {
            let covered = state
                .generation_strategies
                .get(&table)
                .map(|columns| columns.contains_key(&attr.attribute_name))
                .unwrap_or(false);
            if !covered {
                return Err(PipelineError::gate(
                    9,
                    format!(
                        "independent column {}.{} has no generation strategy",
                        table, attr.attribute_name
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nl2schema_domain::{AttributeRecord, EntityRecord, InformationNeed, RelationRecord};
    use serde_json::json;

    #[test]
    fn test_gate_1_requires_entities_and_closure() {
        let mut state = PipelineState::seed("d");
        assert!(check_phase_gate(PhaseId::new(1).unwrap(), &state).is_err());

        state.entities.push(EntityRecord::new("Book", ""));
        assert!(check_phase_gate(PhaseId::new(1).unwrap(), &state).is_ok());

        state
            .relations
            .push(RelationRecord::new(vec!["Book".into(), "Ghost".into()], "", ""));
        let err = check_phase_gate(PhaseId::new(1).unwrap(), &state).unwrap_err();
        assert!(err.to_string().contains("Ghost"));
    }

    #[test]
    fn test_gate_2_requires_attributes_per_entity() {
        let mut state = PipelineState::seed("d");
        state.entities.push(EntityRecord::new("Book", ""));
        state.entities.push(EntityRecord::new("Member", ""));
        state
            .attributes
            .insert("Book".into(), vec![AttributeRecord::new("title", "")]);
        let err = check_phase_gate(PhaseId::new(2).unwrap(), &state).unwrap_err();
        assert!(err.to_string().contains("Member"));

        state
            .attributes
            .insert("Member".into(), vec![AttributeRecord::new("name", "")]);
        assert!(check_phase_gate(PhaseId::new(2).unwrap(), &state).is_ok());
    }

    #[test]
    fn test_gate_4_checks_freeze_and_pk_columns() {
        let mut state = PipelineState::seed("d");
        let schema = json!({"tables": [{
            "name": "Book",
            "columns": [{"name": "book_id", "nullable": false}],
            "primary_key": ["book_id"],
        }]});
        state.metadata.insert("relational_schema".into(), schema.clone());
        let err = check_phase_gate(PhaseId::new(4).unwrap(), &state).unwrap_err();
        assert!(err.to_string().contains("frozen"));

        state.metadata.insert("frozen_schema".into(), schema);
        assert!(check_phase_gate(PhaseId::new(4).unwrap(), &state).is_ok());

        let bad = json!({"tables": [{
            "name": "Book",
            "columns": [{"name": "book_id", "nullable": false}],
            "primary_key": ["isbn"],
        }]});
        state.metadata.insert("relational_schema".into(), bad);
        assert!(check_phase_gate(PhaseId::new(4).unwrap(), &state).is_err());
    }

    #[test]
    fn test_gate_6_requires_created_tables() {
        let mut state = PipelineState::seed("d");
        state.ddl_statements.push("CREATE TABLE t (x INTEGER)".into());
        state.metadata.insert(
            "relational_schema".into(),
            json!({"tables": [{"name": "t", "columns": [{"name": "x"}]}]}),
        );
        state.metadata.insert("schema_created".into(), json!(true));
        state.metadata.insert("tables_created".into(), json!(["t"]));
        assert!(check_phase_gate(PhaseId::new(6).unwrap(), &state).is_ok());

        state.metadata.insert("tables_created".into(), json!([]));
        assert!(check_phase_gate(PhaseId::new(6).unwrap(), &state).is_err());
    }

    #[test]
    fn test_gate_monotonicity_under_growth() {
        // A state that passes a gate still passes after gaining content the
        // gate does not check.
        let mut state = PipelineState::seed("d");
        state.entities.push(EntityRecord::new("Book", ""));
        assert!(check_phase_gate(PhaseId::new(1).unwrap(), &state).is_ok());

        state.entities.push(EntityRecord::new("Author", ""));
        state.relations.push(RelationRecord::new(
            vec!["Book".into(), "Author".into()],
            "many-to-many",
            "",
        ));
        state.warnings.push("unrelated warning".into());
        state
            .metadata
            .insert("extra".into(), json!({"anything": true}));
        assert!(check_phase_gate(PhaseId::new(1).unwrap(), &state).is_ok());
    }

    #[test]
    fn test_gate_7_rejects_needs_without_sql() {
        let mut state = PipelineState::seed("d");
        let mut need = InformationNeed::new("books per author");
        need.sql_query = Some("SELECT 1".into());
        state.information_needs.push(need);
        assert!(check_phase_gate(PhaseId::new(7).unwrap(), &state).is_ok());

        state
            .information_needs
            .push(InformationNeed::new("unlowered need"));
        assert!(check_phase_gate(PhaseId::new(7).unwrap(), &state).is_err());
    }
}
