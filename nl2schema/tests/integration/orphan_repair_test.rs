// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Orphan Repair Test
//!
//! A description that initially yields a disconnected entity: the first
//! relation extraction misses the Sensor↔Reading link, the connectivity
//! check reports the orphan, and the loop re-enters extraction with the
//! connectivity suggestions as hints. Also exercises the forced-pass path
//! when extraction never converges.

use crate::common::{orchestrator_with, orchestrator_with_config};

use nl2schema::application::PipelineOrchestrator;
use nl2schema::infrastructure::config::PipelineConfig;
use nl2schema_domain::PhaseId;
use serde_json::{json, Value};

fn phase_1_fixture(relation_attempts: Vec<Value>) -> Value {
    json!({
        "1.1": {"domain": "iot monitoring", "has_explicit_domain": false},
        "1.2": {"mentioned_entities": ["sensors", "readings"]},
        "1.4": {"entities": [
            {"name": "Sensor", "description": "A deployed sensor"},
            {"name": "Reading", "description": "A measurement from a sensor"}
        ]},
        "1.5": {"mentioned_relations": []},
        "1.6": {"suggested_entities": []},
        "1.7": {"final_entities": ["Sensor", "Reading"]},
        "1.76": {"entities": ["Sensor", "Reading"], "attribute_candidates": []},
        "1.75": {"keep_entities": ["Sensor", "Reading"], "reclassify_as_relation": []},
        "1.8": {"$keyed_by": "/entity_name", "$outputs": {},
                "$default": {"cardinality": "high", "table_type": "core"}},
        "1.9": {"$sequence": relation_attempts},
        "1.11": {"$keyed_by": "/relation_key", "$outputs": {},
                 "$default": {
                     "entity_cardinalities": [
                         {"entity_name": "Sensor", "cardinality": "1"},
                         {"entity_name": "Reading", "cardinality": "N"}
                     ],
                     "entity_participations": []
                 }},
        "1.12": {"validation_passed": true}
    })
}

#[tokio::test]
async fn test_orphan_detected_then_repaired_on_second_pass() {
    // First extraction finds nothing; the retry (with hints) connects them.
    let fixture = phase_1_fixture(vec![
        json!({"relations": []}),
        json!({"relations": [
            {"entities": ["Sensor", "Reading"], "type": "one-to-many", "description": "sensors produce readings"}
        ]}),
    ]);
    let orchestrator = orchestrator_with(&fixture);
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state("Sensors produce readings over time."),
            PhaseId::new(1).unwrap(),
        )
        .await
        .expect("phase 1 should complete");

    assert!(state.metadata_counter("schema_connectivity_iterations") >= 1);
    let orphans = state
        .metadata_value("orphan_entities")
        .and_then(Value::as_array)
        .expect("orphan_entities recorded");
    assert!(orphans.is_empty(), "orphans remained: {:?}", orphans);
    assert!(!state.metadata_bool("connectivity_forced_passed"));
    assert_eq!(state.relations.len(), 1);
}

#[tokio::test]
async fn test_connectivity_forces_pass_when_budget_exhausted() {
    // Extraction never produces a relation: three attempts, then the guard
    // forces the loop closed with a warning.
    let fixture = phase_1_fixture(vec![json!({"relations": []})]);
    let orchestrator = orchestrator_with(&fixture);
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state("Sensors produce readings over time."),
            PhaseId::new(1).unwrap(),
        )
        .await
        .expect("phase 1 must complete despite non-convergence");

    assert!(state.metadata_bool("connectivity_forced_passed"));
    assert_eq!(state.metadata_counter("schema_connectivity_iterations"), 3);
    assert!(state
        .warnings
        .iter()
        .any(|w| w.contains("schema_connectivity") && w.contains("did not converge")));
    assert_eq!(
        state.loop_termination_reasons.get("schema_connectivity").map(String::as_str),
        Some("budget of 3 exhausted")
    );
    // The loop predicate was rewritten to pass: no orphans reported.
    let orphans = state
        .metadata_value("orphan_entities")
        .and_then(Value::as_array)
        .expect("orphan_entities recorded");
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn test_connectivity_budget_is_configurable() {
    let fixture = phase_1_fixture(vec![json!({"relations": []})]);
    let mut config = PipelineConfig::default();
    config.budgets.connectivity = 2;
    let orchestrator = orchestrator_with_config(&fixture, config);
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state("Sensors produce readings over time."),
            PhaseId::new(1).unwrap(),
        )
        .await
        .expect("phase 1 must complete");

    assert_eq!(state.metadata_counter("schema_connectivity_iterations"), 2);
    assert!(state.metadata_bool("connectivity_forced_passed"));
}

#[tokio::test]
async fn test_relation_extraction_receives_connectivity_hints() {
    let fixture = phase_1_fixture(vec![
        json!({"relations": []}),
        json!({"relations": [
            {"entities": ["Sensor", "Reading"], "type": "one-to-many", "description": "sensors produce readings"}
        ]}),
    ]);
    let orchestrator = orchestrator_with(&fixture);
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state("Sensors produce readings over time."),
            PhaseId::new(1).unwrap(),
        )
        .await
        .expect("phase 1 should complete");

    // The connectivity check left its suggestions for the re-entry.
    let suggested = state
        .metadata_value("suggested_relations")
        .and_then(Value::as_array)
        .expect("suggested_relations recorded");
    // After convergence the last pass has no orphans, hence no suggestions.
    assert!(suggested.is_empty());
    assert_eq!(
        state.loop_termination_reasons.get("schema_connectivity").map(String::as_str),
        Some("converged")
    );
}
