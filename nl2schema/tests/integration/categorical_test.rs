// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Categorical & Type Assignment Tests (IoT sensors scenario)
//!
//! A sensors domain driven from a prepared Phase-3-style state: plants have
//! sensors of types temperature/pressure/humidity, sensors produce readings
//! over time. Checks that Phase 5 assigns a timestamp type to the readings
//! entity and that Phase 8 discovers the sensor-type value set.

use crate::common::orchestrator_with;

use nl2schema::application::PipelineOrchestrator;
use nl2schema_domain::{
    AttributeRecord, EntityRecord, PhaseId, PipelineState, RelationRecord,
};
use serde_json::json;
use std::collections::BTreeMap;

fn one_to_many(one: &str, many: &str, description: &str) -> RelationRecord {
    let mut relation = RelationRecord::new(
        vec![one.to_string(), many.to_string()],
        "one-to-many",
        description,
    );
    let mut cards = BTreeMap::new();
    cards.insert(one.to_string(), "1".to_string());
    cards.insert(many.to_string(), "N".to_string());
    relation.entity_cardinalities = Some(cards);
    relation
}

/// A state as Phase 3 would leave it for the sensors domain.
fn sensors_state() -> PipelineState {
    let mut state = PipelineState::seed(
        "Plants have sensors of types temperature, pressure, humidity; \
         sensors produce readings over time; track maintenance and incidents.",
    );
    state.domain = Some("iot monitoring".into());

    for (name, description) in [
        ("Plant", "An industrial plant"),
        ("Sensor", "A sensor installed at a plant"),
        ("Reading", "A timestamped measurement produced by a sensor"),
    ] {
        state.entities.push(EntityRecord::new(name, description));
    }

    state.attributes.insert(
        "Plant".into(),
        vec![
            AttributeRecord::new("plant_id", "Unique plant identifier").with_type_hint("identifier"),
            AttributeRecord::new("name", "Plant name").with_type_hint("text"),
        ],
    );
    state.attributes.insert(
        "Sensor".into(),
        vec![
            AttributeRecord::new("sensor_id", "Unique sensor identifier").with_type_hint("identifier"),
            AttributeRecord::new("type", "Sensor type").with_type_hint("text"),
        ],
    );
    state.attributes.insert(
        "Reading".into(),
        vec![
            AttributeRecord::new("reading_id", "Unique reading identifier").with_type_hint("identifier"),
            AttributeRecord::new("recorded_at", "When the reading was taken").with_type_hint("timestamp"),
            AttributeRecord::new("value", "Measured value").with_type_hint("float"),
        ],
    );

    state.primary_keys.insert("Plant".into(), vec!["plant_id".into()]);
    state.primary_keys.insert("Sensor".into(), vec!["sensor_id".into()]);
    state.primary_keys.insert("Reading".into(), vec!["reading_id".into()]);

    state.relations.push(one_to_many("Plant", "Sensor", "plants host sensors"));
    state.relations.push(one_to_many("Sensor", "Reading", "sensors produce readings"));
    state
}

fn sensors_fixture() -> serde_json::Value {
    json!({
        "5.2": {"$keyed_by": "/attribute_key", "$outputs": {
            "Plant.plant_id": {"type": "INTEGER"},
            "Plant.name": {"type": "VARCHAR", "size": 120},
            "Sensor.sensor_id": {"type": "INTEGER"},
            "Sensor.type": {"type": "VARCHAR", "size": 40},
            "Reading.reading_id": {"type": "BIGINT"},
            "Reading.recorded_at": {"type": "TIMESTAMP"},
            "Reading.value": {"type": "REAL"}
        }, "$default": {"type": "VARCHAR"}},
        "5.4": {"$keyed_by": "/attribute_key", "$outputs": {}, "$default": {"type": "VARCHAR"}},
        "5.5": {"$keyed_by": "/table", "$outputs": {}, "$default": {"nullable_columns": []}},
        "8.1": {"$keyed_by": "/entity", "$outputs": {}, "$default": {"functional_dependencies": []}},
        "8.2": {"entity_results": {"Sensor": {"categorical_attributes": ["type"]}}},
        "8.3": {"Sensor": {"type": ["temperature", "pressure", "humidity"]}},
        "8.4": {"constraints": [], "no_more_constraints": true},
        "8.7": {"conflicts": [], "resolution_applied": false}
    })
}

#[tokio::test]
async fn test_reading_entity_gets_timestamp_type() {
    let orchestrator = orchestrator_with(&sensors_fixture());
    let state = orchestrator
        .run_phase(sensors_state(), PhaseId::new(4).unwrap())
        .await
        .expect("phase 4 should compile and freeze");
    let state = orchestrator
        .run_phase(state, PhaseId::new(5).unwrap())
        .await
        .expect("phase 5 should assign types");

    let recorded_at = state
        .type_of("Reading", "recorded_at")
        .expect("recorded_at typed");
    assert_eq!(recorded_at.sql_type, "TIMESTAMP");

    // FK columns derived from the 1:N relations copy the referenced types.
    let sensor_fk = state.type_of("Reading", "sensor_id").expect("FK typed");
    assert_eq!(sensor_fk.sql_type, "INTEGER");
}

#[tokio::test]
async fn test_sensor_type_values_identified() {
    let orchestrator = orchestrator_with(&sensors_fixture());
    let state = orchestrator
        .run_phase(sensors_state(), PhaseId::new(4).unwrap())
        .await
        .expect("phase 4 should compile and freeze");
    let state = orchestrator
        .run_phase(state, PhaseId::new(5).unwrap())
        .await
        .expect("phase 5 should assign types");
    let state = orchestrator
        .run_phase(state, PhaseId::new(8).unwrap())
        .await
        .expect("phase 8 should identify categoricals");

    assert_eq!(
        state.categorical_attributes.get("Sensor"),
        Some(&vec!["type".to_string()])
    );

    let values: std::collections::BTreeSet<&str> = state
        .categorical_values
        .get("Sensor")
        .and_then(|columns| columns.get("type"))
        .expect("sensor type values")
        .iter()
        .map(String::as_str)
        .collect();
    let expected: std::collections::BTreeSet<&str> =
        ["temperature", "pressure", "humidity"].into_iter().collect();
    assert_eq!(values, expected);
}

#[tokio::test]
async fn test_fk_placed_on_many_side_in_schema() {
    let orchestrator = orchestrator_with(&sensors_fixture());
    let state = orchestrator
        .run_phase(sensors_state(), PhaseId::new(4).unwrap())
        .await
        .expect("phase 4 should compile and freeze");

    let schema = state.relational_schema().expect("schema compiled");
    let sensor = schema.table("Sensor").expect("Sensor table");
    assert!(sensor.has_column("plant_id"));
    assert_eq!(sensor.foreign_keys[0].references_table, "Plant");

    let reading = schema.table("Reading").expect("Reading table");
    assert!(reading.has_column("sensor_id"));
    assert_eq!(reading.foreign_keys[0].references_table, "Sensor");

    // No junction tables for 1:N relations.
    assert_eq!(schema.tables.len(), 3);
}
