// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Adapter Support
//!
//! Shared helpers for the substep adapters: normalization of dynamic-shape
//! substep outputs into the canonical record types, JSON views of state
//! fields for substep inputs, and the fan-out scheduler that runs one
//! substep invocation per cohort element with per-element error tolerance
//! and deterministic result ordering.
//!
//! Substeps may return lists of plain strings, lists of objects, or maps;
//! every shape is normalized here, at the state boundary, so downstream
//! readers can assume the canonical form.

use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use nl2schema_domain::{
    AttributeRecord, EntityRecord, PipelineIssue, PipelineState, RelationRecord, StateUpdate,
};

use crate::application::EngineContext;

// ---------------------------------------------------------------------------
// Output field extraction
// ---------------------------------------------------------------------------

/// A non-empty string field of an output object.
pub fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A boolean field, `false` when absent or non-boolean.
pub fn bool_field(raw: &Value, key: &str) -> bool {
    raw.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// An array field as owned values, empty when absent.
pub fn array_field(raw: &Value, key: &str) -> Vec<Value> {
    raw.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Names from a list of strings or objects carrying a `name` field.
pub fn string_items(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(obj) => obj
                .get("name")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Entity records from a list of strings or objects. Objects may carry the
/// description under `description`, `reasoning`, or `reason`.
pub fn entity_records(value: &Value) -> Vec<EntityRecord> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => {
                let name = name.trim();
                (!name.is_empty()).then(|| EntityRecord::new(name, ""))
            }
            Value::Object(obj) => {
                let name = obj.get("name").and_then(Value::as_str)?.trim();
                if name.is_empty() {
                    return None;
                }
                let description = obj
                    .get("description")
                    .or_else(|| obj.get("reasoning"))
                    .or_else(|| obj.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let mut entity = EntityRecord::new(name, description);
                entity.cardinality = obj
                    .get("cardinality")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                entity.table_type = obj
                    .get("table_type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(entity)
            }
            _ => None,
        })
        .collect()
}

/// Attribute records from a list of strings or objects.
pub fn attribute_records(value: &Value) -> Vec<AttributeRecord> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(name) => {
                let name = name.trim();
                (!name.is_empty()).then(|| AttributeRecord::new(name, ""))
            }
            Value::Object(_) => serde_json::from_value::<AttributeRecord>(item.clone())
                .ok()
                .filter(|a| !a.name.trim().is_empty()),
            _ => None,
        })
        .collect()
}

/// Relation records from a list of objects; arity is recomputed from the
/// entity list when the output omits it.
pub fn relation_records(value: &Value) -> Vec<RelationRecord> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let mut relation: RelationRecord = serde_json::from_value(item.clone()).ok()?;
            if relation.entities.is_empty() {
                return None;
            }
            if relation.arity == 0 {
                relation.arity = relation.entities.len();
            }
            Some(relation)
        })
        .collect()
}

/// The per-entity attribute map from a batch output's `entity_results`.
pub fn entity_results_attribute_map(raw: &Value) -> BTreeMap<String, Vec<AttributeRecord>> {
    let mut map = BTreeMap::new();
    let Some(results) = raw.get("entity_results").and_then(Value::as_object) else {
        return map;
    };
    for (entity, value) in results {
        map.insert(entity.clone(), attribute_records(value));
    }
    map
}

// ---------------------------------------------------------------------------
// State views for substep inputs
// ---------------------------------------------------------------------------

/// Entities as a JSON array of `{name, description}` objects.
pub fn entities_view(state: &PipelineState) -> Value {
    Value::Array(
        state
            .entities
            .iter()
            .map(|e| json!({"name": e.name, "description": e.description}))
            .collect(),
    )
}

/// Relations as their serialized records.
pub fn relations_view(state: &PipelineState) -> Value {
    serde_json::to_value(&state.relations).unwrap_or_else(|_| json!([]))
}

/// Attributes as `{entity: [records]}`.
pub fn attributes_view(state: &PipelineState) -> Value {
    serde_json::to_value(&state.attributes).unwrap_or_else(|_| json!({}))
}

/// Primary keys as `{entity: [names]}`.
pub fn primary_keys_view(state: &PipelineState) -> Value {
    serde_json::to_value(&state.primary_keys).unwrap_or_else(|_| json!({}))
}

/// Foreign keys as their serialized records.
pub fn foreign_keys_view(state: &PipelineState) -> Value {
    serde_json::to_value(&state.foreign_keys).unwrap_or_else(|_| json!([]))
}

/// A prior step's memoized raw output, `Null` when absent.
pub fn previous_answer(state: &PipelineState, step_id: &str) -> Value {
    state
        .previous_answers
        .get(step_id)
        .cloned()
        .unwrap_or(Value::Null)
}

// ---------------------------------------------------------------------------
// Fan-out scheduling
// ---------------------------------------------------------------------------

/// Result of a fan-out: successful outputs and per-element failures, both
/// sorted by element identity.
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub outputs: Vec<(String, Value)>,
    pub failures: Vec<(String, String)>,
}

impl FanOutResult {
    /// Appends the per-element failures to an update as warnings plus error
    /// records, so a partial cohort never aborts the phase silently.
    pub fn record_failures(&self, step_id: &str, update: &mut StateUpdate) {
        for (identity, message) in &self.failures {
            update.warn(format!(
                "Step {}: element '{}' failed: {}",
                step_id, identity, message
            ));
            update.errors.push(PipelineIssue::new(
                step_id,
                format!("element '{}' failed: {}", identity, message),
            ));
        }
    }
}

/// Schedules one substep invocation per element concurrently.
///
/// Elements are sorted by identity before scheduling, so both invocation
/// order and gathered result order are deterministic. Per-element failures
/// are collected, not propagated; the caller decides how partial results
/// merge.
pub async fn fan_out_substep(
    ctx: &EngineContext,
    step_id: &str,
    mut inputs: Vec<(String, Value)>,
) -> FanOutResult {
    inputs.sort_by(|a, b| a.0.cmp(&b.0));

    let futures = inputs
        .iter()
        .map(|(_, input)| ctx.invoke_substep(step_id, input.clone()));
    let results = join_all(futures).await;

    let mut fan_out = FanOutResult::default();
    for ((identity, _), result) in inputs.into_iter().zip(results) {
        match result {
            Ok(output) => fan_out.outputs.push((identity, output)),
            Err(err) => fan_out.failures.push((identity, err.to_string())),
        }
    }
    fan_out
}

// ---------------------------------------------------------------------------
// Name validation warnings
// ---------------------------------------------------------------------------

/// Runs entity-name validation over `referenced` and folds the report into
/// the update as warnings. Adapters never rewrite substep output; a bad name
/// is logged and left for the transition validators to surface again.
pub fn warn_on_unknown_entities(
    referenced: &[String],
    state: &PipelineState,
    context: &str,
    update: &mut StateUpdate,
) {
    let allowed = state.entity_names();
    if allowed.is_empty() || referenced.is_empty() {
        return;
    }
    let report =
        nl2schema_domain::services::validate_entity_names(referenced, &allowed, context);
    if !report.is_valid() {
        tracing::warn!(
            "{}: entity name validation issues: {:?}. Suggestions: {:?}",
            context,
            report.errors,
            report.suggestions
        );
        for error in report.errors {
            update.warn(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nl2schema_domain::services::{NullRunLog, SubstepRegistry, SubstepService};
    use nl2schema_domain::PipelineError;
    use std::sync::Arc;

    use crate::infrastructure::config::PipelineConfig;
    use crate::infrastructure::sqlite::SqliteSchemaValidator;

    #[test]
    fn test_string_items_mixed_shapes() {
        let value = json!(["Book", {"name": "Author"}, {"other": 1}, 42, "  "]);
        assert_eq!(string_items(&value), vec!["Book", "Author"]);
    }

    #[test]
    fn test_entity_records_fall_back_to_reasoning() {
        let value = json!([
            {"name": "Loan", "reasoning": "connects members and books"},
            "Shelf"
        ]);
        let records = entity_records(&value);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Loan");
        assert_eq!(records[0].description, "connects members and books");
        assert_eq!(records[1].name, "Shelf");
    }

    #[test]
    fn test_attribute_records_skip_invalid() {
        let value = json!([{"name": "title", "description": "t"}, {"description": "no name"}, ""]);
        let records = attribute_records(&value);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "title");
    }

    #[test]
    fn test_relation_records_fill_arity() {
        let value = json!([{"entities": ["Book", "Author"], "type": "many-to-many", "description": "wrote"}]);
        let records = relation_records(&value);
        assert_eq!(records[0].arity, 2);
    }

    struct PerEntity;

    #[async_trait]
    impl SubstepService for PerEntity {
        async fn invoke(&self, input: Value) -> Result<Value, PipelineError> {
            let name = input["entity_name"].as_str().unwrap_or_default();
            if name == "Broken" {
                return Err(PipelineError::LlmError("timeout".into()));
            }
            Ok(json!({"entity": name, "cardinality": "high"}))
        }
    }

    fn ctx() -> EngineContext {
        let mut registry = SubstepRegistry::new();
        registry.register("1.8", Arc::new(PerEntity));
        EngineContext::new(
            registry,
            Arc::new(SqliteSchemaValidator::new()),
            Arc::new(NullRunLog),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fan_out_sorts_and_tolerates_failures() {
        let ctx = ctx();
        let inputs = vec![
            ("Zebra".to_string(), json!({"entity_name": "Zebra"})),
            ("Broken".to_string(), json!({"entity_name": "Broken"})),
            ("Apple".to_string(), json!({"entity_name": "Apple"})),
        ];
        let result = fan_out_substep(&ctx, "1.8", inputs).await;

        let identities: Vec<&str> = result.outputs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(identities, vec!["Apple", "Zebra"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].0, "Broken");

        let mut update = StateUpdate::default();
        result.record_failures("1.8", &mut update);
        assert_eq!(update.warnings.len(), 1);
        assert_eq!(update.errors.len(), 1);
    }
}
