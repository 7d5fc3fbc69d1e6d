// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Scripted Substeps
//!
//! Substep implementations that replay pre-recorded outputs instead of
//! calling a language model. Used by the CLI replay mode and by the
//! integration tests, which drive full pipeline runs from fixture files.
//!
//! ## Fixture format
//!
//! A fixture is a JSON object mapping step ids to output specs:
//!
//! ```json
//! {
//!   "1.1": {"domain": "library", "has_explicit_domain": true},
//!   "1.10": {"$sequence": [{"orphans": ["Fine"]}, {"orphans": []}]},
//!   "1.8": {"$keyed_by": "/entity_name", "$outputs": {"Book": {"cardinality": "high"}}}
//! }
//! ```
//!
//! - a plain value is returned on every invocation;
//! - `$sequence` returns each element in turn and repeats the last one once
//!   the sequence is exhausted (loops converge on the final answer);
//! - `$keyed_by` selects from `$outputs` by a JSON pointer into the input,
//!   falling back to `$default` when the key is missing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;

use nl2schema_domain::services::{SubstepRegistry, SubstepService};
use nl2schema_domain::PipelineError;

/// A substep that replays scripted outputs.
pub struct ScriptedSubstep {
    step_id: String,
    script: Script,
}

enum Script {
    Fixed(Value),
    Sequence(Mutex<VecDeque<Value>>, Value),
    Keyed {
        pointer: String,
        outputs: Map<String, Value>,
        default: Option<Value>,
    },
}

impl ScriptedSubstep {
    /// Returns the same output on every invocation.
    pub fn fixed(step_id: impl Into<String>, output: Value) -> Self {
        Self {
            step_id: step_id.into(),
            script: Script::Fixed(output),
        }
    }

    /// Returns each output in turn; the final output repeats thereafter.
    pub fn sequence(step_id: impl Into<String>, outputs: Vec<Value>) -> Self {
        let last = outputs.last().cloned().unwrap_or(Value::Null);
        Self {
            step_id: step_id.into(),
            script: Script::Sequence(Mutex::new(outputs.into()), last),
        }
    }

    /// Selects the output by a JSON pointer into the invocation input.
    pub fn keyed(
        step_id: impl Into<String>,
        pointer: impl Into<String>,
        outputs: Map<String, Value>,
        default: Option<Value>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            script: Script::Keyed {
                pointer: pointer.into(),
                outputs,
                default,
            },
        }
    }
}

#[async_trait]
impl SubstepService for ScriptedSubstep {
    async fn invoke(&self, input: Value) -> Result<Value, PipelineError> {
        match &self.script {
            Script::Fixed(output) => Ok(output.clone()),
            Script::Sequence(queue, last) => {
                let mut queue = queue.lock();
                Ok(queue.pop_front().unwrap_or_else(|| last.clone()))
            }
            Script::Keyed {
                pointer,
                outputs,
                default,
            } => {
                let key = input
                    .pointer(pointer)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let selected = key
                    .as_deref()
                    .and_then(|k| outputs.get(k))
                    .or(default.as_ref());
                selected.cloned().ok_or_else(|| {
                    PipelineError::substep(
                        &self.step_id,
                        format!(
                            "No scripted output for key {:?} (pointer '{}')",
                            key, pointer
                        ),
                    )
                })
            }
        }
    }
}

/// Builds a substep registry from a fixture object (step id → output spec).
pub fn registry_from_fixture(fixture: &Value) -> Result<SubstepRegistry, PipelineError> {
    let Some(entries) = fixture.as_object() else {
        return Err(PipelineError::InvalidConfiguration(
            "Fixture must be a JSON object mapping step ids to outputs".to_string(),
        ));
    };

    let mut registry = SubstepRegistry::new();
    for (step_id, spec) in entries {
        let substep = substep_from_spec(step_id, spec)?;
        registry.register(step_id.clone(), Arc::new(substep));
    }
    Ok(registry)
}

fn substep_from_spec(step_id: &str, spec: &Value) -> Result<ScriptedSubstep, PipelineError> {
    if let Some(object) = spec.as_object() {
        if let Some(sequence) = object.get("$sequence") {
            let outputs = sequence
                .as_array()
                .ok_or_else(|| {
                    PipelineError::InvalidConfiguration(format!(
                        "Step {}: $sequence must be an array",
                        step_id
                    ))
                })?
                .clone();
            return Ok(ScriptedSubstep::sequence(step_id, outputs));
        }
        if let Some(pointer) = object.get("$keyed_by") {
            let pointer = pointer.as_str().ok_or_else(|| {
                PipelineError::InvalidConfiguration(format!(
                    "Step {}: $keyed_by must be a JSON pointer string",
                    step_id
                ))
            })?;
            let outputs = object
                .get("$outputs")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::InvalidConfiguration(format!(
                        "Step {}: $keyed_by requires an $outputs object",
                        step_id
                    ))
                })?;
            let default = object.get("$default").cloned();
            return Ok(ScriptedSubstep::keyed(step_id, pointer, outputs, default));
        }
    }
    Ok(ScriptedSubstep::fixed(step_id, spec.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fixed_script_repeats() {
        let substep = ScriptedSubstep::fixed("1.1", json!({"domain": "library"}));
        for _ in 0..3 {
            let out = substep.invoke(json!({})).await.unwrap();
            assert_eq!(out["domain"], "library");
        }
    }

    #[tokio::test]
    async fn test_sequence_script_repeats_last() {
        let substep = ScriptedSubstep::sequence("1.10", vec![json!(1), json!(2)]);
        assert_eq!(substep.invoke(json!({})).await.unwrap(), json!(1));
        assert_eq!(substep.invoke(json!({})).await.unwrap(), json!(2));
        assert_eq!(substep.invoke(json!({})).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_keyed_script_selects_by_pointer() {
        let mut outputs = Map::new();
        outputs.insert("Book".into(), json!({"cardinality": "high"}));
        let substep = ScriptedSubstep::keyed("1.8", "/entity_name", outputs, None);
        let out = substep
            .invoke(json!({"entity_name": "Book"}))
            .await
            .unwrap();
        assert_eq!(out["cardinality"], "high");
        assert!(substep.invoke(json!({"entity_name": "X"})).await.is_err());
    }

    #[tokio::test]
    async fn test_registry_from_fixture() {
        let fixture = json!({
            "1.1": {"domain": "library"},
            "1.10": {"$sequence": [{"a": 1}]},
            "1.8": {"$keyed_by": "/entity_name", "$outputs": {}, "$default": {"cardinality": "low"}}
        });
        let registry = registry_from_fixture(&fixture).unwrap();
        assert_eq!(registry.len(), 3);
        let out = registry
            .get("1.8")
            .unwrap()
            .invoke(json!({"entity_name": "Anything"}))
            .await
            .unwrap();
        assert_eq!(out["cardinality"], "low");
    }

    #[test]
    fn test_fixture_must_be_object() {
        assert!(registry_from_fixture(&json!([1, 2])).is_err());
    }
}
