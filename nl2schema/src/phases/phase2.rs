// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 2: Attribute Discovery & Schema Design
//!
//! Sequential chain `2.1 → … → 2.6` with a naming-validation loop back to
//! 2.3, then `2.7 → … → 2.14` with a cleanup self-loop, finishing with 2.15
//! (relation-intrinsic attributes). The attribute substeps are batch calls
//! that return the full reshaped attribute map (`entity_results`), which
//! overwrites the state's map as a single writer.
//!
//! Unique (2.10) and check (2.13) results are additionally lowered to typed
//! constraint records on the shared constraint list; defaults (2.12) land in
//! `metadata.default_values` for the relational compiler to attach.

use serde_json::{json, Value};
use std::sync::Arc;

use nl2schema_domain::{ConstraintRecord, ListUpdate, PipelineError, PipelineState, StateUpdate};

use crate::application::EngineContext;
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};
use crate::guards::ConvergenceGuard;

use super::support::{
    attributes_view, bool_field, entities_view, entity_results_attribute_map, previous_answer,
    primary_keys_view, relations_view, string_items,
};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let naming_guard = ConvergenceGuard {
        loop_name: "naming_validation",
        counter_key: "naming_validation_iterations",
        forced_flag_key: "naming_forced_passed",
        budget: ctx.config.budgets.naming_budget(),
    };
    let cleanup_guard = ConvergenceGuard {
        loop_name: "entity_cleanup",
        counter_key: "entity_cleanup_iterations",
        forced_flag_key: "cleanup_forced_passed",
        budget: ctx.config.budgets.cleanup_budget(),
    };

    let mut builder = PhaseGraph::builder("phase_2", ctx.config.superstep_limit);
    builder
        .add_node("attribute_count", attribute_count(ctx))
        .add_node("intrinsic_attributes", intrinsic_attributes(ctx))
        .add_node("synonym_detection", attribute_rewrite(ctx, "2.3", "Attribute Synonym Detection"))
        .add_node("composite_handling", attribute_rewrite(ctx, "2.4", "Composite Attribute Handling"))
        .add_node("temporal_attributes", attribute_rewrite(ctx, "2.5", "Temporal Attributes Detection"))
        .add_node("naming_validation", naming_validation(ctx, naming_guard))
        .add_node("primary_keys", primary_key_identification(ctx))
        .add_node("multivalued_derived", multivalued_derived(ctx))
        .add_node("derived_formulas", derived_formulas(ctx))
        .add_node("unique_constraints", unique_constraints(ctx))
        .add_node("nullability", nullability_constraints(ctx))
        .add_node("default_values", default_values(ctx))
        .add_node("check_constraints", check_constraints(ctx))
        .add_node("entity_cleanup", entity_cleanup(ctx, cleanup_guard))
        .add_node("relation_attributes", relation_attributes(ctx))
        .set_entry("attribute_count")
        .add_edge("attribute_count", "intrinsic_attributes")
        .add_edge("intrinsic_attributes", "synonym_detection")
        .add_edge("synonym_detection", "composite_handling")
        .add_edge("composite_handling", "temporal_attributes")
        .add_edge("temporal_attributes", "naming_validation")
        .add_branch(
            "naming_validation",
            branch_fn(|state| {
                if state.metadata_bool("naming_validation_passed") {
                    "passed"
                } else {
                    "failed"
                }
            }),
            &[
                ("passed", Target::Node("primary_keys")),
                ("failed", Target::Node("synonym_detection")),
            ],
        )
        .add_edge("primary_keys", "multivalued_derived")
        .add_edge("multivalued_derived", "derived_formulas")
        .add_edge("derived_formulas", "unique_constraints")
        .add_edge("unique_constraints", "nullability")
        .add_edge("nullability", "default_values")
        .add_edge("default_values", "check_constraints")
        .add_edge("check_constraints", "entity_cleanup")
        .add_branch(
            "entity_cleanup",
            branch_fn(|state| {
                if state.metadata_bool("cleanup_complete") {
                    "complete"
                } else {
                    "incomplete"
                }
            }),
            &[
                ("complete", Target::Node("relation_attributes")),
                ("incomplete", Target::Node("entity_cleanup")),
            ],
        )
        .add_edge_to_end("relation_attributes");
    builder.build()
}

fn attribute_count(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.1: Attribute Count Detection");
            let raw = ctx
                .invoke_substep(
                    "2.1",
                    json!({
                        "entities": entities_view(&state),
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;
            let mut update = StateUpdate::for_step("2.1");
            update.record_answer("2.1", raw);
            Ok(update)
        }
    })
}

fn intrinsic_attributes(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.2: Intrinsic Attributes");
            let raw = ctx
                .invoke_substep(
                    "2.2",
                    json!({
                        "entities": entities_view(&state),
                        "nl_description": state.nl_description,
                        "attribute_count_results": previous_answer(&state, "2.1"),
                        "domain": state.domain,
                        "relations": relations_view(&state),
                        "primary_keys": primary_keys_view(&state),
                    }),
                )
                .await?;

            let attributes = entity_results_attribute_map(&raw);
            let mut update = StateUpdate::for_step("2.2");
            if !attributes.is_empty() {
                update.attributes = Some(attributes);
            }
            update.record_answer("2.2", raw);
            Ok(update)
        }
    })
}

/// Shared adapter for the attribute-rewriting substeps (2.3, 2.4, 2.5):
/// each takes the current map and returns the full reshaped map.
fn attribute_rewrite(ctx: &Arc<EngineContext>, step_id: &'static str, title: &'static str) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step {}: {}", step_id, title);
            let raw = ctx
                .invoke_substep(
                    step_id,
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;

            let attributes = entity_results_attribute_map(&raw);
            let mut update = StateUpdate::for_step(step_id);
            if !attributes.is_empty() {
                update.attributes = Some(attributes);
            }
            update.record_answer(step_id, raw);
            Ok(update)
        }
    })
}

fn naming_validation(ctx: &Arc<EngineContext>, guard: ConvergenceGuard) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.6: Naming Convention Validation");
            let raw = ctx
                .invoke_substep(
                    "2.6",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "domain": state.domain,
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;

            let passed = bool_field(&raw, "validation_passed");
            let mut update = StateUpdate::for_step("2.6");
            let verdict = guard.evaluate(&state, passed, &mut update, &ctx.metrics);
            update.set_metadata("naming_validation_passed", json!(verdict.passed()));
            update.record_answer("2.6", raw);
            Ok(update)
        }
    })
}

fn primary_key_identification(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.7: Primary Key Identification");
            let raw = ctx
                .invoke_substep(
                    "2.7",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                    }),
                )
                .await?;

            let mut primary_keys = std::collections::BTreeMap::new();
            if let Some(results) = raw.get("entity_results").and_then(Value::as_object) {
                for (entity, value) in results {
                    let keys = string_items(value);
                    if !keys.is_empty() {
                        primary_keys.insert(entity.clone(), keys);
                    }
                }
            }

            let mut update = StateUpdate::for_step("2.7");
            update.primary_keys = Some(primary_keys);
            update.record_answer("2.7", raw);
            Ok(update)
        }
    })
}

fn multivalued_derived(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.8: Multivalued/Derived Detection");
            let raw = ctx
                .invoke_substep(
                    "2.8",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                    }),
                )
                .await?;
            let mut update = StateUpdate::for_step("2.8");
            update.set_metadata(
                "multivalued_derived",
                raw.get("entity_results").cloned().unwrap_or(json!({})),
            );
            update.record_answer("2.8", raw);
            Ok(update)
        }
    })
}

fn derived_formulas(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.9: Derived Attribute Formulas");
            let raw = ctx
                .invoke_substep(
                    "2.9",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "multivalued_derived_results": previous_answer(&state, "2.8"),
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("2.9");
            if let Some(formulas) = raw.get("formulas") {
                match serde_json::from_value(formulas.clone()) {
                    Ok(formulas) => update.derived_formulas = Some(formulas),
                    Err(err) => {
                        update.warn(format!("Step 2.9: unparseable formulas: {}", err));
                    }
                }
            }
            update.record_answer("2.9", raw);
            Ok(update)
        }
    })
}

fn unique_constraints(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.10: Unique Constraints");
            let raw = ctx
                .invoke_substep(
                    "2.10",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "primary_keys": primary_keys_view(&state),
                    }),
                )
                .await?;

            let mut constraints = Vec::new();
            if let Some(results) = raw.get("entity_results").and_then(Value::as_object) {
                for (entity, value) in results {
                    for unique in value
                        .get("unique_attributes")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        let attributes = match unique {
                            Value::String(name) => vec![name.clone()],
                            Value::Array(_) => string_items(unique),
                            _ => continue,
                        };
                        if attributes.is_empty() {
                            continue;
                        }
                        constraints.push(ConstraintRecord {
                            constraint_type: "unique".into(),
                            entity: entity.clone(),
                            attributes,
                            ..Default::default()
                        });
                    }
                }
            }

            let mut update = StateUpdate::for_step("2.10");
            update.constraints = Some(ListUpdate::Append(constraints));
            update.record_answer("2.10", raw);
            Ok(update)
        }
    })
}

fn nullability_constraints(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.11: Nullability Constraints");
            let raw = ctx
                .invoke_substep(
                    "2.11",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                    }),
                )
                .await?;
            let mut update = StateUpdate::for_step("2.11");
            update.record_answer("2.11", raw);
            Ok(update)
        }
    })
}

fn default_values(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.12: Default Values");
            let raw = ctx
                .invoke_substep(
                    "2.12",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "nullability_results": previous_answer(&state, "2.11"),
                    }),
                )
                .await?;

            let mut defaults = serde_json::Map::new();
            if let Some(results) = raw.get("entity_results").and_then(Value::as_object) {
                for (entity, value) in results {
                    if let Some(entity_defaults) = value.get("defaults").and_then(Value::as_object) {
                        if !entity_defaults.is_empty() {
                            defaults.insert(entity.clone(), Value::Object(entity_defaults.clone()));
                        }
                    }
                }
            }

            let mut update = StateUpdate::for_step("2.12");
            update.set_metadata("default_values", Value::Object(defaults));
            update.record_answer("2.12", raw);
            Ok(update)
        }
    })
}

fn check_constraints(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.13: Check Constraints");
            let raw = ctx
                .invoke_substep(
                    "2.13",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;

            let mut constraints = Vec::new();
            if let Some(results) = raw.get("entity_results").and_then(Value::as_object) {
                for (entity, value) in results {
                    if let Some(checks) = value.get("check_constraints").and_then(Value::as_object) {
                        for (attribute, check) in checks {
                            let condition = check
                                .get("condition")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string();
                            if condition.is_empty() {
                                continue;
                            }
                            constraints.push(ConstraintRecord {
                                constraint_type: "check".into(),
                                entity: entity.clone(),
                                attributes: vec![attribute.clone()],
                                condition: Some(condition),
                                ..Default::default()
                            });
                        }
                    }
                }
            }

            let mut update = StateUpdate::for_step("2.13");
            update.constraints = Some(ListUpdate::Append(constraints));
            update.record_answer("2.13", raw);
            Ok(update)
        }
    })
}

fn entity_cleanup(ctx: &Arc<EngineContext>, guard: ConvergenceGuard) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.14: Entity Cleanup");
            let raw = ctx
                .invoke_substep(
                    "2.14",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "primary_keys": primary_keys_view(&state),
                        "relations": relations_view(&state),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let attributes = entity_results_attribute_map(&raw);
            let complete = bool_field(&raw, "all_complete");

            let mut update = StateUpdate::for_step("2.14");
            if !attributes.is_empty() {
                update.attributes = Some(attributes);
            }
            let verdict = guard.evaluate(&state, complete, &mut update, &ctx.metrics);
            update.set_metadata("cleanup_complete", json!(verdict.passed()));
            update.record_answer("2.14", raw);
            Ok(update)
        }
    })
}

fn relation_attributes(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 2.15: Relation Intrinsic Attributes");
            let raw = ctx
                .invoke_substep(
                    "2.15",
                    json!({
                        "relations": relations_view(&state),
                        "entity_intrinsic_attributes": attributes_view(&state),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("2.15");
            update.set_metadata(
                "relation_attributes",
                raw.get("relation_results").cloned().unwrap_or(json!({})),
            );
            update.record_answer("2.15", raw);
            Ok(update)
        }
    })
}
