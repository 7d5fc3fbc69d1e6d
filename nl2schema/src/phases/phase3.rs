// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 3: ER Design Compilation
//!
//! `3.1` (information-need identification, self-looping until stable) →
//! `3.2` (completeness check) → `3.3` (Phase-2 re-execution for missing
//! attributes) → `3.4` (deterministic ER compile) → `3.45` (LLM junction
//! naming, one invocation per junction relation) → `3.5` (deterministic
//! relational compile).
//!
//! Junction names are normalized to snake_case at the adapter boundary and
//! fall back to the sorted entity-name concatenation on empty output, so a
//! silent model miss never produces an unnamed table.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nl2schema_domain::services::naming::{junction_fallback_name, normalize_snake_case};
use nl2schema_domain::services::validate_attribute_names;
use nl2schema_domain::{
    AttributeRecord, InformationNeed, ListUpdate, PipelineError, PipelineState, StateUpdate,
};

use crate::application::EngineContext;
use crate::compile::er_design::compile_er_design;
use crate::compile::relational::compile_relational_schema;
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};
use crate::guards::ConvergenceGuard;

use super::support::{
    array_field, attributes_view, bool_field, entities_view, foreign_keys_view,
    previous_answer, primary_keys_view, relations_view, str_field,
};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let needs_guard = ConvergenceGuard {
        loop_name: "information_need_identification",
        counter_key: "information_need_iterations",
        forced_flag_key: "information_need_forced_passed",
        budget: ctx.config.budgets.information_needs_budget(),
    };

    let mut builder = PhaseGraph::builder("phase_3", ctx.config.superstep_limit);
    builder
        .add_node("information_needs", information_needs(ctx, needs_guard, "3.1"))
        .add_node("completeness_check", completeness_check(ctx))
        .add_node("phase2_reexecution", phase2_reexecution(ctx))
        .add_node("er_compilation", er_compilation(ctx))
        .add_node("junction_naming", junction_naming(ctx))
        .add_node("relational_compilation", relational_compilation(ctx))
        .set_entry("information_needs")
        .add_branch(
            "information_needs",
            branch_fn(|state| {
                if state.metadata_bool("information_needs_stable") {
                    "stable"
                } else {
                    "unstable"
                }
            }),
            &[
                ("stable", Target::Node("completeness_check")),
                ("unstable", Target::Node("information_needs")),
            ],
        )
        .add_edge("completeness_check", "phase2_reexecution")
        .add_edge("phase2_reexecution", "er_compilation")
        .add_edge("er_compilation", "junction_naming")
        .add_edge("junction_naming", "relational_compilation")
        .add_edge_to_end("relational_compilation");
    builder.build()
}

/// Shared by 3.1 and 7.1: identify information needs, appending only those
/// not already known, until the substep reports stability or the budget
/// forces a pass.
pub(super) fn information_needs(
    ctx: &Arc<EngineContext>,
    guard: ConvergenceGuard,
    step_id: &'static str,
) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!(
                "[engine] Executing Step {}: Information Need Identification",
                step_id
            );
            let raw = ctx
                .invoke_substep(
                    step_id,
                    json!({
                        "nl_description": state.nl_description,
                        "entities": entities_view(&state),
                        "relations": relations_view(&state),
                        "attributes": attributes_view(&state),
                        "primary_keys": primary_keys_view(&state),
                        "foreign_keys": foreign_keys_view(&state),
                        "domain": state.domain,
                        "known_needs": state
                            .information_needs
                            .iter()
                            .map(|n| n.description.clone())
                            .collect::<Vec<_>>(),
                    }),
                )
                .await?;

            let known: BTreeSet<String> = state
                .information_needs
                .iter()
                .map(|n| n.description.clone())
                .collect();
            let mut fresh: Vec<InformationNeed> = Vec::new();
            for need in array_field(&raw, "information_needs") {
                let Ok(need) = serde_json::from_value::<InformationNeed>(need) else {
                    continue;
                };
                if !need.description.trim().is_empty() && !known.contains(&need.description) {
                    fresh.push(need);
                }
            }

            let stable = bool_field(&raw, "no_more_changes") && fresh.is_empty();
            let mut update = StateUpdate::for_step(step_id);
            let verdict = guard.evaluate(&state, stable, &mut update, &ctx.metrics);
            update.set_metadata("information_needs_stable", json!(verdict.passed()));
            update.information_needs = Some(ListUpdate::Append(fresh));
            update.record_answer(step_id, raw);
            Ok(update)
        }
    })
}

fn completeness_check(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 3.2: Information Completeness Check");
            let raw = ctx
                .invoke_substep(
                    "3.2",
                    json!({
                        "information_needs": state.information_needs,
                        "entities": entities_view(&state),
                        "relations": relations_view(&state),
                        "attributes": attributes_view(&state),
                        "primary_keys": primary_keys_view(&state),
                        "foreign_keys": foreign_keys_view(&state),
                        "constraints": state.constraints,
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("3.2");

            // Attribute references in the completeness result must resolve.
            let mut references: Vec<(String, String)> = Vec::new();
            for missing in array_field(&raw, "missing_intrinsic_attributes") {
                if let (Some(entity), Some(attribute)) =
                    (str_field(&missing, "entity"), str_field(&missing, "attribute"))
                {
                    references.push((entity, attribute));
                }
            }
            if !references.is_empty() {
                let report = validate_attribute_names(
                    &references,
                    &state,
                    "step_3_2_information_completeness",
                );
                if !report.is_valid() {
                    tracing::warn!(
                        "Step 3.2: attribute name validation issues: {:?}",
                        report.errors
                    );
                }
                // Missing attributes are the point of this step; only names
                // that resolve nowhere near the schema become warnings.
                for error in report.errors {
                    if error.contains("Invalid entity") {
                        update.warn(error);
                    }
                }
            }

            update.set_metadata(
                "completeness_results",
                raw.get("completeness_results").cloned().unwrap_or(json!({})),
            );
            update.record_answer("3.2", raw);
            Ok(update)
        }
    })
}

fn phase2_reexecution(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 3.3: Phase 2 Re-execution");
            let raw = ctx
                .invoke_substep(
                    "3.3",
                    json!({
                        "entities": entities_view(&state),
                        "relations": relations_view(&state),
                        "attributes": attributes_view(&state),
                        "primary_keys": primary_keys_view(&state),
                        "information_needs": state.information_needs,
                        "completeness_results": state
                            .metadata_value("completeness_results")
                            .cloned()
                            .unwrap_or(json!({})),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("3.3");
            if let Some(new_attributes) = raw.get("new_attributes").and_then(Value::as_object) {
                if !new_attributes.is_empty() {
                    let mut merged = state.attributes.clone();
                    for (entity, attrs) in new_attributes {
                        let additions: Vec<AttributeRecord> =
                            super::support::attribute_records(attrs);
                        merged.entry(entity.clone()).or_default().extend(additions);
                    }
                    update.attributes = Some(merged);
                }
            }
            update.record_answer("3.3", raw);
            Ok(update)
        }
    })
}

fn er_compilation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 3.4: ER Design Compilation");
            let design = compile_er_design(&state);
            let design_value = serde_json::to_value(&design)?;

            let mut update = StateUpdate::for_step("3.4");
            update.set_metadata("er_design", design_value.clone());
            update.record_answer("3.4", design_value);
            Ok(update)
        }
    })
}

/// One naming invocation per junction relation; output normalized to
/// snake_case with the sorted concatenation as fallback.
fn junction_naming(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 3.45: Junction Table Naming");
            let junction_relations: Vec<_> = state
                .relations
                .iter()
                .filter(|r| r.needs_junction_table())
                .collect();

            let inputs: Vec<(String, Value)> = junction_relations
                .iter()
                .map(|relation| {
                    (
                        relation.key(),
                        json!({
                            "relation_key": relation.key(),
                            "entities": relation.entities,
                            "relation_type": relation.relation_type,
                            "description": relation.description,
                            "nl_description": state.nl_description,
                            "domain": state.domain,
                        }),
                    )
                })
                .collect();

            let result = super::support::fan_out_substep(&ctx, "3.45", inputs).await;

            let mut update = StateUpdate::for_step("3.45");
            result.record_failures("3.45", &mut update);

            let entities_by_key: BTreeMap<String, Vec<String>> = junction_relations
                .iter()
                .map(|r| (r.key(), r.entities.clone()))
                .collect();

            let mut names: BTreeMap<String, String> = BTreeMap::new();
            let mut answers = Map::new();
            for (key, raw) in &result.outputs {
                let entities = entities_by_key.get(key).cloned().unwrap_or_default();
                let suggested = str_field(raw, "table_name")
                    .map(|name| normalize_snake_case(&name))
                    .filter(|name| !name.is_empty());
                let name = match suggested {
                    Some(name) => name,
                    None => {
                        let fallback = junction_fallback_name(&entities);
                        update.warn(format!(
                            "Step 3.45: empty junction name for {:?}; using fallback '{}'",
                            entities, fallback
                        ));
                        fallback
                    }
                };
                names.insert(key.clone(), name);
                answers.insert(key.clone(), raw.clone());
            }
            // Failed elements still need a name; the fallback covers them.
            for (key, _) in &result.failures {
                let entities = entities_by_key.get(key).cloned().unwrap_or_default();
                names.insert(key.clone(), junction_fallback_name(&entities));
            }

            update.junction_table_names = Some(names);
            update.record_answer("3.45", json!({ "results": answers }));
            Ok(update)
        }
    })
}

fn relational_compilation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 3.5: Relational Schema Compilation");
            let design = state
                .metadata_value("er_design")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_else(|| compile_er_design(&state));

            let compilation = compile_relational_schema(&design, &state);
            let schema_value = serde_json::to_value(&compilation.schema)?;

            let mut update = StateUpdate::for_step("3.5");
            for warning in compilation.warnings {
                update.warn(warning);
            }
            update.set_metadata("relational_schema", schema_value.clone());
            update.record_answer("3.5", schema_value);
            Ok(update)
        }
    })
}
