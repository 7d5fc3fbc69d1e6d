// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 8: Functional Dependencies & Constraints
//!
//! `8.1` (FD analysis, fan-out per entity) → `8.2` (categorical column
//! identification) → `8.3` (categorical value identification) → `8.4`
//! (constraint detection, self-looping until no new constraints) → `8.5`
//! (scope analysis, fan-out per constraint) → `8.6` (enforcement strategy,
//! fan-out per constraint) → `8.7` (conflict detection, may rewrite the
//! constraint list) → `8.8` (deterministic constraint compilation).
//!
//! Steps 8.5–8.7 rewrite the constraint list wholesale as single writers;
//! detection (8.4) appends only constraints whose signature is not already
//! present, so the loop converges instead of duplicating.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nl2schema_domain::{
    ConstraintRecord, FunctionalDependency, ListUpdate, PipelineError, PipelineState, StateUpdate,
};

use crate::application::EngineContext;
use crate::compile::constraints::compile_constraints;
use crate::compile::strategies::META_COMPILED_CONSTRAINTS;
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};
use crate::guards::ConvergenceGuard;

use super::support::{array_field, attributes_view, bool_field, entities_view, fan_out_substep};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let detection_guard = ConvergenceGuard {
        loop_name: "constraint_detection",
        counter_key: "constraint_detection_iterations",
        forced_flag_key: "constraint_detection_forced_passed",
        budget: ctx.config.budgets.constraint_detection_budget(),
    };

    let mut builder = PhaseGraph::builder("phase_8", ctx.config.superstep_limit);
    builder
        .add_node("functional_dependencies", functional_dependencies(ctx))
        .add_node("categorical_identification", categorical_identification(ctx))
        .add_node("categorical_value_identification", categorical_values(ctx))
        .add_node("constraint_detection", constraint_detection(ctx, detection_guard))
        .add_node("constraint_scope", constraint_scope(ctx))
        .add_node("constraint_enforcement", constraint_enforcement(ctx))
        .add_node("constraint_conflict", constraint_conflict(ctx))
        .add_node("constraint_compilation", constraint_compilation(ctx))
        .set_entry("functional_dependencies")
        .add_edge("functional_dependencies", "categorical_identification")
        .add_edge("categorical_identification", "categorical_value_identification")
        .add_edge("categorical_value_identification", "constraint_detection")
        .add_branch(
            "constraint_detection",
            branch_fn(|state| {
                if state.metadata_bool("constraint_detection_stable") {
                    "stable"
                } else {
                    "unstable"
                }
            }),
            &[
                ("stable", Target::Node("constraint_scope")),
                ("unstable", Target::Node("constraint_detection")),
            ],
        )
        .add_edge("constraint_scope", "constraint_enforcement")
        .add_edge("constraint_enforcement", "constraint_conflict")
        .add_edge("constraint_conflict", "constraint_compilation")
        .add_edge_to_end("constraint_compilation");
    builder.build()
}

/// Fan-out per entity; FDs accumulate on the shared list with the entity
/// recorded as the table.
fn functional_dependencies(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.1: Functional Dependency Analysis");
            let inputs: Vec<(String, Value)> = state
                .entities
                .iter()
                .map(|entity| {
                    (
                        entity.name.clone(),
                        json!({
                            "entity": entity.name,
                            "attributes": state.attributes.get(&entity.name),
                            "primary_keys": state.primary_keys.get(&entity.name),
                            "relational_schema": state.metadata_value("relational_schema"),
                            "nl_description": state.nl_description,
                            "domain": state.domain,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "8.1", inputs).await;

            let mut update = StateUpdate::for_step("8.1");
            result.record_failures("8.1", &mut update);

            let mut dependencies: Vec<FunctionalDependency> = Vec::new();
            let mut answers = Map::new();
            for (entity, raw) in &result.outputs {
                for fd in array_field(raw, "functional_dependencies") {
                    if let Ok(mut fd) = serde_json::from_value::<FunctionalDependency>(fd) {
                        if fd.table.is_empty() {
                            fd.table = entity.clone();
                        }
                        dependencies.push(fd);
                    }
                }
                answers.insert(entity.clone(), raw.clone());
            }
            update.functional_dependencies = Some(ListUpdate::Append(dependencies));
            update.record_answer("8.1", json!({ "results": answers }));
            Ok(update)
        }
    })
}

fn categorical_identification(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.2: Categorical Column Identification");
            let raw = ctx
                .invoke_substep(
                    "8.2",
                    json!({
                        "entities": entities_view(&state),
                        "attributes": attributes_view(&state),
                        "data_types": state.data_types,
                        "relational_schema": state.metadata_value("relational_schema"),
                        "derived_formulas": state.derived_formulas,
                        "multivalued_derived": state.metadata_value("multivalued_derived"),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let mut categorical: BTreeMap<String, Vec<String>> = BTreeMap::new();
            if let Some(results) = raw.get("entity_results").and_then(Value::as_object) {
                for (entity, value) in results {
                    let attrs = value
                        .get("categorical_attributes")
                        .map(super::support::string_items)
                        .unwrap_or_default();
                    if !attrs.is_empty() {
                        categorical.insert(entity.clone(), attrs);
                    }
                }
            }

            let mut update = StateUpdate::for_step("8.2");
            update.categorical_attributes = Some(categorical);
            update.record_answer("8.2", raw);
            Ok(update)
        }
    })
}

fn categorical_values(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.3: Categorical Value Identification");
            let mut update = StateUpdate::for_step("8.3");

            if state.categorical_attributes.is_empty() {
                tracing::warn!(
                    "No categorical attributes found in state; proceeding with empty categorical values"
                );
                update.categorical_values = Some(BTreeMap::new());
                update.record_answer("8.3", json!({}));
                return Ok(update);
            }

            let entity_descriptions: BTreeMap<&String, &String> = state
                .entities
                .iter()
                .filter(|e| !e.description.is_empty())
                .map(|e| (&e.name, &e.description))
                .collect();

            let raw = ctx
                .invoke_substep(
                    "8.3",
                    json!({
                        "categorical_attributes": state.categorical_attributes,
                        "entity_attributes": attributes_view(&state),
                        "data_types": state.data_types,
                        "entity_descriptions": entity_descriptions,
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            // Expected shape: {entity: {attribute: [values]}}.
            let mut values: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
            if let Some(entities) = raw.as_object() {
                for (entity, columns) in entities {
                    let Some(columns) = columns.as_object() else {
                        continue;
                    };
                    let mut per_column = BTreeMap::new();
                    for (column, column_values) in columns {
                        let parsed = super::support::string_items(column_values);
                        if !parsed.is_empty() {
                            per_column.insert(column.clone(), parsed);
                        }
                    }
                    if !per_column.is_empty() {
                        values.insert(entity.clone(), per_column);
                    }
                }
            }

            update.categorical_values = Some(values);
            update.record_answer("8.3", raw);
            Ok(update)
        }
    })
}

/// Self-looping detection: only constraints with unseen signatures append,
/// so a stable model answer converges the loop.
fn constraint_detection(ctx: &Arc<EngineContext>, guard: ConvergenceGuard) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.4: Constraint Detection");
            let raw = ctx
                .invoke_substep(
                    "8.4",
                    json!({
                        "nl_description": state.nl_description,
                        "relational_schema": state.metadata_value("relational_schema"),
                        "categorical_values": state.categorical_values,
                        "functional_dependencies": state.functional_dependencies,
                        "derived_formulas": state.derived_formulas,
                        "multivalued_derived": state.metadata_value("multivalued_derived"),
                        "known_constraints": state.constraints,
                    }),
                )
                .await?;

            let seen: BTreeSet<String> =
                state.constraints.iter().map(|c| c.signature()).collect();
            let mut fresh: Vec<ConstraintRecord> = Vec::new();
            for constraint in array_field(&raw, "constraints") {
                let Ok(constraint) = serde_json::from_value::<ConstraintRecord>(constraint) else {
                    continue;
                };
                if !seen.contains(&constraint.signature())
                    && !fresh.iter().any(|c| c.signature() == constraint.signature())
                {
                    fresh.push(constraint);
                }
            }

            let stable = bool_field(&raw, "no_more_constraints") && fresh.is_empty();
            let mut update = StateUpdate::for_step("8.4");
            let verdict = guard.evaluate(&state, stable, &mut update, &ctx.metrics);
            update.set_metadata("constraint_detection_stable", json!(verdict.passed()));
            update.constraints = Some(ListUpdate::Append(fresh));
            update.record_answer("8.4", raw);
            Ok(update)
        }
    })
}

/// Fan-out per constraint: scope fields merge onto the records, which are
/// rewritten as a single writer.
fn constraint_scope(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.5: Constraint Scope Analysis");
            let inputs: Vec<(String, Value)> = state
                .constraints
                .iter()
                .enumerate()
                .map(|(index, constraint)| {
                    (
                        format!("{:04}", index),
                        json!({
                            "constraint": constraint,
                            "relational_schema": state.metadata_value("relational_schema"),
                            "functional_dependencies": state.functional_dependencies,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "8.5", inputs).await;

            let mut update = StateUpdate::for_step("8.5");
            result.record_failures("8.5", &mut update);

            let mut constraints = state.constraints.clone();
            let mut answers = Map::new();
            for (key, raw) in &result.outputs {
                let Ok(index) = key.parse::<usize>() else { continue };
                if let Some(constraint) = constraints.get_mut(index) {
                    if let Some(scope) = super::support::str_field(raw, "scope") {
                        constraint.scope = Some(scope);
                    }
                    if let Some(extra) = raw.as_object() {
                        for (k, v) in extra {
                            if k != "scope" {
                                constraint.extra.insert(k.clone(), v.clone());
                            }
                        }
                    }
                }
                answers.insert(key.clone(), raw.clone());
            }
            update.constraints = Some(ListUpdate::Replace(constraints));
            update.record_answer("8.5", json!({ "results": answers }));
            Ok(update)
        }
    })
}

/// Fan-out per constraint: enforcement strategy and level.
fn constraint_enforcement(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.6: Constraint Enforcement Strategy");
            let inputs: Vec<(String, Value)> = state
                .constraints
                .iter()
                .enumerate()
                .map(|(index, constraint)| {
                    (
                        format!("{:04}", index),
                        json!({
                            "constraint": constraint,
                            "relational_schema": state.metadata_value("relational_schema"),
                            "functional_dependencies": state.functional_dependencies,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "8.6", inputs).await;

            let mut update = StateUpdate::for_step("8.6");
            result.record_failures("8.6", &mut update);

            let mut constraints = state.constraints.clone();
            let mut answers = Map::new();
            for (key, raw) in &result.outputs {
                let Ok(index) = key.parse::<usize>() else { continue };
                if let Some(constraint) = constraints.get_mut(index) {
                    constraint.enforcement_strategy =
                        super::support::str_field(raw, "enforcement_strategy");
                    constraint.enforcement_level =
                        super::support::str_field(raw, "enforcement_level");
                    if let Some(expressions) = raw.get("column_dsl_expressions") {
                        if !expressions.is_null() {
                            constraint
                                .extra
                                .insert("column_dsl_expressions".into(), expressions.clone());
                        }
                    }
                    if let Some(reasoning) = super::support::str_field(raw, "reasoning") {
                        constraint
                            .extra
                            .insert("enforcement_reasoning".into(), json!(reasoning));
                    }
                }
                answers.insert(key.clone(), raw.clone());
            }
            update.constraints = Some(ListUpdate::Replace(constraints));
            update.record_answer("8.6", json!({ "results": answers }));
            Ok(update)
        }
    })
}

fn constraint_conflict(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.7: Constraint Conflict Detection");
            let raw = ctx
                .invoke_substep(
                    "8.7",
                    json!({
                        "constraints": state.constraints,
                        "categorical_values": state.categorical_values,
                        "derived_formulas": state.derived_formulas,
                        "multivalued_derived": state.metadata_value("multivalued_derived"),
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("8.7");
            if bool_field(&raw, "resolution_applied") {
                let resolved: Vec<ConstraintRecord> = array_field(&raw, "resolved_constraints")
                    .into_iter()
                    .filter_map(|c| serde_json::from_value(c).ok())
                    .collect();
                if resolved.is_empty() {
                    update.warn(
                        "Step 8.7: resolution was applied but no resolved constraints returned; \
                         keeping original constraints"
                            .to_string(),
                    );
                } else {
                    tracing::info!(
                        "Updating constraints with resolved version: {} constraints (from {})",
                        resolved.len(),
                        state.constraints.len()
                    );
                    update.constraints = Some(ListUpdate::Replace(resolved));
                }
            }
            update.record_answer("8.7", raw);
            Ok(update)
        }
    })
}

fn constraint_compilation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 8.8: Constraint Compilation");
            let compiled = compile_constraints(&state.constraints);

            let mut update = StateUpdate::for_step("8.8");
            update.set_metadata(META_COMPILED_CONSTRAINTS, json!(compiled));
            update.constraint_specs = Some(ListUpdate::Append(compiled.clone()));
            update.record_answer("8.8", json!({"compiled_constraints": compiled}));
            Ok(update)
        }
    })
}
