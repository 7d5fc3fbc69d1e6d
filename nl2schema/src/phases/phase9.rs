// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 9: Generation Strategies
//!
//! `9.1` (numerical ranges) → `9.2` (text generation) → `9.3` (boolean
//! dependencies) → `9.4` (data volumes) → `9.5` (partitioning, only when a
//! table's expected volume reaches the configured threshold) → `9.6`
//! (deterministic distribution compilation).
//!
//! Strategy substeps only see independent attributes: derived columns,
//! constrained columns, primary keys, and foreign keys are excluded up
//! front, and categorical columns are compiled directly from their Phase-8
//! value sets.

use serde_json::{json, Value};
use std::sync::Arc;

use nl2schema_domain::{PipelineError, PipelineState, StateUpdate};

use crate::application::EngineContext;
use crate::compile::strategies::{
    compile_distributions, extract_independent_attributes, group_attributes_by_type,
    IndependentAttribute, META_BOOLEAN_STRATEGIES, META_COLUMN_GEN_SPECS, META_ENTITY_VOLUMES,
    META_NUMERICAL_STRATEGIES, META_PARTITIONING_STRATEGIES, META_TEXT_STRATEGIES,
};
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let volume_threshold = ctx.config.partition_volume_threshold;

    let mut builder = PhaseGraph::builder("phase_9", ctx.config.superstep_limit);
    builder
        .add_node("numerical_range_definition", class_strategies(ctx, "9.1", StrategyClass::Numerical))
        .add_node("text_generation_strategy", class_strategies(ctx, "9.2", StrategyClass::Text))
        .add_node("boolean_dependency_analysis", class_strategies(ctx, "9.3", StrategyClass::Boolean))
        .add_node("data_volume_specifications", data_volumes(ctx))
        .add_node("partitioning_strategy", partitioning(ctx))
        .add_node("distribution_compilation", distribution_compilation(ctx))
        .set_entry("numerical_range_definition")
        .add_edge("numerical_range_definition", "text_generation_strategy")
        .add_edge("text_generation_strategy", "boolean_dependency_analysis")
        .add_edge("boolean_dependency_analysis", "data_volume_specifications")
        .add_branch(
            "data_volume_specifications",
            branch_fn(move |state| {
                if any_volume_reaches(state, volume_threshold) {
                    "partition"
                } else {
                    "skip"
                }
            }),
            &[
                ("partition", Target::Node("partitioning_strategy")),
                ("skip", Target::Node("distribution_compilation")),
            ],
        )
        .add_edge("partitioning_strategy", "distribution_compilation")
        .add_edge_to_end("distribution_compilation");
    builder.build()
}

fn any_volume_reaches(state: &PipelineState, threshold: u64) -> bool {
    state
        .metadata_value(META_ENTITY_VOLUMES)
        .and_then(Value::as_object)
        .map(|volumes| {
            volumes.values().any(|volume| {
                volume
                    .get("row_count")
                    .and_then(Value::as_u64)
                    .map(|count| count >= threshold)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

#[derive(Clone, Copy)]
enum StrategyClass {
    Numerical,
    Text,
    Boolean,
}

impl StrategyClass {
    fn title(&self) -> &'static str {
        match self {
            StrategyClass::Numerical => "Numerical Range Definition",
            StrategyClass::Text => "Text Generation Strategy",
            StrategyClass::Boolean => "Boolean Dependency Analysis",
        }
    }

    fn metadata_key(&self) -> &'static str {
        match self {
            StrategyClass::Numerical => META_NUMERICAL_STRATEGIES,
            StrategyClass::Text => META_TEXT_STRATEGIES,
            StrategyClass::Boolean => META_BOOLEAN_STRATEGIES,
        }
    }

    fn select(&self, grouped: crate::compile::strategies::GroupedAttributes) -> Vec<IndependentAttribute> {
        match self {
            StrategyClass::Numerical => grouped.numerical,
            StrategyClass::Text => grouped.text,
            StrategyClass::Boolean => grouped.boolean,
        }
    }
}

/// Shared adapter for 9.1–9.3: extract the class's independent attributes,
/// batch-invoke the substep, stash the strategies in metadata for 9.6.
fn class_strategies(ctx: &Arc<EngineContext>, step_id: &'static str, class: StrategyClass) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step {}: {}", step_id, class.title());
            let independent = extract_independent_attributes(&state);
            let attributes = class.select(group_attributes_by_type(&independent, &state.data_types));

            let mut update = StateUpdate::for_step(step_id);
            if attributes.is_empty() {
                tracing::info!("No attributes for {}, skipping", class.title());
                update.set_metadata(class.metadata_key(), json!({}));
                update.record_answer(step_id, json!({"strategies": {}}));
                return Ok(update);
            }

            let mut input = json!({
                "attributes": attributes,
                "nl_description": state.nl_description,
                "domain": state.domain,
            });
            if matches!(class, StrategyClass::Numerical) {
                // Range/check constraints steer numerical ranges.
                let constraints: Vec<&nl2schema_domain::ConstraintRecord> = state
                    .constraints
                    .iter()
                    .filter(|c| matches!(c.constraint_type.as_str(), "range" | "check"))
                    .collect();
                input["constraints"] = json!(constraints);
            }

            let raw = ctx.invoke_substep(step_id, input).await?;
            update.set_metadata(
                class.metadata_key(),
                raw.get("strategies").cloned().unwrap_or(json!({})),
            );
            update.record_answer(step_id, raw);
            Ok(update)
        }
    })
}

fn data_volumes(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 9.4: Data Volume Specifications");
            let raw = ctx
                .invoke_substep(
                    "9.4",
                    json!({
                        "entities": super::support::entities_view(&state),
                        "entity_cardinalities": state.entity_cardinalities,
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;

            let mut update = StateUpdate::for_step("9.4");
            update.set_metadata(
                META_ENTITY_VOLUMES,
                raw.get("entity_volumes").cloned().unwrap_or(json!({})),
            );
            update.record_answer("9.4", raw);
            Ok(update)
        }
    })
}

fn partitioning(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 9.5: Partitioning Strategy");
            let volumes = state
                .metadata_value(META_ENTITY_VOLUMES)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let entities_with_volumes: Vec<Value> = state
                .entities
                .iter()
                .filter_map(|entity| {
                    volumes.get(&entity.name).map(|volume| {
                        json!({"entity_name": entity.name, "volume": volume})
                    })
                })
                .collect();

            let mut update = StateUpdate::for_step("9.5");
            if entities_with_volumes.is_empty() {
                tracing::info!("No entities with volumes found, skipping partitioning strategy");
                update.set_metadata(META_PARTITIONING_STRATEGIES, json!({}));
                update.record_answer("9.5", json!({"strategies": {}}));
                return Ok(update);
            }

            let raw = ctx
                .invoke_substep("9.5", json!({"entities_with_volumes": entities_with_volumes}))
                .await?;
            update.set_metadata(
                META_PARTITIONING_STRATEGIES,
                raw.get("strategies").cloned().unwrap_or(json!({})),
            );
            update.record_answer("9.5", raw);
            Ok(update)
        }
    })
}

fn distribution_compilation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 9.6: Distribution Compilation");
            let compilation = compile_distributions(&state);

            let mut update = StateUpdate::for_step("9.6");
            update.set_metadata(META_COLUMN_GEN_SPECS, json!(compilation.column_gen_specs));
            update.record_answer(
                "9.6",
                json!({"column_gen_specs": compilation.column_gen_specs}),
            );
            update.generation_strategies = Some(compilation.generation_strategies);
            Ok(update)
        }
    })
}
