// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 1: Domain & Entity Discovery
//!
//! Topology:
//!
//! ```text
//! 1.1 domain → 1.2 entity-mention → 1.4 key-entity
//!   → [1.5 relation-mention ∥ 1.6 auxiliary-entities] → 1.7 consolidation
//!   → 1.76 entity/attribute guardrail → 1.75 reclassification
//!   → 1.8 per-entity cardinality (fan-out) → 1.9 relation extraction
//!   → 1.10 connectivity check ──orphans──▶ back to 1.9
//!   → 1.11 per-relation cardinality (fan-out) → 1.12 relation validation
//!       ──failed──▶ back to 1.9
//! ```
//!
//! Both loops are guarded: connectivity and relation validation each budget
//! three iterations before a forced pass. On loop re-entry, 1.9 receives the
//! accumulated hints (mentioned relations from 1.5, reclassification
//! candidates from 1.75, and connectivity suggestions from 1.10) so the
//! extractor can actually connect the orphans instead of replaying itself.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nl2schema_domain::{
    EntityCardinality, EntityRecord, ListUpdate, PipelineError, PipelineState,
    RelationCardinality, StateUpdate,
};

use crate::application::EngineContext;
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};
use crate::guards::ConvergenceGuard;

use super::support::{
    array_field, bool_field, entities_view, entity_records, fan_out_substep, previous_answer,
    relation_records, relations_view, str_field, string_items, warn_on_unknown_entities,
};

/// Transient metadata keys for the 1.5 ∥ 1.6 fan-out, consolidated by 1.7.
const STEP_1_5_RESULT: &str = "step_1_5_result";
const STEP_1_6_RESULT: &str = "step_1_6_result";

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let connectivity_guard = ConvergenceGuard {
        loop_name: "schema_connectivity",
        counter_key: "schema_connectivity_iterations",
        forced_flag_key: "connectivity_forced_passed",
        budget: ctx.config.budgets.connectivity_budget(),
    };
    let validation_guard = ConvergenceGuard {
        loop_name: "relation_validation",
        counter_key: "relation_validation_iterations",
        forced_flag_key: "validation_forced_passed",
        budget: ctx.config.budgets.relation_validation_budget(),
    };

    let mut builder = PhaseGraph::builder("phase_1", ctx.config.superstep_limit);
    builder
        .add_node("domain_detection", domain_detection(ctx))
        .add_node("entity_mention", entity_mention(ctx))
        .add_node("entity_extraction", entity_extraction(ctx))
        .add_node("relation_mention", relation_mention(ctx))
        .add_node("auxiliary_entities", auxiliary_entities(ctx))
        .add_node("entity_consolidation", entity_consolidation(ctx))
        .add_node("entity_attribute_guardrail", entity_attribute_guardrail(ctx))
        .add_node("entity_reclassification", entity_reclassification(ctx))
        .add_node("entity_cardinality", entity_cardinality(ctx))
        .add_node("relation_extraction", relation_extraction(ctx))
        .add_node("schema_connectivity", schema_connectivity(ctx, connectivity_guard))
        .add_node("relation_cardinality", relation_cardinality(ctx))
        .add_node("relation_validation", relation_validation(ctx, validation_guard))
        .add_parallel_group("discovery_fanout", &["relation_mention", "auxiliary_entities"])
        .set_entry("domain_detection")
        .add_edge("domain_detection", "entity_mention")
        .add_edge("entity_mention", "entity_extraction")
        .add_edge("entity_extraction", "discovery_fanout")
        .add_edge("discovery_fanout", "entity_consolidation")
        .add_edge("entity_consolidation", "entity_attribute_guardrail")
        .add_edge("entity_attribute_guardrail", "entity_reclassification")
        .add_edge("entity_reclassification", "entity_cardinality")
        .add_edge("entity_cardinality", "relation_extraction")
        .add_edge("relation_extraction", "schema_connectivity")
        .add_branch(
            "schema_connectivity",
            branch_fn(has_orphans),
            &[
                ("has_orphans", Target::Node("relation_extraction")),
                ("no_orphans", Target::Node("relation_cardinality")),
            ],
        )
        .add_edge("relation_cardinality", "relation_validation")
        .add_branch(
            "relation_validation",
            branch_fn(validation_passed),
            &[
                ("failed", Target::Node("relation_extraction")),
                ("passed", Target::End),
            ],
        );
    builder.build()
}

fn has_orphans(state: &PipelineState) -> &'static str {
    let orphans = state
        .metadata_value("orphan_entities")
        .and_then(Value::as_array)
        .map(|a| !a.is_empty())
        .unwrap_or(false);
    if orphans {
        "has_orphans"
    } else {
        "no_orphans"
    }
}

fn validation_passed(state: &PipelineState) -> &'static str {
    if state.metadata_bool("validation_passed") {
        "passed"
    } else {
        "failed"
    }
}

fn domain_detection(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.1: Domain Detection & Inference");
            let raw = ctx
                .invoke_substep("1.1", json!({"nl_description": state.nl_description}))
                .await?;

            let mut update = StateUpdate::for_step("1.1");
            update.domain = str_field(&raw, "domain");
            update.has_explicit_domain = Some(bool_field(&raw, "has_explicit_domain"));
            update.record_answer("1.1", raw);
            Ok(update)
        }
    })
}

fn entity_mention(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.2: Entity Mention Detection");
            let raw = ctx
                .invoke_substep("1.2", json!({"nl_description": state.nl_description}))
                .await?;
            let mut update = StateUpdate::for_step("1.2");
            update.record_answer("1.2", raw);
            Ok(update)
        }
    })
}

fn entity_extraction(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.4: Key Entity Extraction");
            let raw = ctx
                .invoke_substep(
                    "1.4",
                    json!({
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                        "domain_detection_result": previous_answer(&state, "1.1"),
                        "entity_mention_result": previous_answer(&state, "1.2"),
                    }),
                )
                .await?;

            let entities = entity_records(&raw.get("entities").cloned().unwrap_or(Value::Null));
            let mut update = StateUpdate::for_step("1.4");
            let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
            warn_on_unknown_entities(&names, &state, "step_1_4_entity_extraction", &mut update);
            update.entities = Some(ListUpdate::Append(entities));
            update.record_answer("1.4", raw);
            Ok(update)
        }
    })
}

/// Parallel with 1.6. Writes only its transient metadata slot; current_step
/// and previous_answers move in 1.7, after the fan-in.
fn relation_mention(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.5: Relation Mention Detection");
            let raw = ctx
                .invoke_substep(
                    "1.5",
                    json!({
                        "nl_description": state.nl_description,
                        "entities": entities_view(&state),
                    }),
                )
                .await?;
            let mut update = StateUpdate::default();
            update.set_metadata(STEP_1_5_RESULT, raw);
            Ok(update)
        }
    })
}

/// Parallel with 1.5. Must not touch `entities` here; suggestions merge in
/// 1.7.
fn auxiliary_entities(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.6: Auxiliary Entity Suggestion");
            let raw = ctx
                .invoke_substep(
                    "1.6",
                    json!({
                        "nl_description": state.nl_description,
                        "key_entities": entities_view(&state),
                        "domain": state.domain,
                    }),
                )
                .await?;
            let mut update = StateUpdate::default();
            update.set_metadata(STEP_1_6_RESULT, raw);
            Ok(update)
        }
    })
}

fn entity_consolidation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.7: Entity Consolidation");
            let step_1_5 = state.metadata_value(STEP_1_5_RESULT).cloned();
            let step_1_6 = state.metadata_value(STEP_1_6_RESULT).cloned();

            // Key entities come from 1.4's memoized result, not from the
            // live entity list, which later steps may have reshaped.
            let step_1_4 = previous_answer(&state, "1.4");
            let mut key_entities =
                entity_records(&step_1_4.get("entities").cloned().unwrap_or(Value::Null));
            if key_entities.is_empty() {
                key_entities = state.entities.clone();
            }

            let auxiliary = step_1_6
                .as_ref()
                .map(|raw| {
                    entity_records(&raw.get("suggested_entities").cloned().unwrap_or(Value::Null))
                })
                .unwrap_or_default();

            let raw = ctx
                .invoke_substep(
                    "1.7",
                    json!({
                        "key_entities": key_entities,
                        "auxiliary_entities": auxiliary,
                        "domain": state.domain,
                        "nl_description": state.nl_description,
                    }),
                )
                .await?;

            let mut final_names: BTreeSet<String> = raw
                .get("final_entities")
                .or_else(|| raw.get("final_entity_list"))
                .map(string_items)
                .unwrap_or_default()
                .into_iter()
                .collect();

            let mut update = StateUpdate::for_step("1.7");

            // All key entities survive consolidation even when the substep's
            // final list omits them.
            let key_names: BTreeSet<String> =
                key_entities.iter().map(|e| e.name.clone()).collect();
            let missing: Vec<&String> = key_names.difference(&final_names).collect();
            if !missing.is_empty() {
                update.warn(format!(
                    "Step 1.7: final entity list missing {} key entities: {:?}. Adding them back.",
                    missing.len(),
                    missing
                ));
                final_names.extend(key_names.iter().cloned());
            }

            let mut consolidated: Vec<EntityRecord> = Vec::new();
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for entity in key_entities.iter().chain(auxiliary.iter()) {
                let lower = entity.name.to_lowercase();
                if final_names.contains(&entity.name) && seen.insert(lower) {
                    consolidated.push(entity.clone());
                }
            }
            if consolidated.is_empty() {
                tracing::error!(
                    "Step 1.7: no entities after consolidation; keeping all candidates"
                );
                update.warn("Step 1.7: consolidation produced no entities; keeping all candidates");
                for entity in key_entities.iter().chain(auxiliary.iter()) {
                    if seen.insert(entity.name.to_lowercase()) {
                        consolidated.push(entity.clone());
                    }
                }
            }

            if let Some(step_1_5) = step_1_5 {
                update.record_answer("1.5", step_1_5);
            }
            if let Some(step_1_6) = step_1_6 {
                update.record_answer("1.6", step_1_6);
            }
            update.entities = Some(ListUpdate::Replace(consolidated));
            update.record_answer("1.7", raw);
            update.metadata_removals.push(STEP_1_5_RESULT.to_string());
            update.metadata_removals.push(STEP_1_6_RESULT.to_string());
            Ok(update)
        }
    })
}

fn entity_attribute_guardrail(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.76: Entity vs Attribute Guardrail");
            let raw = ctx
                .invoke_substep(
                    "1.76",
                    json!({
                        "entities": entities_view(&state),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let keep: BTreeSet<String> = raw
                .get("entities")
                .map(string_items)
                .unwrap_or_default()
                .into_iter()
                .collect();
            let filtered: Vec<EntityRecord> = if keep.is_empty() {
                state.entities.clone()
            } else {
                state
                    .entities
                    .iter()
                    .filter(|e| keep.contains(&e.name))
                    .cloned()
                    .collect()
            };

            let mut update = StateUpdate::for_step("1.76");
            update.entities = Some(ListUpdate::Replace(filtered));
            update.set_metadata(
                "removed_entity_candidates",
                raw.get("attribute_candidates").cloned().unwrap_or(json!([])),
            );
            update.record_answer("1.76", raw);
            Ok(update)
        }
    })
}

fn entity_reclassification(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.75: Entity vs Relation Reclassification");
            let raw = ctx
                .invoke_substep(
                    "1.75",
                    json!({
                        "entities": entities_view(&state),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                )
                .await?;

            let keep: BTreeSet<String> = raw
                .get("keep_entities")
                .map(string_items)
                .unwrap_or_default()
                .into_iter()
                .collect();
            let filtered: Vec<EntityRecord> = if keep.is_empty() {
                state.entities.clone()
            } else {
                state
                    .entities
                    .iter()
                    .filter(|e| keep.contains(&e.name))
                    .cloned()
                    .collect()
            };

            // Reclassified entities become relation hints for 1.9.
            let mut relation_candidates: Vec<String> = Vec::new();
            for reclass in array_field(&raw, "reclassify_as_relation") {
                let name = str_field(&reclass, "name").unwrap_or_default();
                let mut endpoints: BTreeMap<String, String> = BTreeMap::new();
                for endpoint in array_field(&reclass, "endpoints") {
                    if let (Some(side), Some(entity)) = (
                        str_field(&endpoint, "side"),
                        str_field(&endpoint, "entity_name"),
                    ) {
                        endpoints.insert(side, entity);
                    }
                }
                let left = endpoints.get("left").cloned().unwrap_or_default();
                let right = endpoints.get("right").cloned().unwrap_or_default();
                let relationship_type =
                    str_field(&reclass, "relationship_type").unwrap_or_default();
                relation_candidates.push(format!(
                    "{} links {} and {} ({})",
                    name, left, right, relationship_type
                ));
            }

            let mut update = StateUpdate::for_step("1.75");
            update.entities = Some(ListUpdate::Replace(filtered));
            update.set_metadata("relation_candidates", json!(relation_candidates));
            update.record_answer("1.75", raw);
            Ok(update)
        }
    })
}

/// Fan-out: one cardinality estimate per entity, gathered in name order.
fn entity_cardinality(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.8: Entity Cardinality");
            let inputs: Vec<(String, Value)> = state
                .entities
                .iter()
                .map(|entity| {
                    (
                        entity.name.clone(),
                        json!({
                            "entity_name": entity.name,
                            "entity_description": entity.description,
                            "nl_description": state.nl_description,
                            "domain": state.domain,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "1.8", inputs).await;

            let mut update = StateUpdate::for_step("1.8");
            result.record_failures("1.8", &mut update);

            let mut cardinalities: BTreeMap<String, EntityCardinality> = BTreeMap::new();
            let mut answers = Map::new();
            for (entity, raw) in &result.outputs {
                cardinalities.insert(
                    entity.clone(),
                    EntityCardinality {
                        cardinality: str_field(raw, "cardinality"),
                        table_type: str_field(raw, "table_type"),
                    },
                );
                answers.insert(entity.clone(), raw.clone());
            }
            update.entity_cardinalities = Some(cardinalities);
            update.record_answer("1.8", json!({ "results": answers }));
            Ok(update)
        }
    })
}

fn relation_extraction(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.9: Key Relations Extraction");

            // Accumulate hints: mentions from 1.5, reclassification
            // candidates from 1.75, connectivity suggestions from 1.10.
            let mut mentioned: Vec<String> = previous_answer(&state, "1.5")
                .get("mentioned_relations")
                .map(string_items)
                .unwrap_or_default();
            if let Some(candidates) = state.metadata_value("relation_candidates") {
                mentioned.extend(string_items(candidates));
            }
            if let Some(suggested) = state.metadata_value("suggested_relations") {
                mentioned.extend(string_items(suggested));
            }

            let raw = ctx
                .invoke_substep(
                    "1.9",
                    json!({
                        "entities": entities_view(&state),
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                        "mentioned_relations": mentioned,
                    }),
                )
                .await?;

            let relations = relation_records(&raw.get("relations").cloned().unwrap_or(Value::Null));

            let mut update = StateUpdate::for_step("1.9");
            let referenced: Vec<String> = relations
                .iter()
                .flat_map(|r| r.entities.iter().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            warn_on_unknown_entities(&referenced, &state, "step_1_9_relation_extraction", &mut update);

            // Re-extraction replaces the relation set; the extractor sees
            // all hints, so append would only duplicate prior answers.
            update.relations = Some(ListUpdate::Replace(relations));
            update.record_answer("1.9", raw);
            Ok(update)
        }
    })
}

/// Deterministic connectivity check with the orphan-repair loop guard.
fn schema_connectivity(ctx: &Arc<EngineContext>, guard: ConvergenceGuard) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.10: Schema Connectivity");

            let connected: BTreeSet<String> = state
                .relations
                .iter()
                .flat_map(|r| r.entities.iter())
                .map(|e| e.to_lowercase())
                .collect();
            let mut orphans: Vec<String> = Vec::new();
            let mut connectivity_status: BTreeMap<String, bool> = BTreeMap::new();
            for entity in &state.entities {
                let is_connected =
                    state.entities.len() <= 1 || connected.contains(&entity.name.to_lowercase());
                connectivity_status.insert(entity.name.clone(), is_connected);
                if !is_connected {
                    orphans.push(entity.name.clone());
                }
            }

            let suggested: Vec<String> = orphans
                .iter()
                .map(|orphan| {
                    format!(
                        "{} is currently disconnected; relate it to one of {:?}",
                        orphan,
                        state
                            .entities
                            .iter()
                            .map(|e| e.name.as_str())
                            .filter(|name| *name != orphan)
                            .collect::<Vec<_>>()
                    )
                })
                .collect();

            let mut update = StateUpdate::for_step("1.10");
            let verdict =
                guard.evaluate(&state, orphans.is_empty(), &mut update, &ctx.metrics);
            let effective_orphans = if verdict.passed() { Vec::new() } else { orphans.clone() };

            update.set_metadata("orphan_entities", json!(effective_orphans));
            update.set_metadata("connectivity_status", json!(connectivity_status));
            update.set_metadata("suggested_relations", json!(suggested));
            update.record_answer(
                "1.10",
                json!({
                    "orphan_entities": orphans,
                    "suggested_relations": suggested,
                }),
            );
            Ok(update)
        }
    })
}

/// Fan-out: cardinality and participation per relation, merged back onto
/// the relation records.
fn relation_cardinality(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.11: Relation Cardinality");
            let inputs: Vec<(String, Value)> = state
                .relations
                .iter()
                .map(|relation| {
                    (
                        relation.key(),
                        json!({
                            "relation_key": relation.key(),
                            "relation": relation,
                            "entities": entities_view(&state),
                            "nl_description": state.nl_description,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "1.11", inputs).await;

            let mut update = StateUpdate::for_step("1.11");
            result.record_failures("1.11", &mut update);

            let mut by_key: BTreeMap<String, RelationCardinality> = BTreeMap::new();
            let mut answers = Map::new();
            for (key, raw) in &result.outputs {
                let mut info = RelationCardinality::default();
                for entry in array_field(raw, "entity_cardinalities") {
                    if let (Some(entity), Some(cardinality)) = (
                        str_field(&entry, "entity_name"),
                        str_field(&entry, "cardinality"),
                    ) {
                        info.entity_cardinalities.insert(entity, cardinality);
                    }
                }
                for entry in array_field(raw, "entity_participations") {
                    if let (Some(entity), Some(participation)) = (
                        str_field(&entry, "entity_name"),
                        str_field(&entry, "participation"),
                    ) {
                        info.entity_participations.insert(entity, participation);
                    }
                }
                by_key.insert(key.clone(), info);
                answers.insert(key.clone(), raw.clone());
            }

            let mut relations = state.relations.clone();
            for relation in &mut relations {
                if let Some(info) = by_key.get(&relation.key()) {
                    if !info.entity_cardinalities.is_empty() {
                        relation.entity_cardinalities = Some(info.entity_cardinalities.clone());
                    }
                    if !info.entity_participations.is_empty() {
                        relation.entity_participations = Some(info.entity_participations.clone());
                    }
                }
            }

            update.relations = Some(ListUpdate::Replace(relations));
            update.relation_cardinalities = Some(by_key);
            update.record_answer("1.11", json!({ "results": answers }));
            Ok(update)
        }
    })
}

fn relation_validation(ctx: &Arc<EngineContext>, guard: ConvergenceGuard) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 1.12: Relation Validation");
            let raw = ctx
                .invoke_substep(
                    "1.12",
                    json!({
                        "entities": entities_view(&state),
                        "relations": relations_view(&state),
                        "relation_cardinalities": state.relation_cardinalities,
                        "nl_description": state.nl_description,
                        "previous_result": previous_answer(&state, "1.11"),
                    }),
                )
                .await?;

            let passed = bool_field(&raw, "validation_passed");
            let mut update = StateUpdate::for_step("1.12");
            let verdict = guard.evaluate(&state, passed, &mut update, &ctx.metrics);
            update.set_metadata("validation_passed", json!(verdict.passed()));
            update.record_answer("1.12", raw);
            Ok(update)
        }
    })
}
