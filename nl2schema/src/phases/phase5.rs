// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 5: Data Type Assignment
//!
//! `5.1` builds the attribute dependency graph (deriving foreign keys from
//! relations when Phase 2 supplied none); `5.2` fans out over independent
//! attributes; `5.3` deterministically copies referenced-key types onto FK
//! columns (entity FKs and junction-table key columns alike); `5.4` types
//! the remaining dependents in topological order, then sweeps any schema
//! column still untyped (junction payload columns have no owning entity);
//! `5.5` fans out per table for nullability with primary keys and
//! totally-participating FK columns pre-excluded.
//!
//! Every 5.x node writes the full merged `data_types` map as a single
//! writer; the per-element fan-out happens inside the adapters.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use nl2schema_domain::{PipelineError, PipelineState, StateUpdate, TypeInfo};

use crate::application::EngineContext;
use crate::compile::dependency_graph::{build_dependency_graph, DependencyGraph};
use crate::compile::type_derivation::derive_fk_types;
use crate::graph::{node_fn, NodeFn, PhaseGraph};

use super::support::{fan_out_substep, str_field};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let mut builder = PhaseGraph::builder("phase_5", ctx.config.superstep_limit);
    builder
        .add_node("dependency_graph", dependency_graph(ctx))
        .add_node("independent_types", independent_types(ctx))
        .add_node("fk_types", fk_types(ctx))
        .add_node("dependent_types", dependent_types(ctx))
        .add_node("nullability_detection", nullability_detection(ctx))
        .set_entry("dependency_graph")
        .add_edge("dependency_graph", "independent_types")
        .add_edge("independent_types", "fk_types")
        .add_edge("fk_types", "dependent_types")
        .add_edge("dependent_types", "nullability_detection")
        .add_edge_to_end("nullability_detection");
    builder.build()
}

fn stored_graph(state: &PipelineState) -> DependencyGraph {
    state
        .metadata_value("dependency_graph")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_else(|| build_dependency_graph(state))
}

fn parse_type_output(raw: &Value) -> Option<TypeInfo> {
    let sql_type = str_field(raw, "type")?;
    Some(TypeInfo {
        sql_type,
        size: raw.get("size").and_then(Value::as_u64).map(|v| v as u32),
        precision: raw.get("precision").and_then(Value::as_u64).map(|v| v as u32),
        scale: raw.get("scale").and_then(Value::as_u64).map(|v| v as u32),
        nullable: None,
    })
}

fn attribute_context(state: &PipelineState, entity: &str, attribute: &str) -> (String, Option<String>) {
    let record = state
        .attributes
        .get(entity)
        .and_then(|attrs| attrs.iter().find(|a| a.name == attribute));
    match record {
        Some(record) => (record.description.clone(), record.type_hint.clone()),
        None => {
            // Schema-only columns (junction keys, payload) fall back to the
            // column definition.
            let column = state
                .relational_schema()
                .and_then(|schema| schema.table(entity).and_then(|t| t.column(attribute).cloned()));
            match column {
                Some(column) => (column.description, column.type_hint),
                None => (String::new(), None),
            }
        }
    }
}

/// Step 5.1 (deterministic): dependency graph plus derived foreign keys.
fn dependency_graph(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 5.1: Attribute Dependency Graph");
            let graph = build_dependency_graph(&state);

            let mut update = StateUpdate::for_step("5.1");
            if !graph.created_foreign_keys.is_empty() {
                tracing::info!(
                    "Created {} foreign keys deterministically from relations",
                    graph.created_foreign_keys.len()
                );
                update.foreign_keys = Some(graph.created_foreign_keys.clone());
            }
            let graph_value = serde_json::to_value(&graph)?;
            update.set_metadata("dependency_graph", graph_value.clone());
            update.record_answer("5.1", graph_value);
            Ok(update)
        }
    })
}

/// Step 5.2: fan-out over independent attributes.
fn independent_types(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 5.2: Independent Attribute Types");
            let graph = stored_graph(&state);

            let inputs: Vec<(String, Value)> = graph
                .independent_attributes
                .iter()
                .map(|(entity, attribute)| {
                    let (description, type_hint) = attribute_context(&state, entity, attribute);
                    (
                        format!("{}.{}", entity, attribute),
                        json!({
                            "attribute_key": format!("{}.{}", entity, attribute),
                            "entity": entity,
                            "attribute": attribute,
                            "description": description,
                            "type_hint": type_hint,
                            "nl_description": state.nl_description,
                            "domain": state.domain,
                        }),
                    )
                })
                .collect();

            let result = fan_out_substep(&ctx, "5.2", inputs).await;

            let mut update = StateUpdate::for_step("5.2");
            result.record_failures("5.2", &mut update);

            let mut data_types = state.data_types.clone();
            let mut answers = Map::new();
            for (key, raw) in &result.outputs {
                let Some((entity, attribute)) = key.split_once('.') else {
                    continue;
                };
                match parse_type_output(raw) {
                    Some(info) => {
                        data_types
                            .entry(entity.to_string())
                            .or_default()
                            .insert(attribute.to_string(), info);
                    }
                    None => { update.warn(format!("Step 5.2: no type returned for {}", key)); }
                }
                answers.insert(key.clone(), raw.clone());
            }
            update.data_types = Some(data_types);
            update.record_answer("5.2", json!({ "results": answers }));
            Ok(update)
        }
    })
}

/// Step 5.3 (deterministic): FK column types copied from referenced keys,
/// covering both entity-level FKs and schema-level (junction) FKs.
fn fk_types(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 5.3: FK Type Derivation");
            let graph = stored_graph(&state);

            let mut data_types = state.data_types.clone();
            let mut update = StateUpdate::for_step("5.3");

            let derivation = derive_fk_types(&data_types, &graph.fk_dependencies);
            for warning in derivation.warnings {
                update.warn(warning);
            }
            for (entity, types) in derivation.assignments {
                data_types.entry(entity).or_default().extend(types);
            }

            // Junction tables reference entity keys through table-level FKs
            // that never appear on the entity dependency graph.
            if let Some(schema) = state.relational_schema() {
                for table in &schema.tables {
                    for fk in &table.foreign_keys {
                        for (attr, referenced) in
                            fk.attributes.iter().zip(&fk.referenced_attributes)
                        {
                            if data_types
                                .get(&table.name)
                                .map(|m| m.contains_key(attr))
                                .unwrap_or(false)
                            {
                                continue;
                            }
                            let referenced_type = data_types
                                .get(&fk.references_table)
                                .and_then(|m| m.get(referenced))
                                .cloned();
                            if let Some(mut info) = referenced_type {
                                info.nullable = None;
                                data_types
                                    .entry(table.name.clone())
                                    .or_default()
                                    .insert(attr.clone(), info);
                            }
                        }
                    }
                }
            }

            update.data_types = Some(data_types);
            update.record_answer("5.3", json!({"derived": true}));
            Ok(update)
        }
    })
}

/// Step 5.4: dependent non-FK attributes in topological order, then a sweep
/// of schema columns the graph does not know about.
fn dependent_types(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 5.4: Dependent Attribute Types");
            let graph = stored_graph(&state);
            let mut data_types = state.data_types.clone();
            let mut update = StateUpdate::for_step("5.4");
            let mut answers = Map::new();

            // Topological order matters: a derived attribute's bases are
            // typed before it, and their types ride along in the input.
            for (entity, attribute) in graph.dependents_in_topological_order() {
                if data_types
                    .get(&entity)
                    .map(|m| m.contains_key(&attribute))
                    .unwrap_or(false)
                {
                    continue;
                }
                let key = format!("{}.{}", entity, attribute);
                let (description, type_hint) = attribute_context(&state, &entity, &attribute);
                let base_types: BTreeMap<String, String> = graph
                    .dependency_graph
                    .get(&key)
                    .map(|deps| {
                        deps.iter()
                            .filter_map(|dep| {
                                let (dep_entity, dep_attr) = dep.split_once('.')?;
                                data_types
                                    .get(dep_entity)
                                    .and_then(|m| m.get(dep_attr))
                                    .map(|info| (dep.clone(), info.render()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                let raw = ctx
                    .invoke_substep(
                        "5.4",
                        json!({
                            "attribute_key": key,
                            "entity": entity,
                            "attribute": attribute,
                            "description": description,
                            "type_hint": type_hint,
                            "formula": state.derived_formulas.get(&key),
                            "base_types": base_types,
                            "nl_description": state.nl_description,
                            "domain": state.domain,
                        }),
                    )
                    .await?;

                match parse_type_output(&raw) {
                    Some(info) => {
                        data_types.entry(entity.clone()).or_default().insert(attribute.clone(), info);
                    }
                    None => { update.warn(format!("Step 5.4: no type returned for {}", key)); }
                }
                answers.insert(key, raw);
            }

            // Sweep: schema columns with no owning entity attribute (junction
            // payload) still need types before the DDL compiler runs.
            if let Some(schema) = state.relational_schema() {
                let mut leftovers: Vec<(String, Value)> = Vec::new();
                for table in &schema.tables {
                    for column in &table.columns {
                        if data_types
                            .get(&table.name)
                            .map(|m| m.contains_key(&column.name))
                            .unwrap_or(false)
                        {
                            continue;
                        }
                        leftovers.push((
                            format!("{}.{}", table.name, column.name),
                            json!({
                                "attribute_key": format!("{}.{}", table.name, column.name),
                                "entity": table.name,
                                "attribute": column.name,
                                "description": column.description,
                                "type_hint": column.type_hint,
                                "nl_description": state.nl_description,
                                "domain": state.domain,
                            }),
                        ));
                    }
                }
                if !leftovers.is_empty() {
                    let result = fan_out_substep(&ctx, "5.4", leftovers).await;
                    result.record_failures("5.4", &mut update);
                    for (key, raw) in &result.outputs {
                        let Some((entity, attribute)) = key.split_once('.') else {
                            continue;
                        };
                        match parse_type_output(raw) {
                            Some(info) => {
                                data_types
                                    .entry(entity.to_string())
                                    .or_default()
                                    .insert(attribute.to_string(), info);
                            }
                            None => { update.warn(format!("Step 5.4: no type returned for {}", key)); }
                        }
                        answers.insert(key.clone(), raw.clone());
                    }
                }
            }

            update.data_types = Some(data_types);
            update.record_answer("5.4", json!({ "results": answers }));
            Ok(update)
        }
    })
}

/// Step 5.5: per-table nullability with PKs and non-nullable (totally
/// participating) FK columns pre-excluded.
fn nullability_detection(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 5.5: Nullability Detection");
            let Some(schema) = state.relational_schema() else {
                let mut update = StateUpdate::for_step("5.5");
                update.warn("Step 5.5: no relational schema available".to_string());
                return Ok(update);
            };

            let mut inputs: Vec<(String, Value)> = Vec::new();
            for table in &schema.tables {
                let fk_columns: std::collections::BTreeSet<&String> = table
                    .foreign_keys
                    .iter()
                    .flat_map(|fk| fk.attributes.iter())
                    .collect();
                let candidates: Vec<Value> = table
                    .columns
                    .iter()
                    .filter(|column| !table.primary_key.contains(&column.name))
                    .filter(|column| !(fk_columns.contains(&column.name) && !column.nullable))
                    .map(|column| {
                        json!({
                            "name": column.name,
                            "description": column.description,
                        })
                    })
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                inputs.push((
                    table.name.clone(),
                    json!({
                        "table": table.name,
                        "columns": candidates,
                        "nl_description": state.nl_description,
                        "domain": state.domain,
                    }),
                ));
            }

            let result = fan_out_substep(&ctx, "5.5", inputs).await;

            let mut update = StateUpdate::for_step("5.5");
            result.record_failures("5.5", &mut update);

            let mut data_types = state.data_types.clone();
            let mut answers = Map::new();
            for (table_name, raw) in &result.outputs {
                let nullable: std::collections::BTreeSet<String> = raw
                    .get("nullable_columns")
                    .map(super::support::string_items)
                    .unwrap_or_default()
                    .into_iter()
                    .collect();
                let Some(table) = schema.table(table_name) else {
                    continue;
                };
                let fk_columns: std::collections::BTreeSet<&String> = table
                    .foreign_keys
                    .iter()
                    .flat_map(|fk| fk.attributes.iter())
                    .collect();
                for column in &table.columns {
                    let entry = data_types
                        .entry(table_name.clone())
                        .or_default()
                        .get_mut(&column.name);
                    let Some(info) = entry else { continue };
                    if table.primary_key.contains(&column.name) {
                        info.nullable = Some(false);
                    } else if fk_columns.contains(&column.name) && !column.nullable {
                        info.nullable = Some(false);
                    } else {
                        info.nullable = Some(nullable.contains(&column.name));
                    }
                }
                answers.insert(table_name.clone(), raw.clone());
            }

            // Tables skipped by the fan-out (all columns pre-decided) still
            // get their PK verdicts pinned.
            for table in &schema.tables {
                for pk in &table.primary_key {
                    if let Some(info) = data_types.get_mut(&table.name).and_then(|m| m.get_mut(pk)) {
                        info.nullable = Some(false);
                    }
                }
            }

            update.data_types = Some(data_types);
            update.record_answer("5.5", json!({ "results": answers }));
            Ok(update)
        }
    })
}
