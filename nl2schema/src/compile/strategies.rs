// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generation-Strategy Compilation (Phase 9)
//!
//! Helpers for the Phase-9 adapters and the deterministic distribution
//! compiler (9.6).
//!
//! **Independent-attribute extraction** walks the frozen relational schema
//! and drops everything an external generator must not invent freely:
//! derived attributes (computed from bases), columns governed by compiled
//! constraints, primary keys, and foreign keys. What remains is grouped by
//! SQL type class (numerical / boolean / text) for the strategy substeps.
//!
//! **Distribution compilation** merges the per-class strategies from
//! 9.1–9.3, the categorical value sets from Phase 8, entity volumes from
//! 9.4, and partitioning plans from 9.5 into the final per-column
//! `generation_strategies` map plus the flat `column_gen_specs` list the
//! data-generation runtime consumes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use nl2schema_domain::{PipelineState, TypeClass, TypeInfo};

/// Metadata keys written by the Phase-9 adapters.
pub const META_NUMERICAL_STRATEGIES: &str = "numerical_strategies";
pub const META_TEXT_STRATEGIES: &str = "text_strategies";
pub const META_BOOLEAN_STRATEGIES: &str = "boolean_strategies";
pub const META_ENTITY_VOLUMES: &str = "entity_volumes";
pub const META_PARTITIONING_STRATEGIES: &str = "partitioning_strategies";
pub const META_COMPILED_CONSTRAINTS: &str = "compiled_constraints";
pub const META_COLUMN_GEN_SPECS: &str = "column_gen_specs";

/// One column eligible for an independent generation strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndependentAttribute {
    pub entity_name: String,
    pub attribute_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
}

impl IndependentAttribute {
    /// `"Table.column"` key used by the strategy maps.
    pub fn key(&self) -> String {
        format!("{}.{}", self.entity_name, self.attribute_name)
    }
}

/// Columns excluded from independent generation, collected from compiled
/// constraints (bare and qualified forms both honored).
fn constrained_columns(state: &PipelineState) -> BTreeSet<String> {
    let mut excluded = BTreeSet::new();
    let Some(compiled) = state
        .metadata
        .get(META_COMPILED_CONSTRAINTS)
        .and_then(Value::as_array)
    else {
        return excluded;
    };
    for constraint in compiled {
        let table = constraint.get("table").and_then(Value::as_str).unwrap_or("");
        if let Some(columns) = constraint.get("columns").and_then(Value::as_array) {
            for column in columns {
                if let Some(name) = column.as_str() {
                    excluded.insert(name.to_string());
                    if !table.is_empty() {
                        excluded.insert(format!("{}.{}", table, name));
                    }
                }
            }
        }
    }
    excluded
}

/// Extracts the independent attributes per table from the relational schema.
pub fn extract_independent_attributes(
    state: &PipelineState,
) -> BTreeMap<String, Vec<IndependentAttribute>> {
    let mut independent = BTreeMap::new();
    let Some(schema) = state.relational_schema() else {
        tracing::warn!("No relational schema found in state");
        return independent;
    };

    let derived_keys: BTreeSet<&String> = state.derived_formulas.keys().collect();
    let excluded = constrained_columns(state);

    let pk_columns: BTreeSet<&String> = state.primary_keys.values().flatten().collect();
    let fk_columns: BTreeSet<&String> = state
        .foreign_keys
        .iter()
        .flat_map(|fk| fk.from_attributes.iter())
        .collect();

    for table in &schema.tables {
        let mut attrs = Vec::new();
        for column in &table.columns {
            let qualified = format!("{}.{}", table.name, column.name);
            if derived_keys.contains(&qualified) {
                continue;
            }
            if excluded.contains(&column.name) || excluded.contains(&qualified) {
                continue;
            }
            if pk_columns.contains(&column.name) || table.primary_key.contains(&column.name) {
                continue;
            }
            if fk_columns.contains(&column.name) {
                continue;
            }
            attrs.push(IndependentAttribute {
                entity_name: table.name.clone(),
                attribute_name: column.name.clone(),
                description: column.description.clone(),
                type_hint: column.type_hint.clone(),
            });
        }
        if !attrs.is_empty() {
            independent.insert(table.name.clone(), attrs);
        }
    }
    independent
}

/// Independent attributes grouped by type class.
#[derive(Debug, Default, Clone)]
pub struct GroupedAttributes {
    pub numerical: Vec<IndependentAttribute>,
    pub text: Vec<IndependentAttribute>,
    pub boolean: Vec<IndependentAttribute>,
}

/// Groups attributes by their assigned SQL type, falling back to the type
/// hint; unknown types default to text.
pub fn group_attributes_by_type(
    independent: &BTreeMap<String, Vec<IndependentAttribute>>,
    data_types: &BTreeMap<String, BTreeMap<String, TypeInfo>>,
) -> GroupedAttributes {
    let mut grouped = GroupedAttributes::default();
    for attrs in independent.values() {
        for attr in attrs {
            let class = data_types
                .get(&attr.entity_name)
                .and_then(|m| m.get(&attr.attribute_name))
                .map(TypeInfo::classify)
                .unwrap_or_else(|| classify_hint(attr.type_hint.as_deref()));
            match class {
                TypeClass::Numerical => grouped.numerical.push(attr.clone()),
                TypeClass::Boolean => grouped.boolean.push(attr.clone()),
                TypeClass::Text => grouped.text.push(attr.clone()),
            }
        }
    }
    grouped
}

fn classify_hint(hint: Option<&str>) -> TypeClass {
    let Some(hint) = hint else {
        return TypeClass::Text;
    };
    let hint = hint.to_ascii_lowercase();
    if ["int", "float", "decimal", "numeric", "real", "double", "number", "count", "money", "price"]
        .iter()
        .any(|t| hint.contains(t))
    {
        TypeClass::Numerical
    } else if hint.contains("bool") || hint.contains("flag") {
        TypeClass::Boolean
    } else {
        TypeClass::Text
    }
}

/// Output of distribution compilation.
#[derive(Debug, Default, Clone)]
pub struct DistributionCompilation {
    pub generation_strategies: BTreeMap<String, BTreeMap<String, Value>>,
    pub column_gen_specs: Vec<Value>,
}

fn strategy_map(state: &PipelineState, key: &str) -> Map<String, Value> {
    state
        .metadata
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn push_column_spec(
    compilation: &mut DistributionCompilation,
    table: &str,
    column: &str,
    strategy_type: &str,
    strategy_data: Value,
) {
    let mut merged = Map::new();
    merged.insert("type".into(), json!(strategy_type));
    if let Some(data) = strategy_data.as_object() {
        for (k, v) in data {
            merged.insert(k.clone(), v.clone());
        }
    }
    compilation
        .generation_strategies
        .entry(table.to_string())
        .or_default()
        .insert(column.to_string(), Value::Object(merged));
    compilation.column_gen_specs.push(json!({
        "table": table,
        "column": column,
        "type": strategy_type,
        "strategy_data": strategy_data,
    }));
}

/// Compiles the final generation strategies (step 9.6).
///
/// Categorical columns take the value sets discovered in Phase 8 (uniform
/// over the values unless the strategy payload says otherwise); numerical,
/// text, and boolean columns take the strategies produced in 9.1–9.3.
/// Entity volumes and partitioning plans are appended as table-level specs.
pub fn compile_distributions(state: &PipelineState) -> DistributionCompilation {
    let mut compilation = DistributionCompilation::default();

    // Categorical first: a column with discovered values must not fall
    // through to a free-text strategy.
    let mut categorical_keys: BTreeSet<String> = BTreeSet::new();
    for (entity, columns) in &state.categorical_values {
        for (column, values) in columns {
            categorical_keys.insert(format!("{}.{}", entity, column));
            push_column_spec(
                &mut compilation,
                entity,
                column,
                "categorical",
                json!({"values": values, "distribution": "uniform"}),
            );
        }
    }

    for (meta_key, strategy_type) in [
        (META_NUMERICAL_STRATEGIES, "numerical"),
        (META_TEXT_STRATEGIES, "text"),
        (META_BOOLEAN_STRATEGIES, "boolean"),
    ] {
        for (attr_key, strategy) in strategy_map(state, meta_key) {
            if categorical_keys.contains(&attr_key) {
                continue;
            }
            let Some((table, column)) = attr_key.split_once('.') else {
                continue;
            };
            push_column_spec(&mut compilation, table, column, strategy_type, strategy);
        }
    }

    for (entity, volume) in strategy_map(state, META_ENTITY_VOLUMES) {
        compilation.column_gen_specs.push(json!({
            "table": entity,
            "type": "volume",
            "strategy_data": volume,
        }));
    }
    for (entity, partitioning) in strategy_map(state, META_PARTITIONING_STRATEGIES) {
        compilation.column_gen_specs.push(json!({
            "table": entity,
            "type": "partitioning",
            "strategy_data": partitioning,
        }));
    }

    compilation
}
