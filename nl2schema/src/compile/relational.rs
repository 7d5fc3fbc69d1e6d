// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Relational Schema Compilation (Steps 3.5 / 4.1)
//!
//! Lowers the conceptual ER design to the relational schema:
//!
//! - one table per entity, with its attributes as columns, primary-key
//!   columns forced non-null (and materialized if discovery missed them);
//! - foreign keys placed by cardinality: 1:N puts the FK on the N side,
//!   1:1 on the lexically-first entity, named after the referenced primary
//!   key;
//! - many-to-many and n-ary relations become junction tables named by step
//!   3.45 (falling back to the sorted entity-name concatenation), keyed by
//!   the union of the referenced primary keys, carrying any
//!   relation-intrinsic attributes from step 2.15;
//! - default values (2.12) and single-column check conditions (2.13) are
//!   attached to their columns.
//!
//! Compilation is total: structural gaps produce warnings and reasonable
//! fallbacks rather than failures, because the phase gate decides what is
//! fatal.

use serde_json::Value;
use std::collections::BTreeSet;

use nl2schema_domain::services::naming::{junction_fallback_name, normalize_snake_case};
use nl2schema_domain::{
    ColumnDef, PipelineState, RelationRecord, RelationalSchema, TableDef, TableForeignKey,
};
use nl2schema_domain::entities::relational_schema::TableSource;

use super::er_design::ErDesign;

/// Metadata key carrying `{entity: {attribute: default}}` from step 2.12.
pub const META_DEFAULT_VALUES: &str = "default_values";
/// Metadata key carrying `{relation_key: [attributes]}` from step 2.15.
pub const META_RELATION_ATTRIBUTES: &str = "relation_attributes";

/// A compiled schema plus the warnings compilation produced.
#[derive(Debug, Clone, Default)]
pub struct RelationalCompilation {
    pub schema: RelationalSchema,
    pub warnings: Vec<String>,
}

/// Compiles the relational schema from the ER design and state context.
pub fn compile_relational_schema(
    design: &ErDesign,
    state: &PipelineState,
) -> RelationalCompilation {
    let mut compilation = RelationalCompilation::default();

    for entity in &design.entities {
        let table = compile_entity_table(entity.name.as_str(), design, state, &mut compilation);
        compilation.schema.tables.push(table);
    }

    for relation in &design.relations {
        if relation.needs_junction_table() {
            compile_junction_table(relation, design, state, &mut compilation);
        } else if relation.entities.len() == 2 {
            place_binary_foreign_key(relation, design, &mut compilation);
        } else {
            compilation.warnings.push(format!(
                "Relation '{}' has unsupported arity {} without junction handling",
                relation.key(),
                relation.entities.len()
            ));
        }
    }

    compilation
}

fn compile_entity_table(
    entity: &str,
    design: &ErDesign,
    state: &PipelineState,
    compilation: &mut RelationalCompilation,
) -> TableDef {
    let mut table = TableDef::new(entity);
    table.source = TableSource::Entity;

    let defaults = state
        .metadata
        .get(META_DEFAULT_VALUES)
        .and_then(|v| v.get(entity))
        .and_then(Value::as_object)
        .cloned();

    if let Some(attrs) = design.attributes.get(entity) {
        for attr in attrs {
            let mut column = ColumnDef::new(&attr.name);
            column.description = attr.description.clone();
            column.type_hint = attr.type_hint.clone();
            if let Some(defaults) = &defaults {
                column.default = defaults.get(&attr.name).cloned();
            }
            column.check_condition = check_condition_for(state, entity, &attr.name);
            table.columns.push(column);
        }
    }

    let primary_key = design.primary_keys.get(entity).cloned().unwrap_or_default();
    for pk in &primary_key {
        match table.columns.iter_mut().find(|c| &c.name == pk) {
            Some(column) => column.nullable = false,
            None => {
                compilation.warnings.push(format!(
                    "Table {}: primary key column '{}' was not among discovered attributes; materializing it",
                    entity, pk
                ));
                let mut column = ColumnDef::new(pk);
                column.description = format!("Primary key of {}", entity);
                column.type_hint = Some("identifier".to_string());
                column.nullable = false;
                table.columns.push(column);
            }
        }
    }
    if primary_key.is_empty() {
        compilation
            .warnings
            .push(format!("Table {}: no primary key defined", entity));
    }
    table.primary_key = primary_key;
    table
}

fn check_condition_for(state: &PipelineState, entity: &str, attribute: &str) -> Option<String> {
    state
        .constraints
        .iter()
        .find(|c| {
            c.constraint_type == "check"
                && c.entity == entity
                && c.attributes.len() == 1
                && c.attributes[0] == attribute
        })
        .and_then(|c| c.condition.clone())
}

/// FK placement for binary relations: the "N" side references the "1" side;
/// 1:1 places the FK on the lexically-first entity.
fn place_binary_foreign_key(
    relation: &RelationRecord,
    design: &ErDesign,
    compilation: &mut RelationalCompilation,
) {
    let first = relation.entities[0].clone();
    let second = relation.entities[1].clone();
    let first_card = relation.cardinality_of(&first);
    let second_card = relation.cardinality_of(&second);

    let (holder, referenced) = if first_card == "1" && second_card == "1" {
        if first <= second {
            (first.clone(), second.clone())
        } else {
            (second.clone(), first.clone())
        }
    } else if first_card == "1" {
        (second.clone(), first.clone())
    } else {
        (first.clone(), second.clone())
    };

    let Some(referenced_pk) = design.primary_keys.get(&referenced).filter(|pk| !pk.is_empty())
    else {
        compilation.warnings.push(format!(
            "Relation '{}': referenced entity '{}' has no primary key; skipping foreign key",
            relation.key(),
            referenced
        ));
        return;
    };
    let referenced_pk = referenced_pk.clone();

    let nullable = !relation.is_total_participation(&holder);
    let Some(table) = compilation
        .schema
        .tables
        .iter_mut()
        .find(|t| t.name == holder)
    else {
        compilation.warnings.push(format!(
            "Relation '{}': holding entity '{}' has no table; skipping foreign key",
            relation.key(),
            holder
        ));
        return;
    };

    for pk in &referenced_pk {
        if !table.has_column(pk) {
            let mut column = ColumnDef::new(pk);
            column.description = format!("References {}", referenced);
            column.type_hint = Some("identifier".to_string());
            column.nullable = nullable;
            table.columns.push(column);
        }
    }
    table.foreign_keys.push(TableForeignKey {
        attributes: referenced_pk.clone(),
        references_table: referenced,
        referenced_attributes: referenced_pk,
    });
}

fn compile_junction_table(
    relation: &RelationRecord,
    design: &ErDesign,
    state: &PipelineState,
    compilation: &mut RelationalCompilation,
) {
    let key = relation.key();
    let name = state
        .junction_table_names
        .get(&key)
        .map(|n| normalize_snake_case(n))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| junction_fallback_name(&relation.entities));

    let name = if compilation.schema.table(&name).is_some() {
        let fallback = format!("{}_link", name);
        compilation.warnings.push(format!(
            "Junction table name '{}' collides with an existing table; using '{}'",
            name, fallback
        ));
        fallback
    } else {
        name
    };

    let mut table = TableDef::new(&name);
    table.source = TableSource::Junction;
    let mut used_columns: BTreeSet<String> = BTreeSet::new();

    for entity in &relation.entities {
        let pk = match design.primary_keys.get(entity).filter(|pk| !pk.is_empty()) {
            Some(pk) => pk.clone(),
            None => {
                let fallback = format!("{}_id", normalize_snake_case(entity));
                compilation.warnings.push(format!(
                    "Junction table {}: entity '{}' has no primary key; using '{}'",
                    name, entity, fallback
                ));
                vec![fallback]
            }
        };

        let mut referencing_columns = Vec::with_capacity(pk.len());
        for pk_column in &pk {
            // Shared PK names across entities ("id") get entity-prefixed.
            let column_name = if used_columns.contains(pk_column) {
                format!("{}_{}", normalize_snake_case(entity), pk_column)
            } else {
                pk_column.clone()
            };
            used_columns.insert(column_name.clone());

            let mut column = ColumnDef::new(&column_name);
            column.description = format!("References {}", entity);
            column.type_hint = Some("identifier".to_string());
            column.nullable = false;
            table.columns.push(column);
            referencing_columns.push(column_name);
        }

        table.primary_key.extend(referencing_columns.clone());
        table.foreign_keys.push(TableForeignKey {
            attributes: referencing_columns,
            references_table: entity.clone(),
            referenced_attributes: pk,
        });
    }

    // Relation-intrinsic attributes (step 2.15) become plain columns.
    if let Some(attrs) = state
        .metadata
        .get(META_RELATION_ATTRIBUTES)
        .and_then(|v| v.get(&key))
        .and_then(Value::as_array)
    {
        for attr in attrs {
            let Some(attr_name) = attr.get("name").and_then(Value::as_str) else {
                continue;
            };
            if used_columns.contains(attr_name) {
                continue;
            }
            used_columns.insert(attr_name.to_string());
            let mut column = ColumnDef::new(attr_name);
            column.description = attr
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            column.type_hint = attr
                .get("type_hint")
                .and_then(Value::as_str)
                .map(str::to_string);
            table.columns.push(column);
        }
    }

    compilation.schema.tables.push(table);
}
