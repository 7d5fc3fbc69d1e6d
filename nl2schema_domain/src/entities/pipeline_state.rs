// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline State
//!
//! The single typed record threaded through all nine phases. The state
//! accumulates everything the pipeline discovers: the domain, entities and
//! relations, attributes and keys, data types, DDL, constraints, and
//! generation strategies, plus tracking data (per-step answer memo, loop
//! counters, warnings, errors) and the flexible `metadata` bucket holding
//! intermediate artifacts such as the ER design, the relational schema, and
//! the frozen-schema snapshot.
//!
//! ## Lifecycle
//!
//! - **Created** by [`PipelineState::seed`] with empty collections and
//!   `phase = 1`.
//! - **Mutated** only through [`PipelineState::apply`] with a
//!   [`StateUpdate`](super::state_update::StateUpdate) partial record; the
//!   merge rules per field kind are documented on that type.
//! - **Snapshotted** at the end of Phase 4: `metadata.frozen_schema` holds a
//!   deep copy of `metadata.relational_schema`. From Phase 5 onward the
//!   freeze validator warns on any topology change.
//! - **Destroyed** at process end; serialization is the caller's choice and
//!   round-trips losslessly through JSON.
//!
//! ## Concurrency
//!
//! The state is owned by a single run's event loop. Parallel substeps never
//! share it mutably; they receive clones and return partial updates which the
//! runtime merges in deterministic order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::relational_schema::RelationalSchema;
use super::schema_objects::{
    AttributeRecord, ConstraintRecord, EntityCardinality, EntityRecord, ForeignKeyRecord,
    FormulaRecord, FunctionalDependency, InformationNeed, RelationCardinality, RelationRecord,
    TypeInfo,
};
use super::state_update::StateUpdate;

/// The flexible metadata bucket. Ordered so snapshots serialize stably.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key of the canonical relational schema.
pub const META_RELATIONAL_SCHEMA: &str = "relational_schema";
/// Metadata key of the frozen Phase-4 schema snapshot.
pub const META_FROZEN_SCHEMA: &str = "frozen_schema";
/// Metadata key of the compiled ER design.
pub const META_ER_DESIGN: &str = "er_design";

/// A recorded error with its originating step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineIssue {
    pub step: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl PipelineIssue {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Centralized state for the schema-compilation workflow.
///
/// Fields are grouped the way phases populate them; all collections start
/// empty and are filled incrementally. See the module docs for lifecycle and
/// merge semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    // Input
    pub nl_description: String,

    // Phase tracking
    pub phase: u8,
    pub current_step: String,

    // Phase 1: Domain & Entity Discovery
    pub domain: Option<String>,
    pub has_explicit_domain: Option<bool>,
    pub entities: Vec<EntityRecord>,
    pub relations: Vec<RelationRecord>,
    pub entity_cardinalities: BTreeMap<String, EntityCardinality>,
    pub relation_cardinalities: BTreeMap<String, RelationCardinality>,

    // Phase 2: Attribute Discovery & Schema Design
    pub attributes: BTreeMap<String, Vec<AttributeRecord>>,
    pub primary_keys: BTreeMap<String, Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyRecord>,
    pub constraints: Vec<ConstraintRecord>,
    pub derived_formulas: BTreeMap<String, FormulaRecord>,

    // Phase 3: ER design & junction naming
    pub junction_table_names: BTreeMap<String, String>,

    // Phases 3 & 7: information needs and SQL
    pub information_needs: Vec<InformationNeed>,
    pub sql_queries: Vec<Value>,

    // Phase 5: data types; Phase 8: FDs and categoricals
    pub functional_dependencies: Vec<FunctionalDependency>,
    pub data_types: BTreeMap<String, BTreeMap<String, TypeInfo>>,
    pub categorical_attributes: BTreeMap<String, Vec<String>>,
    pub categorical_values: BTreeMap<String, BTreeMap<String, Vec<String>>>,

    // Phase 6: DDL
    pub ddl_statements: Vec<String>,
    pub ddl_validation_errors: Vec<Value>,

    // Phases 8 & 9: constraint specs and strategies
    pub constraint_specs: Vec<Value>,
    pub generation_strategies: BTreeMap<String, BTreeMap<String, Value>>,

    // Metadata & tracking
    pub errors: Vec<PipelineIssue>,
    pub warnings: Vec<String>,
    pub previous_answers: BTreeMap<String, Value>,
    pub metadata: Metadata,
    pub loop_iterations: BTreeMap<String, u32>,
    pub loop_termination_reasons: BTreeMap<String, String>,
}

impl PipelineState {
    /// Creates the initial state for a run: empty collections, `phase = 1`.
    pub fn seed(nl_description: impl Into<String>) -> Self {
        Self {
            nl_description: nl_description.into(),
            phase: 1,
            current_step: String::new(),
            domain: None,
            has_explicit_domain: None,
            entities: Vec::new(),
            relations: Vec::new(),
            entity_cardinalities: BTreeMap::new(),
            relation_cardinalities: BTreeMap::new(),
            attributes: BTreeMap::new(),
            primary_keys: BTreeMap::new(),
            foreign_keys: Vec::new(),
            constraints: Vec::new(),
            derived_formulas: BTreeMap::new(),
            junction_table_names: BTreeMap::new(),
            information_needs: Vec::new(),
            sql_queries: Vec::new(),
            functional_dependencies: Vec::new(),
            data_types: BTreeMap::new(),
            categorical_attributes: BTreeMap::new(),
            categorical_values: BTreeMap::new(),
            ddl_statements: Vec::new(),
            ddl_validation_errors: Vec::new(),
            constraint_specs: Vec::new(),
            generation_strategies: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            previous_answers: BTreeMap::new(),
            metadata: BTreeMap::new(),
            loop_iterations: BTreeMap::new(),
            loop_termination_reasons: BTreeMap::new(),
        }
    }

    /// Merges a partial update into the state under the per-field rules:
    /// sequences append (or replace when explicitly requested), `metadata`
    /// and `previous_answers` union keys, everything else overwrites.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(step) = update.current_step {
            self.current_step = step;
        }
        if let Some(phase) = update.phase {
            self.phase = phase;
        }
        if let Some(domain) = update.domain {
            self.domain = Some(domain);
        }
        if let Some(explicit) = update.has_explicit_domain {
            self.has_explicit_domain = Some(explicit);
        }
        if let Some(list) = update.entities {
            list.apply_to(&mut self.entities);
        }
        if let Some(list) = update.relations {
            list.apply_to(&mut self.relations);
        }
        if let Some(map) = update.entity_cardinalities {
            self.entity_cardinalities = map;
        }
        if let Some(map) = update.relation_cardinalities {
            self.relation_cardinalities = map;
        }
        if let Some(map) = update.attributes {
            self.attributes = map;
        }
        if let Some(map) = update.primary_keys {
            self.primary_keys = map;
        }
        if let Some(fks) = update.foreign_keys {
            self.foreign_keys = fks;
        }
        if let Some(list) = update.constraints {
            list.apply_to(&mut self.constraints);
        }
        if let Some(map) = update.derived_formulas {
            self.derived_formulas = map;
        }
        if let Some(map) = update.junction_table_names {
            self.junction_table_names = map;
        }
        if let Some(list) = update.information_needs {
            list.apply_to(&mut self.information_needs);
        }
        if let Some(list) = update.sql_queries {
            list.apply_to(&mut self.sql_queries);
        }
        if let Some(list) = update.functional_dependencies {
            list.apply_to(&mut self.functional_dependencies);
        }
        if let Some(map) = update.data_types {
            self.data_types = map;
        }
        if let Some(map) = update.categorical_attributes {
            self.categorical_attributes = map;
        }
        if let Some(map) = update.categorical_values {
            self.categorical_values = map;
        }
        if let Some(list) = update.ddl_statements {
            list.apply_to(&mut self.ddl_statements);
        }
        if let Some(errors) = update.ddl_validation_errors {
            self.ddl_validation_errors = errors;
        }
        if let Some(list) = update.constraint_specs {
            list.apply_to(&mut self.constraint_specs);
        }
        if let Some(map) = update.generation_strategies {
            self.generation_strategies = map;
        }

        self.warnings.extend(update.warnings);
        self.errors.extend(update.errors);
        self.previous_answers.extend(update.previous_answers);
        self.metadata.extend(update.metadata);
        for key in update.metadata_removals {
            self.metadata.remove(&key);
        }
        self.loop_iterations.extend(update.loop_iterations);
        self.loop_termination_reasons
            .extend(update.loop_termination_reasons);
    }

    // ------------------------------------------------------------------
    // Lookup helpers
    // ------------------------------------------------------------------

    /// Names of all discovered entities, in state order.
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }

    /// Case-insensitive entity existence check.
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Attribute names of one entity.
    pub fn attribute_names(&self, entity: &str) -> Vec<String> {
        self.attributes
            .get(entity)
            .map(|attrs| attrs.iter().map(|a| a.name.clone()).collect())
            .unwrap_or_default()
    }

    /// A metadata value by key.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// A metadata boolean, defaulting to `false` when absent or non-boolean.
    pub fn metadata_bool(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// A metadata counter, defaulting to zero.
    pub fn metadata_counter(&self, key: &str) -> u32 {
        self.metadata
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// The canonical relational schema, if Phase 3.5/4.1 has produced it.
    pub fn relational_schema(&self) -> Option<RelationalSchema> {
        self.metadata
            .get(META_RELATIONAL_SCHEMA)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// The frozen Phase-4 schema snapshot, if present.
    pub fn frozen_schema(&self) -> Option<RelationalSchema> {
        self.metadata
            .get(META_FROZEN_SCHEMA)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// The raw frozen snapshot value, for byte-stable comparison.
    pub fn frozen_schema_raw(&self) -> Option<&Value> {
        self.metadata.get(META_FROZEN_SCHEMA)
    }

    /// The type assignment for `entity`.`attribute`, if Phase 5 produced one.
    pub fn type_of(&self, entity: &str, attribute: &str) -> Option<&TypeInfo> {
        self.data_types.get(entity).and_then(|m| m.get(attribute))
    }
}
