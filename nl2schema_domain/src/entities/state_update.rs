// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Partial State Updates
//!
//! The only way substep nodes mutate the pipeline state. A node returns a
//! [`StateUpdate`] containing exactly the keys it owns; the graph runtime
//! merges it into the state under the field-kind rules of the state model:
//!
//! | Field kind | Merge rule |
//! |---|---|
//! | sequence fields (entities, relations, constraints, …) | append (or explicit single-writer replace) |
//! | `metadata`, `previous_answers` | shallow dict union |
//! | scalar and map fields | overwrite, single writer per superstep |
//!
//! Returning the whole state from a node is structurally impossible here:
//! `StateUpdate` has no constructor from `PipelineState`, and each field must
//! be set deliberately. This is the engine-level fix for the exponential
//! list-duplication failure mode that motivated the duplication detector.
//!
//! ## Cohort safety
//!
//! Nodes executed concurrently in the same superstep may only write
//! append-merged sequences and union-merged maps. [`StateUpdate::cohort_violations`]
//! reports any single-writer field present in an update; the graph runtime
//! rejects unsafe cohort updates with a merge-conflict error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::pipeline_state::{Metadata, PipelineIssue};
use super::schema_objects::{
    AttributeRecord, ConstraintRecord, EntityCardinality, EntityRecord, ForeignKeyRecord,
    FormulaRecord, FunctionalDependency, InformationNeed, RelationCardinality, RelationRecord,
    TypeInfo,
};

/// Update to a sequence field.
///
/// `Append` is the default merge rule and is safe under concurrency.
/// `Replace` rewrites the list wholesale and is reserved for single-writer
/// supersteps (consolidation, validated filtering, conflict resolution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListUpdate<T> {
    Append(Vec<T>),
    Replace(Vec<T>),
}

impl<T> ListUpdate<T> {
    /// Applies this update to `target` in place.
    pub fn apply_to(self, target: &mut Vec<T>) {
        match self {
            ListUpdate::Append(mut items) => target.append(&mut items),
            ListUpdate::Replace(items) => *target = items,
        }
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, ListUpdate::Replace(_))
    }

    pub fn len(&self) -> usize {
        match self {
            ListUpdate::Append(v) | ListUpdate::Replace(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A partial update to the pipeline state, produced by one substep node.
///
/// All fields are optional; unset fields leave the state untouched. The
/// `warnings`, `errors`, `previous_answers`, and `metadata` fields are plain
/// collections because their merge rule (append / union) makes an empty
/// collection a natural no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StateUpdate {
    // Identity & tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u8>,

    // Phase 1: domain & entity discovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_explicit_domain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<ListUpdate<EntityRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relations: Option<ListUpdate<RelationRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_cardinalities: Option<BTreeMap<String, EntityCardinality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_cardinalities: Option<BTreeMap<String, RelationCardinality>>,

    // Phase 2: attributes & schema design
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, Vec<AttributeRecord>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_keys: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_keys: Option<Vec<ForeignKeyRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<ListUpdate<ConstraintRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_formulas: Option<BTreeMap<String, FormulaRecord>>,

    // Phase 3 / 7: analysis artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information_needs: Option<ListUpdate<InformationNeed>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_queries: Option<ListUpdate<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction_table_names: Option<BTreeMap<String, String>>,

    // Phase 5 / 8: types, dependencies, categoricals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_dependencies: Option<ListUpdate<FunctionalDependency>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_types: Option<BTreeMap<String, BTreeMap<String, TypeInfo>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorical_attributes: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categorical_values: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,

    // Phase 6: DDL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddl_statements: Option<ListUpdate<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ddl_validation_errors: Option<Vec<Value>>,

    // Phase 8 / 9: constraints & strategies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint_specs: Option<ListUpdate<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_strategies: Option<BTreeMap<String, BTreeMap<String, Value>>>,

    // Accumulators (append / union merged)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PipelineIssue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous_answers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    /// Transient metadata keys to remove (fan-in consolidation cleanup).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata_removals: Vec<String>,

    // Loop tracking (union merged per key)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_iterations: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_termination_reasons: BTreeMap<String, String>,
}

impl StateUpdate {
    /// Starts an update for one substep, setting `current_step`.
    pub fn for_step(step_id: impl Into<String>) -> Self {
        Self {
            current_step: Some(step_id.into()),
            ..Default::default()
        }
    }

    /// Records the raw substep output in the `previous_answers` memo.
    pub fn record_answer(&mut self, step_id: impl Into<String>, raw: Value) -> &mut Self {
        self.previous_answers.insert(step_id.into(), raw);
        self
    }

    /// Adds a warning to the accumulating warning list.
    pub fn warn(&mut self, message: impl Into<String>) -> &mut Self {
        self.warnings.push(message.into());
        self
    }

    /// Sets a metadata key.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Names of single-writer fields present in this update.
    ///
    /// Used by the graph runtime to reject unsafe updates from concurrent
    /// cohorts: only append-merged sequences and union-merged maps may be
    /// written concurrently, and sequence replaces count as single-writer.
    pub fn cohort_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        let mut check = |present: bool, name: &'static str| {
            if present {
                violations.push(name);
            }
        };
        check(self.current_step.is_some(), "current_step");
        check(self.phase.is_some(), "phase");
        check(self.domain.is_some(), "domain");
        check(self.has_explicit_domain.is_some(), "has_explicit_domain");
        check(self.entity_cardinalities.is_some(), "entity_cardinalities");
        check(self.relation_cardinalities.is_some(), "relation_cardinalities");
        check(self.attributes.is_some(), "attributes");
        check(self.primary_keys.is_some(), "primary_keys");
        check(self.foreign_keys.is_some(), "foreign_keys");
        check(self.derived_formulas.is_some(), "derived_formulas");
        check(self.junction_table_names.is_some(), "junction_table_names");
        check(self.data_types.is_some(), "data_types");
        check(self.categorical_attributes.is_some(), "categorical_attributes");
        check(self.categorical_values.is_some(), "categorical_values");
        check(self.ddl_validation_errors.is_some(), "ddl_validation_errors");
        check(self.generation_strategies.is_some(), "generation_strategies");

        let replace = |u: Option<bool>, name: &'static str, v: &mut Vec<&'static str>| {
            if u == Some(true) {
                v.push(name);
            }
        };
        replace(self.entities.as_ref().map(ListUpdate::is_replace), "entities (replace)", &mut violations);
        replace(self.relations.as_ref().map(ListUpdate::is_replace), "relations (replace)", &mut violations);
        replace(
            self.constraints.as_ref().map(ListUpdate::is_replace),
            "constraints (replace)",
            &mut violations,
        );
        replace(
            self.information_needs.as_ref().map(ListUpdate::is_replace),
            "information_needs (replace)",
            &mut violations,
        );
        replace(
            self.sql_queries.as_ref().map(ListUpdate::is_replace),
            "sql_queries (replace)",
            &mut violations,
        );
        replace(
            self.functional_dependencies.as_ref().map(ListUpdate::is_replace),
            "functional_dependencies (replace)",
            &mut violations,
        );
        replace(
            self.ddl_statements.as_ref().map(ListUpdate::is_replace),
            "ddl_statements (replace)",
            &mut violations,
        );
        replace(
            self.constraint_specs.as_ref().map(ListUpdate::is_replace),
            "constraint_specs (replace)",
            &mut violations,
        );
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_update_append_and_replace() {
        let mut target = vec![1, 2];
        ListUpdate::Append(vec![3]).apply_to(&mut target);
        assert_eq!(target, vec![1, 2, 3]);
        ListUpdate::Replace(vec![9]).apply_to(&mut target);
        assert_eq!(target, vec![9]);
    }

    #[test]
    fn test_cohort_safe_update_has_no_violations() {
        let mut update = StateUpdate::default();
        update.entities = Some(ListUpdate::Append(vec![EntityRecord::new("Book", "")]));
        update.warn("example warning");
        update.set_metadata("step_1_5_result", Value::Null);
        assert!(update.cohort_violations().is_empty());
    }

    #[test]
    fn test_single_writer_fields_flagged() {
        let mut update = StateUpdate::default();
        update.attributes = Some(BTreeMap::new());
        update.entities = Some(ListUpdate::Replace(vec![]));
        let violations = update.cohort_violations();
        assert!(violations.contains(&"attributes"));
        assert!(violations.contains(&"entities (replace)"));
    }

    #[test]
    fn test_for_step_sets_current_step() {
        let update = StateUpdate::for_step("1.4");
        assert_eq!(update.current_step.as_deref(), Some("1.4"));
    }
}
