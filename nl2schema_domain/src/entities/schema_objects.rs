// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Schema Objects
//!
//! Records accumulated on the pipeline state: discovered entities and
//! relations, per-entity attributes, keys, constraints, functional
//! dependencies, derived-attribute formulas, information needs, and SQL type
//! assignments.
//!
//! ## Design Notes
//!
//! These are deliberately *gradually typed*: the fields every phase relies on
//! are first-class struct fields, while substep-specific extras ride along in
//! a flattened `extra` map. Substeps emit either structured records or plain
//! maps; the adapter normalizes to this canonical form at the state boundary
//! and downstream readers assume it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A discovered entity (future table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Expected instance count class ("low", "medium", "high"), from 1.8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<String>,
    /// Table role ("core", "lookup", "transactional"), from 1.8.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_type: Option<String>,
}

impl EntityRecord {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            cardinality: None,
            table_type: None,
        }
    }
}

/// A discovered relationship between two or more entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Names of the participating entities, in declared order.
    pub entities: Vec<String>,
    /// Relationship class: "one-to-one", "one-to-many", "many-to-many", …
    #[serde(rename = "type", default)]
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
    /// Number of participating entities; binary relations have arity 2.
    #[serde(default)]
    pub arity: usize,
    /// Per-entity cardinality ("1" or "N"), merged in by step 1.11.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_cardinalities: Option<BTreeMap<String, String>>,
    /// Per-entity participation ("total" or "partial"), merged in by 1.11.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_participations: Option<BTreeMap<String, String>>,
}

impl RelationRecord {
    pub fn new(entities: Vec<String>, relation_type: impl Into<String>, description: impl Into<String>) -> Self {
        let arity = entities.len();
        Self {
            entities,
            relation_type: relation_type.into(),
            description: description.into(),
            arity,
            entity_cardinalities: None,
            entity_participations: None,
        }
    }

    /// Stable key for this relation: the sorted entity names joined by `+`.
    pub fn key(&self) -> String {
        let mut names: Vec<&str> = self.entities.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.join("+")
    }

    /// True when every participating side has cardinality "N" (or the
    /// declared type says many-to-many), or the relation is n-ary. Such
    /// relations compile to junction tables.
    pub fn needs_junction_table(&self) -> bool {
        if self.entities.len() > 2 {
            return true;
        }
        if let Some(cards) = &self.entity_cardinalities {
            if self.entities.len() == 2 {
                return self
                    .entities
                    .iter()
                    .all(|e| cards.get(e).map(|c| c.eq_ignore_ascii_case("n")).unwrap_or(false));
            }
        }
        matches!(
            self.relation_type.to_ascii_lowercase().as_str(),
            "many-to-many" | "many_to_many" | "m:n" | "n:m"
        )
    }

    /// Cardinality assigned to `entity`, defaulting to "N" when unknown.
    pub fn cardinality_of(&self, entity: &str) -> String {
        self.entity_cardinalities
            .as_ref()
            .and_then(|m| m.get(entity))
            .cloned()
            .unwrap_or_else(|| "N".to_string())
    }

    /// True when `entity` participates totally in this relation.
    pub fn is_total_participation(&self, entity: &str) -> bool {
        self.entity_participations
            .as_ref()
            .and_then(|m| m.get(entity))
            .map(|p| p.eq_ignore_ascii_case("total"))
            .unwrap_or(false)
    }
}

/// Per-entity cardinality estimate from step 1.8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EntityCardinality {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardinality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_type: Option<String>,
}

/// Per-relation cardinality and participation info from step 1.11,
/// keyed by [`RelationRecord::key`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RelationCardinality {
    #[serde(default)]
    pub entity_cardinalities: BTreeMap<String, String>,
    #[serde(default)]
    pub entity_participations: BTreeMap<String, String>,
}

/// An attribute of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Loose type hint from discovery ("text", "timestamp", "money", …);
    /// the authoritative SQL type lives in `data_types`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl AttributeRecord {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            type_hint: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }
}

/// A foreign key between two entities, attribute lists positionally aligned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRecord {
    pub from_entity: String,
    pub from_attributes: Vec<String>,
    pub to_entity: String,
    pub to_attributes: Vec<String>,
}

/// A detected integrity constraint (unique, check, range, categorical, …).
///
/// Phase 8 progressively enriches constraints in place: scope analysis (8.5),
/// enforcement strategy (8.6), and conflict resolution (8.7) each rewrite the
/// constraint list with merged fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConstraintRecord {
    #[serde(rename = "type", default)]
    pub constraint_type: String,
    #[serde(default)]
    pub entity: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_level: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ConstraintRecord {
    /// Signature used by the duplication detector: type, entity, attributes,
    /// and a condition prefix.
    pub fn signature(&self) -> String {
        let condition = self.condition.as_deref().unwrap_or("");
        let prefix: String = condition.chars().take(50).collect();
        format!(
            "{}|{}|{}|{}",
            self.constraint_type,
            self.entity,
            self.attributes.join(","),
            prefix
        )
    }
}

/// A functional dependency within one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalDependency {
    #[serde(default)]
    pub table: String,
    pub determinants: Vec<String>,
    pub dependents: Vec<String>,
}

impl FunctionalDependency {
    /// Signature used by the duplication detector: sorted determinants and
    /// dependents plus the table name.
    pub fn signature(&self) -> String {
        let mut determinants = self.determinants.clone();
        determinants.sort_unstable();
        let mut dependents = self.dependents.clone();
        dependents.sort_unstable();
        format!("{}|{}|{}", self.table, determinants.join(","), dependents.join(","))
    }
}

/// A natural-language query requirement, lowered to validated SQL in Phase 7.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationNeed {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl InformationNeed {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            sql_query: None,
            validation_error: None,
            retry_count: 0,
            extra: BTreeMap::new(),
        }
    }
}

/// A derived-attribute formula, keyed on the state by `"Entity.attr"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaRecord {
    pub formula: String,
    /// Base attribute names within the same entity.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// SQL type assignment for one column, produced in Phase 5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TypeInfo {
    /// Base SQL type name ("INTEGER", "VARCHAR", "DECIMAL", "TIMESTAMP", …).
    #[serde(rename = "type")]
    pub sql_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    /// Nullability verdict from step 5.5; `None` until assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

impl TypeInfo {
    pub fn named(sql_type: impl Into<String>) -> Self {
        Self {
            sql_type: sql_type.into(),
            ..Default::default()
        }
    }

    /// Renders the column type as it appears in DDL, applying the default
    /// VARCHAR size and DECIMAL precision/scale formatting.
    pub fn render(&self) -> String {
        let upper = self.sql_type.to_ascii_uppercase();
        match upper.as_str() {
            "VARCHAR" | "CHAR" => {
                format!("{}({})", self.sql_type, self.size.unwrap_or(255))
            }
            "DECIMAL" | "NUMERIC" => match (self.precision, self.scale) {
                (Some(p), Some(s)) => format!("{}({},{})", self.sql_type, p, s),
                (Some(p), None) => format!("{}({})", self.sql_type, p),
                _ => self.sql_type.clone(),
            },
            _ => self.sql_type.clone(),
        }
    }

    /// Coarse classification used by the Phase 9 strategy grouping.
    pub fn classify(&self) -> TypeClass {
        let t = self.sql_type.to_ascii_lowercase();
        const NUMERIC: [&str; 8] = [
            "int", "integer", "bigint", "smallint", "decimal", "numeric", "real", "double",
        ];
        if NUMERIC.iter().any(|n| t.starts_with(n)) || t.contains("float") || t.contains("number") {
            TypeClass::Numerical
        } else if t.starts_with("bool") {
            TypeClass::Boolean
        } else {
            TypeClass::Text
        }
    }
}

/// Coarse SQL type classes for generation-strategy grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Numerical,
    Boolean,
    Text,
}
