// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Entities
//!
//! The pipeline state record, its partial-update type with merge semantics,
//! and the schema objects (entities, relations, attributes, keys,
//! constraints) the state accumulates across phases.

pub mod pipeline_state;
pub mod relational_schema;
pub mod schema_objects;
pub mod state_update;

pub use pipeline_state::{Metadata, PipelineIssue, PipelineState};
pub use relational_schema::{ColumnDef, RelationalSchema, TableDef, TableForeignKey};
pub use schema_objects::{
    AttributeRecord, ConstraintRecord, EntityCardinality, EntityRecord, ForeignKeyRecord,
    FormulaRecord, FunctionalDependency, InformationNeed, RelationCardinality, RelationRecord,
    TypeClass, TypeInfo,
};
pub use state_update::{ListUpdate, StateUpdate};
