// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # NL2Schema Domain
//!
//! Pure domain layer for the nl2schema compiler: the pipeline state model
//! with its merge semantics, the schema objects the pipeline accumulates,
//! validated value objects, the domain error hierarchy, schema-anchored
//! validation services, and the async ports the engine consumes.
//!
//! ## Architecture
//!
//! This crate is infrastructure-free by design. It knows nothing about the
//! graph runtime, LLM clients, SQLite, or the CLI; those live in the
//! `nl2schema` engine crate and reach the domain only through the ports
//! defined in [`services`]:
//!
//! - [`services::SubstepService`] / [`services::SubstepRegistry`] — LLM-backed
//!   substeps keyed by dotted step id
//! - [`services::LlmInvoker`] — the black-box model client substeps build on
//! - [`services::SqlSchemaValidator`] — in-memory DDL execution and SELECT
//!   validation
//! - [`services::PipelineRunLog`] — append-only per-step output sink
//!
//! ## Core Concepts
//!
//! - **[`PipelineState`]** — the single typed record threaded through all
//!   nine phases, mutated only via [`StateUpdate`] partial updates.
//! - **Merge semantics** — sequences append (or explicitly replace in
//!   single-writer supersteps), `metadata`/`previous_answers` union keys,
//!   scalars and maps overwrite.
//! - **Frozen schema** — the Phase-4 snapshot in `metadata.frozen_schema`,
//!   validated immutable from Phase 5 on.

pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

pub use entities::{
    AttributeRecord, ColumnDef, ConstraintRecord, EntityCardinality, EntityRecord,
    ForeignKeyRecord, FormulaRecord, FunctionalDependency, InformationNeed, ListUpdate, Metadata,
    PipelineIssue, PipelineState, RelationCardinality, RelationRecord, RelationalSchema, StateUpdate,
    TableDef, TableForeignKey, TypeClass, TypeInfo,
};
pub use error::PipelineError;
pub use value_objects::{LoopBudget, PhaseId, RunId, StepId};
