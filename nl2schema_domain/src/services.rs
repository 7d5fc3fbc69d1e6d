// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Services
//!
//! Pure validation and naming services (similarity suggestions,
//! schema-anchored name validation, frozen-schema checks, state consistency
//! and duplication detection) plus the async infrastructure ports the engine
//! consumes (substep invocation, LLM invocation, SQL validation, run
//! logging).
//!
//! Pure services are synchronous; ports are async traits because they wrap
//! I/O-bound collaborators.

pub mod naming;
pub mod run_log;
pub mod schema_freeze;
pub mod schema_validation;
pub mod similarity;
pub mod sql_validation;
pub mod state_validation;
pub mod substep;

pub use run_log::{NullRunLog, PipelineRunLog};
pub use schema_freeze::{check_frozen_schema_access, validate_frozen_schema_immutability};
pub use schema_validation::{
    validate_attribute_names, validate_entity_attribute_consistency, validate_entity_names,
    validate_phase_transition, ValidationReport,
};
pub use similarity::{suggest_name, suggest_name_candidates, NameSuggestion};
pub use sql_validation::{SchemaCreationReport, SqlSchemaValidator, SqlValidation, StatementError};
pub use state_validation::{validate_no_list_duplication, validate_state_consistency};
pub use substep::{LlmInvoker, LlmRequest, SubstepRegistry, SubstepService};
