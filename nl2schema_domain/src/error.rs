// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error System
//!
//! Hierarchical error type for the nl2schema pipeline domain. Errors are
//! organized by failure category so the orchestrator can decide what is
//! terminal (substep exceptions, gate failures, missing frozen schema) and
//! what merely accumulates as warnings on the state.
//!
//! ## Error Categories
//!
//! - **Configuration**: malformed engine configuration, unknown substeps
//! - **Execution**: substep failures, gate failures, merge conflicts
//! - **Schema**: frozen-schema violations, schema validation failures
//! - **Infrastructure**: I/O, database, serialization failures
//!
//! All variants carry human-readable messages; the engine never matches on
//! message text, only on variants.

use thiserror::Error;

/// Domain-specific errors for the schema-compilation pipeline.
///
/// Each variant represents a distinct failure mode. Variants that abort the
/// pipeline (`SubstepFailed`, `GateFailed`, `FrozenSchemaMissing`,
/// `MergeConflict`) are raised by the engine; the remaining variants are
/// produced by collaborators and normalized at the port boundary.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A substep body raised; aborts the owning phase.
    #[error("Substep {step} failed: {message}")]
    SubstepFailed { step: String, message: String },

    /// A deterministic post-phase gate predicate failed; terminal.
    #[error("Phase {phase} gate failed: {message}")]
    GateFailed { phase: u8, message: String },

    /// `metadata.frozen_schema` was absent at the start of a phase > 4.
    #[error("Phase {phase}: no frozen schema found; Phase 4 must complete before Phase {phase}")]
    FrozenSchemaMissing { phase: u8 },

    /// A concurrent cohort update touched a single-writer field.
    #[error("Merge conflict: {0}")]
    MergeConflict(String),

    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("LLM invocation error: {0}")]
    LlmError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// Returns the error category as a static string for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::InvalidConfiguration(_) => "configuration",
            PipelineError::SubstepFailed { .. } => "substep",
            PipelineError::GateFailed { .. } => "gate",
            PipelineError::FrozenSchemaMissing { .. } => "frozen_schema",
            PipelineError::MergeConflict(_) => "merge",
            PipelineError::SchemaValidation(_) | PipelineError::ValidationError(_) => "validation",
            PipelineError::LlmError(_) => "llm",
            PipelineError::DatabaseError(_) => "database",
            PipelineError::SerializationError(_) => "serialization",
            PipelineError::IoError(_) => "io",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::InternalError(_) => "internal",
        }
    }

    /// True for failures that must abort the pipeline run.
    ///
    /// Transition warnings, loop exhaustion, and per-element fan-out errors
    /// never surface as `PipelineError`; they accumulate on the state. Any
    /// error that reaches the orchestrator is terminal by construction, so
    /// this is mostly documentation for callers embedding the engine.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PipelineError::ValidationError(_))
    }

    /// Wraps a substep failure with its originating step id.
    pub fn substep(step: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::SubstepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Wraps a gate failure with its phase number.
    pub fn gate(phase: u8, message: impl Into<String>) -> Self {
        PipelineError::GateFailed {
            phase,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PipelineError::substep("1.4", "boom").category(), "substep");
        assert_eq!(PipelineError::gate(4, "no tables").category(), "gate");
        assert_eq!(PipelineError::FrozenSchemaMissing { phase: 5 }.category(), "frozen_schema");
        assert_eq!(
            PipelineError::MergeConflict("attributes written concurrently".into()).category(),
            "merge"
        );
    }

    #[test]
    fn test_error_display_includes_step() {
        let err = PipelineError::substep("7.2", "validation exhausted");
        assert!(err.to_string().contains("7.2"));
        assert!(err.to_string().contains("validation exhausted"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: PipelineError = io.into();
        assert_eq!(err.category(), "io");
    }
}
