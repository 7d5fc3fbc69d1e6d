// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQL Validation Port
//!
//! Port for the in-memory SQL engine used in Phases 6 and 7: create tables
//! from DDL strings (no rows), and validate a SELECT by query-plan
//! preparation. The engine scope is per phase invocation; implementations
//! dispose of their database once the call returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PipelineError;

/// Outcome of validating one SELECT statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SqlValidation {
    pub fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Failure executing one DDL statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementError {
    /// Index into the submitted DDL list.
    pub index: usize,
    pub message: String,
}

/// Result of executing a DDL batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaCreationReport {
    pub success: bool,
    pub tables_created: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub statement_errors: Vec<StatementError>,
}

/// Port for syntactic schema validation against a real (in-memory) SQL
/// engine.
#[async_trait]
pub trait SqlSchemaValidator: Send + Sync {
    /// Executes the DDL statements against a fresh database. When
    /// `database_path` is given the database persists there (Phase 6 places
    /// it under the run directory); otherwise the database is in-memory and
    /// discarded.
    async fn create_schema(
        &self,
        ddl_statements: &[String],
        database_path: Option<PathBuf>,
    ) -> Result<SchemaCreationReport, PipelineError>;

    /// Validates that `query` is preparable against a schema created from
    /// `ddl_statements` (empty tables, plan-level check only).
    async fn validate_select(
        &self,
        ddl_statements: &[String],
        query: &str,
    ) -> Result<SqlValidation, PipelineError>;
}
