// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Schema Validator
//!
//! Implementation of the `SqlSchemaValidator` port on SQLite. Phase 6 uses
//! it to execute the compiled DDL (into the run directory when configured,
//! otherwise an in-memory database); Phase 7 uses it to validate generated
//! SELECT statements by `EXPLAIN QUERY PLAN` preparation against an empty
//! schema.
//!
//! Databases are scoped per call and disposed when the call returns; the
//! validator itself is stateless and cheap to share.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

use nl2schema_domain::services::{
    SchemaCreationReport, SqlSchemaValidator, SqlValidation, StatementError,
};
use nl2schema_domain::PipelineError;

/// Stateless SQLite-backed schema validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteSchemaValidator;

impl SqliteSchemaValidator {
    pub fn new() -> Self {
        Self
    }

    async fn connect(&self, database_path: Option<&PathBuf>) -> Result<SqlitePool, PipelineError> {
        let options = match database_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
            }
            None => SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| PipelineError::DatabaseError(e.to_string()))?,
        };
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| PipelineError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl SqlSchemaValidator for SqliteSchemaValidator {
    async fn create_schema(
        &self,
        ddl_statements: &[String],
        database_path: Option<PathBuf>,
    ) -> Result<SchemaCreationReport, PipelineError> {
        let pool = self.connect(database_path.as_ref()).await?;

        let mut statement_errors = Vec::new();
        for (index, statement) in ddl_statements.iter().enumerate() {
            if statement.trim().is_empty() {
                continue;
            }
            if let Err(err) = sqlx::query(statement).execute(&pool).await {
                statement_errors.push(StatementError {
                    index,
                    message: err.to_string(),
                });
            }
        }

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| PipelineError::DatabaseError(e.to_string()))?;
        let tables_created: Vec<String> = rows.iter().map(|row| row.get::<String, _>(0)).collect();

        pool.close().await;

        Ok(SchemaCreationReport {
            success: statement_errors.is_empty(),
            tables_created,
            statement_errors,
        })
    }

    async fn validate_select(
        &self,
        ddl_statements: &[String],
        query: &str,
    ) -> Result<SqlValidation, PipelineError> {
        let pool = self.connect(None).await?;

        // Tables are created empty; a failing CREATE only narrows what the
        // SELECT can reference, so creation errors are logged, not fatal.
        for statement in ddl_statements {
            if statement.trim().is_empty() {
                continue;
            }
            if let Err(err) = sqlx::query(statement).execute(&pool).await {
                tracing::warn!("Error creating table for SQL validation: {}", err);
            }
        }

        let trimmed = query.trim().trim_end_matches(';');
        if trimmed.is_empty() {
            pool.close().await;
            return Ok(SqlValidation::failed("Empty SQL query"));
        }

        let explain = format!("EXPLAIN QUERY PLAN {}", trimmed);
        let result = sqlx::query(&explain).fetch_all(&pool).await;
        pool.close().await;

        match result {
            Ok(_) => Ok(SqlValidation::ok()),
            Err(err) => Ok(SqlValidation::failed(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library_ddl() -> Vec<String> {
        vec![
            "CREATE TABLE Book (book_id INTEGER NOT NULL, title VARCHAR(255), PRIMARY KEY (book_id))".to_string(),
            "CREATE TABLE Member (member_id INTEGER NOT NULL, PRIMARY KEY (member_id))".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_create_schema_in_memory() {
        let validator = SqliteSchemaValidator::new();
        let report = validator.create_schema(&library_ddl(), None).await.unwrap();
        assert!(report.success);
        assert_eq!(report.tables_created, vec!["Book", "Member"]);
    }

    #[tokio::test]
    async fn test_create_schema_reports_statement_errors() {
        let validator = SqliteSchemaValidator::new();
        let mut ddl = library_ddl();
        ddl.push("CREATE TABLE Broken (".to_string());
        let report = validator.create_schema(&ddl, None).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.statement_errors.len(), 1);
        assert_eq!(report.statement_errors[0].index, 2);
        assert_eq!(report.tables_created.len(), 2);
    }

    #[tokio::test]
    async fn test_create_schema_persists_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db");
        let validator = SqliteSchemaValidator::new();
        let report = validator
            .create_schema(&library_ddl(), Some(path.clone()))
            .await
            .unwrap();
        assert!(report.success);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_validate_select_accepts_valid_query() {
        let validator = SqliteSchemaValidator::new();
        let validation = validator
            .validate_select(&library_ddl(), "SELECT title FROM Book WHERE book_id = 1")
            .await
            .unwrap();
        assert!(validation.valid, "{:?}", validation.error);
    }

    #[tokio::test]
    async fn test_validate_select_rejects_unknown_column() {
        let validator = SqliteSchemaValidator::new();
        let validation = validator
            .validate_select(&library_ddl(), "SELECT isbn FROM Book")
            .await
            .unwrap();
        assert!(!validation.valid);
        assert!(validation.error.unwrap().contains("isbn"));
    }

    #[tokio::test]
    async fn test_validate_select_rejects_empty_query() {
        let validator = SqliteSchemaValidator::new();
        let validation = validator.validate_select(&library_ddl(), "  ").await.unwrap();
        assert!(!validation.valid);
    }
}
