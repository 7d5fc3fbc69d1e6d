// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 6: DDL Generation & Schema Creation
//!
//! All deterministic: `6.1` compiles `CREATE TABLE` statements from the
//! frozen schema and the Phase-5 types (breaking FK cycles with recorded
//! warnings), `6.2` validates them (static checks plus a dry-run against a
//! throwaway in-memory engine), and `6.3` creates the schema for real —
//! under the configured run directory when one is set, otherwise a temp
//! path.

use serde_json::{json, Value};
use std::sync::Arc;

use nl2schema_domain::{ListUpdate, PipelineError, PipelineIssue, PipelineState, StateUpdate};

use crate::application::EngineContext;
use crate::compile::ddl::{compile_ddl, validate_ddl_statically};
use crate::graph::{node_fn, NodeFn, PhaseGraph};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let mut builder = PhaseGraph::builder("phase_6", ctx.config.superstep_limit);
    builder
        .add_node("ddl_compilation", ddl_compilation(ctx))
        .add_node("ddl_validation", ddl_validation(ctx))
        .add_node("schema_creation", schema_creation(ctx))
        .set_entry("ddl_compilation")
        .add_edge("ddl_compilation", "ddl_validation")
        .add_edge("ddl_validation", "schema_creation")
        .add_edge_to_end("schema_creation");
    builder.build()
}

fn ddl_compilation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 6.1: DDL Compilation");
            let Some(schema) = state.relational_schema() else {
                return Err(PipelineError::substep(
                    "6.1",
                    "no relational schema available for DDL compilation",
                ));
            };

            let output = compile_ddl(&schema, &state.data_types, None);

            let mut update = StateUpdate::for_step("6.1");
            for warning in &output.warnings {
                update.warn(warning.clone());
            }
            if !output.broken_foreign_keys.is_empty() {
                update.set_metadata(
                    "broken_foreign_keys",
                    serde_json::to_value(&output.broken_foreign_keys)?,
                );
            }
            update.record_answer("6.1", json!({"ddl_statements": output.statements}));
            update.ddl_statements = Some(ListUpdate::Replace(output.statements));
            Ok(update)
        }
    })
}

fn ddl_validation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 6.2: DDL Validation");

            let mut errors: Vec<Value> = validate_ddl_statically(&state.ddl_statements)
                .into_iter()
                .map(|message| json!({"kind": "static", "message": message}))
                .collect();

            // Dry run against a throwaway in-memory database.
            let report = ctx.sql.create_schema(&state.ddl_statements, None).await?;
            for statement_error in &report.statement_errors {
                errors.push(json!({
                    "kind": "execution",
                    "statement_index": statement_error.index,
                    "message": statement_error.message,
                }));
            }

            let passed = errors.is_empty();
            let mut update = StateUpdate::for_step("6.2");
            if !passed {
                update.warn(format!("Step 6.2: DDL validation found {} error(s)", errors.len()));
                for error in &errors {
                    update.errors.push(PipelineIssue::new(
                        "6.2",
                        error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown DDL validation error"),
                    ));
                }
            }
            update.ddl_validation_errors = Some(errors.clone());
            update.set_metadata("ddl_validation_passed", json!(passed));
            update.record_answer("6.2", json!({"validation_passed": passed, "errors": errors}));
            Ok(update)
        }
    })
}

fn schema_creation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 6.3: Schema Creation");

            let database_path = match ctx.config.schema_database_path() {
                Some(path) => path,
                // Unique per run: concurrent pipelines must not share a file.
                None => std::env::temp_dir()
                    .join(format!("nl2schema_schema_{}.db", nl2schema_domain::RunId::new())),
            };
            // A stale database from a previous run would poison CREATEs.
            if database_path.exists() {
                let _ = std::fs::remove_file(&database_path);
            }

            let report = ctx
                .sql
                .create_schema(&state.ddl_statements, Some(database_path.clone()))
                .await?;

            let mut update = StateUpdate::for_step("6.3");
            for statement_error in &report.statement_errors {
                update.warn(format!(
                    "Step 6.3: statement {} failed: {}",
                    statement_error.index, statement_error.message
                ));
            }
            update.set_metadata("database_path", json!(database_path.to_string_lossy()));
            update.set_metadata("schema_created", json!(report.success));
            update.set_metadata("tables_created", json!(report.tables_created));
            update.record_answer("6.3", serde_json::to_value(&report)?);
            Ok(update)
        }
    })
}
