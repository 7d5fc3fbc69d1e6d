// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 7: Information Mining
//!
//! `7.1` re-runs information-need identification against the finished schema
//! (same convergence loop as 3.1, its own counters), then `7.2` lowers each
//! need to SQL: generate, validate against the created schema on the
//! in-memory engine, and retry with the validation error as context, up to
//! five attempts per need. Needs that never validate are dropped from
//! `information_needs` — never rewritten, and never allowed to touch the
//! frozen schema — and recorded under `metadata.rejected_information_needs`
//! with their final validation error.

use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;

use nl2schema_domain::{
    InformationNeed, ListUpdate, LoopBudget, PipelineError, PipelineState, StateUpdate,
};

use crate::application::EngineContext;
use crate::graph::{branch_fn, node_fn, NodeFn, PhaseGraph, Target};
use crate::guards::ConvergenceGuard;

use super::phase3::information_needs;
use super::support::str_field;

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let needs_guard = ConvergenceGuard {
        loop_name: "information_mining",
        counter_key: "information_mining_iterations",
        forced_flag_key: "information_mining_forced_passed",
        budget: ctx.config.budgets.information_needs_budget(),
    };

    let mut builder = PhaseGraph::builder("phase_7", ctx.config.superstep_limit);
    builder
        .add_node("information_needs", information_needs(ctx, needs_guard, "7.1"))
        .add_node("sql_validation", sql_validation(ctx))
        .set_entry("information_needs")
        .add_branch(
            "information_needs",
            branch_fn(|state| {
                if state.metadata_bool("information_needs_stable") {
                    "stable"
                } else {
                    "unstable"
                }
            }),
            &[
                ("stable", Target::Node("sql_validation")),
                ("unstable", Target::Node("information_needs")),
            ],
        )
        .add_edge_to_end("sql_validation");
    builder.build()
}

/// Outcome of lowering one information need.
enum Lowering {
    Valid(InformationNeed, Vec<Value>),
    Rejected {
        description: String,
        validation_error: String,
        retry_count: u32,
        attempts: Vec<Value>,
    },
}

async fn lower_need(
    ctx: &EngineContext,
    state: &PipelineState,
    mut need: InformationNeed,
    budget: LoopBudget,
) -> Result<Lowering, PipelineError> {
    let mut previous_error: Option<String> = None;
    let mut attempts: Vec<Value> = Vec::new();

    for attempt in 1..=budget.max_iterations() {
        if attempt > 1 {
            ctx.metrics.record_sql_retry();
        }
        let raw = ctx
            .invoke_substep(
                "7.2",
                json!({
                    "information_need": need,
                    "ddl_statements": state.ddl_statements,
                    "nl_description": state.nl_description,
                    "domain": state.domain,
                    "previous_error": previous_error,
                    "attempt": attempt,
                }),
            )
            .await?;

        let sql = str_field(&raw, "sql_query").unwrap_or_default();
        let validation = if sql.is_empty() {
            nl2schema_domain::services::SqlValidation::failed("empty SQL query generated")
        } else {
            ctx.sql.validate_select(&state.ddl_statements, &sql).await?
        };

        attempts.push(json!({
            "attempt": attempt,
            "sql_query": sql,
            "valid": validation.valid,
            "error": validation.error,
        }));

        if validation.valid {
            need.sql_query = Some(sql);
            need.validation_error = None;
            need.retry_count = attempt - 1;
            return Ok(Lowering::Valid(need, attempts));
        }
        previous_error = validation.error.clone();
        tracing::warn!(
            "Step 7.2: SQL for '{}' failed validation on attempt {}: {:?}",
            need.description,
            attempt,
            validation.error
        );
    }

    Ok(Lowering::Rejected {
        description: need.description,
        validation_error: previous_error.unwrap_or_else(|| "validation failed".to_string()),
        retry_count: budget.max_iterations(),
        attempts,
    })
}

fn sql_validation(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 7.2: SQL Generation and Validation");
            let mut update = StateUpdate::for_step("7.2");

            if state.information_needs.is_empty() {
                tracing::info!("No information needs found, skipping SQL validation");
                update.record_answer("7.2", json!({"results": []}));
                return Ok(update);
            }

            let budget = ctx.config.budgets.sql_retry_budget();
            let mut needs = state.information_needs.clone();
            needs.sort_by(|a, b| a.description.cmp(&b.description));

            let lowerings = join_all(
                needs
                    .into_iter()
                    .map(|need| lower_need(&ctx, &state, need, budget)),
            )
            .await;

            let mut validated: Vec<InformationNeed> = Vec::new();
            let mut rejected: Vec<Value> = Vec::new();
            let mut queries: Vec<Value> = Vec::new();
            let mut answers: Vec<Value> = Vec::new();

            for lowering in lowerings {
                match lowering? {
                    Lowering::Valid(need, attempts) => {
                        queries.push(json!({
                            "description": need.description,
                            "sql_query": need.sql_query,
                            "retry_count": need.retry_count,
                        }));
                        answers.push(json!({
                            "description": need.description,
                            "attempts": attempts,
                        }));
                        validated.push(need);
                    }
                    Lowering::Rejected {
                        description,
                        validation_error,
                        retry_count,
                        attempts,
                    } => {
                        update.warn(format!(
                            "Step 7.2: dropping information need '{}' after {} attempts: {}",
                            description, retry_count, validation_error
                        ));
                        answers.push(json!({
                            "description": description,
                            "attempts": attempts,
                        }));
                        rejected.push(json!({
                            "description": description,
                            "validation_error": validation_error,
                            "retry_count": retry_count,
                        }));
                    }
                }
            }

            // Only needs with valid SQL survive; the schema is never touched.
            update.information_needs = Some(ListUpdate::Replace(validated));
            update.sql_queries = Some(ListUpdate::Append(queries));
            update.set_metadata("rejected_information_needs", json!(rejected));
            update.record_answer("7.2", json!({"results": answers}));
            Ok(update)
        }
    })
}
