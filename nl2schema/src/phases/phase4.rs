// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase 4: Relational Schema Compilation
//!
//! A single deterministic node (4.1) that recompiles the canonical
//! relational schema from the ER design and **freezes** it: a deep copy of
//! the schema lands in `metadata.frozen_schema`, which every later phase
//! treats as immutable. Recompiling (rather than reusing 3.5's output)
//! makes the freeze independent of whatever Phase 3's re-execution path did
//! to the attribute map afterwards.

use serde_json::json;
use std::sync::Arc;

use nl2schema_domain::{PipelineError, PipelineState, StateUpdate};

use crate::application::EngineContext;
use crate::compile::er_design::compile_er_design;
use crate::compile::relational::compile_relational_schema;
use crate::graph::{node_fn, NodeFn, PhaseGraph};

pub fn build(ctx: &Arc<EngineContext>) -> Result<PhaseGraph, PipelineError> {
    let mut builder = PhaseGraph::builder("phase_4", ctx.config.superstep_limit);
    builder
        .add_node("relational_schema", relational_schema(ctx))
        .set_entry("relational_schema")
        .add_edge_to_end("relational_schema");
    builder.build()
}

fn relational_schema(ctx: &Arc<EngineContext>) -> NodeFn {
    let ctx = Arc::clone(ctx);
    node_fn(move |state: PipelineState| {
        let _ctx = Arc::clone(&ctx);
        async move {
            tracing::info!("[engine] Executing Step 4.1: Relational Schema Compilation");
            let design = compile_er_design(&state);
            let compilation = compile_relational_schema(&design, &state);
            let schema_value = serde_json::to_value(&compilation.schema)?;

            let mut update = StateUpdate::for_step("4.1");
            for warning in compilation.warnings {
                update.warn(warning);
            }
            update.set_metadata("relational_schema", schema_value.clone());
            // The frozen snapshot: identical bytes, separate value.
            update.set_metadata("frozen_schema", schema_value.clone());
            update.record_answer("4.1", json!({"relational_schema": schema_value}));
            Ok(update)
        }
    })
}
