// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase Subgraph Builders
//!
//! One module per phase, each building the compiled state machine for that
//! phase: substep adapter nodes, sequential edges, fan-out/fan-in around
//! parallel substeps, and conditional loop edges guarded by the convergence
//! budgets. The topologies are authoritative here; the orchestrator only
//! sequences the phases and runs the gates between them.

pub mod phase1;
pub mod phase2;
pub mod phase3;
pub mod phase4;
pub mod phase5;
pub mod phase6;
pub mod phase7;
pub mod phase8;
pub mod phase9;
pub mod support;

use std::sync::Arc;

use nl2schema_domain::{PhaseId, PipelineError};

use crate::application::EngineContext;
use crate::graph::PhaseGraph;

/// Builds the compiled subgraph for one phase.
pub fn build_phase_graph(
    phase: PhaseId,
    ctx: &Arc<EngineContext>,
) -> Result<PhaseGraph, PipelineError> {
    match phase.value() {
        1 => phase1::build(ctx),
        2 => phase2::build(ctx),
        3 => phase3::build(ctx),
        4 => phase4::build(ctx),
        5 => phase5::build(ctx),
        6 => phase6::build(ctx),
        7 => phase7::build(ctx),
        8 => phase8::build(ctx),
        9 => phase9::build(ctx),
        _ => Err(PipelineError::InvalidConfiguration(format!(
            "No graph builder for phase {}",
            phase
        ))),
    }
}
