// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

// Production code safety enforced via CI
// (lib/bins checked separately from tests - tests may use unwrap/expect)

//! # NL2Schema
//!
//! A natural-language-to-database-schema compiler: free-text domain
//! descriptions in, a fully specified relational schema out — executable
//! DDL, validated query templates, and synthetic-data generation strategies.
//!
//! This crate is the **pipeline orchestration engine**: nine phases of mixed
//! LLM-invoked and deterministic substeps, compiled per phase into a small
//! state machine and wired sequentially with deterministic gates between
//! them.
//!
//! ## Architecture Overview
//!
//! ```text
//! seed(description)
//!   → Phase 1 graph → gate(1)
//!   → Phase 2 graph → gate(2)
//!   → …
//!   → Phase 4 graph → gate(4)   [schema frozen here]
//!   → …
//!   → Phase 9 graph → gate(9)
//!   → final state
//! ```
//!
//! - **State** ([`nl2schema_domain::PipelineState`]): one typed record
//!   threaded through all phases, mutated only by merge-safe partial
//!   updates.
//! - **Substep adapters** ([`phases`]): wrap each substep as a graph node —
//!   narrow input extraction, output normalization, name validation,
//!   partial-update construction.
//! - **Phase graphs** ([`graph`]): sequential edges, conditional loops, and
//!   parallel fan-out with cohort-safe merging.
//! - **Convergence guards** ([`guards`]): bounded loop budgets with
//!   forced-pass semantics; the pipeline always progresses.
//! - **Gates & validators** ([`gates`]): deterministic post-phase
//!   predicates; frozen-schema immutability from Phase 5 on.
//! - **Deterministic compilers** ([`compile`]): ER→relational lowering,
//!   dependency graphs, FK type derivation, DDL emission, strategy
//!   compilation.
//! - **Orchestrator** ([`application`]): `run_all`, `run_up_to`,
//!   `run_phase`, and the streaming `stream_all`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nl2schema::application::{EngineContext, PipelineOrchestrator};
//!
//! let ctx = EngineContext::new(substeps, sql_validator, run_log, config)?;
//! let orchestrator = PipelineOrchestrator::new(ctx);
//! let state = PipelineOrchestrator::seed_state("I need a database for a library…");
//! let result = orchestrator.run_all(state).await?;
//! println!("{} tables", result.relational_schema().unwrap().tables.len());
//! ```
//!
//! ## Determinism
//!
//! The engine is deterministic modulo LLM outputs: fan-out cohorts are
//! scheduled and merged in sorted element order, maps are ordered, and the
//! frozen schema round-trips byte-identically.

pub mod application;
pub mod compile;
pub mod gates;
pub mod graph;
pub mod guards;
pub mod infrastructure;
pub mod phases;

pub use application::{EngineContext, PipelineEvent, PipelineFailure, PipelineOrchestrator};

/// Creates the initial pipeline state for a natural-language description.
pub fn seed_state(nl_description: impl Into<String>) -> nl2schema_domain::PipelineState {
    nl2schema_domain::PipelineState::seed(nl_description)
}
