// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Master Orchestrator
//!
//! Sequences the nine phase subgraphs: transition validators before each
//! phase from Phase 2 on, the frozen-schema check before each phase past
//! Phase 4, the phase graph itself, the deterministic phase gate after it,
//! and the list-duplication detector over the merged result. Entry points:
//! [`PipelineOrchestrator::run_all`], [`run_up_to`](PipelineOrchestrator::run_up_to),
//! [`run_phase`](PipelineOrchestrator::run_phase), and the streaming
//! [`stream_all`](PipelineOrchestrator::stream_all).
//!
//! On terminal failure the orchestrator yields the last successful state
//! alongside the error, so callers can inspect (or checkpoint) what the
//! pipeline had before it stopped.

use futures::Stream;
use std::sync::Arc;

use nl2schema_domain::services::{
    validate_frozen_schema_immutability, validate_no_list_duplication, validate_phase_transition,
    validate_state_consistency,
};
use nl2schema_domain::{PhaseId, PipelineError, PipelineState, StateUpdate};

use crate::gates::check_phase_gate;
use crate::graph::{StepEvent, StepObserver};
use crate::phases::build_phase_graph;

use super::context::EngineContext;

/// A terminal pipeline failure: the error plus the last successful state.
#[derive(Debug)]
pub struct PipelineFailure {
    pub state: Box<PipelineState>,
    pub error: PipelineError,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pipeline failed at phase {} (step {}): {}",
            self.state.phase, self.state.current_step, self.error
        )
    }
}

impl std::error::Error for PipelineFailure {}

/// Events emitted by [`PipelineOrchestrator::stream_all`].
#[derive(Debug)]
pub enum PipelineEvent {
    /// One merged substep update (phase boundaries appear as synthetic
    /// `phase_<n>` steps carrying only the phase number).
    Step { step_id: String, update: StateUpdate },
    Completed(Box<PipelineState>),
    Failed(PipelineFailure),
}

/// The engine façade: owns the wired context and runs phases.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    ctx: Arc<EngineContext>,
}

impl PipelineOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Creates the initial state for a natural-language description.
    pub fn seed_state(nl_description: impl Into<String>) -> PipelineState {
        PipelineState::seed(nl_description)
    }

    /// Runs all nine phases.
    pub async fn run_all(&self, state: PipelineState) -> Result<PipelineState, PipelineFailure> {
        self.run_up_to(state, PhaseId::FINAL).await
    }

    /// Runs phases 1 through `max_phase` inclusive.
    pub async fn run_up_to(
        &self,
        mut state: PipelineState,
        max_phase: PhaseId,
    ) -> Result<PipelineState, PipelineFailure> {
        for phase in max_phase.up_to() {
            state = self.execute_phase(state, phase, None).await?;
        }
        Ok(state)
    }

    /// Runs a single phase against a (possibly checkpointed) state.
    pub async fn run_phase(
        &self,
        state: PipelineState,
        phase: PhaseId,
    ) -> Result<PipelineState, PipelineFailure> {
        self.execute_phase(state, phase, None).await
    }

    /// Runs all phases, streaming `(step_id, partial_update)` events as they
    /// merge, ending with `Completed` or `Failed`.
    /// Must be called from within a Tokio runtime: the run is spawned as a
    /// task immediately and the returned stream observes it.
    pub fn stream_all(
        &self,
        state: PipelineState,
    ) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let orchestrator = self.clone();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<StepEvent>();
        let run = tokio::spawn(orchestrator.run_streaming(state, tx));

        async_stream::stream! {
            // The sender drops when the run finishes, ending this loop.
            while let Some(StepEvent { step_id, update }) = rx.recv().await {
                yield PipelineEvent::Step { step_id, update };
            }
            match run.await {
                Ok(Ok(state)) => yield PipelineEvent::Completed(Box::new(state)),
                Ok(Err(failure)) => yield PipelineEvent::Failed(failure),
                Err(join_error) => {
                    yield PipelineEvent::Failed(PipelineFailure {
                        state: Box::new(PipelineState::seed(String::new())),
                        error: PipelineError::InternalError(format!(
                            "pipeline task aborted: {}",
                            join_error
                        )),
                    });
                }
            }
        }
    }

    async fn run_streaming(
        self,
        mut state: PipelineState,
        observer: StepObserver,
    ) -> Result<PipelineState, PipelineFailure> {
        for phase in PhaseId::FINAL.up_to() {
            state = self.execute_phase(state, phase, Some(&observer)).await?;
        }
        Ok(state)
    }

    async fn execute_phase(
        &self,
        mut state: PipelineState,
        phase: PhaseId,
        observer: Option<&StepObserver>,
    ) -> Result<PipelineState, PipelineFailure> {
        tracing::info!("[engine] Executing Phase {}: {}", phase, phase.title());
        self.ctx.metrics.set_current_phase(phase.value());

        // Transition validators: non-fatal, warnings accumulate.
        if phase.value() >= 2 {
            let report = validate_phase_transition(phase.value() - 1, phase.value(), &state);
            if !report.is_valid() {
                tracing::warn!(
                    "Phase {}→{} transition validation issues: {:?}. Warnings: {:?}",
                    phase.value() - 1,
                    phase.value(),
                    report.errors,
                    report.warnings
                );
            }
            state.warnings.extend(report.errors);
            state.warnings.extend(report.warnings);
        }

        // Frozen-schema boundary: absence past Phase 4 is terminal.
        if phase.is_post_freeze() {
            match validate_frozen_schema_immutability(phase.value(), &state, None) {
                Ok(report) => state.warnings.extend(report.warnings),
                Err(error) => {
                    tracing::error!("Phase {}: frozen schema validation failed: {}", phase, error);
                    return Err(PipelineFailure {
                        state: Box::new(state),
                        error,
                    });
                }
            }
            // Cross-field consistency (keys, references) should hold once
            // the schema is frozen; violations warn, they do not halt.
            for issue in validate_state_consistency(&state) {
                tracing::warn!("Phase {}: state consistency issue: {}", phase, issue);
                state.warnings.push(issue);
            }
        }

        let graph = match build_phase_graph(phase, &self.ctx) {
            Ok(graph) => graph,
            Err(error) => {
                return Err(PipelineFailure {
                    state: Box::new(state),
                    error,
                })
            }
        };

        let before = Box::new(state.clone());
        let mut result = match graph.run(state, observer).await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!("Phase {} failed: {}", phase, error);
                return Err(PipelineFailure { state: before, error });
            }
        };
        result.phase = phase.value();

        if let Err(error) = check_phase_gate(phase, &result) {
            tracing::error!("Phase {} gate failed: {}", phase, error);
            return Err(PipelineFailure {
                state: Box::new(result),
                error,
            });
        }

        // Belt-and-braces duplication check over the merged result.
        let duplication_issues = validate_no_list_duplication(&result);
        if !duplication_issues.is_empty() {
            tracing::warn!(
                "Phase {}: duplication detector flagged {} issue(s)",
                phase,
                duplication_issues.len()
            );
            result.warnings.extend(duplication_issues);
        }
        self.ctx.metrics.record_warnings(result.warnings.len());

        tracing::info!("[engine] Phase {} complete (step {})", phase, result.current_step);
        if let Some(observer) = observer {
            let _ = observer.send(StepEvent {
                step_id: format!("phase_{}", phase.value()),
                update: StateUpdate {
                    phase: Some(phase.value()),
                    ..Default::default()
                },
            });
        }
        Ok(result)
    }
}
