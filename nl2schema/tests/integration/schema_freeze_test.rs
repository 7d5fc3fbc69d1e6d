// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Frozen-Schema Boundary Tests
//!
//! The Phase-4 snapshot must survive phases 5 through 9 byte-identically,
//! and a state that reaches a post-freeze phase without the snapshot is a
//! terminal error.

use crate::common::{library_description, library_fixture, orchestrator_with};

use nl2schema::application::PipelineOrchestrator;
use nl2schema_domain::{PhaseId, PipelineError};

#[tokio::test]
async fn test_frozen_schema_immutable_across_later_phases() {
    let orchestrator = orchestrator_with(&library_fixture());
    let mut state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state(library_description()),
            PhaseId::new(4).unwrap(),
        )
        .await
        .expect("phases 1-4 should complete");

    let frozen_at_4 = serde_json::to_string(
        state.frozen_schema_raw().expect("schema frozen at phase 4"),
    )
    .unwrap();

    for phase in 5..=9u8 {
        state = orchestrator
            .run_phase(state, PhaseId::new(phase).unwrap())
            .await
            .unwrap_or_else(|failure| panic!("phase {} failed: {}", phase, failure));
        let frozen_now =
            serde_json::to_string(state.frozen_schema_raw().expect("snapshot present")).unwrap();
        assert_eq!(frozen_now, frozen_at_4, "frozen schema changed in phase {}", phase);
    }
}

#[tokio::test]
async fn test_missing_frozen_schema_is_terminal_past_phase_4() {
    let orchestrator = orchestrator_with(&library_fixture());
    // Phases 1-3 only: no freeze has happened yet.
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state(library_description()),
            PhaseId::new(3).unwrap(),
        )
        .await
        .expect("phases 1-3 should complete");

    let failure = orchestrator
        .run_phase(state, PhaseId::new(5).unwrap())
        .await
        .expect_err("phase 5 without a frozen schema must fail");
    assert!(matches!(
        failure.error,
        PipelineError::FrozenSchemaMissing { phase: 5 }
    ));
    // The failure carries the last successful state for inspection.
    assert_eq!(failure.state.phase, 3);
}

#[tokio::test]
async fn test_frozen_schema_matches_phase_4_relational_schema() {
    let orchestrator = orchestrator_with(&library_fixture());
    let state = orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state(library_description()),
            PhaseId::new(4).unwrap(),
        )
        .await
        .expect("phases 1-4 should complete");

    let frozen = state.frozen_schema().expect("frozen schema");
    let relational = state.relational_schema().expect("relational schema");
    assert_eq!(frozen, relational);
    assert!(!frozen.is_empty());
}
