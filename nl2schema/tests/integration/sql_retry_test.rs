// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQL Retry Tests (Phase 7)
//!
//! An information need whose first SQL generations fail validation: the
//! adapter retries with the validation error as context, up to five
//! attempts, and drops the need (recording the error) when the budget runs
//! out. The schema is never modified on either path.

use crate::common::{library_description, library_fixture, orchestrator_with};

use nl2schema::application::PipelineOrchestrator;
use nl2schema_domain::{PhaseId, PipelineState};
use serde_json::{json, Value};

/// Runs the library scenario through Phase 6 to get a realistic state with
/// created schema and DDL.
async fn state_after_phase_6() -> PipelineState {
    let orchestrator = orchestrator_with(&library_fixture());
    orchestrator
        .run_up_to(
            PipelineOrchestrator::seed_state(library_description()),
            PhaseId::new(6).unwrap(),
        )
        .await
        .expect("phases 1-6 should complete")
}

fn fixture_with_7_2(attempts: Value) -> Value {
    let mut fixture = library_fixture();
    fixture["7.2"] = attempts;
    fixture
}

#[tokio::test]
async fn test_invalid_sql_retried_then_accepted() {
    let state = state_after_phase_6().await;
    // First attempt references a missing column; the retry is valid.
    let fixture = fixture_with_7_2(json!({"$sequence": [
        {"sql_query": "SELECT ghost_column FROM Author", "reasoning": "wrong"},
        {"sql_query": "SELECT name FROM Author", "reasoning": "fixed"}
    ]}));
    let orchestrator = orchestrator_with(&fixture);

    let result = orchestrator
        .run_phase(state, PhaseId::new(7).unwrap())
        .await
        .expect("phase 7 should complete");

    assert_eq!(result.information_needs.len(), 1);
    let need = &result.information_needs[0];
    assert_eq!(need.sql_query.as_deref(), Some("SELECT name FROM Author"));
    assert_eq!(need.retry_count, 1);
    assert!(need.validation_error.is_none());
}

#[tokio::test]
async fn test_need_dropped_after_five_failed_attempts() {
    let state = state_after_phase_6().await;
    let frozen_before = serde_json::to_string(state.frozen_schema_raw().unwrap()).unwrap();
    // Every attempt references a nonexistent table.
    let fixture = fixture_with_7_2(json!({
        "sql_query": "SELECT x FROM NoSuchTable", "reasoning": "hopeless"
    }));
    let orchestrator = orchestrator_with(&fixture);

    let result = orchestrator
        .run_phase(state, PhaseId::new(7).unwrap())
        .await
        .expect("phase 7 completes by dropping the need");

    // The need is excluded, not rewritten.
    assert!(result.information_needs.is_empty());
    let rejected = result
        .metadata_value("rejected_information_needs")
        .and_then(Value::as_array)
        .expect("rejections recorded");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0]["retry_count"], 5);
    assert!(rejected[0]["validation_error"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("nosuchtable"));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("dropping information need")));

    // Schema-freeze invariant: Phase 7 never alters the frozen schema.
    let frozen_after = serde_json::to_string(result.frozen_schema_raw().unwrap()).unwrap();
    assert_eq!(frozen_after, frozen_before);
}

#[tokio::test]
async fn test_retry_count_bounded_by_budget() {
    let state = state_after_phase_6().await;
    // A sequence longer than the budget: only five attempts may happen, so
    // the sixth (valid) answer is never reached.
    let fixture = fixture_with_7_2(json!({"$sequence": [
        {"sql_query": "SELECT a FROM Missing1"},
        {"sql_query": "SELECT b FROM Missing2"},
        {"sql_query": "SELECT c FROM Missing3"},
        {"sql_query": "SELECT d FROM Missing4"},
        {"sql_query": "SELECT e FROM Missing5"},
        {"sql_query": "SELECT name FROM Author"}
    ]}));
    let orchestrator = orchestrator_with(&fixture);

    let result = orchestrator
        .run_phase(state, PhaseId::new(7).unwrap())
        .await
        .expect("phase 7 completes");

    assert!(result.information_needs.is_empty(), "budget must cap attempts at 5");
    let rejected = result
        .metadata_value("rejected_information_needs")
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(rejected[0]["retry_count"], 5);
}
