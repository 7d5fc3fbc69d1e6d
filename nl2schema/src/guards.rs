// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Convergence Guards
//!
//! Bounded-iteration loop controls with forced-pass semantics. Every
//! conditional loop in the phase graphs evaluates its convergence predicate
//! through a [`ConvergenceGuard`]: the guard counts iterations in a
//! step-scoped metadata key, and once the budget is exhausted it rewrites
//! the predicate's outcome to "pass", sets the loop's forced-pass flag,
//! records the termination reason, and appends a warning. The pipeline
//! always progresses; it never spins.

use serde_json::json;

use nl2schema_domain::{LoopBudget, PipelineState, StateUpdate};

use crate::infrastructure::metrics::EngineMetrics;

/// Why a loop stopped looping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopVerdict {
    /// Predicate not satisfied and budget remains: take the loop edge again.
    Continue,
    /// Predicate satisfied: proceed normally.
    Converged,
    /// Budget exhausted: proceed with the forced-pass flag set.
    ForcedPass,
}

impl LoopVerdict {
    /// True when the loop should exit (converged or forced).
    pub fn passed(&self) -> bool {
        !matches!(self, LoopVerdict::Continue)
    }
}

/// One loop's identity and budget.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceGuard {
    /// Loop name for warnings, metrics, and `loop_iterations`.
    pub loop_name: &'static str,
    /// Metadata key of the iteration counter (`<loop>_iterations`).
    pub counter_key: &'static str,
    /// Metadata key of the forced-pass flag (`<loop>_forced_passed`).
    pub forced_flag_key: &'static str,
    pub budget: LoopBudget,
}

impl ConvergenceGuard {
    /// Evaluates one loop iteration.
    ///
    /// Reads the previous iteration count from `state`, writes the bumped
    /// counter (and, at loop exit, the forced-pass flag and termination
    /// reason) into `update`, and returns the verdict the graph edge should
    /// route on.
    pub fn evaluate(
        &self,
        state: &PipelineState,
        converged: bool,
        update: &mut StateUpdate,
        metrics: &EngineMetrics,
    ) -> LoopVerdict {
        let iteration = state.metadata_counter(self.counter_key) + 1;
        update.set_metadata(self.counter_key, json!(iteration));
        update
            .loop_iterations
            .insert(self.loop_name.to_string(), iteration);

        if converged {
            update.set_metadata(self.forced_flag_key, json!(false));
            update
                .loop_termination_reasons
                .insert(self.loop_name.to_string(), "converged".to_string());
            return LoopVerdict::Converged;
        }

        if self.budget.is_exhausted(iteration) {
            update.set_metadata(self.forced_flag_key, json!(true));
            update.loop_termination_reasons.insert(
                self.loop_name.to_string(),
                format!("budget of {} exhausted", self.budget.max_iterations()),
            );
            update.warn(format!(
                "{} did not converge after {} iteration(s). Forcing pipeline to continue.",
                self.loop_name,
                self.budget.max_iterations()
            ));
            metrics.record_forced_pass(self.loop_name);
            tracing::warn!(
                "{} did not converge after {} iteration(s); forcing pass",
                self.loop_name,
                self.budget.max_iterations()
            );
            return LoopVerdict::ForcedPass;
        }

        LoopVerdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> ConvergenceGuard {
        ConvergenceGuard {
            loop_name: "schema_connectivity",
            counter_key: "schema_connectivity_iterations",
            forced_flag_key: "connectivity_forced_passed",
            budget: LoopBudget::new(3),
        }
    }

    fn metrics() -> EngineMetrics {
        EngineMetrics::new().unwrap()
    }

    #[test]
    fn test_converged_loop_records_reason() {
        let state = PipelineState::seed("d");
        let mut update = StateUpdate::default();
        let verdict = guard().evaluate(&state, true, &mut update, &metrics());
        assert_eq!(verdict, LoopVerdict::Converged);
        assert!(verdict.passed());
        assert_eq!(update.metadata["schema_connectivity_iterations"], 1);
        assert_eq!(update.metadata["connectivity_forced_passed"], false);
        assert_eq!(
            update.loop_termination_reasons["schema_connectivity"],
            "converged"
        );
    }

    #[test]
    fn test_loop_continues_under_budget() {
        let state = PipelineState::seed("d");
        let mut update = StateUpdate::default();
        let verdict = guard().evaluate(&state, false, &mut update, &metrics());
        assert_eq!(verdict, LoopVerdict::Continue);
        assert!(!verdict.passed());
        assert!(update.warnings.is_empty());
    }

    #[test]
    fn test_budget_exhaustion_forces_pass() {
        let mut state = PipelineState::seed("d");
        state
            .metadata
            .insert("schema_connectivity_iterations".into(), json!(2));
        let mut update = StateUpdate::default();
        let verdict = guard().evaluate(&state, false, &mut update, &metrics());
        assert_eq!(verdict, LoopVerdict::ForcedPass);
        assert_eq!(update.metadata["connectivity_forced_passed"], true);
        assert_eq!(update.warnings.len(), 1);
        assert!(update.warnings[0].contains("did not converge"));
        assert!(update.loop_termination_reasons["schema_connectivity"].contains("exhausted"));
    }

    #[test]
    fn test_invocation_count_never_exceeds_budget() {
        // Property 3 (convergence bound): with a budget of B, a loop that
        // never converges is forced to pass on iteration B.
        let mut state = PipelineState::seed("d");
        let m = metrics();
        let mut iterations = 0;
        loop {
            iterations += 1;
            let mut update = StateUpdate::default();
            let verdict = guard().evaluate(&state, false, &mut update, &m);
            state.apply(update);
            if verdict.passed() {
                break;
            }
        }
        assert_eq!(iterations, 3);
        assert_eq!(state.metadata_counter("schema_connectivity_iterations"), 3);
        assert!(state.metadata_bool("connectivity_forced_passed"));
    }
}
