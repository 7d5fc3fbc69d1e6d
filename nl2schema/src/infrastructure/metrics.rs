// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Metrics
//!
//! Prometheus counters and gauges for pipeline runs: substeps executed and
//! failed, forced-pass loop exits, SQL validation retries, warnings, and the
//! currently executing phase. The registry is per-engine so embedding
//! applications can scrape or ignore it.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use nl2schema_domain::PipelineError;

/// Metrics service for one engine instance.
pub struct EngineMetrics {
    registry: Registry,
    steps_total: IntCounterVec,
    substep_failures_total: IntCounterVec,
    forced_passes_total: IntCounterVec,
    sql_retries_total: IntCounter,
    warnings_total: IntCounter,
    current_phase: IntGauge,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, PipelineError> {
        let registry = Registry::new();
        let steps_total = IntCounterVec::new(
            Opts::new("nl2schema_steps_total", "Substep executions by step id"),
            &["step"],
        )
        .map_err(to_config_error)?;
        let substep_failures_total = IntCounterVec::new(
            Opts::new("nl2schema_substep_failures_total", "Substep failures by step id"),
            &["step"],
        )
        .map_err(to_config_error)?;
        let forced_passes_total = IntCounterVec::new(
            Opts::new("nl2schema_forced_passes_total", "Loop budget exhaustions by loop"),
            &["loop"],
        )
        .map_err(to_config_error)?;
        let sql_retries_total = IntCounter::new(
            "nl2schema_sql_retries_total",
            "SQL generation retries in Phase 7",
        )
        .map_err(to_config_error)?;
        let warnings_total =
            IntCounter::new("nl2schema_warnings_total", "Warnings appended to state")
                .map_err(to_config_error)?;
        let current_phase =
            IntGauge::new("nl2schema_current_phase", "Currently executing phase")
                .map_err(to_config_error)?;

        registry
            .register(Box::new(steps_total.clone()))
            .map_err(to_config_error)?;
        registry
            .register(Box::new(substep_failures_total.clone()))
            .map_err(to_config_error)?;
        registry
            .register(Box::new(forced_passes_total.clone()))
            .map_err(to_config_error)?;
        registry
            .register(Box::new(sql_retries_total.clone()))
            .map_err(to_config_error)?;
        registry
            .register(Box::new(warnings_total.clone()))
            .map_err(to_config_error)?;
        registry
            .register(Box::new(current_phase.clone()))
            .map_err(to_config_error)?;

        Ok(Self {
            registry,
            steps_total,
            substep_failures_total,
            forced_passes_total,
            sql_retries_total,
            warnings_total,
            current_phase,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_step(&self, step_id: &str) {
        self.steps_total.with_label_values(&[step_id]).inc();
    }

    pub fn record_substep_failure(&self, step_id: &str) {
        self.substep_failures_total.with_label_values(&[step_id]).inc();
    }

    pub fn record_forced_pass(&self, loop_name: &str) {
        self.forced_passes_total.with_label_values(&[loop_name]).inc();
    }

    pub fn record_sql_retry(&self) {
        self.sql_retries_total.inc();
    }

    pub fn record_warnings(&self, count: usize) {
        self.warnings_total.inc_by(count as u64);
    }

    pub fn set_current_phase(&self, phase: u8) {
        self.current_phase.set(phase as i64);
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics").finish_non_exhaustive()
    }
}

fn to_config_error(err: prometheus::Error) -> PipelineError {
    PipelineError::InvalidConfiguration(format!("Metrics initialization failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_and_gather() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.record_step("1.1");
        metrics.record_step("1.1");
        metrics.record_forced_pass("connectivity");
        metrics.record_warnings(3);
        metrics.set_current_phase(4);

        let families = metrics.registry().gather();
        let steps = families
            .iter()
            .find(|f| f.get_name() == "nl2schema_steps_total")
            .unwrap();
        assert_eq!(steps.get_metric()[0].get_counter().value(), 2.0);

        let phase = families
            .iter()
            .find(|f| f.get_name() == "nl2schema_current_phase")
            .unwrap();
        assert_eq!(phase.get_metric()[0].get_gauge().value(), 4.0);
    }
}
