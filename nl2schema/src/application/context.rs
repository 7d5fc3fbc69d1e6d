// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Context
//!
//! The wired collaborators a pipeline run executes against: the substep
//! registry, the SQL schema validator, the run-log sink, the configuration,
//! and the metrics service. Phase builders capture an `Arc<EngineContext>`
//! in their node closures; the context itself is immutable for the lifetime
//! of a run.

use serde_json::Value;
use std::sync::Arc;

use nl2schema_domain::services::{PipelineRunLog, SqlSchemaValidator, SubstepRegistry};
use nl2schema_domain::{PipelineError, StepId};

use crate::infrastructure::config::PipelineConfig;
use crate::infrastructure::metrics::EngineMetrics;

/// Immutable bundle of collaborators for one engine instance.
pub struct EngineContext {
    pub substeps: SubstepRegistry,
    pub sql: Arc<dyn SqlSchemaValidator>,
    pub run_log: Arc<dyn PipelineRunLog>,
    pub config: PipelineConfig,
    pub metrics: Arc<EngineMetrics>,
}

impl EngineContext {
    pub fn new(
        substeps: SubstepRegistry,
        sql: Arc<dyn SqlSchemaValidator>,
        run_log: Arc<dyn PipelineRunLog>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            substeps,
            sql,
            run_log,
            config,
            metrics: Arc::new(EngineMetrics::new()?),
        })
    }

    /// Resolves and invokes an LLM-backed substep, recording metrics and the
    /// raw output. Failures are normalized to `SubstepFailed` carrying the
    /// step id; the phase graph surfaces them and the orchestrator marks the
    /// run failed.
    pub async fn invoke_substep(&self, step_id: &str, input: Value) -> Result<Value, PipelineError> {
        let step = StepId::new(step_id)?;
        let service = self.substeps.get(step.as_str())?;
        self.metrics.record_step(step.as_str());
        match service.invoke(input).await {
            Ok(raw) => {
                self.run_log.append(step.as_str(), &raw);
                Ok(raw)
            }
            Err(err) => {
                self.metrics.record_substep_failure(step.as_str());
                match err {
                    already @ PipelineError::SubstepFailed { .. } => Err(already),
                    other => Err(PipelineError::substep(step.as_str(), other.to_string())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nl2schema_domain::services::{NullRunLog, SubstepService};
    use serde_json::json;

    use crate::infrastructure::sqlite::SqliteSchemaValidator;

    struct Failing;

    #[async_trait]
    impl SubstepService for Failing {
        async fn invoke(&self, _input: Value) -> Result<Value, PipelineError> {
            Err(PipelineError::LlmError("model unavailable".into()))
        }
    }

    fn context_with(registry: SubstepRegistry) -> EngineContext {
        EngineContext::new(
            registry,
            Arc::new(SqliteSchemaValidator::new()),
            Arc::new(NullRunLog),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_substep_failure_carries_step_id() {
        let mut registry = SubstepRegistry::new();
        registry.register("1.4", Arc::new(Failing));
        let ctx = context_with(registry);

        let err = ctx.invoke_substep("1.4", json!({})).await.unwrap_err();
        match err {
            PipelineError::SubstepFailed { step, message } => {
                assert_eq!(step, "1.4");
                assert!(message.contains("model unavailable"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_substep_is_configuration_error() {
        let ctx = context_with(SubstepRegistry::new());
        let err = ctx.invoke_substep("1.1", json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
    }
}
