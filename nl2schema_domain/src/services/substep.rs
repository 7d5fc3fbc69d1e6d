// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Substep Ports
//!
//! The engine never talks to a language model directly. Each LLM-backed
//! substep is an implementation of [`SubstepService`] registered in a
//! [`SubstepRegistry`] under its dotted step id; the phase adapters resolve
//! and invoke them with narrow JSON inputs and normalize whatever comes
//! back. Production registries wrap prompt-owning substeps built on an
//! [`LlmInvoker`]; tests register scripted substitutes.
//!
//! Inputs and outputs are `serde_json::Value` at this boundary on purpose:
//! substeps emit either structured records or plain maps, and the adapter is
//! the single place where shapes are normalized (no reflection-style
//! "does it have a model_dump" probing anywhere downstream).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;

/// One domain substep: an async function from a narrow JSON input to a JSON
/// output. Implementations own their prompts and output schemas.
#[async_trait]
pub trait SubstepService: Send + Sync {
    async fn invoke(&self, input: Value) -> Result<Value, PipelineError>;
}

/// Registry of substeps by dotted step id (`"1.4"`, `"8.6"`, …).
///
/// Mirrors the stage-service registry pattern: adapters resolve by id and
/// fail with a configuration error naming the available ids when a substep
/// is missing.
#[derive(Clone, Default)]
pub struct SubstepRegistry {
    services: HashMap<String, Arc<dyn SubstepService>>,
}

impl SubstepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a substep under its step id, replacing any previous entry.
    pub fn register(&mut self, step_id: impl Into<String>, service: Arc<dyn SubstepService>) {
        self.services.insert(step_id.into(), service);
    }

    /// Resolves the substep for a step id.
    pub fn get(&self, step_id: &str) -> Result<Arc<dyn SubstepService>, PipelineError> {
        self.services.get(step_id).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = self.services.keys().map(String::as_str).collect();
            available.sort_unstable();
            PipelineError::InvalidConfiguration(format!(
                "No substep registered for step '{}'. Available: {:?}",
                step_id, available
            ))
        })
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.services.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for SubstepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.services.keys().collect();
        ids.sort();
        f.debug_struct("SubstepRegistry").field("steps", &ids).finish()
    }
}

/// A structured-output LLM request, as substep implementations assemble it.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// JSON schema the model output must conform to.
    pub output_schema: Value,
    pub system_prompt: String,
    pub human_prompt: String,
    /// Input data rendered into the human prompt template.
    pub input: Value,
}

/// Port for the LLM client. The engine treats it as a black-box awaitable;
/// prompt construction and output-schema enforcement belong to the substep
/// implementations that call it.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    async fn invoke(&self, request: LlmRequest) -> Result<Value, PipelineError>;
}
