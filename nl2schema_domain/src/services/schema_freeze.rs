// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Frozen-Schema Validation
//!
//! The relational schema compiled in Phase 4 is snapshotted into
//! `metadata.frozen_schema` and treated as immutable from Phase 5 on. This
//! module validates that invariant at every later phase boundary:
//!
//! - a missing frozen schema past Phase 4 is a terminal error;
//! - entities that appear after Phase 5 and are not frozen tables warn
//!   (tolerated only for explicitly recorded re-execution paths);
//! - an explicit modification record warns.

use crate::entities::pipeline_state::META_FROZEN_SCHEMA;
use crate::entities::PipelineState;
use crate::error::PipelineError;

use std::collections::BTreeSet;

/// Result of a freeze validation pass: warnings accumulate on the state,
/// a hard violation is returned as an error by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreezeReport {
    pub warnings: Vec<String>,
}

/// Validates frozen-schema immutability at the start of phase `phase`.
///
/// Phases 1-4 may still shape the schema; nothing is checked there. For
/// `phase > 4` the frozen snapshot must exist, and the current entity set is
/// compared against the frozen table set.
///
/// `modifications` is an optional record of schema mutations a substep
/// declared explicitly (the surrogate-key injection path); declared
/// modifications warn instead of failing.
pub fn validate_frozen_schema_immutability(
    phase: u8,
    state: &PipelineState,
    modifications: Option<&[String]>,
) -> Result<FreezeReport, PipelineError> {
    if phase <= 4 {
        return Ok(FreezeReport::default());
    }

    let Some(frozen) = state.frozen_schema() else {
        return Err(PipelineError::FrozenSchemaMissing { phase });
    };

    let mut report = FreezeReport::default();

    let frozen_tables: BTreeSet<String> = frozen
        .tables
        .iter()
        .map(|t| t.name.to_lowercase())
        .collect();
    let new_entities: Vec<&str> = state
        .entities
        .iter()
        .map(|e| e.name.as_str())
        .filter(|name| !frozen_tables.contains(&name.to_lowercase()))
        .collect();

    if !new_entities.is_empty() && phase > 5 {
        report.warnings.push(format!(
            "Phase {}: new entities detected that are not in frozen schema: {:?}. \
             This may indicate an issue if not part of a controlled re-execution.",
            phase, new_entities
        ));
    }

    if let Some(modifications) = modifications {
        if !modifications.is_empty() {
            report.warnings.push(format!(
                "Phase {}: schema modifications declared after freeze: {:?}. \
                 Frozen schema should remain immutable after Phase 4.",
                phase, modifications
            ));
        }
    }

    Ok(report)
}

/// True when the frozen schema exists and may be read (phases after 4).
pub fn check_frozen_schema_access(phase: u8, state: &PipelineState) -> bool {
    phase > 4 && state.metadata.contains_key(META_FROZEN_SCHEMA)
}
