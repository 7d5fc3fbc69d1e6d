// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Phase Identifier Value Object
//!
//! Validated phase number (`1..=9`) with the canonical phase titles used in
//! logs and progress reporting. The pipeline is a fixed nine-phase sequence;
//! phase numbers outside that range are configuration errors, never states.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// The first phase of the pipeline.
pub const MIN_PHASE: u8 = 1;
/// The last phase of the pipeline.
pub const MAX_PHASE: u8 = 9;

/// A validated pipeline phase number in `1..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(u8);

impl PhaseId {
    /// The first phase.
    pub const FIRST: PhaseId = PhaseId(MIN_PHASE);
    /// The final phase.
    pub const FINAL: PhaseId = PhaseId(MAX_PHASE);

    /// Creates a phase id, rejecting values outside `1..=9`.
    pub fn new(phase: u8) -> Result<Self, PipelineError> {
        if !(MIN_PHASE..=MAX_PHASE).contains(&phase) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "Invalid phase: {}. Must be between {} and {}.",
                phase, MIN_PHASE, MAX_PHASE
            )));
        }
        Ok(Self(phase))
    }

    /// The underlying phase number.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// The canonical phase title used in logs.
    pub fn title(&self) -> &'static str {
        match self.0 {
            1 => "Domain & Entity Discovery",
            2 => "Attribute Discovery & Schema Design",
            3 => "ER Design Compilation",
            4 => "Relational Schema Compilation",
            5 => "Data Type Assignment",
            6 => "DDL Generation & Schema Creation",
            7 => "Information Mining",
            8 => "Functional Dependencies & Constraints",
            9 => "Generation Strategies",
            _ => unreachable!("phase validated at construction"),
        }
    }

    /// The next phase, or `None` after the final phase.
    pub fn next(&self) -> Option<PhaseId> {
        if self.0 < MAX_PHASE {
            Some(PhaseId(self.0 + 1))
        } else {
            None
        }
    }

    /// Iterator over all phases from 1 through `self` inclusive.
    pub fn up_to(&self) -> impl Iterator<Item = PhaseId> {
        (MIN_PHASE..=self.0).map(PhaseId)
    }

    /// True once the relational schema has been frozen (phases after 4).
    pub fn is_post_freeze(&self) -> bool {
        self.0 > 4
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
