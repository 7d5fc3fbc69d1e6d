// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Identifier Value Object
//!
//! ULID-backed identifier for a single pipeline run. Run ids correlate the
//! run-log sink, metrics, and any serialized state snapshots a caller keeps.
//! ULIDs are used instead of UUIDs for their lexicographic time ordering,
//! which keeps run logs naturally sorted.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique identifier for one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a fresh, time-ordered run id.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a run id from its canonical string form.
    pub fn parse(value: &str) -> Result<Self, crate::error::PipelineError> {
        Ulid::from_string(value)
            .map(Self)
            .map_err(|e| crate::error::PipelineError::InvalidConfiguration(format!(
                "Invalid run id '{}': {}",
                value, e
            )))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = RunId::new();
        let parsed = RunId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RunId::parse("not-a-ulid").is_err());
    }
}
