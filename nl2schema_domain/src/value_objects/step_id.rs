// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Step Identifier Value Object
//!
//! Type-safe wrapper for dotted substep identifiers (`"1.4"`, `"3.45"`,
//! `"8.6"`). A step id is the smallest addressable unit of work in the
//! pipeline; it keys the `previous_answers` memo, the substep registry, and
//! the run log.
//!
//! ## Format
//!
//! `<phase>.<suffix>` where `<phase>` is a digit `1..=9` and `<suffix>` is a
//! non-empty run of digits. Sub-numbered steps like `1.75` (reclassification
//! inserted between `1.7` and `1.8`) are valid and ordered by their string
//! form, not numerically.
//!
//! ## Usage Examples
//!
//! ```rust
//! use nl2schema_domain::value_objects::StepId;
//!
//! let step = StepId::new("1.4").unwrap();
//! assert_eq!(step.phase(), 1);
//! assert_eq!(step.as_str(), "1.4");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PipelineError;

/// A validated dotted substep identifier.
///
/// Step ids are cheap to clone and compare; they are stored as strings
/// because the dotted form is the canonical wire and log representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Creates a step id, validating the `<phase>.<digits>` format.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidConfiguration` when the value is not a
    /// phase digit in `1..=9` followed by a dot and at least one digit.
    pub fn new(value: impl Into<String>) -> Result<Self, PipelineError> {
        let value = value.into();
        let mut parts = value.splitn(2, '.');
        let phase_ok = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .map(|p| (1..=9).contains(&p))
            .unwrap_or(false);
        let suffix_ok = parts
            .next()
            .map(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);

        if !phase_ok || !suffix_ok {
            return Err(PipelineError::InvalidConfiguration(format!(
                "Invalid step id '{}': expected '<phase>.<digits>' with phase 1-9",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Creates a step id without validation. Test-only constructor.
    #[cfg(test)]
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The phase this step belongs to (the leading digit).
    pub fn phase(&self) -> u8 {
        self.0
            .split('.')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(0)
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StepId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
