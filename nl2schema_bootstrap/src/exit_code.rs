// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Exit-Code Mapping
//!
//! Maps domain errors onto Unix sysexits-style process exit codes so shell
//! scripts can tell a misconfigured run (78) from bad data (65), an I/O
//! problem (74), or an interrupted run (130).

use nl2schema_domain::PipelineError;

/// Process exit codes for the nl2schema CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Generic failure.
    Failure = 1,
    /// EX_DATAERR: gate failures, schema violations, validation failures.
    DataError = 65,
    /// EX_SOFTWARE: internal engine errors, merge conflicts.
    SoftwareError = 70,
    /// EX_IOERR: filesystem or database trouble.
    IoError = 74,
    /// EX_CONFIG: bad configuration, unknown substeps.
    ConfigError = 78,
    /// 128 + SIGINT: run interrupted by a shutdown signal.
    Interrupted = 130,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Maps a pipeline error to its exit code.
    pub fn from_error(error: &PipelineError) -> Self {
        match error {
            PipelineError::InvalidConfiguration(_) => ExitCode::ConfigError,
            PipelineError::GateFailed { .. }
            | PipelineError::FrozenSchemaMissing { .. }
            | PipelineError::SchemaValidation(_)
            | PipelineError::ValidationError(_) => ExitCode::DataError,
            PipelineError::IoError(_) | PipelineError::DatabaseError(_) => ExitCode::IoError,
            PipelineError::MergeConflict(_)
            | PipelineError::InternalError(_)
            | PipelineError::SerializationError(_) => ExitCode::SoftwareError,
            PipelineError::Cancelled(_) => ExitCode::Interrupted,
            PipelineError::SubstepFailed { .. } | PipelineError::LlmError(_) => ExitCode::Failure,
        }
    }

    /// Terminates the process with this code.
    pub fn exit(self) -> ! {
        std::process::exit(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            ExitCode::from_error(&PipelineError::InvalidConfiguration("x".into())),
            ExitCode::ConfigError
        );
        assert_eq!(
            ExitCode::from_error(&PipelineError::gate(4, "no tables")),
            ExitCode::DataError
        );
        assert_eq!(
            ExitCode::from_error(&PipelineError::DatabaseError("locked".into())),
            ExitCode::IoError
        );
        assert_eq!(
            ExitCode::from_error(&PipelineError::Cancelled("signal".into())),
            ExitCode::Interrupted
        );
        assert_eq!(
            ExitCode::from_error(&PipelineError::substep("1.4", "boom")),
            ExitCode::Failure
        );
    }

    #[test]
    fn test_codes_are_sysexits_style() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::DataError.code(), 65);
        assert_eq!(ExitCode::ConfigError.code(), 78);
        assert_eq!(ExitCode::Interrupted.code(), 130);
    }
}
