// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Logging Setup
//!
//! Structured logging for the engine via `tracing`. The subscriber honors
//! `RUST_LOG` with an `info` default; pipeline steps log in the bracketed
//! `[engine] Executing Step N.M: Title` style so runs are easy to follow and
//! grep.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Safe to call more than once; subsequent calls are no-ops (the first
/// subscriber wins). `verbose` lowers the default filter to `debug`.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
