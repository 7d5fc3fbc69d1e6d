// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Infrastructure Layer
//!
//! Concrete implementations of the domain ports plus engine plumbing:
//! configuration, logging setup, metrics, the SQLite schema validator, the
//! JSONL run log, and scripted substeps for replay and testing.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod run_log;
pub mod scripted;
pub mod sqlite;
