// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # JSONL Run Log
//!
//! File-backed implementation of the run-log port: one JSON line per substep
//! invocation with the run id, step id, timestamp, and raw output. Logging
//! failures never fail the pipeline; they are traced and dropped.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use nl2schema_domain::services::PipelineRunLog;
use nl2schema_domain::{PipelineError, RunId};

/// Append-only JSONL run log.
pub struct JsonlRunLog {
    run_id: RunId,
    file: Mutex<File>,
}

impl JsonlRunLog {
    /// Opens (or creates) the log file in append mode.
    pub fn create(path: &Path, run_id: RunId) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            run_id,
            file: Mutex::new(file),
        })
    }
}

impl PipelineRunLog for JsonlRunLog {
    fn append(&self, step_id: &str, output: &Value) {
        let record = json!({
            "run_id": self.run_id.to_string(),
            "step": step_id,
            "at": Utc::now().to_rfc3339(),
            "output": output,
        });
        let mut file = self.file.lock();
        if let Err(err) = writeln!(file, "{}", record) {
            tracing::warn!("Run log append failed for step {}: {}", step_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_one_line_per_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let log = JsonlRunLog::create(&path, RunId::new()).unwrap();
        log.append("1.1", &json!({"domain": "library"}));
        log.append("1.2", &json!({"mentioned_entities": ["Book"]}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["step"], "1.1");
        assert_eq!(first["output"]["domain"], "library");
    }
}
