// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Engine Configuration
//!
//! Runtime configuration for the pipeline engine: per-loop iteration
//! budgets, the similarity threshold used by the name validators, the graph
//! runtime's superstep backstop, the Phase-9 partitioning volume threshold,
//! and the optional run directory where Phase 6 places the schema database.
//!
//! Defaults match the tuned production values; a TOML file and the `RUN_DIR`
//! environment variable can override them. The engine relies on the explicit
//! loop budgets for termination, not on the superstep backstop, which is set
//! well above anything the declared topologies can reach.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use nl2schema_domain::{LoopBudget, PipelineError};

/// Environment variable naming the run directory (Phase 6 artifacts).
pub const RUN_DIR_ENV: &str = "RUN_DIR";

/// Per-loop iteration budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopBudgets {
    pub connectivity: u32,
    pub relation_validation: u32,
    pub naming: u32,
    pub cleanup: u32,
    pub constraint_detection: u32,
    pub information_needs: u32,
    pub sql_retries: u32,
}

impl Default for LoopBudgets {
    fn default() -> Self {
        Self {
            connectivity: LoopBudget::CONNECTIVITY.max_iterations(),
            relation_validation: LoopBudget::RELATION_VALIDATION.max_iterations(),
            naming: LoopBudget::NAMING.max_iterations(),
            cleanup: LoopBudget::CLEANUP.max_iterations(),
            constraint_detection: LoopBudget::CONSTRAINT_DETECTION.max_iterations(),
            information_needs: LoopBudget::INFORMATION_NEEDS.max_iterations(),
            sql_retries: LoopBudget::SQL_RETRIES.max_iterations(),
        }
    }
}

impl LoopBudgets {
    pub fn connectivity_budget(&self) -> LoopBudget {
        LoopBudget::new(self.connectivity)
    }
    pub fn relation_validation_budget(&self) -> LoopBudget {
        LoopBudget::new(self.relation_validation)
    }
    pub fn naming_budget(&self) -> LoopBudget {
        LoopBudget::new(self.naming)
    }
    pub fn cleanup_budget(&self) -> LoopBudget {
        LoopBudget::new(self.cleanup)
    }
    pub fn constraint_detection_budget(&self) -> LoopBudget {
        LoopBudget::new(self.constraint_detection)
    }
    pub fn information_needs_budget(&self) -> LoopBudget {
        LoopBudget::new(self.information_needs)
    }
    pub fn sql_retry_budget(&self) -> LoopBudget {
        LoopBudget::new(self.sql_retries)
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub budgets: LoopBudgets,
    /// Acceptance threshold for "did you mean" suggestions.
    pub similarity_threshold: f64,
    /// Backstop on graph supersteps per phase; loop budgets bound real loops.
    pub superstep_limit: u32,
    /// Row-count threshold at or above which Phase 9.5 plans partitioning.
    pub partition_volume_threshold: u64,
    /// Directory for Phase 6 artifacts (schema database). `None` uses a
    /// temp path.
    pub run_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budgets: LoopBudgets::default(),
            similarity_threshold: 0.7,
            superstep_limit: 200,
            partition_volume_threshold: 1_000_000,
            run_dir: None,
        }
    }
}

impl PipelineConfig {
    /// Loads configuration from an optional TOML file, then applies the
    /// `RUN_DIR` environment override.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, PipelineError> {
        let mut settings = match path {
            Some(path) => {
                let builder = config::Config::builder()
                    .add_source(config::File::from(path.to_path_buf()).format(config::FileFormat::Toml));
                let raw = builder.build().map_err(|e| {
                    PipelineError::InvalidConfiguration(format!(
                        "Failed to read config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                raw.try_deserialize::<PipelineConfig>().map_err(|e| {
                    PipelineError::InvalidConfiguration(format!(
                        "Invalid config file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            None => PipelineConfig::default(),
        };

        if let Ok(run_dir) = std::env::var(RUN_DIR_ENV) {
            if !run_dir.trim().is_empty() {
                settings.run_dir = Some(PathBuf::from(run_dir));
            }
        }
        Ok(settings)
    }

    /// The path Phase 6 should persist the schema database at, or `None`
    /// when an in-memory/temp database should be used.
    pub fn schema_database_path(&self) -> Option<PathBuf> {
        self.run_dir.as_ref().map(|dir| dir.join("schema.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_tuned_budgets() {
        let config = PipelineConfig::default();
        assert_eq!(config.budgets.connectivity, 3);
        assert_eq!(config.budgets.information_needs, 10);
        assert_eq!(config.budgets.sql_retries, 5);
        assert!((config.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.superstep_limit > 3 * config.budgets.information_needs);
    }

    #[test]
    fn test_load_from_toml_overrides() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "similarity_threshold = 0.8\n[budgets]\nconnectivity = 5\nrelation_validation = 3\nnaming = 3\ncleanup = 3\nconstraint_detection = 3\ninformation_needs = 10\nsql_retries = 5"
        )
        .unwrap();
        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.budgets.connectivity, 5);
        assert!((config.similarity_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_schema_database_path() {
        let mut config = PipelineConfig::default();
        assert!(config.schema_database_path().is_none());
        config.run_dir = Some(PathBuf::from("/tmp/run"));
        assert_eq!(
            config.schema_database_path().unwrap(),
            PathBuf::from("/tmp/run/schema.db")
        );
    }
}
