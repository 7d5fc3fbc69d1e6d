// /////////////////////////////////////////////////////////////////////////////
// NL2Schema
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # nl2schema CLI
//!
//! Runs the pipeline against a fixture file of recorded substep outputs
//! (replay mode). Production deployments embed the engine as a library and
//! register LLM-backed substeps instead; the CLI exists for replaying runs,
//! debugging phase topologies, and driving the engine in CI.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use nl2schema::application::{EngineContext, PipelineOrchestrator};
use nl2schema::infrastructure::config::PipelineConfig;
use nl2schema::infrastructure::logging::init_tracing;
use nl2schema::infrastructure::run_log::JsonlRunLog;
use nl2schema::infrastructure::scripted::registry_from_fixture;
use nl2schema::infrastructure::sqlite::SqliteSchemaValidator;
use nl2schema_bootstrap::{ExitCode, ShutdownCoordinator};
use nl2schema_domain::services::NullRunLog;
use nl2schema_domain::{PhaseId, PipelineError, RunId};

#[derive(Parser)]
#[command(name = "nl2schema", about = "Natural-language-to-database-schema compiler", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline with substeps replayed from a fixture file
    Run {
        /// Natural-language description of the data domain
        #[arg(long)]
        description: String,

        /// JSON fixture mapping step ids to recorded substep outputs
        #[arg(long)]
        fixtures: PathBuf,

        /// Stop after this phase (1-9)
        #[arg(long)]
        up_to: Option<u8>,

        /// Directory for run artifacts (schema database, run log)
        #[arg(long)]
        run_dir: Option<PathBuf>,

        /// Optional engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the final state as JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the pipeline phases
    Phases,
}

fn print_phases() {
    for phase in PhaseId::FINAL.up_to() {
        println!("{}  {}", phase, phase.title());
    }
}

async fn run(
    description: String,
    fixtures: PathBuf,
    up_to: Option<u8>,
    run_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), PipelineError> {
    let mut config = PipelineConfig::load(config_path.as_deref())?;
    if run_dir.is_some() {
        config.run_dir = run_dir;
    }

    let fixture_text = std::fs::read_to_string(&fixtures)?;
    let fixture_value: serde_json::Value = serde_json::from_str(&fixture_text)?;
    let substeps = registry_from_fixture(&fixture_value)?;

    let run_id = RunId::new();
    let run_log: Arc<dyn nl2schema_domain::services::PipelineRunLog> = match &config.run_dir {
        Some(dir) => Arc::new(JsonlRunLog::create(&dir.join("run.jsonl"), run_id)?),
        None => Arc::new(NullRunLog),
    };

    let ctx = EngineContext::new(
        substeps,
        Arc::new(SqliteSchemaValidator::new()),
        run_log,
        config,
    )?;
    let orchestrator = PipelineOrchestrator::new(ctx);
    let state = PipelineOrchestrator::seed_state(description);

    let shutdown = ShutdownCoordinator::new();
    shutdown.install_signal_handlers();
    let mut listener = shutdown.listener();

    let max_phase = PhaseId::new(up_to.unwrap_or(9))?;
    tracing::info!("Starting pipeline run {} (up to phase {})", run_id, max_phase);

    let result = tokio::select! {
        result = orchestrator.run_up_to(state, max_phase) => result,
        _ = listener.wait() => {
            return Err(PipelineError::Cancelled("interrupted by signal".to_string()));
        }
    };

    match result {
        Ok(state) => {
            println!(
                "Pipeline complete: phase {}, {} entities, {} tables, {} warnings",
                state.phase,
                state.entities.len(),
                state
                    .relational_schema()
                    .map(|s| s.tables.len())
                    .unwrap_or(0),
                state.warnings.len()
            );
            if let Some(output) = output {
                std::fs::write(&output, serde_json::to_string_pretty(&state)?)?;
                println!("State written to {}", output.display());
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}", failure);
            Err(failure.error)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Command::Phases => {
            print_phases();
            Ok(())
        }
        Command::Run {
            description,
            fixtures,
            up_to,
            run_dir,
            config,
            output,
        } => run(description, fixtures, up_to, run_dir, config, output).await,
    };

    match outcome {
        Ok(()) => ExitCode::Success.exit(),
        Err(error) => {
            tracing::error!("{}", error);
            ExitCode::from_error(&error).exit()
        }
    }
}
