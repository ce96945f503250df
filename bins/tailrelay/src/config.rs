use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use pipeline::PipelineConfig;
use relay_sink_jsonl::JsonlSinkConfig;
use relay_source_journal_json::JournalJsonConfig;

use crate::error::RelayError;

#[derive(Parser)]
#[command(
    name = "tailrelay",
    about = "Relay journal entries to a sink with at-least-once delivery"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Follow the journal and relay entries until interrupted
    Run(RunArgs),
    /// Show the saved cursor and the pending queue
    State(StateArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "tailrelay.toml", env = "TAILRELAY_CONFIG")]
    pub config: String,
}

#[derive(Args, Clone, Debug)]
pub struct StateArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "tailrelay.toml", env = "TAILRELAY_CONFIG")]
    pub config: String,
    /// Print the body of every pending record
    #[arg(long, short)]
    pub verbose: bool,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    pub source: JournalJsonConfig,
    #[serde(default)]
    pub sink: JsonlSinkConfig,
}

impl RelayConfig {
    pub fn load(path: &str) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            RelayError::Config { context, detail } => RelayError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, RelayError> {
        let config: Self = toml::from_str(content).map_err(|e| RelayError::Config {
            context: "parse",
            detail: e.to_string(),
        })?;
        config.pipeline.validate().map_err(|detail| RelayError::Config {
            context: "validate",
            detail,
        })?;
        Ok(config)
    }
}
