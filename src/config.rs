//! Command-line and environment configuration

use crate::llm::DEFAULT_GEMINI_MODEL;
use crate::runtime::{OrchestratorConfig, DEFAULT_MAX_TOOL_ROUNDS};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Which name-memory strategy the demo exercises
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Phase graph with a durable user store and per-thread checkpoints
    Graph,
    /// Session store whose `user:` keys follow the user across sessions
    Managed,
    /// Graph first, then managed
    Both,
}

impl Strategy {
    pub fn runs_graph(self) -> bool {
        matches!(self, Strategy::Graph | Strategy::Both)
    }

    pub fn runs_managed(self) -> bool {
        matches!(self, Strategy::Managed | Strategy::Both)
    }
}

/// Demo driver: three scripted turns showing a name remembered across threads
#[derive(Debug, Parser)]
#[command(name = "namesake", version, about)]
pub struct Cli {
    /// Directory holding the user and checkpoint databases
    #[arg(long, env = "NAMESAKE_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Gemini model id
    #[arg(long, env = "NAMESAKE_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    pub model: String,

    /// Tool executions allowed in one turn
    #[arg(long, env = "NAMESAKE_MAX_TOOL_ROUNDS", default_value_t = DEFAULT_MAX_TOOL_ROUNDS)]
    pub max_tool_rounds: usize,

    /// Strategy to run the three scripted turns against
    #[arg(long, value_enum, env = "NAMESAKE_STRATEGY", default_value_t = Strategy::Graph)]
    pub strategy: Strategy,

    /// Log oracle input and output
    #[arg(long)]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Keep the database files after the demo finishes
    #[arg(long)]
    pub keep_data: bool,
}

impl Cli {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_tool_rounds: self.max_tool_rounds,
        }
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "namesake=debug"
        } else {
            "namesake=info"
        }
    }
}
