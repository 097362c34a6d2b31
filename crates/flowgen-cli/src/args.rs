//! CLI argument definitions using clap
//!
//! - flowgen probe                # Handshake and check liveness
//! - flowgen run graph.json       # Generate code from a graph document
//! - flowgen chat "add a form"    # Ask the worker about the graph
//! - flowgen check                # Inspect the worker environment

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "flowgen.toml";

#[derive(Parser, Debug)]
#[command(name = "flowgen")]
#[command(about = "Drive the flowgen code-generation worker from the command line")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (TOML or JSON)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "FLOWGEN_CONFIG")]
    pub config: PathBuf,

    /// Worker executable, overriding the configuration
    #[arg(long)]
    pub worker: Option<String>,

    /// Working directory for the worker
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the worker and send liveness probes
    Probe {
        /// Number of probes to send
        #[arg(long, short = 'n', default_value_t = 1)]
        count: u32,
    },

    /// Submit a generation run for a graph document
    Run {
        /// File containing the serialized graph document
        document: PathBuf,

        /// JSON file with generation settings for this run
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a natural-language request to the worker
    Chat {
        /// What to ask
        prompt: String,

        /// JSON file with extra context for the request
        #[arg(long)]
        context: Option<PathBuf>,
    },

    /// Check the worker's environment without starting a session
    Check,
}
