//! CLI argument definitions using clap
//!
//! - river serve                          # HTTP transport with the demo streams
//! - river run askQuestion '{"question": "..."}'
//! - river resume <token>                 # Reattach to a session
//! - river sessions list|sweep            # Inspect and clean the store
//! - river config show|validate

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "river")]
#[command(about = "River - resumable, persisted, multi-consumer chunk streams")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "RIVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file; RUST_LOG overrides both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the stream endpoint over HTTP
    Serve {
        /// Address to bind, e.g. 0.0.0.0:3000
        #[arg(long)]
        bind: Option<String>,
    },

    /// Start a stream in-process and print its events
    Run {
        /// Route name (askQuestion, classifyCharacters)
        stream: String,

        /// JSON input for the route
        #[arg(default_value = "{}")]
        input: String,

        /// Credential presented to the authorization gate
        #[arg(long, env = "RIVER_CREDENTIAL")]
        credential: Option<String>,

        /// Use this session id instead of a generated one
        #[arg(long)]
        session_id: Option<String>,

        /// Stop reading after this many chunks and print a resume command
        #[arg(long)]
        detach_after: Option<usize>,

        /// Print raw events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Resume a session from a resumption token
    Resume {
        token: String,

        /// Print raw events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsAction {
    /// List sessions with their status and length
    List,

    /// Close abandoned sessions and delete expired ones
    Sweep,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Display the effective configuration
    Show,

    /// Validate the configuration
    Validate,
}
