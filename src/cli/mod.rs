//! CLI module for tokengate
//!
//! Command-line interface definitions and handlers.
//!
//! # Commands
//!
//! - `serve` - Start the budget API server
//! - `policy check` - Validate a policy document and print its limits
//! - `usage` - Show live counters for a request's scopes
//! - `config init` - Write an example configuration file
//! - `completions` - Generate shell completions
//!
//! # Example
//!
//! ```bash
//! # Start server with default config
//! tokengate serve
//!
//! # Validate a policy the way production would load it
//! tokengate policy check policy.json
//!
//! # Inspect counters for one org/user/provider/model
//! tokengate usage --org acme --user alice --provider openai --model gpt-4o
//! ```

pub mod completions;
pub mod config;
pub mod output;
pub mod policy;
pub mod serve;
pub mod usage;

pub use completions::handle_completions;
pub use config::handle_config_init;

use crate::config::{EnforcementMode, Environment, StoreBackend};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// tokengate - Atomic token budget enforcement
#[derive(Parser, Debug)]
#[command(
    name = "tokengate",
    version,
    about = "Atomic multi-scope token budget enforcement"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the budget API server
    Serve(ServeArgs),
    /// Policy document utilities
    #[command(subcommand)]
    Policy(PolicyCommands),
    /// Show live usage for a request's scopes
    Usage(UsageArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "tokengate.toml")]
    pub config: PathBuf,

    /// Override server port
    #[arg(short, long, env = "TOKENGATE_PORT")]
    pub port: Option<u16>,

    /// Override server host
    #[arg(short = 'H', long, env = "TOKENGATE_HOST")]
    pub host: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "TOKENGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Override policy document path
    #[arg(long, env = "TOKENGATE_POLICY_PATH")]
    pub policy: Option<PathBuf>,

    /// Override counter store backend (redis, memory)
    #[arg(long, env = "TOKENGATE_STORE")]
    pub store: Option<StoreBackend>,

    /// Override enforcement mode (strict, fail-open, disabled)
    #[arg(long, env = "TOKENGATE_ENFORCEMENT")]
    pub enforcement: Option<EnforcementMode>,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Validate a policy document and print the resolved limits
    Check(PolicyCheckArgs),
}

#[derive(Args, Debug)]
pub struct PolicyCheckArgs {
    /// Policy document (JSON, or TOML by extension)
    pub file: PathBuf,

    /// Validate as this environment would (production, development)
    #[arg(short, long, default_value = "production")]
    pub env: Environment,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UsageArgs {
    #[arg(long)]
    pub org: String,

    #[arg(long)]
    pub user: String,

    #[arg(long)]
    pub provider: String,

    #[arg(long)]
    pub model: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "tokengate.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "tokengate.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
