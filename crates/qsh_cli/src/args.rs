use crate::format::OutputFormat;
use clap::Parser;
use std::path::PathBuf;

/// qsh: interactive SQL console for a remote query engine
///
/// Connection and output flags left unset fall back to the config file,
/// then to built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "qsh", about = "Interactive SQL console", version)]
pub struct Args {
    /// Engine host
    #[arg(short = 'H', long, env = "QSH_HOST")]
    pub host: Option<String>,

    /// Engine port
    #[arg(short = 'p', long, env = "QSH_PORT")]
    pub port: Option<u16>,

    /// User name
    #[arg(short = 'U', long, env = "QSH_USER")]
    pub user: Option<String>,

    /// Database to start in
    #[arg(short = 'd', long, env = "QSH_DATABASE")]
    pub database: Option<String>,

    /// Password (prefer the QSH_PASSWORD env var)
    #[arg(short = 'W', long, env = "QSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Result format
    #[arg(short = 'F', long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Stop after this many rows (0 = unlimited)
    #[arg(short = 'l', long)]
    pub limit: Option<u64>,

    /// Rows per page in interactive table output (0 = no paging)
    #[arg(long)]
    pub page_size: Option<u64>,

    /// Append results to this file instead of the terminal
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Execute a single statement and exit
    #[arg(short = 'c', long)]
    pub command: Option<String>,

    /// Config file (default: ~/.qsh.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
