use crate::args::Args;
use crate::client::ConnectSettings;
use crate::error::{ConsoleError, ConsoleResult};
use crate::format::{OutputFormat, StreamOptions};
use crate::repl::OutputTarget;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contents of `~/.qsh.toml`. Every key is optional.
///
/// ```toml
/// history_file = "/home/me/.local/share/qsh_history"
///
/// [connection]
/// host = "engine.local"
/// database = "sample_datasets"
///
/// [output]
/// format = "csv"
/// page_size = 50
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    pub connection: ConnectionConfig,
    pub output: OutputConfig,
    /// Overrides `~/.qsh_history`.
    pub history_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "qsh".to_string(),
            database: "sample_datasets".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Rows per page in interactive table output (0 = no paging).
    pub page_size: u64,
    /// 0 = unlimited.
    pub limit: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        let defaults = StreamOptions::default();
        Self {
            format: defaults.format,
            page_size: defaults.page_size,
            limit: defaults.limit,
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|h| h.join(".qsh.toml"))
}

/// Load the config file. An explicitly named file must exist; a missing
/// default file means built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> ConsoleResult<ConsoleConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.exists() => p,
            _ => {
                debug!("No config file, using defaults");
                return Ok(ConsoleConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)
        .map_err(|e| ConsoleError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| ConsoleError::Config(format!("invalid {}: {}", path.display(), e)))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Everything needed to start the console, after merging flags over the
/// config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub connect: ConnectSettings,
    pub stream: StreamOptions,
    pub output: OutputTarget,
    pub history_file: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(args: &Args, config: ConsoleConfig) -> Self {
        let ConsoleConfig {
            connection,
            output,
            history_file,
        } = config;
        Self {
            connect: ConnectSettings {
                host: args.host.clone().unwrap_or(connection.host),
                port: args.port.unwrap_or(connection.port),
                user: args.user.clone().unwrap_or(connection.user),
                password: args.password.clone(),
                database: args.database.clone().unwrap_or(connection.database),
            },
            stream: StreamOptions {
                format: args.format.unwrap_or(output.format),
                limit: args.limit.unwrap_or(output.limit),
                page_size: args.page_size.unwrap_or(output.page_size),
            },
            output: match &args.output {
                Some(path) => OutputTarget::File(path.clone()),
                None => OutputTarget::Stdout,
            },
            history_file,
        }
    }
}
