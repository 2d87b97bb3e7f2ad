use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Log verbosity level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The `tracing`-compatible filter string for this level.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level to emit.
    #[serde(default)]
    pub level: LogLevel,
}

/// One `[[lsps]]` entry: a language server to manage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique identifier for this server.
    pub id: String,
    /// Command to start the server.
    pub command: String,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// File extensions this server handles.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Language ids this server handles.
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Language servers to manage, in order. Later entries win when two
    /// claim the same extension or language.
    #[serde(default)]
    pub lsps: Vec<ServerEntry>,
    /// Workspace root path.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Start all servers at launch instead of on first use.
    #[serde(default)]
    pub eager_init: bool,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lsps: Vec::new(),
            workspace: default_workspace(),
            eager_init: false,
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Sensible default: `pylsp` for Python sources in the given
    /// workspace.
    pub fn default_python(workspace: PathBuf) -> Self {
        Self {
            lsps: vec![ServerEntry {
                id: "pylsp".into(),
                command: "pylsp".into(),
                args: vec![],
                extensions: vec![".py".into(), ".pyi".into()],
                languages: vec!["python".into()],
            }],
            workspace,
            ..Self::default()
        }
    }

    /// Build a one-server config from an inline command line such as
    /// `"pyright-langserver --stdio"`. The server id is the command's
    /// file stem; extension/language defaults follow
    /// [`Config::default_python`].
    pub fn from_command_line(command_line: &str, workspace: PathBuf) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let command = parts.next()?.to_string();
        let id = Path::new(&command)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(command.as_str())
            .to_string();
        Some(Self {
            lsps: vec![ServerEntry {
                id,
                command,
                args: parts.map(|s| s.to_string()).collect(),
                extensions: vec![".py".into(), ".pyi".into()],
                languages: vec!["python".into()],
            }],
            workspace,
            ..Self::default()
        })
    }
}
