//! polylsp-config — TOML configuration for the language server manager.
pub mod config;
pub mod error;
pub mod load;

pub use config::{Config, LogConfig, LogLevel, ServerEntry};
pub use error::ConfigError;
pub use load::{load_config, load_from_str};
