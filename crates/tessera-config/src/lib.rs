//! Layered configuration for the tessera language server runtime.
//!
//! Settings come from a user-wide file followed by a project file. Each file
//! may contain a `[logging]` table, an `[all]` table shared by every language
//! and one `[language.<id>]` table per language:
//!
//! ```toml
//! [all]
//! signature_enable = false
//!
//! [language.rust]
//! command = "rust-analyzer"
//! env = { RUST_LOG = "warn" }
//!
//! [language.cpp]
//! use = "c"
//! ```
//!
//! [`Config::server_config`] merges those tables into a typed
//! [`ServerConfig`].

mod defaults;
mod error;
mod layers;
mod loader;
mod logging;
mod server;

pub use defaults::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_LOG_FILTER, default_global_config_path,
    default_log_filter, default_log_format, project_config_path,
};
pub use error::ConfigError;
pub use layers::{ConfigLayer, normalise_language};
pub use loader::{Config, ConfigLoader};
pub use logging::{LogFormat, LogFormatParseError, LoggingConfig};
pub use server::{
    AutocompleteConfig, DiagnosticsConfig, HighlightingConfig, HoverConfig, LANGUAGE_ONLY_KEYS,
    SemanticTokensConfig, ServerConfig, SyncPreference,
};
