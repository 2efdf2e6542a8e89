use camino::{Utf8Path, Utf8PathBuf};

use crate::logging::LogFormat;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Directory name used under the platform configuration directory.
pub const CONFIG_DIR_NAME: &str = "tessera";

/// File name of the language server configuration file.
pub const CONFIG_FILE_NAME: &str = "lsp.toml";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Compact
}

/// Location of the user-wide configuration file, when the platform has one.
#[must_use]
pub fn default_global_config_path() -> Option<Utf8PathBuf> {
    let base = dirs::config_dir()?;
    let base = Utf8PathBuf::from_path_buf(base).ok()?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Location of the project configuration file below `project_root`.
#[must_use]
pub fn project_config_path(project_root: &Utf8Path) -> Utf8PathBuf {
    project_root
        .join(format!(".{CONFIG_DIR_NAME}"))
        .join(CONFIG_FILE_NAME)
}
