//! Per-language language server settings.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Keys honoured only inside `[language.<id>]` tables.
///
/// These describe how a single server is launched, so sharing them through
/// `[all]` would launch the same binary for every language.
pub const LANGUAGE_ONLY_KEYS: &[&str] = &[
    "command",
    "env",
    "use",
    "initialization_options_file",
    "rpc_trace",
];

/// How document edits are sent to the server.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SyncPreference {
    /// Use incremental edits when the server supports them.
    #[default]
    Auto,
    /// Always send the full document text.
    Full,
}

/// Settings for one language server after all layers have been merged.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Command line used to launch the server. `None` marks the language unused.
    pub command: Option<String>,
    /// Environment overrides applied on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Serve this language with another language's server.
    #[serde(rename = "use")]
    pub use_language: Option<String>,
    /// Pass the server's stderr through instead of silencing it.
    pub show_server_stderr: bool,
    /// Log every JSON-RPC message body at trace level.
    pub rpc_trace: bool,
    /// JSON file merged into `initializationOptions`.
    pub initialization_options_file: Option<Utf8PathBuf>,
    /// Serve documents that live outside the project root.
    pub use_outside_project_dir: bool,
    /// Serve documents when no project is open.
    pub use_without_project: bool,
    /// Document synchronisation preference.
    pub sync: SyncPreference,
    /// Completion settings.
    pub autocomplete: AutocompleteConfig,
    /// Diagnostics settings.
    pub diagnostics: DiagnosticsConfig,
    /// Hover settings.
    pub hover: HoverConfig,
    /// Enable signature help.
    pub signature_enable: bool,
    /// Enable the goto family of requests.
    pub goto_enable: bool,
    /// Enable document symbol requests.
    pub document_symbols_enable: bool,
    /// Semantic token settings.
    pub semantic_tokens: SemanticTokensConfig,
    /// Document highlight settings.
    pub highlighting: HighlightingConfig,
    /// JSON file holding formatting options.
    pub formatting_options_file: Option<Utf8PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: None,
            env: BTreeMap::new(),
            use_language: None,
            show_server_stderr: false,
            rpc_trace: false,
            initialization_options_file: None,
            use_outside_project_dir: false,
            use_without_project: true,
            sync: SyncPreference::Auto,
            autocomplete: AutocompleteConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            hover: HoverConfig::default(),
            signature_enable: true,
            goto_enable: true,
            document_symbols_enable: true,
            semantic_tokens: SemanticTokensConfig::default(),
            highlighting: HighlightingConfig::default(),
            formatting_options_file: None,
        }
    }
}

impl ServerConfig {
    /// Returns the trimmed command line, or `None` when it is missing or blank.
    #[must_use]
    pub fn command_line(&self) -> Option<&str> {
        self.command
            .as_deref()
            .map(str::trim)
            .filter(|command| !command.is_empty())
    }

    /// Returns the alias target, normalised, when one is configured.
    #[must_use]
    pub fn alias(&self) -> Option<String> {
        self.use_language
            .as_deref()
            .map(|language| language.trim().to_lowercase())
            .filter(|language| !language.is_empty())
    }
}

/// Completion popup settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AutocompleteConfig {
    /// Enable completion requests.
    pub enable: bool,
    /// Extra multi-character sequences that trigger completion.
    pub trigger_sequences: Vec<String>,
    /// Maximum entries retained from one completion response.
    pub window_max_entries: u32,
    /// Maximum rows displayed at once.
    pub window_max_displayed: u32,
    /// Maximum popup width in characters.
    pub window_max_width: u32,
    /// Insert the item label instead of its insert text.
    pub use_label: bool,
    /// Apply `additionalTextEdits` from accepted items.
    pub apply_additional_edits: bool,
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            enable: true,
            trigger_sequences: Vec::new(),
            window_max_entries: 20,
            window_max_displayed: 20,
            window_max_width: 200,
            use_label: true,
            apply_additional_edits: false,
        }
    }
}

/// Diagnostics rendering settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Enable diagnostics rendering.
    pub enable: bool,
    /// Indicator style for errors.
    pub error_style: String,
    /// Indicator style for warnings.
    pub warning_style: String,
    /// Indicator style for information.
    pub info_style: String,
    /// Indicator style for hints.
    pub hint_style: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            error_style: String::from("#ff3030;;squiggle"),
            warning_style: String::from("#c0c000;;squiggle"),
            info_style: String::from("#00c0c0;;dots"),
            hint_style: String::from("#00c000;;dots"),
        }
    }
}

/// Hover popup settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HoverConfig {
    /// Enable hover requests.
    pub enable: bool,
    /// Maximum lines shown in the popup.
    pub popup_max_lines: u32,
    /// Maximum paragraphs shown in the popup.
    pub popup_max_paragraphs: u32,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            enable: true,
            popup_max_lines: 20,
            popup_max_paragraphs: 1000,
        }
    }
}

/// Semantic token settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SemanticTokensConfig {
    /// Enable semantic token requests.
    pub enable: bool,
    /// Style applied to structural token types.
    pub type_style: String,
}

impl Default for SemanticTokensConfig {
    fn default() -> Self {
        Self {
            enable: false,
            type_style: String::from("#0000d0"),
        }
    }
}

/// Document highlight settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HighlightingConfig {
    /// Enable document highlight requests.
    pub enable: bool,
    /// Indicator style used for highlighted ranges.
    pub style: String,
}

impl Default for HighlightingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            style: String::from("#a0a0ff;;roundbox"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, None)]
    #[case(Some("   "), None)]
    #[case(Some("  clangd  "), Some("clangd"))]
    fn command_line_trims_and_rejects_blank(
        #[case] command: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let config = ServerConfig {
            command: command.map(String::from),
            ..ServerConfig::default()
        };
        assert_eq!(config.command_line(), expected);
    }

    #[rstest]
    fn alias_is_normalised() {
        let config = ServerConfig {
            use_language: Some(String::from(" C ")),
            ..ServerConfig::default()
        };
        assert_eq!(config.alias().as_deref(), Some("c"));
    }
}
