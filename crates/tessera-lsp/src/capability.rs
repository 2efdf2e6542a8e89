//! Capability negotiation.
//!
//! A [`CapabilitySet`] is parsed once from each successful `initialize`
//! response. Server support only ever narrows what configuration enables: a
//! feature the user disabled stays disabled whatever the server advertises.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tessera_config::{ServerConfig, SyncPreference};

/// Token types whose positions receive the structural type style.
pub const STRUCTURAL_TOKEN_TYPES: [&str; 7] = [
    "namespace",
    "type",
    "class",
    "enum",
    "interface",
    "struct",
    "decorator",
];

/// `TextDocumentSyncKind.Incremental`.
const INCREMENTAL_SYNC_KIND: i64 = 2;

/// Editor feature gated by configuration and server support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    /// `textDocument/completion`.
    Autocomplete,
    /// `textDocument/signatureHelp`.
    SignatureHelp,
    /// `textDocument/hover`.
    Hover,
    /// The goto family and `textDocument/references`.
    Goto,
    /// `textDocument/documentSymbol`.
    DocumentSymbols,
    /// `workspace/symbol`.
    WorkspaceSymbols,
    /// `textDocument/documentHighlight`.
    Highlighting,
    /// `textDocument/semanticTokens/full`.
    SemanticTokens,
    /// `textDocument/publishDiagnostics` rendering.
    Diagnostics,
}

impl Feature {
    /// Every feature, in a stable order.
    pub const ALL: [Self; 9] = [
        Self::Autocomplete,
        Self::SignatureHelp,
        Self::Hover,
        Self::Goto,
        Self::DocumentSymbols,
        Self::WorkspaceSymbols,
        Self::Highlighting,
        Self::SemanticTokens,
        Self::Diagnostics,
    ];

    fn configured(self, config: &ServerConfig) -> bool {
        match self {
            Self::Autocomplete => config.autocomplete.enable,
            Self::SignatureHelp => config.signature_enable,
            Self::Hover => config.hover.enable,
            Self::Goto => config.goto_enable,
            Self::DocumentSymbols => config.document_symbols_enable,
            Self::WorkspaceSymbols => true,
            Self::Highlighting => config.highlighting.enable,
            Self::SemanticTokens => config.semantic_tokens.enable,
            Self::Diagnostics => config.diagnostics.enable,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Autocomplete => "autocomplete",
            Self::SignatureHelp => "signature help",
            Self::Hover => "hover",
            Self::Goto => "goto",
            Self::DocumentSymbols => "document symbols",
            Self::WorkspaceSymbols => "workspace symbols",
            Self::Highlighting => "highlighting",
            Self::SemanticTokens => "semantic tokens",
            Self::Diagnostics => "diagnostics",
        };
        formatter.write_str(label)
    }
}

/// Why a feature is (un)available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    /// Enabled in configuration and advertised by the server.
    ServerAdvertised,
    /// Turned off in configuration.
    DisabledByConfig,
    /// Enabled in configuration but not supported by the server.
    MissingOnServer,
}

impl fmt::Display for FeatureSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ServerAdvertised => "advertised by server",
            Self::DisabledByConfig => "disabled by configuration",
            Self::MissingOnServer => "missing from server",
        };
        formatter.write_str(label)
    }
}

/// Effective state for a single feature after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureState {
    /// Feature being described.
    pub feature: Feature,
    /// Whether the feature is usable.
    pub enabled: bool,
    /// Why the feature is (un)available.
    pub source: FeatureSource,
}

/// Capabilities negotiated with one server instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    incremental_sync: bool,
    completion_triggers: String,
    signature_triggers: String,
    semantic_token_mask: u64,
    states: BTreeMap<Feature, FeatureState>,
}

impl CapabilitySet {
    /// Parses the `initialize` result and narrows `config` with it.
    #[must_use]
    pub fn negotiate(initialize_result: &Value, config: &ServerConfig) -> Self {
        let capabilities = initialize_result
            .get("capabilities")
            .unwrap_or(&Value::Null);

        let sync_kind = capabilities
            .pointer("/textDocumentSync/change")
            .or_else(|| capabilities.get("textDocumentSync"))
            .and_then(Value::as_i64);
        let incremental_sync =
            sync_kind == Some(INCREMENTAL_SYNC_KIND) && config.sync == SyncPreference::Auto;

        let completion_triggers =
            trigger_characters(capabilities, "/completionProvider/triggerCharacters");
        let signature_triggers =
            trigger_characters(capabilities, "/signatureHelpProvider/triggerCharacters");
        let semantic_token_mask = capabilities
            .pointer("/semanticTokensProvider/legend/tokenTypes")
            .and_then(Value::as_array)
            .map_or(0, |types| structural_mask(types));

        let mut set = Self {
            incremental_sync,
            completion_triggers,
            signature_triggers,
            semantic_token_mask,
            states: BTreeMap::new(),
        };
        for feature in Feature::ALL {
            let state = if !feature.configured(config) {
                FeatureState {
                    feature,
                    enabled: false,
                    source: FeatureSource::DisabledByConfig,
                }
            } else if set.server_supports(feature, capabilities) {
                FeatureState {
                    feature,
                    enabled: true,
                    source: FeatureSource::ServerAdvertised,
                }
            } else {
                FeatureState {
                    feature,
                    enabled: false,
                    source: FeatureSource::MissingOnServer,
                }
            };
            set.states.insert(feature, state);
        }
        set
    }

    fn server_supports(&self, feature: Feature, capabilities: &Value) -> bool {
        match feature {
            Feature::Autocomplete => !self.completion_triggers.is_empty(),
            Feature::SignatureHelp => !self.signature_triggers.is_empty(),
            Feature::Hover => provider(capabilities, "hoverProvider"),
            Feature::Goto => provider(capabilities, "definitionProvider"),
            Feature::DocumentSymbols => provider(capabilities, "documentSymbolProvider"),
            Feature::WorkspaceSymbols => provider(capabilities, "workspaceSymbolProvider"),
            Feature::Highlighting => provider(capabilities, "documentHighlightProvider"),
            Feature::SemanticTokens => {
                capabilities.pointer("/semanticTokensProvider/full/delta") == Some(&Value::Bool(true))
            }
            Feature::Diagnostics => true,
        }
    }

    /// Returns the state for `feature`.
    #[must_use]
    pub fn state(&self, feature: Feature) -> FeatureState {
        self.states.get(&feature).copied().unwrap_or(FeatureState {
            feature,
            enabled: false,
            source: FeatureSource::MissingOnServer,
        })
    }

    /// Shorthand for `state(feature).enabled`.
    #[must_use]
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.state(feature).enabled
    }

    /// Returns an iterator over all resolved feature states.
    pub fn states(&self) -> impl Iterator<Item = FeatureState> + '_ {
        self.states.values().copied()
    }

    /// `true` when edits may be sent as range replacements.
    #[must_use]
    pub fn supports_incremental_sync(&self) -> bool {
        self.incremental_sync
    }

    /// Concatenated completion trigger characters.
    #[must_use]
    pub fn completion_triggers(&self) -> &str {
        &self.completion_triggers
    }

    /// Concatenated signature help trigger characters.
    #[must_use]
    pub fn signature_triggers(&self) -> &str {
        &self.signature_triggers
    }

    /// Bit `i` is set when the server's `i`-th token type is structural.
    #[must_use]
    pub fn semantic_token_mask(&self) -> u64 {
        self.semantic_token_mask
    }
}

fn provider(capabilities: &Value, key: &str) -> bool {
    matches!(
        capabilities.get(key),
        Some(Value::Bool(true) | Value::Object(_))
    )
}

fn trigger_characters(capabilities: &Value, pointer: &str) -> String {
    capabilities
        .pointer(pointer)
        .and_then(Value::as_array)
        .map(|characters| {
            characters
                .iter()
                .filter_map(Value::as_str)
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn structural_mask(token_types: &[Value]) -> u64 {
    token_types
        .iter()
        .zip(0_u32..u64::BITS)
        .filter(|(name, _)| {
            name.as_str()
                .is_some_and(|name| STRUCTURAL_TOKEN_TYPES.contains(&name))
        })
        .fold(0, |mask, (_, bit)| mask | (1_u64 << bit))
}
