//! Error types surfaced by the session manager and request facade.

use std::fmt;

use tessera_config::ConfigError;
use thiserror::Error;

use crate::adapter::{LaunchError, RpcError};
use crate::capability::{Feature, FeatureSource};
use crate::language::LanguageId;
use crate::session::LifecycleState;

/// Operation being executed when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOperation {
    /// Server initialisation handshake.
    Initialise,
    /// The goto family and references.
    Goto,
    /// `textDocument/hover`.
    Hover,
    /// `textDocument/completion`.
    Completion,
    /// `textDocument/signatureHelp`.
    SignatureHelp,
    /// `textDocument/documentSymbol`.
    DocumentSymbols,
    /// `workspace/symbol`.
    WorkspaceSymbols,
    /// `textDocument/documentHighlight`.
    Highlight,
    /// `textDocument/semanticTokens/full`.
    SemanticTokens,
    /// `textDocument/didOpen` notification.
    DidOpen,
    /// `textDocument/didChange` notification.
    DidChange,
    /// `textDocument/didSave` notification.
    DidSave,
    /// `textDocument/didClose` notification.
    DidClose,
}

impl fmt::Display for HostOperation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Initialise => "initialisation",
            Self::Goto => "goto",
            Self::Hover => "hover",
            Self::Completion => "completion",
            Self::SignatureHelp => "signature help",
            Self::DocumentSymbols => "document symbols",
            Self::WorkspaceSymbols => "workspace symbols",
            Self::Highlight => "document highlight",
            Self::SemanticTokens => "semantic tokens",
            Self::DidOpen => "didOpen",
            Self::DidChange => "didChange",
            Self::DidSave => "didSave",
            Self::DidClose => "didClose",
        };
        formatter.write_str(label)
    }
}

/// Errors returned by [`crate::SessionManager`].
#[derive(Debug, Error)]
pub enum HostError {
    /// The document has no language.
    #[error("document has no language")]
    UnknownLanguage,

    /// No server command is configured for the language.
    #[error("no language server is configured for '{language}'")]
    NotConfigured {
        /// Language requested by the caller.
        language: LanguageId,
    },

    /// The document lies outside the project its server is scoped to.
    #[error("document is outside the project scope of the '{language}' server")]
    OutsideProject {
        /// Language whose server declined the document.
        language: LanguageId,
    },

    /// The server exceeded its restart limit or failed to launch.
    #[error("language server for '{language}' is unavailable")]
    ServerUnavailable {
        /// Language whose server is dead.
        language: LanguageId,
    },

    /// The server has not completed its handshake, or is shutting down.
    #[error("language server for '{language}' is not ready ({state})")]
    ServerNotReady {
        /// Language requested by the caller.
        language: LanguageId,
        /// Lifecycle state at the time of the call.
        state: LifecycleState,
    },

    /// A feature is disabled by configuration or missing server support.
    #[error("{feature} for '{language}' is unavailable: {reason}")]
    FeatureUnavailable {
        /// Language associated with the feature.
        language: LanguageId,
        /// Feature that was requested.
        feature: Feature,
        /// Why the feature is not available.
        reason: FeatureSource,
    },

    /// The call failed at the RPC layer.
    #[error("language server for '{language}' failed during {operation}: {source}")]
    Rpc {
        /// Language associated with the server.
        language: LanguageId,
        /// Operation that failed.
        operation: HostOperation,
        /// Underlying error.
        #[source]
        source: RpcError,
    },

    /// The server process could not be started.
    #[error("failed to launch language server for '{language}': {source}")]
    Launch {
        /// Language whose server failed to start.
        language: LanguageId,
        /// Underlying error.
        #[source]
        source: LaunchError,
    },

    /// No reply arrived within the caller's deadline.
    #[error("timed out waiting for '{language}' during {operation}")]
    Timeout {
        /// Language associated with the server.
        language: LanguageId,
        /// Operation that timed out.
        operation: HostOperation,
    },

    /// Configuration for the language could not be resolved.
    #[error("configuration for '{language}' is invalid: {source}")]
    Config {
        /// Language being configured.
        language: LanguageId,
        /// Underlying error.
        #[source]
        source: ConfigError,
    },

    /// A document path could not be expressed as a URI.
    #[error("cannot build a document URI from '{value}'")]
    InvalidUri {
        /// Offending path or URI text.
        value: String,
    },
}

impl HostError {
    pub(crate) fn not_configured(language: &LanguageId) -> Self {
        Self::NotConfigured {
            language: language.clone(),
        }
    }

    pub(crate) fn unavailable(language: &LanguageId) -> Self {
        Self::ServerUnavailable {
            language: language.clone(),
        }
    }

    pub(crate) fn not_ready(language: &LanguageId, state: LifecycleState) -> Self {
        Self::ServerNotReady {
            language: language.clone(),
            state,
        }
    }

    pub(crate) fn feature_unavailable(
        language: &LanguageId,
        feature: Feature,
        reason: FeatureSource,
    ) -> Self {
        Self::FeatureUnavailable {
            language: language.clone(),
            feature,
            reason,
        }
    }

    pub(crate) fn rpc(language: &LanguageId, operation: HostOperation, source: RpcError) -> Self {
        Self::Rpc {
            language: language.clone(),
            operation,
            source,
        }
    }

    pub(crate) fn timeout(language: &LanguageId, operation: HostOperation) -> Self {
        Self::Timeout {
            language: language.clone(),
            operation,
        }
    }
}
