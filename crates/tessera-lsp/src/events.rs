//! Events flowing from reader threads to the session manager, and from the
//! session manager to the embedding editor.

use std::fmt;

use lsp_types::{MessageType, PublishDiagnosticsParams};
use serde_json::Value;

use crate::adapter::{RequestId, RpcError};
use crate::language::LanguageId;
use crate::progress::ProgressEvent;

/// Message posted by an RPC client's reader thread or completion callback.
///
/// `generation` identifies the client that produced the event; events from a
/// client that has since been replaced are discarded.
#[derive(Debug)]
pub struct ServerEvent {
    /// Language whose server produced the event.
    pub language: LanguageId,
    /// Generation of the RPC client that produced the event.
    pub generation: u64,
    /// Payload.
    pub kind: ServerEventKind,
}

/// Payload of a [`ServerEvent`].
#[derive(Debug)]
pub enum ServerEventKind {
    /// The `initialize` call completed.
    InitializeResponse(Result<Value, RpcError>),
    /// The `shutdown` call completed.
    ShutdownResponse(Result<Value, RpcError>),
    /// A server notification.
    Notification {
        /// Notification method.
        method: String,
        /// Parameters, `null` when absent.
        params: Value,
    },
    /// A server-to-client request awaiting a reply.
    Request {
        /// Identifier to echo in the reply.
        id: RequestId,
        /// Request method.
        method: String,
        /// Parameters, `null` when absent.
        params: Value,
    },
    /// The server's output stream closed.
    Closed {
        /// Transport error that ended the stream, if it did not end cleanly.
        error: Option<String>,
    },
}

/// Severity of a server log or show-message notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    /// Type 1.
    Error,
    /// Type 2.
    Warning,
    /// Type 3.
    Info,
    /// Type 4.
    Log,
    /// Any other value.
    Debug,
}

impl MessageSeverity {
    pub(crate) fn from_message_type(kind: MessageType) -> Self {
        if kind == MessageType::ERROR {
            Self::Error
        } else if kind == MessageType::WARNING {
            Self::Warning
        } else if kind == MessageType::INFO {
            Self::Info
        } else if kind == MessageType::LOG {
            Self::Log
        } else {
            Self::Debug
        }
    }
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
            Self::Log => "Log",
            Self::Debug => "Debug",
        };
        formatter.write_str(label)
    }
}

/// Something the embedding editor should render or react to.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// The server finished its handshake and accepts feature calls.
    Ready {
        /// Language that became ready.
        language: LanguageId,
    },
    /// The server published diagnostics for a document.
    Diagnostics {
        /// Language whose server published them.
        language: LanguageId,
        /// Diagnostics payload.
        params: PublishDiagnosticsParams,
    },
    /// `window/logMessage` or `window/showMessage`.
    ServerMessage {
        /// Originating language.
        language: LanguageId,
        /// Severity reported by the server.
        severity: MessageSeverity,
        /// Message text.
        message: String,
        /// `true` for `window/showMessage`, which asks for user attention.
        show: bool,
    },
    /// Work-done progress changed.
    Progress(ProgressEvent),
    /// A recoverable problem the user should know about.
    Notice {
        /// Affected language.
        language: LanguageId,
        /// Human-readable description.
        message: String,
    },
    /// The server is permanently unavailable until reconfigured.
    Fatal {
        /// Affected language.
        language: LanguageId,
        /// Human-readable description.
        reason: String,
    },
    /// The server completed its shutdown sequence.
    Stopped {
        /// Language whose server stopped.
        language: LanguageId,
    },
}
