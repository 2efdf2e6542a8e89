//! Error types for the wire codec, the RPC client and process launching.

use std::io;

use thiserror::Error;

/// Transport-layer errors. Every variant is fatal to the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream closed before a complete frame arrived.
    #[error("connection closed by the language server")]
    UnexpectedEof,

    /// The header block ended without a `Content-Length` header.
    #[error("missing Content-Length header")]
    MissingContentLength,

    /// A header line could not be parsed.
    #[error("invalid header line '{line}'")]
    InvalidHeader {
        /// Offending header line, trimmed.
        line: String,
    },

    /// The header announced a body larger than the reader accepts.
    #[error("frame of {length} bytes exceeds the {limit} byte limit")]
    FrameTooLarge {
        /// Announced body length.
        length: usize,
        /// Largest accepted body length.
        limit: usize,
    },

    /// The frame body is not valid JSON.
    #[error("malformed message body: {0}")]
    Body(#[source] serde_json::Error),
}

/// Call-level failures delivered to the caller of a single request.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The connection failed before a response arrived.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with an error object.
    #[error("server returned error {code}: {message}")]
    Server {
        /// JSON-RPC error code.
        code: i64,
        /// Message supplied by the server.
        message: String,
        /// Optional structured data.
        data: Option<serde_json::Value>,
    },

    /// The client was torn down while the call was pending.
    #[error("request cancelled because the connection was closed")]
    Cancelled,

    /// Request parameters failed to serialise.
    #[error("failed to encode request parameters: {0}")]
    Encode(#[source] serde_json::Error),

    /// The response result did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors raised while launching a language server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The configured command line is empty after normalisation.
    #[error("language server command line is empty")]
    EmptyCommand,

    /// The language server binary was not found.
    #[error("language server binary not found: {command}")]
    BinaryNotFound {
        /// The command that was not found.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to spawn the language server process.
    #[error("failed to spawn language server '{command}': {source}")]
    SpawnFailed {
        /// Program that failed to start.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The RPC client could not be attached to the process pipes.
    #[error("failed to connect to language server: {0}")]
    Connection(#[source] TransportError),

    /// The spawned process did not expose a piped stdio handle.
    #[error("language server process is missing its {stream} pipe")]
    MissingPipe {
        /// Name of the missing stream.
        stream: &'static str,
    },
}
