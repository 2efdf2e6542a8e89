//! Wire-level plumbing between the session manager and server processes.
//!
//! - [`FrameReader`] and [`FrameWriter`]: `Content-Length` framing.
//! - [`InboundMessage`] and the outbound JSON-RPC 2.0 message types.
//! - [`RpcClient`]: request ids, pending-call correlation and the reader
//!   thread.
//! - [`ServerLauncher`]: process spawning, with [`ProcessLauncher`] as the
//!   production implementation.

mod client;
mod error;
mod jsonrpc;
mod lifecycle;
mod process;
mod transport;

pub use client::{ClientOptions, Completion, PendingCall, PendingReply, RpcClient};
pub(crate) use client::RPC_TARGET;
pub use error::{LaunchError, RpcError, TransportError};
pub use jsonrpc::{
    InboundMessage, JsonRpcError, JsonRpcNotification, JsonRpcReply, JsonRpcRequest,
    INVALID_PARAMS, JsonRpcResponse, METHOD_NOT_FOUND, ReplyOutcome, RequestId,
};
pub(crate) use lifecycle::SUPERVISOR_TARGET;
pub use lifecycle::TERMINATION_GRACE;
pub use process::{
    CommandLine, LaunchRequest, LaunchedServer, ProcessLauncher, ServerLauncher, ServerProcess,
};
pub use transport::{FrameReader, FrameWriter, MAX_CONTENT_LENGTH};
