//! Language Server Protocol client runtime for an editor.
//!
//! [`SessionManager`] launches one server per configured language, drives
//! the `initialize`/`shutdown` handshakes, keeps editor documents in sync and
//! restarts servers that crash. Feature calls such as goto, hover and
//! completion are gated on the capabilities negotiated with each server and
//! return a [`PendingRequest`] the caller waits on.
//!
//! Server output is read on background threads; everything that changes a
//! server's state happens when the editor calls
//! [`SessionManager::process_events`], which returns the [`HostEvent`]s to
//! render. Editors plug in through the [`EditorDocument`] and
//! [`EditorWorkspace`] traits, and tests replace process spawning through
//! [`adapter::ServerLauncher`].

pub mod adapter;
mod capability;
mod document;
mod errors;
mod events;
mod host;
mod language;
mod progress;
mod requests;
mod session;
mod sync;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use capability::{CapabilitySet, Feature, FeatureSource, FeatureState, STRUCTURAL_TOKEN_TYPES};
pub use document::{
    DocumentId, EditorDocument, EditorWorkspace, InMemoryDocument, InMemoryWorkspace,
    document_uri, path_to_uri,
};
pub use errors::{HostError, HostOperation};
pub use events::{HostEvent, MessageSeverity, ServerEvent, ServerEventKind};
pub use host::{ServerStatus, SessionManager};
pub use language::{LanguageId, LanguageParseError};
pub use progress::{ProgressEvent, ProgressTracker};
pub use requests::{GotoKind, GotoOutcome, LocationResponse, PendingRequest};
pub use session::{LifecycleState, MAX_RESTARTS, SHUTDOWN_TIMEOUT};
pub use sync::TextChange;
