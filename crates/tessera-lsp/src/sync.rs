//! Document synchronisation: `didOpen`, `didChange`, `didSave` and
//! `didClose`.
//!
//! Open records live on the [`ServerInstance`] and die with it. Version
//! counters are keyed by real path and shared by every server, so a file
//! that is closed and reopened, or moved to a restarted server, never sees
//! a version number twice.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, Range, TextDocumentContentChangeEvent, TextDocumentIdentifier,
    TextDocumentItem, VersionedTextDocumentIdentifier,
};
use serde::Serialize;
use tracing::debug;

use crate::document::{EditorDocument, document_uri};
use crate::errors::{HostError, HostOperation};
use crate::session::{LifecycleState, OpenDocument, ServerInstance};

const SYNC_TARGET: &str = "tessera_lsp::sync";

/// Per-path document versions. Entries are never evicted.
#[derive(Debug, Default)]
pub(crate) struct VersionCounters {
    counters: HashMap<Utf8PathBuf, i32>,
}

impl VersionCounters {
    /// Next version for `path`: 1 on first use, 0 for documents with no path.
    pub(crate) fn next(&mut self, path: Option<&Utf8Path>) -> i32 {
        let Some(path) = path else {
            return 0;
        };
        let counter = self.counters.entry(path.to_owned()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }
}

/// An edit reported by the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    /// Replaced range, in the document as it was before the edit. `None`
    /// means the whole document was replaced.
    pub range: Option<Range>,
    /// Replacement text for `range`.
    pub text: String,
}

impl TextChange {
    /// A replacement of `range` with `text`.
    #[must_use]
    pub fn ranged(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }

    /// A whole-document replacement.
    #[must_use]
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }
}

/// Sync operations for one server, borrowing the shared version counters.
pub(crate) struct DocumentSync<'a> {
    pub(crate) instance: &'a mut ServerInstance,
    pub(crate) versions: &'a mut VersionCounters,
}

impl DocumentSync<'_> {
    fn ready(&self) -> bool {
        self.instance.state() == LifecycleState::Ready
    }

    /// Opens `document`. Returns `false` when it was already open or the
    /// server is not ready yet.
    pub(crate) fn did_open(&mut self, document: &dyn EditorDocument) -> Result<bool, HostError> {
        if !self.ready() || self.instance.open.contains_key(&document.id()) {
            return Ok(false);
        }
        let uri = document_uri(document)?;
        let version = self.versions.next(document.real_path());
        let language_id = document
            .language()
            .unwrap_or_else(|| self.instance.language().clone());
        debug!(
            target: SYNC_TARGET,
            language = %self.instance.language(),
            uri = uri.as_str(),
            version,
            "opening document"
        );
        self.instance
            .open
            .insert(document.id(), OpenDocument { uri: uri.clone() });
        self.notify(
            "textDocument/didOpen",
            DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri,
                    language_id: language_id.to_string(),
                    version,
                    text: document.text().to_owned(),
                },
            },
            HostOperation::DidOpen,
        )?;
        Ok(true)
    }

    /// Sends an edit. A document the server has not seen is opened instead.
    pub(crate) fn did_change(
        &mut self,
        document: &dyn EditorDocument,
        change: &TextChange,
    ) -> Result<(), HostError> {
        if !self.ready() {
            return Ok(());
        }
        let Some(open) = self.instance.open.get(&document.id()) else {
            self.did_open(document)?;
            return Ok(());
        };
        let uri = open.uri.clone();
        let version = self.versions.next(document.real_path());
        let content = match change.range {
            Some(range) if self.instance.capabilities().supports_incremental_sync() => {
                TextDocumentContentChangeEvent {
                    range: Some(range),
                    range_length: None,
                    text: change.text.clone(),
                }
            }
            _ => TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: document.text().to_owned(),
            },
        };
        debug!(
            target: SYNC_TARGET,
            language = %self.instance.language(),
            uri = uri.as_str(),
            version,
            incremental = content.range.is_some(),
            "sending document change"
        );
        self.notify(
            "textDocument/didChange",
            DidChangeTextDocumentParams {
                text_document: VersionedTextDocumentIdentifier { uri, version },
                content_changes: vec![content],
            },
            HostOperation::DidChange,
        )
    }

    /// Sends the saved text, opening the document first if necessary.
    pub(crate) fn did_save(&mut self, document: &dyn EditorDocument) -> Result<(), HostError> {
        if !self.ready() {
            return Ok(());
        }
        self.did_open(document)?;
        let Some(open) = self.instance.open.get(&document.id()) else {
            return Ok(());
        };
        let uri = open.uri.clone();
        self.notify(
            "textDocument/didSave",
            DidSaveTextDocumentParams {
                text_document: TextDocumentIdentifier { uri },
                text: Some(document.text().to_owned()),
            },
            HostOperation::DidSave,
        )
    }

    /// Closes `document`. Returns `false` when it was not open.
    pub(crate) fn did_close(&mut self, document: &dyn EditorDocument) -> Result<bool, HostError> {
        let Some(open) = self.instance.open.remove(&document.id()) else {
            return Ok(false);
        };
        debug!(
            target: SYNC_TARGET,
            language = %self.instance.language(),
            uri = open.uri.as_str(),
            "closing document"
        );
        if self.ready() {
            self.notify(
                "textDocument/didClose",
                DidCloseTextDocumentParams {
                    text_document: TextDocumentIdentifier { uri: open.uri },
                },
                HostOperation::DidClose,
            )?;
        }
        Ok(true)
    }

    fn notify<P: Serialize>(
        &self,
        method: &str,
        params: P,
        operation: HostOperation,
    ) -> Result<(), HostError> {
        let Some(client) = self.instance.client() else {
            return Ok(());
        };
        client
            .notify(method, params)
            .map_err(|source| HostError::rpc(self.instance.language(), operation, source))
    }
}
