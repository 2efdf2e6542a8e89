//! The editor surface consumed by the session manager.
//!
//! Buffers and the workspace they live in are owned by the embedding editor.
//! The runtime only reads identity, language, path and text from them, and
//! asks the workspace to apply edits a server requests.

use camino::{Utf8Path, Utf8PathBuf};
use lsp_types::{Uri, WorkspaceEdit};
use url::Url;

use crate::errors::HostError;
use crate::language::LanguageId;

/// Stable identity of an editor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub u64);

/// Read access to one editor buffer.
pub trait EditorDocument {
    /// Buffer identity.
    fn id(&self) -> DocumentId;

    /// Language of the buffer, if known.
    fn language(&self) -> Option<LanguageId>;

    /// Resolved on-disk path. `None` for unsaved scratch buffers.
    fn real_path(&self) -> Option<&Utf8Path>;

    /// Current buffer text.
    fn text(&self) -> &str;

    /// `true` when the buffer differs from the file on disk.
    fn is_modified(&self) -> bool;
}

/// The set of buffers an editor has open.
pub trait EditorWorkspace {
    /// Every open buffer.
    fn documents(&self) -> Vec<&dyn EditorDocument>;

    /// Buffer with input focus.
    fn active_document(&self) -> Option<DocumentId>;

    /// Applies a server-requested edit. Returns `true` when it was applied.
    fn apply_workspace_edit(&mut self, _edit: &WorkspaceEdit) -> bool {
        false
    }
}

/// Plain owned buffer, used by headless embedders and tests.
#[derive(Debug, Clone)]
pub struct InMemoryDocument {
    id: DocumentId,
    language: Option<LanguageId>,
    path: Option<Utf8PathBuf>,
    text: String,
    modified: bool,
}

impl InMemoryDocument {
    /// Creates an unmodified buffer.
    #[must_use]
    pub fn new(
        id: DocumentId,
        language: Option<LanguageId>,
        path: Option<Utf8PathBuf>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            language,
            path,
            text: text.into(),
            modified: false,
        }
    }

    /// Replaces the text and marks the buffer modified.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.modified = true;
    }

    /// Sets or clears the modified flag.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// Changes the buffer language.
    pub fn set_language(&mut self, language: Option<LanguageId>) {
        self.language = language;
    }
}

impl EditorDocument for InMemoryDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn language(&self) -> Option<LanguageId> {
        self.language.clone()
    }

    fn real_path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn is_modified(&self) -> bool {
        self.modified
    }
}

/// Workspace made of [`InMemoryDocument`]s.
#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkspace {
    documents: Vec<InMemoryDocument>,
    active: Option<DocumentId>,
    applied_edits: Vec<WorkspaceEdit>,
    accept_edits: bool,
}

impl InMemoryWorkspace {
    /// Adds a buffer, replacing any buffer with the same id.
    pub fn insert(&mut self, document: InMemoryDocument) {
        self.documents.retain(|existing| existing.id != document.id);
        self.documents.push(document);
    }

    /// Looks up a buffer.
    #[must_use]
    pub fn get(&self, id: DocumentId) -> Option<&InMemoryDocument> {
        self.documents.iter().find(|document| document.id == id)
    }

    /// Looks up a buffer for mutation.
    pub fn get_mut(&mut self, id: DocumentId) -> Option<&mut InMemoryDocument> {
        self.documents.iter_mut().find(|document| document.id == id)
    }

    /// Gives a buffer input focus.
    pub fn set_active(&mut self, id: Option<DocumentId>) {
        self.active = id;
    }

    /// Makes [`EditorWorkspace::apply_workspace_edit`] report success.
    pub fn accept_edits(&mut self, accept: bool) {
        self.accept_edits = accept;
    }

    /// Edits received from servers, in arrival order.
    #[must_use]
    pub fn applied_edits(&self) -> &[WorkspaceEdit] {
        &self.applied_edits
    }
}

impl EditorWorkspace for InMemoryWorkspace {
    fn documents(&self) -> Vec<&dyn EditorDocument> {
        self.documents
            .iter()
            .map(|document| document as &dyn EditorDocument)
            .collect()
    }

    fn active_document(&self) -> Option<DocumentId> {
        self.active
    }

    fn apply_workspace_edit(&mut self, edit: &WorkspaceEdit) -> bool {
        self.applied_edits.push(edit.clone());
        self.accept_edits
    }
}

/// Canonical URI of a document.
///
/// Documents on disk get a `file://` URI; scratch buffers get a stable
/// `untitled:` URI derived from their id.
///
/// # Errors
///
/// Returns [`HostError::InvalidUri`] when the path is relative or the URI
/// cannot be represented.
pub fn document_uri(document: &dyn EditorDocument) -> Result<Uri, HostError> {
    document.real_path().map_or_else(
        || parse_uri(&format!("untitled:Untitled-{}", document.id().0)),
        path_to_uri,
    )
}

/// Converts an absolute path to a `file://` URI.
///
/// # Errors
///
/// Returns [`HostError::InvalidUri`] for relative or unrepresentable paths.
pub fn path_to_uri(path: &Utf8Path) -> Result<Uri, HostError> {
    let url = Url::from_file_path(path.as_std_path()).map_err(|()| HostError::InvalidUri {
        value: path.to_string(),
    })?;
    parse_uri(url.as_str())
}

fn parse_uri(value: &str) -> Result<Uri, HostError> {
    value.parse().map_err(|_| HostError::InvalidUri {
        value: value.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn document(path: Option<&str>) -> InMemoryDocument {
        InMemoryDocument::new(
            DocumentId(4),
            LanguageId::new("rust").ok(),
            path.map(Utf8PathBuf::from),
            "fn main() {}\n",
        )
    }

    #[cfg(unix)]
    #[rstest]
    fn file_documents_get_percent_encoded_file_uris() {
        let uri = document_uri(&document(Some("/src/my file.rs"))).expect("uri");
        assert_eq!(uri.as_str(), "file:///src/my%20file.rs");
    }

    #[rstest]
    fn scratch_buffers_get_untitled_uris() {
        let uri = document_uri(&document(None)).expect("uri");
        assert_eq!(uri.as_str(), "untitled:Untitled-4");
    }

    #[rstest]
    fn relative_paths_are_rejected() {
        assert!(matches!(
            document_uri(&document(Some("src/main.rs"))),
            Err(HostError::InvalidUri { .. })
        ));
    }

    #[rstest]
    fn editing_marks_the_buffer_modified() {
        let mut workspace = InMemoryWorkspace::default();
        workspace.insert(document(Some("/src/main.rs")));
        let buffer = workspace.get_mut(DocumentId(4)).expect("buffer");
        assert!(!buffer.is_modified());

        buffer.set_text("fn main() { loop {} }\n");

        assert!(workspace.get(DocumentId(4)).expect("buffer").is_modified());
    }

    #[rstest]
    fn edits_are_declined_unless_accepted() {
        let mut workspace = InMemoryWorkspace::default();
        let edit = WorkspaceEdit::default();
        assert!(!workspace.apply_workspace_edit(&edit));

        workspace.accept_edits(true);
        assert!(workspace.apply_workspace_edit(&edit));
        assert_eq!(workspace.applied_edits().len(), 2);
    }
}
