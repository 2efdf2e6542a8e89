//! Typed feature requests.
//!
//! Every call is gated before anything is written: the server must be
//! ready, the feature must survive negotiation, and the document must be
//! in the server's project scope. The document is opened on the server if
//! it has not been already. Replies are decoded into `lsp-types` values when
//! the caller waits on the returned [`PendingRequest`].

use std::time::Duration;

use lsp_types::{
    CompletionResponse, DocumentHighlight, DocumentSymbolResponse, Hover, Location, LocationLink,
    PartialResultParams, Position, ReferenceContext, ReferenceParams, SemanticTokensResult,
    SignatureHelp, TextDocumentIdentifier, TextDocumentPositionParams, WorkDoneProgressParams,
    WorkspaceSymbolResponse,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::adapter::{PendingReply, RpcError};
use crate::capability::Feature;
use crate::document::{EditorDocument, document_uri};
use crate::errors::{HostError, HostOperation};
use crate::host::{SessionManager, active_mut, eligible};
use crate::language::LanguageId;
use crate::session::{LifecycleState, ServerInstance};
use crate::sync::DocumentSync;

type Decoder<T> = fn(Value) -> Result<T, serde_json::Error>;

/// Navigation request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GotoKind {
    /// `textDocument/definition`.
    Definition,
    /// `textDocument/declaration`.
    Declaration,
    /// `textDocument/typeDefinition`.
    TypeDefinition,
    /// `textDocument/implementation`.
    Implementation,
    /// `textDocument/references`.
    References,
}

impl GotoKind {
    /// Protocol method name.
    #[must_use]
    pub fn method(self) -> &'static str {
        match self {
            Self::Definition => "textDocument/definition",
            Self::Declaration => "textDocument/declaration",
            Self::TypeDefinition => "textDocument/typeDefinition",
            Self::Implementation => "textDocument/implementation",
            Self::References => "textDocument/references",
        }
    }

    /// `true` for kinds whose multiple results are listed rather than
    /// offered as a choice.
    #[must_use]
    pub fn lists_inline(self) -> bool {
        matches!(self, Self::Implementation | Self::References)
    }
}

/// Locations returned by a goto request, normalised from the protocol's
/// `null`, single-object and array forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationResponse {
    /// No location.
    Empty,
    /// Exactly one location.
    Single(Location),
    /// Two or more locations.
    Multiple(Vec<Location>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationItem {
    Link(LocationLink),
    Plain(Location),
}

impl From<LocationItem> for Location {
    fn from(item: LocationItem) -> Self {
        match item {
            LocationItem::Link(link) => Self {
                uri: link.target_uri,
                range: link.target_selection_range,
            },
            LocationItem::Plain(location) => location,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLocations {
    Many(Vec<LocationItem>),
    One(LocationItem),
}

impl LocationResponse {
    /// Decodes a goto result.
    ///
    /// # Errors
    ///
    /// Returns the decode error for payloads that are not locations.
    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let raw: Option<RawLocations> = serde_json::from_value(value)?;
        let locations: Vec<Location> = match raw {
            None => Vec::new(),
            Some(RawLocations::One(item)) => vec![item.into()],
            Some(RawLocations::Many(items)) => items.into_iter().map(Location::from).collect(),
        };
        Ok(Self::from_locations(locations))
    }

    fn from_locations(mut locations: Vec<Location>) -> Self {
        match locations.len() {
            0 => Self::Empty,
            1 => locations.pop().map_or(Self::Empty, Self::Single),
            _ => Self::Multiple(locations),
        }
    }

    /// Every location, in server order.
    #[must_use]
    pub fn locations(&self) -> &[Location] {
        match self {
            Self::Empty => &[],
            Self::Single(location) => std::slice::from_ref(location),
            Self::Multiple(locations) => locations,
        }
    }
}

/// What the editor should do with a goto result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GotoOutcome {
    /// Nothing was found; no visible effect.
    Nothing,
    /// Jump straight to the location.
    Navigate(Location),
    /// Let the user pick one of several locations.
    Choose(Vec<Location>),
    /// Render every location in a results view.
    ListInline(Vec<Location>),
}

impl GotoOutcome {
    /// Applies the navigation policy for `kind` to `response`.
    #[must_use]
    pub fn new(kind: GotoKind, response: LocationResponse) -> Self {
        match response {
            LocationResponse::Empty => Self::Nothing,
            LocationResponse::Single(location) => Self::Navigate(location),
            LocationResponse::Multiple(locations) if kind.lists_inline() => {
                Self::ListInline(locations)
            }
            LocationResponse::Multiple(locations) => Self::Choose(locations),
        }
    }
}

/// A feature request in flight.
pub struct PendingRequest<T> {
    reply: PendingReply,
    language: LanguageId,
    operation: HostOperation,
    decode: Decoder<T>,
}

impl<T> PendingRequest<T> {
    /// Request id allocated on the connection.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.reply.id()
    }

    /// Blocks until the reply arrives.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Rpc`] for server errors, cancellations and
    /// replies that do not decode.
    pub fn wait(self) -> Result<T, HostError> {
        let Self {
            reply,
            language,
            operation,
            decode,
        } = self;
        finish(&language, operation, decode, reply.wait())
    }

    /// Waits up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Timeout`] while the reply is outstanding, and
    /// the errors of [`PendingRequest::wait`] otherwise.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, HostError> {
        let outcome = self
            .reply
            .wait_timeout(timeout)
            .ok_or_else(|| HostError::timeout(&self.language, self.operation))?;
        finish(&self.language, self.operation, self.decode, outcome)
    }
}

fn finish<T>(
    language: &LanguageId,
    operation: HostOperation,
    decode: Decoder<T>,
    outcome: Result<Value, RpcError>,
) -> Result<T, HostError> {
    outcome
        .and_then(|value| decode(value).map_err(RpcError::Decode))
        .map_err(|source| HostError::rpc(language, operation, source))
}

struct CallContext {
    feature: Feature,
    operation: HostOperation,
    method: &'static str,
}

impl SessionManager {
    /// Sends a goto-family request for the symbol at `position`.
    ///
    /// Wrap the decoded reply in [`GotoOutcome::new`] to apply the
    /// navigation policy.
    ///
    /// # Errors
    ///
    /// Fails without writing anything when the server is not ready, the
    /// feature is unavailable or the document is out of scope.
    pub fn goto(
        &mut self,
        kind: GotoKind,
        document: &dyn EditorDocument,
        position: Position,
    ) -> Result<PendingRequest<LocationResponse>, HostError> {
        let context = CallContext {
            feature: Feature::Goto,
            operation: HostOperation::Goto,
            method: kind.method(),
        };
        if kind == GotoKind::References {
            self.document_call(
                document,
                &context,
                |text_document| ReferenceParams {
                    text_document_position: TextDocumentPositionParams {
                        text_document,
                        position,
                    },
                    work_done_progress_params: WorkDoneProgressParams::default(),
                    partial_result_params: PartialResultParams::default(),
                    context: ReferenceContext {
                        include_declaration: true,
                    },
                },
                LocationResponse::decode,
            )
        } else {
            self.document_call(
                document,
                &context,
                |text_document| TextDocumentPositionParams {
                    text_document,
                    position,
                },
                LocationResponse::decode,
            )
        }
    }

    /// Requests hover information.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn hover(
        &mut self,
        document: &dyn EditorDocument,
        position: Position,
    ) -> Result<PendingRequest<Option<Hover>>, HostError> {
        let context = CallContext {
            feature: Feature::Hover,
            operation: HostOperation::Hover,
            method: "textDocument/hover",
        };
        self.position_call(document, &context, position)
    }

    /// Requests completion candidates.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn completion(
        &mut self,
        document: &dyn EditorDocument,
        position: Position,
    ) -> Result<PendingRequest<Option<CompletionResponse>>, HostError> {
        let context = CallContext {
            feature: Feature::Autocomplete,
            operation: HostOperation::Completion,
            method: "textDocument/completion",
        };
        self.position_call(document, &context, position)
    }

    /// Requests signature help.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn signature_help(
        &mut self,
        document: &dyn EditorDocument,
        position: Position,
    ) -> Result<PendingRequest<Option<SignatureHelp>>, HostError> {
        let context = CallContext {
            feature: Feature::SignatureHelp,
            operation: HostOperation::SignatureHelp,
            method: "textDocument/signatureHelp",
        };
        self.position_call(document, &context, position)
    }

    /// Requests highlights for the symbol at `position`.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn document_highlight(
        &mut self,
        document: &dyn EditorDocument,
        position: Position,
    ) -> Result<PendingRequest<Option<Vec<DocumentHighlight>>>, HostError> {
        let context = CallContext {
            feature: Feature::Highlighting,
            operation: HostOperation::Highlight,
            method: "textDocument/documentHighlight",
        };
        self.position_call(document, &context, position)
    }

    /// Requests the document's symbol outline.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn document_symbols(
        &mut self,
        document: &dyn EditorDocument,
    ) -> Result<PendingRequest<Option<DocumentSymbolResponse>>, HostError> {
        let context = CallContext {
            feature: Feature::DocumentSymbols,
            operation: HostOperation::DocumentSymbols,
            method: "textDocument/documentSymbol",
        };
        self.document_call(
            document,
            &context,
            |text_document| json!({"textDocument": text_document}),
            serde_json::from_value,
        )
    }

    /// Requests semantic tokens for the whole document.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::goto`].
    pub fn semantic_tokens_full(
        &mut self,
        document: &dyn EditorDocument,
    ) -> Result<PendingRequest<Option<SemanticTokensResult>>, HostError> {
        let context = CallContext {
            feature: Feature::SemanticTokens,
            operation: HostOperation::SemanticTokens,
            method: "textDocument/semanticTokens/full",
        };
        self.document_call(
            document,
            &context,
            |text_document| json!({"textDocument": text_document}),
            serde_json::from_value,
        )
    }

    /// Searches symbols across the project served for `language`.
    ///
    /// # Errors
    ///
    /// Fails without writing anything when the server is not ready or the
    /// feature is unavailable.
    pub fn workspace_symbols(
        &mut self,
        language: &LanguageId,
        query: &str,
    ) -> Result<PendingRequest<Option<WorkspaceSymbolResponse>>, HostError> {
        let context = CallContext {
            feature: Feature::WorkspaceSymbols,
            operation: HostOperation::WorkspaceSymbols,
            method: "workspace/symbol",
        };
        let serving = self.gate(language, &context)?;
        self.issue(
            &serving,
            &context,
            json!({"query": query}),
            serde_json::from_value,
        )
    }

    fn position_call<T: DeserializeOwned>(
        &mut self,
        document: &dyn EditorDocument,
        context: &CallContext,
        position: Position,
    ) -> Result<PendingRequest<T>, HostError> {
        self.document_call(
            document,
            context,
            |text_document| TextDocumentPositionParams {
                text_document,
                position,
            },
            serde_json::from_value,
        )
    }

    /// Checks readiness and the feature gate; returns the serving language.
    fn gate(&mut self, language: &LanguageId, context: &CallContext) -> Result<LanguageId, HostError> {
        let serving = self.resolve(language)?;
        let instance = self
            .instance(&serving)
            .ok_or_else(|| HostError::not_configured(language))?;
        if instance.state() != LifecycleState::Ready {
            return Err(HostError::not_ready(&serving, instance.state()));
        }
        let state = instance.capabilities().state(context.feature);
        if !state.enabled {
            return Err(HostError::feature_unavailable(
                &serving,
                context.feature,
                state.source,
            ));
        }
        Ok(serving)
    }

    fn document_call<P: Serialize, T>(
        &mut self,
        document: &dyn EditorDocument,
        context: &CallContext,
        params: impl FnOnce(TextDocumentIdentifier) -> P,
        decode: Decoder<T>,
    ) -> Result<PendingRequest<T>, HostError> {
        let language = document.language().ok_or(HostError::UnknownLanguage)?;
        let serving = self.gate(&language, context)?;
        let uri = document_uri(document)?;

        let root = self.project_root.as_deref();
        let instance = active_mut(&mut self.servers, &serving)
            .ok_or_else(|| HostError::not_configured(&serving))?;
        if !eligible(root, instance.config(), document) {
            return Err(HostError::OutsideProject { language: serving });
        }
        DocumentSync {
            instance,
            versions: &mut self.versions,
        }
        .did_open(document)?;

        self.issue(&serving, context, params(TextDocumentIdentifier { uri }), decode)
    }

    fn issue<P: Serialize, T>(
        &self,
        serving: &LanguageId,
        context: &CallContext,
        params: P,
        decode: Decoder<T>,
    ) -> Result<PendingRequest<T>, HostError> {
        let client = self
            .instance(serving)
            .and_then(ServerInstance::client)
            .ok_or_else(|| HostError::not_ready(serving, LifecycleState::Stopped))?;
        let reply = client
            .call(context.method, params)
            .map_err(|source| HostError::rpc(serving, context.operation, source))?;
        Ok(PendingRequest {
            reply,
            language: serving.clone(),
            operation: context.operation,
            decode,
        })
    }
}
