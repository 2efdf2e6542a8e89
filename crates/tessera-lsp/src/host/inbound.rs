//! Notifications and requests initiated by servers.

use lsp_types::{
    ApplyWorkspaceEditParams, LogMessageParams, MessageType, PublishDiagnosticsParams,
    ShowMessageParams, WorkDoneProgressCreateParams,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::SessionManager;
use crate::adapter::{INVALID_PARAMS, JsonRpcReply, METHOD_NOT_FOUND, RequestId};
use crate::document::EditorWorkspace;
use crate::events::{HostEvent, MessageSeverity};
use crate::language::LanguageId;
use crate::session::{SESSION_TARGET, ServerInstance};

impl SessionManager {
    pub(super) fn on_notification(&mut self, language: &LanguageId, method: &str, params: Value) {
        match method {
            "textDocument/publishDiagnostics" => {
                let enabled = self
                    .instance(language)
                    .is_some_and(|instance| instance.config().diagnostics.enable);
                if !enabled {
                    return;
                }
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(params) => self.queued.push(HostEvent::Diagnostics {
                        language: language.clone(),
                        params,
                    }),
                    Err(error) => warn!(
                        target: SESSION_TARGET,
                        language = %language,
                        %error,
                        "malformed diagnostics notification"
                    ),
                }
            }
            "window/logMessage" => {
                if let Ok(params) = serde_json::from_value::<LogMessageParams>(params) {
                    self.server_message(language, params.typ, params.message, false);
                }
            }
            "window/showMessage" => {
                if let Ok(params) = serde_json::from_value::<ShowMessageParams>(params) {
                    self.server_message(language, params.typ, params.message, true);
                }
            }
            "$/progress" => {
                if let Some(progress) = self.progress.update(language, params) {
                    self.queued.push(HostEvent::Progress(progress));
                }
            }
            _ => debug!(
                target: SESSION_TARGET,
                language = %language,
                method,
                "ignoring server notification"
            ),
        }
    }

    fn server_message(
        &mut self,
        language: &LanguageId,
        kind: MessageType,
        message: String,
        show: bool,
    ) {
        let severity = MessageSeverity::from_message_type(kind);
        debug!(
            target: SESSION_TARGET,
            language = %language,
            %severity,
            message = %message,
            "server message"
        );
        self.queued.push(HostEvent::ServerMessage {
            language: language.clone(),
            severity,
            message,
            show,
        });
    }

    pub(super) fn on_request(
        &mut self,
        language: &LanguageId,
        id: RequestId,
        method: &str,
        params: Value,
        workspace: &mut dyn EditorWorkspace,
    ) {
        let reply = match method {
            "window/workDoneProgress/create" => {
                if let Ok(params) = serde_json::from_value::<WorkDoneProgressCreateParams>(params) {
                    self.progress.create(language, &params.token);
                }
                JsonRpcReply::result(id, Value::Null)
            }
            "workspace/applyEdit" => {
                match serde_json::from_value::<ApplyWorkspaceEditParams>(params) {
                    Ok(params) => {
                        let applied = workspace.apply_workspace_edit(&params.edit);
                        JsonRpcReply::result(id, json!({"applied": applied}))
                    }
                    Err(error) => JsonRpcReply::error(id, INVALID_PARAMS, error.to_string()),
                }
            }
            "workspace/configuration" => {
                let items = params
                    .get("items")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                JsonRpcReply::result(id, Value::Array(vec![Value::Null; items]))
            }
            "client/registerCapability" | "client/unregisterCapability" => {
                JsonRpcReply::result(id, Value::Null)
            }
            _ => {
                debug!(
                    target: SESSION_TARGET,
                    language = %language,
                    method,
                    "rejecting unsupported server request"
                );
                JsonRpcReply::error(id, METHOD_NOT_FOUND, format!("unsupported method: {method}"))
            }
        };
        let sent = self
            .instance(language)
            .and_then(ServerInstance::client)
            .map(|client| client.reply(&reply));
        if let Some(Err(error)) = sent {
            warn!(
                target: SESSION_TARGET,
                language = %language,
                method,
                %error,
                "failed to answer server request"
            );
        }
    }
}
