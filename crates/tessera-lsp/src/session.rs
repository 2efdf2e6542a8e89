//! Per-server lifecycle: launch, handshake, shutdown and teardown.
//!
//! A [`ServerInstance`] never outlives its process. Restarts replace the
//! whole instance, carrying only the restart counter across.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use lsp_types::Uri;
use serde_json::{Value, json};
use tessera_config::ServerConfig;
use tracing::{debug, info, warn};

use crate::adapter::{
    ClientOptions, CommandLine, LaunchError, LaunchRequest, LaunchedServer, RpcClient, RpcError,
    ServerLauncher, ServerProcess,
};
use crate::capability::{CapabilitySet, STRUCTURAL_TOKEN_TYPES};
use crate::document::{DocumentId, path_to_uri};
use crate::events::{ServerEvent, ServerEventKind};
use crate::language::LanguageId;

pub(crate) const SESSION_TARGET: &str = "tessera_lsp::session";

/// Restarts tolerated before a server is declared dead. The initial launch
/// is not counted, so a server is launched at most `MAX_RESTARTS + 1` times.
pub const MAX_RESTARTS: u32 = 5;

/// How long a server may take to answer `shutdown` and exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of one server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No process is running.
    Stopped,
    /// The process is being launched.
    Starting,
    /// `initialize` was sent and no reply has arrived.
    AwaitingInitializeResponse,
    /// Handshake complete; feature calls are accepted.
    Ready,
    /// `shutdown` was sent.
    ShuttingDown,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::AwaitingInitializeResponse => "awaiting initialize response",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
        };
        formatter.write_str(label)
    }
}

/// Server-side view of an open document.
#[derive(Debug, Clone)]
pub(crate) struct OpenDocument {
    pub(crate) uri: Uri,
}

struct Connection {
    client: RpcClient,
    process: Box<dyn ServerProcess>,
}

/// What a launch needs from the session manager.
pub(crate) struct StartContext<'a> {
    pub(crate) launcher: &'a dyn ServerLauncher,
    pub(crate) project_root: Option<&'a Utf8Path>,
    pub(crate) events: &'a Sender<ServerEvent>,
    pub(crate) generation: u64,
}

pub(crate) struct ServerInstance {
    language: LanguageId,
    config: ServerConfig,
    state: LifecycleState,
    capabilities: CapabilitySet,
    restarts: u32,
    connection: Option<Connection>,
    pub(crate) open: HashMap<DocumentId, OpenDocument>,
    initialize_response: Option<Value>,
    shutdown_deadline: Option<Instant>,
}

impl ServerInstance {
    pub(crate) fn new(language: LanguageId, config: ServerConfig, restarts: u32) -> Self {
        Self {
            language,
            config,
            state: LifecycleState::Stopped,
            capabilities: CapabilitySet::default(),
            restarts,
            connection: None,
            open: HashMap::new(),
            initialize_response: None,
            shutdown_deadline: None,
        }
    }

    pub(crate) fn language(&self) -> &LanguageId {
        &self.language
    }

    pub(crate) fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> LifecycleState {
        self.state
    }

    pub(crate) fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub(crate) fn restarts(&self) -> u32 {
        self.restarts
    }

    pub(crate) fn initialize_response(&self) -> Option<&Value> {
        self.initialize_response.as_ref()
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.connection
            .as_ref()
            .map(|connection| connection.client.generation())
    }

    pub(crate) fn client(&self) -> Option<&RpcClient> {
        self.connection.as_ref().map(|connection| &connection.client)
    }

    /// Absolute path of the configured initialization options file.
    pub(crate) fn options_file(&self, project_root: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
        let path = self.config.initialization_options_file.as_deref()?;
        Some(match project_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_owned(),
        })
    }

    /// Launches the process and sends `initialize`.
    pub(crate) fn start(&mut self, context: &StartContext<'_>) -> Result<(), LaunchError> {
        let command_line = self
            .config
            .command_line()
            .ok_or(LaunchError::EmptyCommand)?;
        let command = CommandLine::parse(command_line)?;
        let request = LaunchRequest {
            language: &self.language,
            command: &command,
            env: &self.config.env,
            show_stderr: self.config.show_server_stderr,
            working_dir: context.project_root,
        };
        let LaunchedServer {
            reader,
            writer,
            mut process,
        } = context.launcher.launch(&request)?;
        self.state = LifecycleState::Starting;

        let options = ClientOptions {
            language: self.language.clone(),
            generation: context.generation,
            trace: self.config.rpc_trace,
        };
        let client = match RpcClient::start(options, reader, writer, context.events.clone()) {
            Ok(client) => client,
            Err(error) => {
                process.force_exit();
                self.state = LifecycleState::Stopped;
                return Err(LaunchError::Connection(error));
            }
        };
        info!(
            target: SESSION_TARGET,
            language = %self.language,
            generation = context.generation,
            pid = ?process.pid(),
            restarts = self.restarts,
            "language server started"
        );

        let params = initialize_params(
            context.project_root,
            self.initialization_options(context.project_root),
        );
        let language = self.language.clone();
        let generation = context.generation;
        let events = context.events.clone();
        let sent = client.call_with(
            "initialize",
            params,
            Box::new(move |outcome| {
                post(&events, language, generation, ServerEventKind::InitializeResponse(outcome));
            }),
        );
        if let Err(error) = sent {
            post(
                context.events,
                self.language.clone(),
                generation,
                ServerEventKind::InitializeResponse(Err(error)),
            );
        }

        self.connection = Some(Connection { client, process });
        self.state = LifecycleState::AwaitingInitializeResponse;
        Ok(())
    }

    fn initialization_options(&self, project_root: Option<&Utf8Path>) -> Value {
        let Some(path) = self.options_file(project_root) else {
            return json!({});
        };
        let parsed = fs::read_to_string(&path)
            .map_err(|error| error.to_string())
            .and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|error| error.to_string())
            });
        match parsed {
            Ok(options @ Value::Object(_)) => options,
            Ok(_) => {
                warn!(
                    target: SESSION_TARGET,
                    language = %self.language,
                    %path,
                    "initialization options must be a JSON object; ignoring"
                );
                json!({})
            }
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    language = %self.language,
                    %path,
                    %error,
                    "cannot load initialization options; ignoring"
                );
                json!({})
            }
        }
    }

    /// Records a successful handshake and sends `initialized`.
    pub(crate) fn initialize_succeeded(&mut self, response: Value) -> Result<(), RpcError> {
        self.capabilities = CapabilitySet::negotiate(&response, &self.config);
        self.initialize_response = Some(response);
        self.state = LifecycleState::Ready;
        for state in self.capabilities.states() {
            debug!(
                target: SESSION_TARGET,
                language = %self.language,
                feature = %state.feature,
                enabled = state.enabled,
                source = %state.source,
                "negotiated feature"
            );
        }
        match self.client() {
            Some(client) => client.notify("initialized", json!({})),
            None => Err(RpcError::Cancelled),
        }
    }

    /// Sends `shutdown`. Returns `true` when the instance stopped at once
    /// because there was no process to talk to.
    pub(crate) fn begin_shutdown(&mut self, events: &Sender<ServerEvent>) -> bool {
        let Some(connection) = self.connection.as_ref() else {
            self.state = LifecycleState::Stopped;
            return true;
        };
        self.state = LifecycleState::ShuttingDown;
        self.shutdown_deadline = Some(Instant::now() + SHUTDOWN_TIMEOUT);

        let language = self.language.clone();
        let generation = connection.client.generation();
        let events = events.clone();
        let sent = connection.client.call_with(
            "shutdown",
            Value::Null,
            Box::new(move |outcome| {
                post(&events, language, generation, ServerEventKind::ShutdownResponse(outcome));
            }),
        );
        match sent {
            Ok(_) => false,
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    language = %self.language,
                    %error,
                    "cannot send shutdown; killing language server"
                );
                self.force_stop();
                true
            }
        }
    }

    /// Handles the `shutdown` reply. Returns `true` once the instance has
    /// stopped; otherwise the process is expected to exit after `exit`.
    pub(crate) fn shutdown_acknowledged(&mut self, outcome: Result<Value, RpcError>) -> bool {
        let sent = outcome.and_then(|_| match self.client() {
            Some(client) => client.notify("exit", Value::Null),
            None => Err(RpcError::Cancelled),
        });
        match sent {
            Ok(()) => false,
            Err(error) => {
                warn!(
                    target: SESSION_TARGET,
                    language = %self.language,
                    %error,
                    "shutdown failed; killing language server"
                );
                self.force_stop();
                true
            }
        }
    }

    pub(crate) fn shutdown_deadline(&self) -> Option<Instant> {
        self.shutdown_deadline
    }

    pub(crate) fn shutdown_overdue(&self, now: Instant) -> bool {
        self.state == LifecycleState::ShuttingDown
            && self.shutdown_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Closes the connection and reaps the process once it has exited.
    pub(crate) fn teardown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.client.close();
            connection.process.terminate();
        }
        self.reset();
    }

    /// Closes the connection and kills the process immediately.
    pub(crate) fn force_stop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.client.close();
            connection.process.force_exit();
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = LifecycleState::Stopped;
        self.open.clear();
        self.shutdown_deadline = None;
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.force_stop();
        }
    }
}

fn post(events: &Sender<ServerEvent>, language: LanguageId, generation: u64, kind: ServerEventKind) {
    if events.send(ServerEvent { language, generation, kind }).is_err() {
        debug!(
            target: SESSION_TARGET,
            generation,
            "session manager gone; dropping lifecycle event"
        );
    }
}

fn initialize_params(project_root: Option<&Utf8Path>, options: Value) -> Value {
    let root_uri = project_root
        .and_then(|root| path_to_uri(root).ok())
        .map(|uri| uri.as_str().to_owned());
    let folders = match (project_root, &root_uri) {
        (Some(root), Some(uri)) => json!([{
            "uri": uri,
            "name": root.file_name().unwrap_or_else(|| root.as_str()),
        }]),
        _ => Value::Null,
    };
    json!({
        "processId": std::process::id(),
        "clientInfo": {"name": "tessera", "version": env!("CARGO_PKG_VERSION")},
        "locale": "en",
        "rootPath": project_root.map(Utf8Path::as_str),
        "rootUri": root_uri,
        "workspaceFolders": folders,
        "capabilities": client_capabilities(),
        "trace": "off",
        "initializationOptions": options,
    })
}

fn client_capabilities() -> Value {
    json!({
        "window": {"workDoneProgress": true},
        "workspace": {
            "applyEdit": true,
            "configuration": true,
            "workspaceFolders": true,
            "symbol": {"dynamicRegistration": false},
        },
        "textDocument": {
            "synchronization": {
                "dynamicRegistration": false,
                "didSave": true,
                "willSave": false,
                "willSaveWaitUntil": false,
            },
            "completion": {
                "completionItem": {
                    "snippetSupport": false,
                    "documentationFormat": ["plaintext"],
                },
            },
            "hover": {"contentFormat": ["plaintext"]},
            "signatureHelp": {
                "signatureInformation": {"documentationFormat": ["plaintext"]},
            },
            "definition": {"linkSupport": false},
            "declaration": {"linkSupport": false},
            "typeDefinition": {"linkSupport": false},
            "implementation": {"linkSupport": false},
            "references": {},
            "documentHighlight": {},
            "documentSymbol": {"hierarchicalDocumentSymbolSupport": true},
            "publishDiagnostics": {"relatedInformation": false},
            "semanticTokens": {
                "requests": {"full": {"delta": true}},
                "tokenTypes": STRUCTURAL_TOKEN_TYPES,
                "tokenModifiers": [],
                "formats": ["relative"],
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn initialize_params_describe_the_project() {
        let params = initialize_params(Some(Utf8Path::new("/work/demo")), json!({"a": 1}));

        assert_eq!(params["rootUri"], json!("file:///work/demo"));
        assert_eq!(params["rootPath"], json!("/work/demo"));
        assert_eq!(params["workspaceFolders"][0]["name"], json!("demo"));
        assert_eq!(params["initializationOptions"], json!({"a": 1}));
        assert_eq!(params["trace"], json!("off"));
        assert_eq!(
            params["capabilities"]["textDocument"]["semanticTokens"]["tokenTypes"]
                .as_array()
                .map(Vec::len),
            Some(STRUCTURAL_TOKEN_TYPES.len())
        );
    }

    #[rstest]
    fn initialize_params_without_a_project_have_null_roots() {
        let params = initialize_params(None, json!({}));
        assert!(params["rootUri"].is_null());
        assert!(params["workspaceFolders"].is_null());
    }

    #[rstest]
    fn relative_options_files_resolve_against_the_project() {
        let config = ServerConfig {
            initialization_options_file: Some(Utf8PathBuf::from("lsp/options.json")),
            ..ServerConfig::default()
        };
        let instance = ServerInstance::new(
            LanguageId::new("rust").expect("language"),
            config,
            0,
        );

        assert_eq!(
            instance.options_file(Some(Utf8Path::new("/work"))),
            Some(Utf8PathBuf::from("/work/lsp/options.json"))
        );
    }

    #[rstest]
    fn invalid_options_files_fall_back_to_an_empty_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("options.json")).expect("utf8");
        fs::write(&path, "[1, 2").expect("write");
        let config = ServerConfig {
            initialization_options_file: Some(path),
            ..ServerConfig::default()
        };
        let instance = ServerInstance::new(
            LanguageId::new("rust").expect("language"),
            config,
            0,
        );

        assert_eq!(instance.initialization_options(None), json!({}));
    }

    #[rstest]
    fn shutdown_without_a_process_completes_immediately() {
        let (sender, _receiver) = std::sync::mpsc::channel();
        let mut instance = ServerInstance::new(
            LanguageId::new("rust").expect("language"),
            ServerConfig::default(),
            0,
        );

        assert!(instance.begin_shutdown(&sender));
        assert_eq!(instance.state(), LifecycleState::Stopped);
    }
}
