//! In-process language server driven by a script.
//!
//! [`ScriptedLauncher`] implements [`ServerLauncher`] by wiring a pair of
//! pipes to a thread that answers requests from a [`ServerScript`] and
//! records every message it receives in a shared [`Transcript`].

use std::collections::HashMap;
use std::io::{self, BufReader, PipeReader, PipeWriter, Write, pipe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::adapter::{
    FrameReader, FrameWriter, LaunchError, LaunchRequest, LaunchedServer, ServerLauncher,
    ServerProcess,
};

const POLL: Duration = Duration::from_millis(10);

/// How the scripted server answers `initialize`.
#[derive(Debug, Clone)]
pub enum InitializeReply {
    /// Reply with these server capabilities.
    Respond(Value),
    /// Reply with a JSON-RPC error.
    Fail,
    /// Never reply.
    Silent,
}

/// Behaviour shared by every server the launcher starts.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Reply to `initialize`.
    pub initialize: InitializeReply,
    /// Results keyed by request method; unknown methods get `null`.
    pub results: HashMap<String, Value>,
    /// Answer `shutdown` and honour `exit`.
    pub answers_shutdown: bool,
    /// Refuse to launch at all.
    pub launch_fails: bool,
    /// Request methods left without any reply.
    pub unanswered: Vec<String>,
}

impl ServerScript {
    /// Script for a well-behaved server advertising `capabilities`.
    #[must_use]
    pub fn with_capabilities(capabilities: Value) -> Self {
        Self {
            initialize: InitializeReply::Respond(capabilities),
            results: HashMap::new(),
            answers_shutdown: true,
            launch_fails: false,
            unanswered: Vec::new(),
        }
    }

    /// Answers `method` with `result`.
    #[must_use]
    pub fn result(mut self, method: &str, result: Value) -> Self {
        self.results.insert(method.to_owned(), result);
        self
    }

    /// Never replies to `method`.
    #[must_use]
    pub fn unanswered(mut self, method: &str) -> Self {
        self.unanswered.push(method.to_owned());
        self
    }
}

/// Capabilities of a typical full-featured server.
#[must_use]
pub fn full_capabilities() -> Value {
    json!({
        "textDocumentSync": {"openClose": true, "change": 2, "save": {"includeText": true}},
        "completionProvider": {"triggerCharacters": [".", ":"]},
        "signatureHelpProvider": {"triggerCharacters": ["("]},
        "hoverProvider": true,
        "definitionProvider": true,
        "declarationProvider": true,
        "typeDefinitionProvider": true,
        "implementationProvider": true,
        "referencesProvider": true,
        "documentSymbolProvider": true,
        "workspaceSymbolProvider": true,
        "documentHighlightProvider": true,
        "semanticTokensProvider": {
            "legend": {"tokenTypes": ["namespace", "type", "function"], "tokenModifiers": []},
            "full": {"delta": true}
        }
    })
}

/// One message received by a scripted server.
#[derive(Debug, Clone)]
pub struct Received {
    /// 1-based launch number of the receiving server.
    pub launch: usize,
    /// Decoded message body.
    pub message: Value,
}

impl Received {
    /// Method name, absent for replies.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        self.message.get("method").and_then(Value::as_str)
    }

    /// Parameters, `null` when absent.
    #[must_use]
    pub fn params(&self) -> &Value {
        self.message.get("params").unwrap_or(&Value::Null)
    }
}

/// Every message received by every server the launcher started.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Arc<Mutex<Vec<Received>>>,
}

impl Transcript {
    fn record(&self, launch: usize, message: Value) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Received { launch, message });
    }

    /// Copy of everything received so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Received> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Method names in arrival order.
    #[must_use]
    pub fn methods(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter_map(|received| received.method().map(str::to_owned))
            .collect()
    }

    /// Parameters of every message with `method`, in arrival order.
    #[must_use]
    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.snapshot()
            .iter()
            .filter(|received| received.method() == Some(method))
            .map(|received| received.params().clone())
            .collect()
    }

    /// Replies the servers sent back for their own requests.
    #[must_use]
    pub fn replies(&self) -> Vec<Value> {
        self.snapshot()
            .into_iter()
            .filter(|received| received.method().is_none())
            .map(|received| received.message)
            .collect()
    }

    /// Polls until `predicate` holds or `timeout` elapses.
    #[must_use]
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&[Received]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.snapshot()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL);
        }
    }

    /// Waits until `count` messages with `method` have arrived.
    #[must_use]
    pub fn wait_for_method(&self, method: &str, count: usize, timeout: Duration) -> bool {
        self.wait_for(timeout, |messages| {
            messages
                .iter()
                .filter(|received| received.method() == Some(method))
                .count()
                >= count
        })
    }
}

type SharedWriter = Arc<Mutex<Option<FrameWriter<PipeWriter>>>>;

/// Handle on one launched scripted server.
#[derive(Clone)]
pub struct ServerHandle {
    writer: SharedWriter,
    exited: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Sends a message to the client as the server. Returns `false` once
    /// the output is closed or the client has hung up.
    pub fn send(&self, message: &Value) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .is_some_and(|writer| writer.write_message(message).is_ok())
    }

    /// Writes `bytes` to the client verbatim, without framing.
    pub fn send_raw(&self, bytes: &[u8]) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .is_some_and(|writer| {
                let stream = writer.get_mut();
                stream.write_all(bytes).and_then(|()| stream.flush()).is_ok()
            })
    }

    /// Sends a notification.
    pub fn notify(&self, method: &str, params: &Value) {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}));
    }

    /// Sends a server-to-client request.
    pub fn request(&self, id: &Value, method: &str, params: &Value) {
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}));
    }

    /// Closes the server's output as if it had died.
    pub fn crash(&self) {
        self.exited.store(true, Ordering::SeqCst);
        drop(
            self.writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
    }

    /// `true` once the server's output has closed.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }
}

/// Launcher handing out scripted servers. Clones share all state.
#[derive(Clone)]
pub struct ScriptedLauncher {
    script: Arc<Mutex<ServerScript>>,
    transcript: Transcript,
    launches: Arc<AtomicUsize>,
    servers: Arc<Mutex<Vec<ServerHandle>>>,
}

impl ScriptedLauncher {
    /// Creates a launcher whose servers follow `script`.
    #[must_use]
    pub fn new(script: ServerScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            transcript: Transcript::default(),
            launches: Arc::new(AtomicUsize::new(0)),
            servers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Messages received by every launched server.
    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Number of launch attempts, including refused ones.
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Changes the script used by later launches.
    pub fn update_script(&self, update: impl FnOnce(&mut ServerScript)) {
        update(&mut self.script.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Most recently launched server.
    #[must_use]
    pub fn latest(&self) -> ServerHandle {
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .expect("no scripted server has been launched")
    }

    fn spawn(&self, launch: usize) -> io::Result<LaunchedServer> {
        let (client_reader, server_out) = pipe()?;
        let (server_in, client_writer) = pipe()?;
        let handle = ServerHandle {
            writer: Arc::new(Mutex::new(Some(FrameWriter::new(server_out)))),
            exited: Arc::new(AtomicBool::new(false)),
        };
        self.servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());

        let session = ScriptedSession {
            launch,
            script: self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            transcript: self.transcript.clone(),
            handle: handle.clone(),
        };
        thread::Builder::new()
            .name(format!("scripted-server-{launch}"))
            .spawn(move || session.run(server_in))?;

        Ok(LaunchedServer {
            reader: Box::new(client_reader),
            writer: Box::new(client_writer),
            process: Box::new(ScriptedProcess { handle }),
        })
    }
}

impl ServerLauncher for ScriptedLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchedServer, LaunchError> {
        let launch = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let command = request.command.program().to_owned();
        let fails = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .launch_fails;
        if fails {
            return Err(LaunchError::BinaryNotFound {
                command,
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        self.spawn(launch)
            .map_err(|source| LaunchError::SpawnFailed { command, source })
    }
}

struct ScriptedProcess {
    handle: ServerHandle,
}

impl ServerProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn has_exited(&mut self) -> bool {
        self.handle.has_exited()
    }

    fn terminate(&mut self) {
        self.handle.crash();
    }

    fn force_exit(&mut self) {
        self.handle.crash();
    }
}

struct ScriptedSession {
    launch: usize,
    script: ServerScript,
    transcript: Transcript,
    handle: ServerHandle,
}

impl ScriptedSession {
    fn run(self, input: PipeReader) {
        let mut frames = FrameReader::new(BufReader::new(input));
        while let Ok(message) = frames.read_message() {
            self.transcript.record(self.launch, message.clone());
            let method = message.get("method").and_then(Value::as_str);
            let id = message.get("id").cloned();
            match (method, id) {
                (Some("exit"), _) if self.script.answers_shutdown => break,
                (Some("initialize"), Some(id)) => self.answer_initialize(&id),
                (Some("shutdown"), Some(id)) => {
                    if self.script.answers_shutdown {
                        self.reply(&id, &Value::Null);
                    }
                }
                (Some(method), Some(_)) if self.script.unanswered.iter().any(|m| m == method) => {}
                (Some(method), Some(id)) => {
                    let result = self.script.results.get(method).unwrap_or(&Value::Null);
                    self.reply(&id, result);
                }
                _ => {}
            }
        }
        self.handle.crash();
    }

    fn answer_initialize(&self, id: &Value) {
        match &self.script.initialize {
            InitializeReply::Respond(capabilities) => {
                self.reply(id, &json!({"capabilities": capabilities}));
            }
            InitializeReply::Fail => {
                self.handle.send(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32603, "message": "initialisation refused"}
                }));
            }
            InitializeReply::Silent => {}
        }
    }

    fn reply(&self, id: &Value, result: &Value) {
        self.handle
            .send(&json!({"jsonrpc": "2.0", "id": id, "result": result}));
    }
}
