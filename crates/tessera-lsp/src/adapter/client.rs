//! JSON-RPC client bound to one server connection.
//!
//! The client owns the write half of the connection and a reader thread that
//! decodes inbound frames. Responses complete the matching [`PendingCall`]
//! directly on the reader thread. Notifications and server requests are
//! forwarded to the session manager as [`ServerEvent`]s tagged with the
//! client's generation.

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::error::{RpcError, TransportError};
use super::jsonrpc::{
    InboundMessage, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use super::transport::{FrameReader, FrameWriter};
use crate::events::{ServerEvent, ServerEventKind};
use crate::language::LanguageId;

/// Log target for wire-level activity.
pub(crate) const RPC_TARGET: &str = "tessera_lsp::rpc";

/// Completion invoked exactly once with the outcome of a call.
pub type Completion = Box<dyn FnOnce(Result<Value, RpcError>) + Send>;

type BoxedWriter = FrameWriter<Box<dyn Write + Send>>;

/// One in-flight request.
pub struct PendingCall {
    method: String,
    completion: Completion,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<i64, PendingCall>,
    closed: bool,
}

/// Identity and tracing options for a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Language served through this connection.
    pub language: LanguageId,
    /// Generation tag distinguishing this client from its predecessors.
    pub generation: u64,
    /// Log message bodies at trace level.
    pub trace: bool,
}

/// Request/response correlation over one framed connection.
pub struct RpcClient {
    options: ClientOptions,
    writer: Mutex<Option<BoxedWriter>>,
    pending: Arc<Mutex<PendingTable>>,
    next_id: AtomicI64,
}

impl RpcClient {
    /// Wraps the connection halves and starts the reader thread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the reader thread cannot be spawned.
    pub fn start(
        options: ClientOptions,
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
        events: Sender<ServerEvent>,
    ) -> Result<Self, TransportError> {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let context = ReaderContext {
            options: options.clone(),
            pending: Arc::clone(&pending),
            events,
        };
        let frames = FrameReader::new(BufReader::new(reader));
        thread::Builder::new()
            .name(format!("tessera-rpc-{}", options.language))
            .spawn(move || context.run(frames))?;

        Ok(Self {
            options,
            writer: Mutex::new(Some(FrameWriter::new(writer))),
            pending,
            next_id: AtomicI64::new(1),
        })
    }

    /// Generation tag of this client.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.options.generation
    }

    /// Issues a request whose outcome is delivered through a channel.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Cancelled`] once the client is closed, and
    /// encoding or transport errors if the request cannot be written.
    pub fn call<P: Serialize>(&self, method: &str, params: P) -> Result<PendingReply, RpcError> {
        let (sender, receiver) = mpsc::channel();
        let id = self.call_with(
            method,
            params,
            Box::new(move |outcome| {
                // The receiver is gone when the caller dropped its PendingReply.
                sender.send(outcome).ok();
            }),
        )?;
        Ok(PendingReply {
            id,
            method: method.to_owned(),
            receiver,
        })
    }

    /// Issues a request whose outcome is passed to `completion`.
    ///
    /// The completion runs on the reader thread, or on the caller's thread
    /// when the client is closed.
    ///
    /// # Errors
    ///
    /// As for [`RpcClient::call`]. When an error is returned the completion
    /// has been dropped without running.
    pub fn call_with<P: Serialize>(
        &self,
        method: &str,
        params: P,
        completion: Completion,
    ) -> Result<i64, RpcError> {
        let params = serde_json::to_value(params).map_err(RpcError::Encode)?;
        let params = (!params.is_null()).then_some(params);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_vec(&request).map_err(RpcError::Encode)?;

        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(RpcError::Cancelled);
            }
            pending.calls.insert(
                id,
                PendingCall {
                    method: method.to_owned(),
                    completion,
                },
            );
        }

        debug!(
            target: RPC_TARGET,
            language = %self.options.language,
            generation = self.options.generation,
            method,
            id,
            "sending request"
        );
        if let Err(error) = self.send(&body) {
            self.lock_pending().calls.remove(&id);
            return Err(error.into());
        }
        Ok(id)
    }

    /// Sends a notification. No id is allocated and no reply is expected.
    ///
    /// # Errors
    ///
    /// Returns encoding or transport errors. Once the client is closed every
    /// write fails with [`TransportError::UnexpectedEof`].
    pub fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<(), RpcError> {
        let params = serde_json::to_value(params).map_err(RpcError::Encode)?;
        let params = (!params.is_null()).then_some(params);
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))
            .map_err(RpcError::Encode)?;
        debug!(
            target: RPC_TARGET,
            language = %self.options.language,
            generation = self.options.generation,
            method,
            "sending notification"
        );
        self.send(&body).map_err(RpcError::from)
    }

    /// Answers a server-to-client request.
    ///
    /// # Errors
    ///
    /// As for [`RpcClient::notify`].
    pub fn reply(&self, reply: &JsonRpcReply) -> Result<(), RpcError> {
        let body = serde_json::to_vec(reply).map_err(RpcError::Encode)?;
        self.send(&body).map_err(RpcError::from)
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock_pending().calls.len()
    }

    /// Tears the connection down.
    ///
    /// Every pending call fails with [`RpcError::Cancelled`], later calls are
    /// refused and the write half is dropped so the server sees end of input.
    pub fn close(&self) {
        let drained = {
            let mut pending = self.lock_pending();
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        drop(
            self.writer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if !drained.is_empty() {
            debug!(
                target: RPC_TARGET,
                language = %self.options.language,
                generation = self.options.generation,
                cancelled = drained.len(),
                "cancelling pending calls"
            );
        }
        for (_, call) in drained {
            (call.completion)(Err(RpcError::Cancelled));
        }
    }

    fn send(&self, body: &[u8]) -> Result<(), TransportError> {
        if self.options.trace {
            trace!(
                target: RPC_TARGET,
                language = %self.options.language,
                direction = "send",
                body = %String::from_utf8_lossy(body),
                "rpc message"
            );
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_mut() {
            Some(writer) => writer.send(body),
            None => Err(TransportError::UnexpectedEof),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Channel-backed handle for the outcome of [`RpcClient::call`].
pub struct PendingReply {
    id: i64,
    method: String,
    receiver: Receiver<Result<Value, RpcError>>,
}

impl PendingReply {
    /// Request id allocated for the call.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Method of the call.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Blocks until the call completes.
    ///
    /// # Errors
    ///
    /// Returns the server error, transport failure or cancellation that
    /// ended the call.
    pub fn wait(self) -> Result<Value, RpcError> {
        self.receiver.recv().unwrap_or(Err(RpcError::Cancelled))
    }

    /// Waits up to `timeout`; `None` means the call is still pending.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Value, RpcError>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RpcError::Cancelled)),
        }
    }

    /// Returns the outcome if it has already arrived.
    #[must_use]
    pub fn try_wait(&self) -> Option<Result<Value, RpcError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RpcError::Cancelled)),
        }
    }
}

struct ReaderContext {
    options: ClientOptions,
    pending: Arc<Mutex<PendingTable>>,
    events: Sender<ServerEvent>,
}

impl ReaderContext {
    fn run<R: std::io::BufRead>(self, mut frames: FrameReader<R>) {
        let error = loop {
            match frames.read_message() {
                Ok(message) => self.dispatch(message),
                Err(TransportError::UnexpectedEof) => break None,
                Err(error) => {
                    warn!(
                        target: RPC_TARGET,
                        language = %self.options.language,
                        generation = self.options.generation,
                        %error,
                        "closing connection after transport error"
                    );
                    break Some(error.to_string());
                }
            }
        };

        let drained = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.closed = true;
            std::mem::take(&mut pending.calls)
        };
        for (_, call) in drained {
            (call.completion)(Err(RpcError::Transport(TransportError::UnexpectedEof)));
        }
        debug!(
            target: RPC_TARGET,
            language = %self.options.language,
            generation = self.options.generation,
            "server output closed"
        );
        self.post(ServerEventKind::Closed { error });
    }

    fn dispatch(&self, message: Value) {
        if self.options.trace {
            trace!(
                target: RPC_TARGET,
                language = %self.options.language,
                direction = "recv",
                body = %message,
                "rpc message"
            );
        }
        match InboundMessage::from_value(message) {
            Ok(InboundMessage::Response(response)) => self.complete(response),
            Ok(InboundMessage::Notification { method, params }) => {
                self.post(ServerEventKind::Notification { method, params });
            }
            Ok(InboundMessage::Request { id, method, params }) => {
                self.post(ServerEventKind::Request { id, method, params });
            }
            Err(error) => {
                warn!(
                    target: RPC_TARGET,
                    language = %self.options.language,
                    %error,
                    "ignoring unrecognised message"
                );
            }
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let call = match &response.id {
            Some(RequestId::Number(id)) => self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .calls
                .remove(id),
            Some(RequestId::String(_)) | None => None,
        };
        let Some(call) = call else {
            warn!(
                target: RPC_TARGET,
                language = %self.options.language,
                generation = self.options.generation,
                id = ?response.id,
                "response does not match any pending request"
            );
            return;
        };

        debug!(
            target: RPC_TARGET,
            language = %self.options.language,
            method = %call.method,
            id = ?response.id,
            "received response"
        );
        let outcome = match response.error {
            Some(error) => Err(RpcError::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(response.result),
        };
        (call.completion)(outcome);
    }

    fn post(&self, kind: ServerEventKind) {
        let event = ServerEvent {
            language: self.options.language.clone(),
            generation: self.options.generation,
            kind,
        };
        if self.events.send(event).is_err() {
            debug!(
                target: RPC_TARGET,
                language = %self.options.language,
                "session manager gone; dropping server event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{PipeReader, PipeWriter, pipe};

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        client: RpcClient,
        events: Receiver<ServerEvent>,
        server_reader: FrameReader<BufReader<PipeReader>>,
        server_writer: FrameWriter<PipeWriter>,
    }

    fn harness() -> Harness {
        let (client_reader, server_out) = pipe().expect("pipe");
        let (server_in, client_writer) = pipe().expect("pipe");
        let (sender, events) = mpsc::channel();
        let options = ClientOptions {
            language: LanguageId::new("rust").expect("language"),
            generation: 7,
            trace: true,
        };
        let client = RpcClient::start(
            options,
            Box::new(client_reader),
            Box::new(client_writer),
            sender,
        )
        .expect("client starts");
        Harness {
            client,
            events,
            server_reader: FrameReader::new(BufReader::new(server_in)),
            server_writer: FrameWriter::new(server_out),
        }
    }

    fn respond(writer: &mut FrameWriter<PipeWriter>, id: i64, result: Value) {
        writer
            .write_message(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .expect("server write");
    }

    #[rstest]
    fn responses_route_to_the_call_they_name() {
        let mut harness = harness();
        let first = harness.client.call("a", json!({"n": 1})).expect("call a");
        harness.client.notify("note", json!({})).expect("notify");
        let second = harness.client.call("b", json!({"n": 2})).expect("call b");
        let third = harness.client.call("c", json!({"n": 3})).expect("call c");

        let mut ids = Vec::new();
        for _ in 0..4 {
            let message = harness.server_reader.read_message().expect("server read");
            if let Some(id) = message.get("id").and_then(Value::as_i64) {
                ids.push((id, message["params"]["n"].clone()));
            }
        }
        for (id, n) in ids.iter().rev() {
            respond(&mut harness.server_writer, *id, json!({"echo": n}));
        }

        assert_eq!(third.wait().expect("c")["echo"], json!(3));
        assert_eq!(first.wait().expect("a")["echo"], json!(1));
        assert_eq!(second.wait().expect("b")["echo"], json!(2));
        assert_eq!(harness.client.pending_count(), 0);
    }

    #[rstest]
    fn ids_are_unique_while_pending() {
        let harness = harness();
        let calls: Vec<PendingReply> = (0..5)
            .map(|_| harness.client.call("x", Value::Null).expect("call"))
            .collect();
        let mut ids: Vec<i64> = calls.iter().map(PendingReply::id).collect();
        ids.dedup();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[rstest]
    fn server_errors_fail_only_their_call() {
        let mut harness = harness();
        let failing = harness.client.call("fails", Value::Null).expect("call");
        let passing = harness.client.call("passes", Value::Null).expect("call");

        harness
            .server_writer
            .write_message(&json!({
                "jsonrpc": "2.0",
                "id": failing.id(),
                "error": {"code": -32603, "message": "boom"}
            }))
            .expect("server write");
        respond(&mut harness.server_writer, passing.id(), json!(true));

        assert!(matches!(
            failing.wait(),
            Err(RpcError::Server { code: -32603, .. })
        ));
        assert_eq!(passing.wait().expect("passes"), json!(true));
    }

    #[rstest]
    fn unmatched_ids_do_not_close_the_connection() {
        let mut harness = harness();
        let call = harness.client.call("later", Value::Null).expect("call");

        respond(&mut harness.server_writer, 999, json!("stray"));
        respond(&mut harness.server_writer, call.id(), json!("ok"));

        assert_eq!(call.wait().expect("later"), json!("ok"));
        assert!(harness.events.try_recv().is_err());
    }

    #[rstest]
    fn notifications_and_requests_become_tagged_events() {
        let mut harness = harness();
        harness
            .server_writer
            .write_message(&json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"type": 3, "message": "hi"}}))
            .expect("server write");
        harness
            .server_writer
            .write_message(&json!({"jsonrpc": "2.0", "id": "p1", "method": "window/workDoneProgress/create", "params": {"token": "t"}}))
            .expect("server write");

        let first = harness.events.recv_timeout(WAIT).expect("notification event");
        assert_eq!(first.generation, 7);
        assert!(matches!(
            first.kind,
            ServerEventKind::Notification { ref method, .. } if method == "window/logMessage"
        ));
        let second = harness.events.recv_timeout(WAIT).expect("request event");
        assert!(matches!(
            second.kind,
            ServerEventKind::Request { id: RequestId::String(ref id), .. } if id == "p1"
        ));
    }

    #[rstest]
    fn close_cancels_every_pending_call() {
        let harness = harness();
        let first = harness.client.call("a", Value::Null).expect("call");
        let second = harness.client.call("b", Value::Null).expect("call");

        harness.client.close();

        assert!(matches!(first.wait(), Err(RpcError::Cancelled)));
        assert!(matches!(second.wait(), Err(RpcError::Cancelled)));
        assert!(matches!(
            harness.client.call("c", Value::Null),
            Err(RpcError::Cancelled)
        ));
    }

    #[rstest]
    fn stream_close_fails_pending_calls_and_reports_closure() {
        let Harness {
            client,
            events,
            server_writer,
            server_reader,
        } = harness();
        let call = client.call("a", Value::Null).expect("call");

        drop(server_writer);

        assert!(matches!(
            call.wait_timeout(WAIT),
            Some(Err(RpcError::Transport(TransportError::UnexpectedEof)))
        ));
        let event = events.recv_timeout(WAIT).expect("closed event");
        assert!(matches!(event.kind, ServerEventKind::Closed { error: None }));
        drop(server_reader);
    }

    #[rstest]
    fn callbacks_run_exactly_once() {
        let mut harness = harness();
        let (sender, receiver) = mpsc::channel();
        let id = harness
            .client
            .call_with(
                "initialize",
                json!({}),
                Box::new(move |outcome| {
                    sender.send(outcome.is_ok()).expect("test channel");
                }),
            )
            .expect("call");

        respond(&mut harness.server_writer, id, json!({"capabilities": {}}));
        respond(&mut harness.server_writer, id, json!({"capabilities": {}}));

        assert_eq!(receiver.recv_timeout(WAIT).ok(), Some(true));
        harness.client.close();
        assert!(receiver.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
