//! Event pump and lifecycle transitions driven by server events.

use std::mem;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{ServerSlot, SessionManager, active_mut, eligible};
use crate::adapter::RpcError;
use crate::document::EditorWorkspace;
use crate::errors::{HostError, HostOperation};
use crate::events::{HostEvent, ServerEvent, ServerEventKind};
use crate::language::LanguageId;
use crate::session::{LifecycleState, MAX_RESTARTS, SESSION_TARGET, ServerInstance};

impl SessionManager {
    /// Handles every event that has arrived and returns what the editor
    /// should render. Never blocks.
    pub fn process_events(&mut self, workspace: &mut dyn EditorWorkspace) -> Vec<HostEvent> {
        self.drain(workspace);
        mem::take(&mut self.queued)
    }

    /// Like [`SessionManager::process_events`] but waits up to `timeout` for
    /// the first event when nothing is pending.
    pub fn pump_events(
        &mut self,
        workspace: &mut dyn EditorWorkspace,
        timeout: Duration,
    ) -> Vec<HostEvent> {
        if self.queued.is_empty() {
            self.wait_for_event(workspace, timeout);
        }
        self.process_events(workspace)
    }

    /// Pumps events until the server for `language` is ready.
    ///
    /// Host events produced meanwhile stay queued for the next
    /// [`SessionManager::process_events`].
    ///
    /// # Errors
    ///
    /// Fails when the language has no server, the server dies, or the
    /// handshake does not complete within `timeout`.
    pub fn wait_until_ready(
        &mut self,
        language: &LanguageId,
        workspace: &mut dyn EditorWorkspace,
        timeout: Duration,
    ) -> Result<(), HostError> {
        let deadline = Instant::now() + timeout;
        loop {
            let serving = self.resolve(language)?;
            let state = self
                .instance(&serving)
                .map_or(LifecycleState::Stopped, ServerInstance::state);
            match state {
                LifecycleState::Ready => return Ok(()),
                LifecycleState::Stopped | LifecycleState::ShuttingDown => {
                    return Err(HostError::not_ready(&serving, state));
                }
                LifecycleState::Starting | LifecycleState::AwaitingInitializeResponse => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HostError::timeout(&serving, HostOperation::Initialise));
            }
            self.wait_for_event(workspace, deadline - now);
        }
    }

    pub(super) fn wait_for_event(&mut self, workspace: &mut dyn EditorWorkspace, timeout: Duration) {
        let timeout = self.next_deadline().map_or(timeout, |deadline| {
            timeout.min(deadline.saturating_duration_since(Instant::now()))
        });
        if let Ok(event) = self.events_rx.recv_timeout(timeout) {
            self.handle_event(event, workspace);
        }
        self.drain(workspace);
    }

    pub(super) fn drain(&mut self, workspace: &mut dyn EditorWorkspace) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event, workspace);
        }
        self.expire_shutdowns();
        if mem::take(&mut self.restart_requested) {
            self.restart_all(workspace);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.servers
            .values()
            .filter_map(|slot| match slot {
                ServerSlot::Active(instance) => instance.shutdown_deadline(),
                _ => None,
            })
            .chain(self.retiring.iter().filter_map(|instance| instance.shutdown_deadline()))
            .min()
    }

    fn handle_event(&mut self, event: ServerEvent, workspace: &mut dyn EditorWorkspace) {
        let ServerEvent {
            language,
            generation,
            kind,
        } = event;
        if let Some(index) = self
            .retiring
            .iter()
            .position(|instance| instance.generation() == Some(generation))
        {
            self.handle_retiring(index, kind);
            return;
        }
        let current = self
            .instance(&language)
            .is_some_and(|instance| instance.generation() == Some(generation));
        if !current {
            debug!(
                target: SESSION_TARGET,
                language = %language,
                generation,
                "ignoring event from a replaced server"
            );
            return;
        }

        match kind {
            ServerEventKind::InitializeResponse(Ok(response)) => {
                self.on_initialized(&language, response, workspace);
            }
            ServerEventKind::InitializeResponse(Err(error)) => {
                self.on_initialize_failed(&language, &error);
            }
            ServerEventKind::ShutdownResponse(outcome) => {
                self.on_shutdown_response(&language, outcome);
            }
            ServerEventKind::Notification { method, params } => {
                self.on_notification(&language, &method, params);
            }
            ServerEventKind::Request { id, method, params } => {
                self.on_request(&language, id, &method, params, workspace);
            }
            ServerEventKind::Closed { error } => self.on_closed(&language, error),
        }
    }

    fn handle_retiring(&mut self, index: usize, kind: ServerEventKind) {
        let stopped = match (kind, self.retiring.get_mut(index)) {
            (ServerEventKind::ShutdownResponse(outcome), Some(instance)) => {
                instance.shutdown_acknowledged(outcome)
            }
            (ServerEventKind::Closed { .. }, Some(instance)) => {
                instance.teardown();
                true
            }
            _ => false,
        };
        if stopped && index < self.retiring.len() {
            let instance = self.retiring.swap_remove(index);
            self.queued.push(HostEvent::Stopped {
                language: instance.language().clone(),
            });
        }
    }

    fn on_initialized(
        &mut self,
        language: &LanguageId,
        response: Value,
        workspace: &mut dyn EditorWorkspace,
    ) {
        let Some(instance) = active_mut(&mut self.servers, language) else {
            return;
        };
        if instance.state() != LifecycleState::AwaitingInitializeResponse {
            return;
        }
        if let Err(error) = instance.initialize_succeeded(response) {
            warn!(
                target: SESSION_TARGET,
                language = %language,
                %error,
                "failed to send initialized notification"
            );
        }
        info!(
            target: SESSION_TARGET,
            language = %language,
            "language server ready"
        );
        self.queued.push(HostEvent::Ready {
            language: language.clone(),
        });
        self.catch_up(language, workspace);
    }

    /// Opens every modified or active document served by `language`.
    fn catch_up(&mut self, language: &LanguageId, workspace: &dyn EditorWorkspace) {
        let active = workspace.active_document();
        for document in workspace.documents() {
            if !document.is_modified() && active != Some(document.id()) {
                continue;
            }
            let Some(document_language) = document.language() else {
                continue;
            };
            if self.resolve(&document_language).ok().as_ref() != Some(language) {
                continue;
            }
            let root = self.project_root.as_deref();
            let in_scope = self
                .instance(language)
                .is_some_and(|instance| eligible(root, instance.config(), document));
            if !in_scope {
                continue;
            }
            if let Err(error) = self.with_sync(language, |sync| sync.did_open(document)) {
                warn!(
                    target: SESSION_TARGET,
                    language = %language,
                    %error,
                    "failed to open document after initialisation"
                );
            }
        }
    }

    fn on_initialize_failed(&mut self, language: &LanguageId, error: &RpcError) {
        let awaiting = self
            .instance(language)
            .is_some_and(|instance| instance.state() == LifecycleState::AwaitingInitializeResponse);
        if !awaiting {
            return;
        }
        warn!(
            target: SESSION_TARGET,
            language = %language,
            %error,
            "initialize failed"
        );
        let reason = format!("initialize failed: {error}");
        self.queued.push(HostEvent::Notice {
            language: language.clone(),
            message: reason.clone(),
        });
        self.restart(language, &reason);
    }

    fn on_shutdown_response(&mut self, language: &LanguageId, outcome: Result<Value, RpcError>) {
        let Some(instance) = active_mut(&mut self.servers, language) else {
            return;
        };
        if instance.state() != LifecycleState::ShuttingDown {
            return;
        }
        if instance.shutdown_acknowledged(outcome) {
            self.finish_stop(language);
        }
    }

    fn on_closed(&mut self, language: &LanguageId, error: Option<String>) {
        let Some(state) = self.instance(language).map(ServerInstance::state) else {
            return;
        };
        if state == LifecycleState::ShuttingDown {
            self.finish_stop(language);
            return;
        }
        let reason = error.unwrap_or_else(|| String::from("language server exited unexpectedly"));
        warn!(
            target: SESSION_TARGET,
            language = %language,
            %state,
            %reason,
            "lost connection to language server"
        );
        self.queued.push(HostEvent::Notice {
            language: language.clone(),
            message: reason.clone(),
        });
        self.restart(language, &reason);
    }

    /// Replaces the instance for `language` with a fresh one that keeps only
    /// the restart counter, or marks the language dead past the limit.
    fn restart(&mut self, language: &LanguageId, reason: &str) {
        let Some(ServerSlot::Active(mut previous)) = self.servers.remove(language) else {
            return;
        };
        // The connection is already lost; waiting for a graceful exit would
        // stall the pump.
        previous.force_stop();
        self.progress.clear(language);
        let restarts = previous.restarts().saturating_add(1);
        if restarts > MAX_RESTARTS {
            error!(
                target: SESSION_TARGET,
                language = %language,
                restarts,
                "language server keeps failing; giving up"
            );
            self.kill(
                language,
                restarts,
                format!("language server failed {restarts} times; last error: {reason}"),
            );
            return;
        }

        info!(
            target: SESSION_TARGET,
            language = %language,
            restarts,
            "restarting language server"
        );
        let config = previous.config().clone();
        drop(previous);
        self.servers.insert(
            language.clone(),
            ServerSlot::Active(Box::new(ServerInstance::new(
                language.clone(),
                config,
                restarts,
            ))),
        );
        if let Err(error) = self.ensure_started(language) {
            debug!(
                target: SESSION_TARGET,
                language = %language,
                %error,
                "restart failed"
            );
        }
    }

    pub(super) fn finish_stop(&mut self, language: &LanguageId) {
        if let Some(ServerSlot::Active(mut instance)) = self.servers.remove(language) {
            instance.teardown();
        }
        self.progress.clear(language);
        info!(
            target: SESSION_TARGET,
            language = %language,
            "language server stopped"
        );
        self.queued.push(HostEvent::Stopped {
            language: language.clone(),
        });
    }

    fn expire_shutdowns(&mut self) {
        let now = Instant::now();
        let overdue: Vec<LanguageId> = self
            .servers
            .iter()
            .filter_map(|(language, slot)| match slot {
                ServerSlot::Active(instance) if instance.shutdown_overdue(now) => {
                    Some(language.clone())
                }
                _ => None,
            })
            .collect();
        for language in overdue {
            warn!(
                target: SESSION_TARGET,
                language = %language,
                "language server did not shut down in time; killing it"
            );
            if let Some(instance) = active_mut(&mut self.servers, &language) {
                instance.force_stop();
            }
            self.finish_stop(&language);
        }

        let (expired, retained): (Vec<_>, Vec<_>) = mem::take(&mut self.retiring)
            .into_iter()
            .partition(|instance| instance.shutdown_overdue(now));
        self.retiring = retained;
        for mut instance in expired {
            instance.force_stop();
            self.queued.push(HostEvent::Stopped {
                language: instance.language().clone(),
            });
        }
    }
}
