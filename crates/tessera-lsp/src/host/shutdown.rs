//! Stopping and restarting servers on the editor's behalf.

use std::mem;
use std::time::{Duration, Instant};

use tessera_config::Config;
use tracing::{info, warn};

use super::{ServerSlot, SessionManager, active_mut};
use crate::document::EditorWorkspace;
use crate::events::HostEvent;
use crate::language::LanguageId;
use crate::session::{LifecycleState, SESSION_TARGET};

impl SessionManager {
    /// Starts the shutdown sequence for the server of `language`.
    ///
    /// A server with no process stops at once; otherwise the
    /// [`HostEvent::Stopped`] event arrives through the event pump.
    pub fn shutdown(&mut self, language: &LanguageId) {
        let Some(instance) = active_mut(&mut self.servers, language) else {
            return;
        };
        if instance.state() == LifecycleState::ShuttingDown {
            return;
        }
        info!(
            target: SESSION_TARGET,
            language = %language,
            "shutting down language server"
        );
        if instance.begin_shutdown(&self.events_tx) {
            self.finish_stop(language);
        }
    }

    /// Shuts every server down, pumping events for up to `wait` and then
    /// killing whatever is still running. No server starts afterwards
    /// until [`SessionManager::reconfigure`].
    pub fn shutdown_all(
        &mut self,
        workspace: &mut dyn EditorWorkspace,
        wait: Duration,
    ) -> Vec<HostEvent> {
        self.shutting_down = true;
        let languages: Vec<LanguageId> = self
            .servers
            .iter()
            .filter(|(_, slot)| matches!(slot, ServerSlot::Active(_)))
            .map(|(language, _)| language.clone())
            .collect();
        for language in &languages {
            self.shutdown(language);
        }

        let deadline = Instant::now() + wait;
        while self.has_running_servers() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.wait_for_event(workspace, deadline - now);
        }

        let remaining: Vec<LanguageId> = self
            .servers
            .iter()
            .filter(|(_, slot)| matches!(slot, ServerSlot::Active(_)))
            .map(|(language, _)| language.clone())
            .collect();
        for language in remaining {
            let had_process = self
                .instance(&language)
                .is_some_and(|instance| instance.state() != LifecycleState::Stopped);
            if let Some(ServerSlot::Active(mut instance)) = self.servers.remove(&language) {
                instance.force_stop();
            }
            if had_process {
                self.queued.push(HostEvent::Stopped { language });
            }
        }
        for mut instance in mem::take(&mut self.retiring) {
            instance.force_stop();
            self.queued.push(HostEvent::Stopped {
                language: instance.language().clone(),
            });
        }
        mem::take(&mut self.queued)
    }

    fn has_running_servers(&self) -> bool {
        let running = |slot: &ServerSlot| match slot {
            ServerSlot::Active(instance) => instance.state() != LifecycleState::Stopped,
            _ => false,
        };
        !self.retiring.is_empty() || self.servers.values().any(running)
    }

    /// Gracefully stops every server, forgets dead and alias entries, and
    /// starts servers again for the documents in `workspace`.
    pub fn restart_all(&mut self, workspace: &dyn EditorWorkspace) {
        info!(target: SESSION_TARGET, "restarting all language servers");
        for (language, slot) in mem::take(&mut self.servers) {
            let ServerSlot::Active(mut instance) = slot else {
                continue;
            };
            self.progress.clear(&language);
            if instance.begin_shutdown(&self.events_tx) {
                continue;
            }
            self.retiring.push(instance);
        }

        for document in workspace.documents() {
            if let Err(error) = self.attach(document) {
                warn!(
                    target: SESSION_TARGET,
                    path = ?document.real_path(),
                    %error,
                    "failed to restart language server for document"
                );
            }
        }
    }

    /// Replaces the configuration and restarts every server.
    ///
    /// Lifts the launch block left by [`SessionManager::shutdown_all`].
    pub fn reconfigure(&mut self, config: Config, workspace: &dyn EditorWorkspace) {
        self.config = config;
        self.shutting_down = false;
        self.restart_all(workspace);
    }
}
