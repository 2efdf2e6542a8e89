//! Session manager: the registry of server instances and the event pump.
//!
//! Every lifecycle transition happens on the thread that calls
//! [`SessionManager::process_events`]. Reader threads only complete pending
//! calls and post [`ServerEvent`]s; events whose generation no longer
//! matches a live client are discarded, so late replies from a replaced
//! server cannot touch its successor.

mod inbound;
mod pump;
mod shutdown;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::mpsc::{self, Receiver, Sender};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use tessera_config::{Config, ServerConfig};
use tracing::{debug, error, info};

use crate::adapter::{ProcessLauncher, ServerLauncher};
use crate::capability::CapabilitySet;
use crate::document::EditorDocument;
use crate::errors::HostError;
use crate::events::{HostEvent, ServerEvent};
use crate::language::LanguageId;
use crate::progress::ProgressTracker;
use crate::session::{LifecycleState, SESSION_TARGET, ServerInstance, StartContext};
use crate::sync::{DocumentSync, TextChange, VersionCounters};

pub(crate) enum ServerSlot {
    Unused,
    Alias(LanguageId),
    Dead { restarts: u32, reason: String },
    Active(Box<ServerInstance>),
}

/// Registry entry for a language, as reported by [`SessionManager::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    /// No command is configured; the language is never served.
    Unused,
    /// Served by another language's server.
    Alias {
        /// Language whose server is used.
        target: LanguageId,
    },
    /// Permanently unavailable until reconfigured.
    Dead {
        /// Restarts attempted before giving up.
        restarts: u32,
        /// Last failure.
        reason: String,
    },
    /// Has a server instance.
    Active {
        /// Lifecycle state of the instance.
        state: LifecycleState,
        /// Restarts so far.
        restarts: u32,
    },
}

/// Owns every language server and the documents synchronised with them.
pub struct SessionManager {
    config: Config,
    launcher: Box<dyn ServerLauncher>,
    pub(crate) project_root: Option<Utf8PathBuf>,
    pub(crate) servers: HashMap<LanguageId, ServerSlot>,
    retiring: Vec<Box<ServerInstance>>,
    pub(crate) versions: VersionCounters,
    events_tx: Sender<ServerEvent>,
    events_rx: Receiver<ServerEvent>,
    next_generation: u64,
    shutting_down: bool,
    restart_requested: bool,
    progress: ProgressTracker,
    queued: Vec<HostEvent>,
}

impl SessionManager {
    /// Creates a manager that launches servers through `launcher`.
    #[must_use]
    pub fn new(
        config: Config,
        launcher: Box<dyn ServerLauncher>,
        project_root: Option<Utf8PathBuf>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            config,
            launcher,
            project_root,
            servers: HashMap::new(),
            retiring: Vec::new(),
            versions: VersionCounters::default(),
            events_tx,
            events_rx,
            next_generation: 1,
            shutting_down: false,
            restart_requested: false,
            progress: ProgressTracker::default(),
            queued: Vec::new(),
        }
    }

    /// Creates a manager that spawns real server processes.
    #[must_use]
    pub fn with_process_launcher(config: Config, project_root: Option<Utf8PathBuf>) -> Self {
        Self::new(config, Box::new(ProcessLauncher), project_root)
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Project root, if the editor has one open.
    #[must_use]
    pub fn project_root(&self) -> Option<&Utf8Path> {
        self.project_root.as_deref()
    }

    /// Registry entry for `language`; `None` until the language is first used.
    #[must_use]
    pub fn status(&self, language: &LanguageId) -> Option<ServerStatus> {
        let status = match self.servers.get(language)? {
            ServerSlot::Unused => ServerStatus::Unused,
            ServerSlot::Alias(target) => ServerStatus::Alias {
                target: target.clone(),
            },
            ServerSlot::Dead { restarts, reason } => ServerStatus::Dead {
                restarts: *restarts,
                reason: reason.clone(),
            },
            ServerSlot::Active(instance) => ServerStatus::Active {
                state: instance.state(),
                restarts: instance.restarts(),
            },
        };
        Some(status)
    }

    /// Negotiated capabilities of the server serving `language`.
    #[must_use]
    pub fn capabilities(&self, language: &LanguageId) -> Option<&CapabilitySet> {
        let language = match self.servers.get(language)? {
            ServerSlot::Alias(target) => target,
            _ => language,
        };
        self.instance(language)
            .filter(|instance| instance.state() == LifecycleState::Ready)
            .map(ServerInstance::capabilities)
    }

    /// Raw `initialize` results of every ready server, keyed by language.
    #[must_use]
    pub fn initialize_responses_dump(&self) -> Value {
        let responses: Map<String, Value> = self
            .servers
            .iter()
            .filter_map(|(language, slot)| match slot {
                ServerSlot::Active(instance) => instance
                    .initialize_response()
                    .map(|response| (language.to_string(), response.clone())),
                _ => None,
            })
            .collect();
        Value::Object(responses)
    }

    pub(crate) fn instance(&self, language: &LanguageId) -> Option<&ServerInstance> {
        match self.servers.get(language) {
            Some(ServerSlot::Active(instance)) => Some(instance),
            _ => None,
        }
    }

    fn slot(&mut self, language: &LanguageId) -> Result<&mut ServerSlot, HostError> {
        let slot = match self.servers.entry(language.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(configure(&self.config, language)?),
        };
        Ok(slot)
    }

    /// Language whose instance serves `language`, following one alias hop.
    pub(crate) fn resolve(&mut self, language: &LanguageId) -> Result<LanguageId, HostError> {
        let target = match self.slot(language)? {
            ServerSlot::Active(_) => return Ok(language.clone()),
            ServerSlot::Unused => return Err(HostError::not_configured(language)),
            ServerSlot::Dead { .. } => return Err(HostError::unavailable(language)),
            ServerSlot::Alias(target) => target.clone(),
        };
        match self.slot(&target)? {
            ServerSlot::Active(_) => Ok(target),
            ServerSlot::Dead { .. } => Err(HostError::unavailable(&target)),
            ServerSlot::Unused | ServerSlot::Alias(_) => Err(HostError::not_configured(language)),
        }
    }

    /// Launches the instance for `serving` if it has no process yet.
    fn ensure_started(&mut self, serving: &LanguageId) -> Result<(), HostError> {
        if self.shutting_down {
            return Ok(());
        }
        let generation = self.next_generation;
        let Some(instance) = active_mut(&mut self.servers, serving) else {
            return Ok(());
        };
        if instance.state() != LifecycleState::Stopped {
            return Ok(());
        }
        self.next_generation = self.next_generation.wrapping_add(1);
        let context = StartContext {
            launcher: self.launcher.as_ref(),
            project_root: self.project_root.as_deref(),
            events: &self.events_tx,
            generation,
        };
        let restarts = instance.restarts();
        let Err(source) = instance.start(&context) else {
            return Ok(());
        };

        let reason = source.to_string();
        error!(
            target: SESSION_TARGET,
            language = %serving,
            error = %reason,
            "failed to launch language server"
        );
        self.kill(serving, restarts, format!("failed to launch: {reason}"));
        Err(HostError::Launch {
            language: serving.clone(),
            source,
        })
    }

    fn kill(&mut self, language: &LanguageId, restarts: u32, reason: String) {
        self.progress.clear(language);
        self.servers.insert(
            language.clone(),
            ServerSlot::Dead {
                restarts,
                reason: reason.clone(),
            },
        );
        self.queued.push(HostEvent::Fatal {
            language: language.clone(),
            reason,
        });
    }

    /// Resolves and starts the server for `document`.
    ///
    /// Returns `None` for documents no server should see.
    fn attach(&mut self, document: &dyn EditorDocument) -> Result<Option<LanguageId>, HostError> {
        let Some(language) = document.language() else {
            return Ok(None);
        };
        let serving = match self.resolve(&language) {
            Ok(serving) => serving,
            Err(HostError::NotConfigured { .. }) => return Ok(None),
            Err(error) => return Err(error),
        };
        let in_scope = self.instance(&serving).is_some_and(|instance| {
            eligible(self.project_root.as_deref(), instance.config(), document)
        });
        if !in_scope {
            debug!(
                target: SESSION_TARGET,
                language = %serving,
                path = ?document.real_path(),
                "document is outside the server's project scope"
            );
            return Ok(None);
        }
        self.ensure_started(&serving)?;
        Ok(Some(serving))
    }

    fn with_sync<T>(
        &mut self,
        serving: &LanguageId,
        operation: impl FnOnce(&mut DocumentSync<'_>) -> Result<T, HostError>,
    ) -> Result<Option<T>, HostError> {
        let Some(instance) = active_mut(&mut self.servers, serving) else {
            return Ok(None);
        };
        let mut sync = DocumentSync {
            instance,
            versions: &mut self.versions,
        };
        operation(&mut sync).map(Some)
    }

    /// Starts the document's server if needed and opens the document on it.
    ///
    /// Documents opened before the server is ready are sent once the
    /// handshake completes if they are modified or active, and otherwise on
    /// their next change or save.
    ///
    /// # Errors
    ///
    /// Fails when the server is dead, cannot be launched or the
    /// notification cannot be written.
    pub fn did_open(&mut self, document: &dyn EditorDocument) -> Result<(), HostError> {
        let Some(serving) = self.attach(document)? else {
            return Ok(());
        };
        self.with_sync(&serving, |sync| sync.did_open(document))
            .map(drop)
    }

    /// Reports an edit. The document is opened first if the server has not
    /// seen it.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::did_open`].
    pub fn did_change(
        &mut self,
        document: &dyn EditorDocument,
        change: &TextChange,
    ) -> Result<(), HostError> {
        let Some(serving) = self.attach(document)? else {
            return Ok(());
        };
        self.with_sync(&serving, |sync| sync.did_change(document, change))
            .map(drop)
    }

    /// Reports a save.
    ///
    /// Saving a file some server reads its initialization options from
    /// schedules a restart of every server on the next event pump.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::did_open`].
    pub fn did_save(&mut self, document: &dyn EditorDocument) -> Result<(), HostError> {
        if let Some(path) = document.real_path()
            && self.is_options_file(path)
        {
            info!(
                target: SESSION_TARGET,
                %path,
                "initialization options changed; restarting language servers"
            );
            self.restart_requested = true;
        }
        let Some(serving) = self.attach(document)? else {
            return Ok(());
        };
        self.with_sync(&serving, |sync| sync.did_save(document))
            .map(drop)
    }

    /// Closes the document on its server. Never starts a server.
    ///
    /// # Errors
    ///
    /// Fails when the notification cannot be written.
    pub fn did_close(&mut self, document: &dyn EditorDocument) -> Result<(), HostError> {
        let Some(language) = document.language() else {
            return Ok(());
        };
        self.close_on(&language, document)
    }

    fn close_on(
        &mut self,
        language: &LanguageId,
        document: &dyn EditorDocument,
    ) -> Result<(), HostError> {
        let Ok(serving) = self.resolve(language) else {
            return Ok(());
        };
        self.with_sync(&serving, |sync| sync.did_close(document))
            .map(drop)
    }

    /// The file was reloaded from disk: close it and open it again.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::did_open`].
    pub fn document_reloaded(&mut self, document: &dyn EditorDocument) -> Result<(), HostError> {
        self.did_close(document)?;
        self.did_open(document)
    }

    /// The document's language changed from `previous`: close it on the old
    /// server and open it on the new one.
    ///
    /// # Errors
    ///
    /// As for [`SessionManager::did_open`].
    pub fn document_language_changed(
        &mut self,
        document: &dyn EditorDocument,
        previous: &LanguageId,
    ) -> Result<(), HostError> {
        self.close_on(previous, document)?;
        self.did_open(document)
    }

    fn is_options_file(&self, path: &Utf8Path) -> bool {
        let root = self.project_root.as_deref();
        self.servers.values().any(|slot| match slot {
            ServerSlot::Active(instance) => instance
                .options_file(root)
                .is_some_and(|options| options == path),
            _ => false,
        })
    }
}

pub(crate) fn active_mut<'a>(
    servers: &'a mut HashMap<LanguageId, ServerSlot>,
    language: &LanguageId,
) -> Option<&'a mut ServerInstance> {
    match servers.get_mut(language) {
        Some(ServerSlot::Active(instance)) => Some(instance),
        _ => None,
    }
}

fn configure(config: &Config, language: &LanguageId) -> Result<ServerSlot, HostError> {
    let server = config
        .server_config(language.as_str())
        .map_err(|source| HostError::Config {
            language: language.clone(),
            source,
        })?;
    if let Some(alias) = server.alias() {
        let target = LanguageId::new(&alias).map_err(|_| HostError::not_configured(language))?;
        if &target != language {
            debug!(
                target: SESSION_TARGET,
                language = %language,
                %target,
                "language served by alias"
            );
            return Ok(ServerSlot::Alias(target));
        }
    }
    if server.command_line().is_none() {
        debug!(
            target: SESSION_TARGET,
            language = %language,
            "no command configured; language unused"
        );
        return Ok(ServerSlot::Unused);
    }
    Ok(ServerSlot::Active(Box::new(ServerInstance::new(
        language.clone(),
        server,
        0,
    ))))
}

/// Whether a server configured with `config` should see `document`.
pub(crate) fn eligible(
    project_root: Option<&Utf8Path>,
    config: &ServerConfig,
    document: &dyn EditorDocument,
) -> bool {
    match project_root {
        None => config.use_without_project,
        Some(root) => {
            config.use_outside_project_dir
                || document
                    .real_path()
                    .is_some_and(|path| path.starts_with(root))
        }
    }
}
