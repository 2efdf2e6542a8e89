//! Test world wrapping a session manager, an editor workspace and the
//! scripted servers behind them.

use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use lsp_types::{Position, Range};
use tessera_config::ConfigLoader;

use super::scripted_server::{Received, ScriptedLauncher, ServerScript, Transcript};
use crate::{
    DocumentId, GotoOutcome, HostError, HostEvent, InMemoryDocument, InMemoryWorkspace,
    LanguageId, ServerStatus, SessionManager, TextChange,
};

/// Generous bound for anything that crosses a thread.
pub const WAIT: Duration = Duration::from_secs(5);

/// Project root used unless a test supplies its own.
pub const PROJECT_ROOT: &str = "/workspace";

/// Configuration serving Rust with a scripted server.
pub const RUST_CONFIG: &str = "[language.rust]\ncommand = \"scripted-rust-server --stdio\"\n";

/// Text of the main buffer most tests open.
pub const MAIN_RS: &str = "fn main() {}\n";

const PUMP_SLICE: Duration = Duration::from_millis(20);

/// Shared state exercised by unit tests and BDD steps.
pub struct TestWorld {
    /// Manager under test.
    pub manager: SessionManager,
    /// Buffers the editor has open.
    pub workspace: InMemoryWorkspace,
    /// Launcher shared with the manager.
    pub launcher: ScriptedLauncher,
    /// Every host event observed so far.
    pub events: Vec<HostEvent>,
    /// Last error returned by the manager.
    pub last_error: Option<HostError>,
    /// Last goto outcome observed.
    pub last_goto: Option<GotoOutcome>,
    root: Utf8PathBuf,
}

impl TestWorld {
    /// Builds a world from TOML configuration and a server script.
    #[must_use]
    pub fn new(config: &str, script: ServerScript) -> Self {
        Self::with_root(config, script, Utf8PathBuf::from(PROJECT_ROOT))
    }

    /// Builds a world whose project lives at `root`.
    #[must_use]
    pub fn with_root(config: &str, script: ServerScript, root: Utf8PathBuf) -> Self {
        let config = ConfigLoader::empty()
            .with_inline("test.toml", config)
            .load()
            .expect("test configuration parses");
        let launcher = ScriptedLauncher::new(script);
        let manager =
            SessionManager::new(config, Box::new(launcher.clone()), Some(root.clone()));
        Self {
            manager,
            workspace: InMemoryWorkspace::default(),
            launcher,
            events: Vec::new(),
            last_error: None,
            last_goto: None,
            root,
        }
    }

    /// The `rust` language id.
    #[must_use]
    pub fn rust() -> LanguageId {
        LanguageId::new("rust").expect("valid language")
    }

    /// Absolute path of `relative` inside the project.
    #[must_use]
    pub fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }

    /// Messages received by every scripted server.
    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        self.launcher.transcript()
    }

    /// Adds a buffer, focuses it and reports it opened.
    pub fn open(&mut self, id: u64, language: &str, path: &Utf8Path, text: &str) {
        let document = InMemoryDocument::new(
            DocumentId(id),
            LanguageId::new(language).ok(),
            Some(path.to_owned()),
            text,
        );
        self.workspace.insert(document);
        self.workspace.set_active(Some(DocumentId(id)));
        self.last_error = self.manager.did_open(buffer(&self.workspace, id)).err();
    }

    /// Opens `relative` as a Rust buffer.
    pub fn open_rust(&mut self, id: u64, relative: &str, text: &str) {
        let path = self.path(relative);
        self.open(id, "rust", &path, text);
    }

    /// Opens `src/main.rs` as buffer 1 and waits until the server has it.
    pub fn open_main_until_ready(&mut self) {
        self.open_rust(1, "src/main.rs", MAIN_RS);
        self.wait_until_ready();
        assert!(
            self.transcript()
                .wait_for_method("textDocument/didOpen", 1, WAIT),
            "active document is opened after the handshake"
        );
    }

    /// Looks up a buffer.
    #[must_use]
    pub fn document(&self, id: u64) -> &InMemoryDocument {
        buffer(&self.workspace, id)
    }

    /// Replaces `range` with `replacement`, leaving the buffer holding
    /// `full_text`, and reports the edit.
    pub fn edit(&mut self, id: u64, range: Range, replacement: &str, full_text: &str) {
        self.workspace
            .get_mut(DocumentId(id))
            .expect("document is in the workspace")
            .set_text(full_text);
        let change = TextChange::ranged(range, replacement);
        self.last_error = self
            .manager
            .did_change(buffer(&self.workspace, id), &change)
            .err();
    }

    /// Reports a save of the buffer.
    pub fn save(&mut self, id: u64) {
        self.workspace
            .get_mut(DocumentId(id))
            .expect("document is in the workspace")
            .set_modified(false);
        self.last_error = self.manager.did_save(buffer(&self.workspace, id)).err();
    }

    /// Reports the buffer closed.
    pub fn close(&mut self, id: u64) {
        self.last_error = self.manager.did_close(buffer(&self.workspace, id)).err();
    }

    /// Reports the buffer opened again.
    pub fn reopen(&mut self, id: u64) {
        self.last_error = self.manager.did_open(buffer(&self.workspace, id)).err();
    }

    /// Handles pending events without waiting.
    pub fn pump(&mut self) {
        let events = self.manager.process_events(&mut self.workspace);
        self.events.extend(events);
    }

    /// Pumps until `predicate` holds over the events seen so far.
    pub fn pump_until(
        &mut self,
        timeout: Duration,
        predicate: impl Fn(&[HostEvent]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(self.events.as_slice()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let events = self.manager.pump_events(&mut self.workspace, PUMP_SLICE);
            self.events.extend(events);
        }
    }

    /// Pumps until the scripted servers have received what `predicate`
    /// looks for.
    pub fn pump_until_received(
        &mut self,
        timeout: Duration,
        predicate: impl Fn(&[Received]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.transcript().snapshot()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            let events = self.manager.pump_events(&mut self.workspace, PUMP_SLICE);
            self.events.extend(events);
        }
    }

    /// Waits for the Rust server's handshake and collects the events it
    /// produced.
    pub fn wait_until_ready(&mut self) {
        self.manager
            .wait_until_ready(&Self::rust(), &mut self.workspace, WAIT)
            .expect("rust server becomes ready");
        self.pump();
    }

    /// Number of events matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&HostEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    /// Registry entry for the Rust server.
    #[must_use]
    pub fn rust_status(&self) -> Option<ServerStatus> {
        self.manager.status(&Self::rust())
    }
}

/// Range covering `start..end` on line 0.
#[must_use]
pub fn line_range(start: u32, end: u32) -> Range {
    Range::new(Position::new(0, start), Position::new(0, end))
}

/// Whether `event` is [`HostEvent::Ready`].
#[must_use]
pub fn is_ready(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Ready { .. })
}

/// Whether `event` is [`HostEvent::Fatal`].
#[must_use]
pub fn is_fatal(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Fatal { .. })
}

/// Whether `event` is [`HostEvent::Stopped`].
#[must_use]
pub fn is_stopped(event: &HostEvent) -> bool {
    matches!(event, HostEvent::Stopped { .. })
}

fn buffer(workspace: &InMemoryWorkspace, id: u64) -> &InMemoryDocument {
    workspace
        .get(DocumentId(id))
        .expect("document is in the workspace")
}
