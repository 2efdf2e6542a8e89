//! Reaping and forced termination of language server processes.

use std::process::Child;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::language::LanguageId;

/// Log target for process supervision.
pub(crate) const SUPERVISOR_TARGET: &str = "tessera_lsp::supervisor";

/// How long a process may take to exit on its own before it is killed.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(200);

fn kill_and_reap(child: &mut Child, language: &LanguageId) {
    if let Err(error) = child.kill() {
        debug!(
            target: SUPERVISOR_TARGET,
            language = %language,
            %error,
            "kill failed; process probably exited already"
        );
    }
    if let Err(error) = child.wait() {
        warn!(
            target: SUPERVISOR_TARGET,
            language = %language,
            %error,
            "failed to reap language server process"
        );
    }
}

fn exited(child: &mut Child, language: &LanguageId) -> bool {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(
                target: SUPERVISOR_TARGET,
                language = %language,
                ?status,
                "language server exited"
            );
            true
        }
        Ok(None) => false,
        Err(error) => {
            warn!(
                target: SUPERVISOR_TARGET,
                language = %language,
                %error,
                "failed to check process status"
            );
            false
        }
    }
}

/// Reaps `child`, killing it if it is still running after the grace period.
pub(super) fn terminate_child(child: &mut Child, language: &LanguageId) {
    if exited(child, language) {
        return;
    }
    warn!(
        target: SUPERVISOR_TARGET,
        language = %language,
        "language server still running, waiting before killing"
    );
    thread::sleep(TERMINATION_GRACE);
    if !exited(child, language) {
        kill_and_reap(child, language);
    }
}

/// Kills `child` without waiting for it to exit on its own.
pub(super) fn force_exit(child: &mut Child, language: &LanguageId) {
    if !exited(child, language) {
        kill_and_reap(child, language);
    }
}
