//! Work-done progress tracking.
//!
//! Servers announce long-running work with `window/workDoneProgress/create`
//! and then stream `$/progress` notifications for the token. The tracker
//! keeps the latest title and percentage per token so that report and end
//! notifications, which omit the title, can still be rendered meaningfully.

use std::collections::HashMap;

use lsp_types::{NumberOrString, ProgressParams, ProgressParamsValue, WorkDoneProgress};
use serde_json::Value;
use tracing::debug;

use crate::language::LanguageId;
use crate::session::SESSION_TARGET;

/// Snapshot of one progress token after an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Language whose server reports the progress.
    pub language: LanguageId,
    /// Progress token rendered as a string.
    pub token: String,
    /// Title from the `begin` notification.
    pub title: Option<String>,
    /// Latest message.
    pub message: Option<String>,
    /// Latest percentage in `0..=100`.
    pub percentage: Option<u32>,
    /// `true` once the `end` notification arrived.
    pub finished: bool,
}

#[derive(Debug, Default, Clone)]
struct Entry {
    title: Option<String>,
    message: Option<String>,
    percentage: Option<u32>,
}

/// Progress state for every server.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    entries: HashMap<(LanguageId, String), Entry>,
}

impl ProgressTracker {
    /// Registers a token announced through `window/workDoneProgress/create`.
    pub fn create(&mut self, language: &LanguageId, token: &NumberOrString) {
        self.entries
            .entry((language.clone(), token_key(token)))
            .or_default();
    }

    /// Applies a `$/progress` notification.
    ///
    /// Returns `None` when the payload is not work-done progress.
    pub fn update(&mut self, language: &LanguageId, params: Value) -> Option<ProgressEvent> {
        let params: ProgressParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(error) => {
                debug!(
                    target: SESSION_TARGET,
                    language = %language,
                    %error,
                    "ignoring unrecognised progress payload"
                );
                return None;
            }
        };
        let ProgressParamsValue::WorkDone(progress) = params.value;
        let key = (language.clone(), token_key(&params.token));

        let finished = matches!(progress, WorkDoneProgress::End(_));
        let entry = self.entries.entry(key.clone()).or_default();
        match progress {
            WorkDoneProgress::Begin(begin) => {
                entry.title = Some(begin.title);
                entry.message = begin.message;
                entry.percentage = begin.percentage;
            }
            WorkDoneProgress::Report(report) => {
                if report.message.is_some() {
                    entry.message = report.message;
                }
                if report.percentage.is_some() {
                    entry.percentage = report.percentage;
                }
            }
            WorkDoneProgress::End(end) => {
                entry.message = end.message;
            }
        }
        let snapshot = entry.clone();
        if finished {
            self.entries.remove(&key);
        }

        let (language, token) = key;
        Some(ProgressEvent {
            language,
            token,
            title: snapshot.title,
            message: snapshot.message,
            percentage: snapshot.percentage,
            finished,
        })
    }

    /// Forgets every token of `language`; used when its server goes away.
    pub fn clear(&mut self, language: &LanguageId) {
        self.entries.retain(|(owner, _), _| owner != language);
    }

    /// Number of tokens currently tracked for `language`.
    #[must_use]
    pub fn active(&self, language: &LanguageId) -> usize {
        self.entries
            .keys()
            .filter(|(owner, _)| owner == language)
            .count()
    }
}

fn token_key(token: &NumberOrString) -> String {
    match token {
        NumberOrString::Number(number) => number.to_string(),
        NumberOrString::String(text) => text.clone(),
    }
}
