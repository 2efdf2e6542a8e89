use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoError;
use ortho_config::figment;
use thiserror::Error;

/// Errors raised while loading or merging configuration layers.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file exists but could not be loaded.
    #[error("failed to load configuration file '{path}': {source}")]
    Load {
        /// File that failed to load.
        path: Utf8PathBuf,
        /// Loader failure.
        #[source]
        source: Arc<OrthoError>,
    },
    /// A configuration source is not valid TOML or has the wrong shape.
    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        /// File or inline layer label that failed to parse.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        #[source]
        source: Box<figment::Error>,
    },
    /// The merged settings for one section do not deserialise.
    #[error("invalid merged settings for '{section}': {source}")]
    Merge {
        /// Section whose merged table was rejected, e.g. `language.rust`.
        section: String,
        /// Deserialisation diagnostic.
        #[source]
        source: Box<figment::Error>,
    },
    /// More than one source failed; every failure is kept.
    #[error("multiple configuration errors:\n{}", describe(.0))]
    Aggregate(Vec<ConfigError>),
}

impl ConfigError {
    pub(crate) fn load(path: impl Into<Utf8PathBuf>, source: impl Into<Arc<OrthoError>>) -> Self {
        Self::Load {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn parse(path: impl Into<Utf8PathBuf>, source: figment::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn merge(section: impl Into<String>, source: figment::Error) -> Self {
        Self::Merge {
            section: section.into(),
            source: Box::new(source),
        }
    }

    /// Collapses a list of failures into one error.
    pub(crate) fn collect(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// File or label the error refers to, when it concerns a single source.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Load { path, .. } | Self::Parse { path, .. } => Some(path),
            Self::Merge { .. } | Self::Aggregate(_) => None,
        }
    }
}

fn describe(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|error| format!("  - {error}"))
        .collect::<Vec<_>>()
        .join("\n")
}
