//! Discovery and loading of the global and project configuration files.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::figment::Figment;
use ortho_config::load_config_file;
use tracing::debug;

use crate::defaults::{default_global_config_path, project_config_path};
use crate::error::ConfigError;
use crate::layers::{ConfigLayer, normalise_language};
use crate::logging::LoggingConfig;
use crate::server::ServerConfig;

const LOADER_TARGET: &str = "tessera_config::loader";

enum LayerSource {
    File(Utf8PathBuf),
    Inline { label: Utf8PathBuf, text: String },
}

/// Builder that collects configuration sources in precedence order.
///
/// Sources added later override earlier ones. The usual order is the global
/// file followed by the project file.
pub struct ConfigLoader {
    sources: Vec<LayerSource>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader seeded with the user-wide configuration file.
    #[must_use]
    pub fn new() -> Self {
        let sources = default_global_config_path()
            .map(LayerSource::File)
            .into_iter()
            .collect();
        Self { sources }
    }

    /// Creates a loader with no sources at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Appends a configuration file. Missing files are skipped at load time.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.sources.push(LayerSource::File(path.into()));
        self
    }

    /// Appends the project file found below `project_root`.
    #[must_use]
    pub fn with_project_root(self, project_root: &Utf8Path) -> Self {
        self.with_file(project_config_path(project_root))
    }

    /// Appends TOML text that did not come from disk.
    #[must_use]
    pub fn with_inline(mut self, label: impl Into<Utf8PathBuf>, text: impl Into<String>) -> Self {
        self.sources.push(LayerSource::Inline {
            label: label.into(),
            text: text.into(),
        });
        self
    }

    /// Reads and parses every source.
    ///
    /// Every source is attempted before failing so that one bad file does
    /// not hide another.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a file exists but cannot be read,
    /// [`ConfigError::Parse`] when a source is malformed,
    /// [`ConfigError::Aggregate`] when several sources fail and
    /// [`ConfigError::Merge`] when the merged logging table is invalid.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let mut layers = Vec::with_capacity(self.sources.len());
        let mut errors = Vec::new();
        for source in &self.sources {
            let layer = match source {
                LayerSource::File(path) => read_layer(path),
                LayerSource::Inline { label, text } => ConfigLayer::parse(label, text).map(Some),
            };
            match layer {
                Ok(Some(layer)) => layers.push(layer),
                Ok(None) => {}
                Err(error) => errors.push(error),
            }
        }
        if let Some(error) = ConfigError::collect(errors) {
            return Err(error);
        }
        Config::from_layers(layers)
    }
}

fn read_layer(path: &Utf8Path) -> Result<Option<ConfigLayer>, ConfigError> {
    let figment =
        load_config_file(path.as_std_path()).map_err(|error| ConfigError::load(path, error))?;
    let Some(figment) = figment else {
        debug!(target: LOADER_TARGET, path = %path, "configuration file not present");
        return Ok(None);
    };
    debug!(target: LOADER_TARGET, path = %path, "loaded configuration file");
    ConfigLayer::from_figment(path, &figment).map(Some)
}

/// Merged view over every loaded configuration layer.
#[derive(Debug, Clone, Default)]
pub struct Config {
    layers: Vec<ConfigLayer>,
    logging: LoggingConfig,
}

impl Config {
    /// Builds a configuration from already parsed layers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Merge`] when the merged `[logging]` table does
    /// not describe a valid [`LoggingConfig`].
    pub fn from_layers(layers: Vec<ConfigLayer>) -> Result<Self, ConfigError> {
        let logging = layers
            .iter()
            .fold(Figment::new(), |figment, layer| layer.stack_logging(figment))
            .extract()
            .map_err(|error| ConfigError::merge("logging", error))?;
        Ok(Self { layers, logging })
    }

    /// Logging settings.
    #[must_use]
    pub fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    /// Paths (or labels) of the layers that contributed, in precedence order.
    pub fn sources(&self) -> impl Iterator<Item = &Utf8Path> {
        self.layers.iter().map(ConfigLayer::source)
    }

    /// Every language that has a dedicated section in some layer.
    #[must_use]
    pub fn languages(&self) -> BTreeSet<String> {
        self.layers
            .iter()
            .flat_map(ConfigLayer::languages)
            .map(str::to_owned)
            .collect()
    }

    /// Resolves the settings for `language`.
    ///
    /// Layers apply in order; within each layer `[all]` applies before
    /// `[language.<id>]`. Languages without any section still receive the
    /// `[all]` settings and the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Merge`] when the merged table has values of the
    /// wrong type.
    pub fn server_config(&self, language: &str) -> Result<ServerConfig, ConfigError> {
        let language = normalise_language(language);
        self.layers
            .iter()
            .fold(Figment::new(), |figment, layer| {
                layer.stack_language(&language, figment)
            })
            .extract()
            .map_err(|error| ConfigError::merge(format!("language.{language}"), error))
    }
}
