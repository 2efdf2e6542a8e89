//! Parsing of individual configuration files.
//!
//! A file contributes three sections: `[logging]`, `[all]` and one
//! `[language.<id>]` table per language. Layers are stacked in order with
//! `[all]` preceding the language table inside each layer, so a project
//! `[all]` entry overrides a global `[language.<id>]` entry. The stacking
//! itself is a figment merge: nested tables merge key by key and every other
//! value, arrays included, is replaced.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::figment::Figment;
use ortho_config::figment::providers::{Format, Serialized, Toml};
use ortho_config::figment::value::Dict;
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::server::LANGUAGE_ONLY_KEYS;

const CONFIG_TARGET: &str = "tessera_config";

/// Normalises a language identifier for use as a lookup key.
#[must_use]
pub fn normalise_language(language: &str) -> String {
    language.trim().to_lowercase()
}

#[derive(Debug, Default, Deserialize)]
struct RawLayer {
    #[serde(default)]
    logging: Dict,
    #[serde(default)]
    all: Dict,
    #[serde(default)]
    language: BTreeMap<String, Dict>,
}

/// One parsed configuration source.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    source: Utf8PathBuf,
    logging: Dict,
    all: Dict,
    // Several spellings of one language (`Rust`, `rust`) apply in file order.
    languages: BTreeMap<String, Vec<Dict>>,
}

impl ConfigLayer {
    /// Parses TOML text read from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not valid TOML or when
    /// a top-level section has the wrong shape.
    pub fn parse(source: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        Self::from_figment(source, &Figment::from(Toml::string(text)))
    }

    pub(crate) fn from_figment(source: &Utf8Path, figment: &Figment) -> Result<Self, ConfigError> {
        let raw: RawLayer = figment
            .extract()
            .map_err(|error| ConfigError::parse(source, error))?;

        let mut all = raw.all;
        for key in LANGUAGE_ONLY_KEYS {
            if all.remove(*key).is_some() {
                warn!(
                    target: CONFIG_TARGET,
                    source = %source,
                    key = *key,
                    "ignoring language-only key in [all] section"
                );
            }
        }

        let mut languages: BTreeMap<String, Vec<Dict>> = BTreeMap::new();
        for (language, table) in raw.language {
            languages
                .entry(normalise_language(&language))
                .or_default()
                .push(table);
        }

        Ok(Self {
            source: source.to_owned(),
            logging: raw.logging,
            all,
            languages,
        })
    }

    /// File or label this layer was read from.
    #[must_use]
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// Languages that have a dedicated table in this layer.
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub(crate) fn stack_logging(&self, figment: Figment) -> Figment {
        figment.merge(Serialized::defaults(&self.logging))
    }

    pub(crate) fn stack_language(&self, language: &str, figment: Figment) -> Figment {
        let figment = figment.merge(Serialized::defaults(&self.all));
        self.languages
            .get(language)
            .into_iter()
            .flatten()
            .fold(figment, |figment, table| {
                figment.merge(Serialized::defaults(table))
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Resolved {
        command: Option<String>,
        goto_enable: Option<bool>,
        signature_enable: Option<bool>,
        list: Vec<i64>,
        hover: BTreeMap<String, i64>,
    }

    fn layer(text: &str) -> ConfigLayer {
        match ConfigLayer::parse(Utf8Path::new("inline.toml"), text) {
            Ok(layer) => layer,
            Err(error) => panic!("invalid test layer: {error}"),
        }
    }

    fn resolve(layers: &[ConfigLayer], language: &str) -> Resolved {
        let figment = layers.iter().fold(Figment::new(), |figment, layer| {
            layer.stack_language(language, figment)
        });
        match figment.extract() {
            Ok(resolved) => resolved,
            Err(error) => panic!("stacked layers do not deserialise: {error}"),
        }
    }

    #[rstest]
    fn nested_tables_merge_key_by_key() {
        let layers = [
            layer("[language.c.hover]\nenable = 1\npopup_max_lines = 10\n"),
            layer("[language.c.hover]\nenable = 0\n"),
        ];

        let hover = resolve(&layers, "c").hover;
        assert_eq!(hover.get("enable"), Some(&0));
        assert_eq!(hover.get("popup_max_lines"), Some(&10));
    }

    #[rstest]
    fn arrays_are_replaced_not_concatenated() {
        let layers = [
            layer("[all]\nlist = [1, 2]\n"),
            layer("[all]\nlist = [3]\n"),
        ];

        assert_eq!(resolve(&layers, "c").list, vec![3]);
    }

    #[rstest]
    fn language_only_keys_are_dropped_from_all() {
        let resolved = resolve(
            &[layer("[all]\ncommand = \"clangd\"\ngoto_enable = false\n")],
            "c",
        );

        assert_eq!(resolved.command, None);
        assert_eq!(resolved.goto_enable, Some(false));
    }

    #[rstest]
    fn language_sections_are_normalised() {
        let parsed = layer("[language.Rust]\ncommand = \"rust-analyzer\"\n");
        assert_eq!(parsed.languages().collect::<Vec<_>>(), vec!["rust"]);
        assert_eq!(
            resolve(&[parsed], "rust").command.as_deref(),
            Some("rust-analyzer")
        );
    }

    #[rstest]
    fn language_table_overrides_all_within_a_layer() {
        let parsed = layer(
            "[all]\nsignature_enable = false\n[language.c]\nsignature_enable = true\n",
        );

        assert_eq!(resolve(&[parsed], "c").signature_enable, Some(true));
    }

    #[rstest]
    #[case("all = 3\n")]
    #[case("[language.c\n")]
    fn malformed_sections_are_rejected(#[case] text: &str) {
        let result = ConfigLayer::parse(Utf8Path::new("bad.toml"), text);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
