//! Language identifiers used to key server instances.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Normalised, non-empty language identifier such as `rust` or `c`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanguageId(String);

impl LanguageId {
    /// Builds an identifier, trimming and lower-casing the input.
    ///
    /// # Errors
    ///
    /// Returns [`LanguageParseError`] when the input is blank.
    pub fn new(input: &str) -> Result<Self, LanguageParseError> {
        input.parse()
    }

    /// Returns the lower-case identifier used in configuration sections.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Errors raised when parsing language identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid language identifier '{0}'")]
pub struct LanguageParseError(String);

impl LanguageParseError {
    /// Returns the input that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for LanguageId {
    type Err = LanguageParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalised = tessera_config::normalise_language(input);
        if normalised.is_empty() || normalised.contains(char::is_whitespace) {
            return Err(LanguageParseError(input.to_owned()));
        }
        Ok(Self(normalised))
    }
}
