//! crates/storyteller_core/src/locale.rs
//!
//! Multi-language text fields and the fallback rule used to display them.
//!
//! Every user-facing string in a story (titles, summaries, node text, choice
//! labels) is a `LocalizedText`: a map from language code to text where the
//! `en` entry is the mandatory fallback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The language every localized field must carry.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Errors raised while picking the display text of a localized field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocaleError {
    #[error("Text has no default ('en') translation")]
    MissingDefaultLocale,
}

/// The languages the application ships translations for.
///
/// `LocalizedText` itself accepts any language code; this enum is what user
/// preferences and generation requests are restricted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Es,
    Hi,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::En, Language::Fr, Language::Es, Language::Hi];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Es => "es",
            Language::Hi => "hi",
        }
    }

    /// The language's own name, used when prompting a generator to translate.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Fr => "French",
            Language::Es => "Spanish",
            Language::Hi => "Hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported language code: '{0}'")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnsupportedLanguage(s.to_string()))
    }
}

/// A text field translated into zero or more languages.
///
/// Serialized as a plain JSON object (`{"en": "...", "fr": "..."}`). An
/// instance read from untrusted input may lack its `en` entry; story
/// validation rejects such documents, and `resolve` reports the gap instead
/// of returning an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    /// Creates a field with only its default-language text.
    pub fn new(default_text: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(DEFAULT_LANGUAGE.to_string(), default_text.into());
        Self(map)
    }

    pub fn with_translation(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(language, text);
        self
    }

    pub fn insert(&mut self, language: impl Into<String>, text: impl Into<String>) {
        self.0.insert(language.into(), text.into());
    }

    /// Returns the text for `language` when present and not blank.
    pub fn get(&self, language: &str) -> Option<&str> {
        self.0
            .get(language)
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    pub fn has_default(&self) -> bool {
        self.get(DEFAULT_LANGUAGE).is_some()
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Picks the display text for `language`, falling back to `en`.
    pub fn resolve(&self, language: &str) -> Result<&str, LocaleError> {
        self.get(language)
            .or_else(|| self.get(DEFAULT_LANGUAGE))
            .ok_or(LocaleError::MissingDefaultLocale)
    }

    /// Like `resolve`, for optional fields such as media references where a
    /// missing default is not an error.
    pub fn resolve_optional(&self, language: &str) -> Option<&str> {
        self.get(language).or_else(|| self.get(DEFAULT_LANGUAGE))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LocalizedText {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Free-function form of [`LocalizedText::resolve`].
pub fn resolve<'a>(field: &'a LocalizedText, requested_language: &str) -> Result<&'a str, LocaleError> {
    field.resolve(requested_language)
}
