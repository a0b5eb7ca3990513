//! Player settings.
//!
//! Settings are a plain value handed to whatever needs them (prompt
//! builders, image gating); nothing reads them from global state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    /// The sentence every prompt carries to pin the response language.
    pub fn instruction(&self) -> &'static str {
        match self {
            Language::En => "The entire response, including all text and JSON string values for names and descriptions, MUST be in English.",
            Language::Es => "The entire response, including all text and JSON string values for names and descriptions, MUST be in Spanish.",
        }
    }
}

/// Shapes prompt construction and NPC competence, not the rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFrequency {
    None,
    Rarely,
    #[default]
    Sometimes,
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub language: Language,
    pub difficulty: Difficulty,
    #[serde(rename = "imageGenerationFrequency")]
    pub image_frequency: ImageFrequency,
}

impl Settings {
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_image_frequency(mut self, image_frequency: ImageFrequency) -> Self {
        self.image_frequency = image_frequency;
        self
    }

    /// Whether images may be requested at all.
    pub fn allows_images(&self) -> bool {
        self.image_frequency != ImageFrequency::None
    }

    /// Read settings from stored JSON, keeping every field that parses and
    /// defaulting the rest.
    ///
    /// Older saves carried a single `enableImageGeneration` flag instead of a
    /// frequency; it maps to `sometimes` or `none`.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Settings::default();
        let field = |name: &str| value.get(name).cloned();

        let language = field("language")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(defaults.language);
        let difficulty = field("difficulty")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(defaults.difficulty);

        let image_frequency = match field("imageGenerationFrequency")
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(frequency) => frequency,
            None => match value.get("enableImageGeneration").and_then(Value::as_bool) {
                Some(true) => ImageFrequency::Sometimes,
                Some(false) => ImageFrequency::None,
                None => defaults.image_frequency,
            },
        };

        let settings = Settings {
            language,
            difficulty,
            image_frequency,
        };
        debug!(?settings, "Loaded settings");
        settings
    }

    /// Like [`Settings::from_value`], but from text. Unparseable text yields
    /// the defaults.
    pub fn from_json(text: &str) -> Self {
        serde_json::from_str::<Value>(text)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }
}
