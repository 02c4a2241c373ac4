//! Which backend language model writes the story.
//!
//! The value is forwarded to the backend unchanged; the client attaches no
//! behaviour to it. Unknown strings survive as [`ModelChoice::Other`] so a
//! backend that grows a new model does not need a client release.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Backend model selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ModelChoice {
    /// `"OpenAI (GPT-3.5)"` (default)
    #[default]
    OpenAi,
    /// `"Hugging Face (Alternative)"`
    HuggingFace,
    /// Any other value, passed through as-is.
    Other(String),
}

impl ModelChoice {
    pub const OPENAI: &'static str = "OpenAI (GPT-3.5)";
    pub const HUGGING_FACE: &'static str = "Hugging Face (Alternative)";

    /// The wire string sent to the backend.
    pub fn as_str(&self) -> &str {
        match self {
            ModelChoice::OpenAi => Self::OPENAI,
            ModelChoice::HuggingFace => Self::HUGGING_FACE,
            ModelChoice::Other(s) => s,
        }
    }

    /// The two values the reference backend recognises.
    pub fn known() -> [ModelChoice; 2] {
        [ModelChoice::OpenAi, ModelChoice::HuggingFace]
    }
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelChoice {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let choice = match trimmed {
            Self::OPENAI => ModelChoice::OpenAi,
            Self::HUGGING_FACE => ModelChoice::HuggingFace,
            _ => match trimmed.to_ascii_lowercase().as_str() {
                "openai" | "gpt-3.5" | "gpt" => ModelChoice::OpenAi,
                "huggingface" | "hugging-face" | "hf" => ModelChoice::HuggingFace,
                _ => ModelChoice::Other(trimmed.to_string()),
            },
        };
        Ok(choice)
    }
}

impl Serialize for ModelChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModelChoice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or(ModelChoice::Other(s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_backend() {
        assert_eq!(ModelChoice::OpenAi.as_str(), "OpenAI (GPT-3.5)");
        assert_eq!(ModelChoice::HuggingFace.as_str(), "Hugging Face (Alternative)");
    }

    #[test]
    fn parses_exact_and_alias_forms() {
        assert_eq!("OpenAI (GPT-3.5)".parse::<ModelChoice>().unwrap(), ModelChoice::OpenAi);
        assert_eq!("hf".parse::<ModelChoice>().unwrap(), ModelChoice::HuggingFace);
        assert_eq!("OPENAI".parse::<ModelChoice>().unwrap(), ModelChoice::OpenAi);
    }

    #[test]
    fn unknown_values_pass_through() {
        let c: ModelChoice = "Mistral (Local)".parse().unwrap();
        assert_eq!(c, ModelChoice::Other("Mistral (Local)".into()));
        assert_eq!(c.as_str(), "Mistral (Local)");
    }

    #[test]
    fn serde_uses_wire_string() {
        let json = serde_json::to_string(&ModelChoice::HuggingFace).unwrap();
        assert_eq!(json, "\"Hugging Face (Alternative)\"");
        let back: ModelChoice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ModelChoice::HuggingFace);
    }
}
