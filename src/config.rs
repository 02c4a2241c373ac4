//! Configuration for story generation runs.
//!
//! All behaviour is controlled through [`StoryConfig`], built via its
//! [`StoryConfigBuilder`]. Callers set only what they care about and rely on
//! the documented defaults for the rest.

use crate::error::StoryError;
use crate::model::ModelChoice;
use crate::progress::RunObserver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Base URL used when nothing else is configured: the backend's dev address.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Environment variable holding the backend base URL.
pub const ENV_BASE_URL: &str = "IMG2STORY_BASE_URL";
/// Environment variable selecting the pipeline shape (`chained` / `combined`).
pub const ENV_SHAPE: &str = "IMG2STORY_SHAPE";
/// Environment variable holding the default model choice.
pub const ENV_MODEL: &str = "IMG2STORY_MODEL";

/// Configuration for a story generation session.
///
/// # Example
/// ```rust
/// use img2story::{PipelineShape, StoryConfig};
///
/// let config = StoryConfig::builder()
///     .base_url("http://localhost:8000/")
///     .shape(PipelineShape::Combined)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url, "http://localhost:8000");
/// ```
#[derive(Clone)]
pub struct StoryConfig {
    /// Backend origin, without a trailing slash. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// Which endpoint contract the backend speaks. Default: [`PipelineShape::Chained`].
    pub shape: PipelineShape,

    /// Model choice used for new sessions. Default: [`ModelChoice::OpenAi`].
    pub model_choice: ModelChoice,

    /// Per-request timeout in seconds. Default: 120.
    ///
    /// Story generation on a local Hugging Face model can take a minute or
    /// more, so this is deliberately generous.
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds. Default: 10.
    pub connect_timeout_secs: u64,

    /// Directory where fetched media (audio) is written.
    /// If None, a temp directory owned by the session is used.
    ///
    /// Files are deleted when released and when the session is dropped.
    pub media_dir: Option<PathBuf>,

    /// Observer receiving run and stage events.
    pub observer: Option<Arc<dyn RunObserver>>,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            shape: PipelineShape::default(),
            model_choice: ModelChoice::default(),
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            media_dir: None,
            observer: None,
        }
    }
}

impl fmt::Debug for StoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryConfig")
            .field("base_url", &self.base_url)
            .field("shape", &self.shape)
            .field("model_choice", &self.model_choice)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("media_dir", &self.media_dir)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn RunObserver>"))
            .finish()
    }
}

impl StoryConfig {
    /// Create a new builder for `StoryConfig`.
    pub fn builder() -> StoryConfigBuilder {
        StoryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a config from `IMG2STORY_*` environment variables, falling back
    /// to defaults for anything unset or empty.
    pub fn from_env() -> Result<Self, StoryError> {
        let mut builder = Self::builder();
        if let Some(url) = env_non_empty(ENV_BASE_URL) {
            builder = builder.base_url(url);
        }
        if let Some(shape) = env_non_empty(ENV_SHAPE) {
            builder = builder.shape(shape.parse()?);
        }
        if let Some(model) = env_non_empty(ENV_MODEL) {
            builder = builder.model_choice(model.parse().unwrap_or_default());
        }
        builder.build()
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`StoryConfig`].
pub struct StoryConfigBuilder {
    config: StoryConfig,
}

impl fmt::Debug for StoryConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl StoryConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn shape(mut self, shape: PipelineShape) -> Self {
        self.config.shape = shape;
        self
    }

    pub fn model_choice(mut self, choice: ModelChoice) -> Self {
        self.config.model_choice = choice;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn media_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.media_dir = Some(dir.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StoryConfig, StoryError> {
        let c = &self.config;
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(StoryError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{}'",
                c.base_url
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(StoryError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which backend contract a deployment uses.
///
/// | Shape | Calls |
/// |-------|-------|
/// | `Chained` | image-to-text → story-generator → text-to-speech |
/// | `Combined` | generate-story-from-image (image, model, optional PDF) |
/// | `Modular` | upload-image → generate-story (form-encoded) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineShape {
    /// Three sequential calls; produces caption, story and audio. (default)
    #[default]
    Chained,
    /// One call; produces caption, story and a server-rendered image.
    Combined,
    /// Two calls; produces caption, the echoed image, story and metrics.
    Modular,
}

impl FromStr for PipelineShape {
    type Err = StoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chained" | "chain" | "three-stage" => Ok(PipelineShape::Chained),
            "combined" | "single" => Ok(PipelineShape::Combined),
            "modular" | "router" => Ok(PipelineShape::Modular),
            other => Err(StoryError::InvalidConfig(format!(
                "unknown pipeline shape '{other}' (expected chained, combined or modular)"
            ))),
        }
    }
}

impl fmt::Display for PipelineShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineShape::Chained => f.write_str("chained"),
            PipelineShape::Combined => f.write_str("combined"),
            PipelineShape::Modular => f.write_str("modular"),
        }
    }
}
