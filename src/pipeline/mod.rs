//! Pipeline stages: one network round-trip each.
//!
//! A run is an ordered [`StageList`]. Each stage reads the run's snapshot
//! plus whatever earlier stages produced, and returns a [`StageOutput`]
//! that the orchestrator merges into the visible result before the next
//! stage starts.
//!
//! ## Shapes
//!
//! ```text
//! chained:   caption ──▶ story ──▶ speech
//!            (image)     (text)    (text → audio bytes)
//!
//! combined:  combined
//!            (image + model + pdf? → caption, story, image)
//!
//! modular:   upload ──▶ story
//!            (image → caption, image)  (form → story, metrics)
//! ```
//!
//! 1. [`caption`]      — `POST /api/image-to-text`
//! 2. [`story`]        — `POST /api/story-generator`
//! 3. [`speech`]       — `POST /api/text-to-speech`
//! 4. [`combined`]     — `POST /api/generate-story-from-image`
//! 5. [`image_upload`] — `POST /api/upload-image`
//! 6. [`story_form`]   — `POST /api/generate-story`
//!
//! Library users can assemble their own list with [`StageList::new`].

pub mod caption;
pub mod combined;
pub mod image_upload;
pub mod speech;
pub mod story;
pub mod story_form;

use crate::client::ApiClient;
use crate::config::PipelineShape;
use crate::error::StoryError;
use crate::state::RunRequest;
use crate::upload::Attachment;
use async_trait::async_trait;
use reqwest::multipart::Part;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use caption::CaptionStage;
pub use combined::CombinedStage;
pub use image_upload::ImageUploadStage;
pub use speech::SpeechStage;
pub use story::StoryStage;
pub use story_form::StoryFormStage;

/// One step of a run.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs, errors and progress output.
    fn name(&self) -> &'static str;

    /// Perform the stage's request.
    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError>;
}

/// What a stage can see: the submission snapshot and earlier outputs.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub request: RunRequest,
    pub caption: Option<String>,
    pub story: Option<String>,
}

impl StageInput {
    pub fn new(request: RunRequest) -> Self {
        Self {
            request,
            caption: None,
            story: None,
        }
    }

    /// Fold a completed stage's output into the input for the next one.
    pub fn absorb(&mut self, output: &StageOutput) {
        if let Some(ref c) = output.caption {
            self.caption = Some(c.clone());
        }
        if let Some(ref s) = output.story {
            self.story = Some(s.clone());
        }
    }

    pub(crate) fn require_caption(&self, stage: &'static str) -> Result<&str, StoryError> {
        self.caption.as_deref().ok_or(StoryError::MissingInput {
            stage,
            field: "caption",
        })
    }

    pub(crate) fn require_story(&self, stage: &'static str) -> Result<&str, StoryError> {
        self.story.as_deref().ok_or(StoryError::MissingInput {
            stage,
            field: "story",
        })
    }
}

/// Media returned by a stage, before it becomes a local reference.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// Raw bytes to be stored locally (speech audio).
    Binary { bytes: Vec<u8>, mime_type: String },
    /// An already-renderable string from the server.
    Inline(String),
}

impl fmt::Debug for MediaPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaPayload::Binary { bytes, mime_type } => f
                .debug_struct("Binary")
                .field("len", &bytes.len())
                .field("mime_type", mime_type)
                .finish(),
            MediaPayload::Inline(uri) => {
                let head: String = uri.chars().take(32).collect();
                f.debug_tuple("Inline").field(&head).finish()
            }
        }
    }
}

/// Story quality metrics some backends attach to their responses.
///
/// Kept as opaque JSON: the client only displays them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryEvaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readability: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rouge_scores: Option<serde_json::Value>,
}

impl StoryEvaluation {
    pub fn is_empty(&self) -> bool {
        self.sentiment.is_none()
            && self.readability.is_none()
            && self.coherence.is_none()
            && self.rouge_scores.is_none()
    }

    /// `Some(self)` unless every metric is absent.
    pub fn non_empty(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

/// Result of one stage. Absent fields leave the visible result untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutput {
    pub caption: Option<String>,
    pub story: Option<String>,
    pub media: Option<MediaPayload>,
    pub evaluation: Option<StoryEvaluation>,
}

/// Ordered stages making up one run.
#[derive(Clone)]
pub struct StageList {
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for StageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl StageList {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// The stage list for a built-in endpoint contract.
    pub fn for_shape(shape: PipelineShape) -> Self {
        match shape {
            PipelineShape::Chained => Self::new(vec![
                Arc::new(CaptionStage),
                Arc::new(StoryStage),
                Arc::new(SpeechStage),
            ]),
            PipelineShape::Combined => Self::new(vec![Arc::new(CombinedStage)]),
            PipelineShape::Modular => {
                Self::new(vec![Arc::new(ImageUploadStage), Arc::new(StoryFormStage)])
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Build a multipart file part from an attachment.
pub(crate) fn attachment_part(
    stage: &'static str,
    attachment: &Attachment,
) -> Result<Part, StoryError> {
    Part::bytes(attachment.bytes.as_ref().clone())
        .file_name(attachment.file_name.clone())
        .mime_str(&attachment.mime_type)
        .map_err(|e| StoryError::transport(stage, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelChoice;

    fn request() -> RunRequest {
        RunRequest {
            run_id: 1,
            image: Attachment::image_from_bytes(
                "cat.gif",
                b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec(),
            )
            .unwrap(),
            pdf: None,
            model_choice: ModelChoice::OpenAi,
        }
    }

    #[test]
    fn chained_shape_order() {
        let list = StageList::for_shape(PipelineShape::Chained);
        assert_eq!(list.names(), vec!["caption", "story", "speech"]);
    }

    #[test]
    fn combined_shape_is_single_stage() {
        let list = StageList::for_shape(PipelineShape::Combined);
        assert_eq!(list.names(), vec!["combined"]);
    }

    #[test]
    fn modular_shape_order() {
        let list = StageList::for_shape(PipelineShape::Modular);
        assert_eq!(list.names(), vec!["upload", "story"]);
    }

    #[test]
    fn absorb_carries_text_forward() {
        let mut input = StageInput::new(request());
        assert!(input.require_caption("story").is_err());

        input.absorb(&StageOutput {
            caption: Some("a cat".into()),
            ..Default::default()
        });
        assert_eq!(input.require_caption("story").unwrap(), "a cat");
        assert!(input.require_story("speech").is_err());

        input.absorb(&StageOutput {
            story: Some("Once upon a time...".into()),
            ..Default::default()
        });
        assert_eq!(input.require_story("speech").unwrap(), "Once upon a time...");
        assert_eq!(input.caption.as_deref(), Some("a cat"));
    }

    #[test]
    fn evaluation_non_empty() {
        assert!(StoryEvaluation::default().non_empty().is_none());
        let e = StoryEvaluation {
            readability: Some(serde_json::json!({"flesch": 90.1})),
            ..Default::default()
        };
        assert!(e.non_empty().is_some());
    }
}
