//! Combined stage: the whole pipeline behind a single endpoint.

use super::{attachment_part, MediaPayload, Stage, StageInput, StageOutput, StoryEvaluation};
use crate::client::{read_json, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use tracing::debug;

pub const PATH: &str = "/api/generate-story-from-image";

/// `POST /api/generate-story-from-image` with multipart fields `image`,
/// `model_choice` and optional `pdf`; expects `{ caption, story, image }`.
///
/// When a PDF is attached the backend uses it as retrieval context and may
/// add `rouge_scores` against it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CombinedStage;

#[derive(Debug, Deserialize)]
struct CombinedResponse {
    caption: String,
    story: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(flatten)]
    evaluation: StoryEvaluation,
}

#[async_trait]
impl Stage for CombinedStage {
    fn name(&self) -> &'static str {
        "combined"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let request = &input.request;
        let mut form = Form::new()
            .part("image", attachment_part(self.name(), &request.image)?)
            .text("model_choice", request.model_choice.as_str().to_string());
        if let Some(ref pdf) = request.pdf {
            form = form.part("pdf", attachment_part(self.name(), pdf)?);
        }

        let response = client.post_multipart(self.name(), PATH, form).await?;
        let parsed: CombinedResponse = read_json(self.name(), response).await?;
        debug!(
            "combined: caption {:?}, story {} chars, image {}",
            parsed.caption,
            parsed.story.len(),
            parsed.image.is_some()
        );

        Ok(StageOutput {
            caption: Some(parsed.caption),
            story: Some(parsed.story),
            media: parsed
                .image
                .filter(|s| !s.is_empty())
                .map(MediaPayload::Inline),
            evaluation: parsed.evaluation.non_empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_without_image_or_metrics() {
        let r: CombinedResponse =
            serde_json::from_str(r#"{"caption":"a dog","story":"Woof."}"#).unwrap();
        assert!(r.image.is_none());
        assert!(r.evaluation.is_empty());
    }

    #[test]
    fn response_with_rouge() {
        let r: CombinedResponse = serde_json::from_str(
            r#"{"caption":"a dog","story":"Woof.","image":"data:image/png;base64,AA==",
                "coherence":{"perplexity":12.5},"rouge_scores":{"rouge1":0.4}}"#,
        )
        .unwrap();
        assert_eq!(r.image.as_deref(), Some("data:image/png;base64,AA=="));
        assert!(r.evaluation.rouge_scores.is_some());
        assert!(r.evaluation.coherence.is_some());
    }
}
