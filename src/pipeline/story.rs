//! Story stage: caption + model choice → children's story text.

use super::{Stage, StageInput, StageOutput, StoryEvaluation};
use crate::client::{read_json, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PATH: &str = "/api/story-generator";

/// `POST /api/story-generator` with `{ scenario, modelChoice }`; expects `{ story }`.
///
/// Backends that also score the story (`sentiment`, `readability`) have those
/// fields picked up as an evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoryStage;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StoryRequest<'a> {
    scenario: &'a str,
    model_choice: &'a str,
}

#[derive(Debug, Deserialize)]
struct StoryResponse {
    story: String,
    #[serde(flatten)]
    evaluation: StoryEvaluation,
}

#[async_trait]
impl Stage for StoryStage {
    fn name(&self) -> &'static str {
        "story"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let body = StoryRequest {
            scenario: input.require_caption(self.name())?,
            model_choice: input.request.model_choice.as_str(),
        };
        let response = client.post_json(self.name(), PATH, &body).await?;
        let parsed: StoryResponse = read_json(self.name(), response).await?;
        debug!("story: {} chars", parsed.story.len());
        Ok(StageOutput {
            story: Some(parsed.story),
            evaluation: parsed.evaluation.non_empty(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_model_choice() {
        let body = StoryRequest {
            scenario: "a cat",
            model_choice: "OpenAI (GPT-3.5)",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"scenario": "a cat", "modelChoice": "OpenAI (GPT-3.5)"})
        );
    }

    #[test]
    fn response_extras_become_evaluation() {
        let r: StoryResponse = serde_json::from_str(
            r#"{"story":"Once.","sentiment":{"compound":0.8},"readability":{"grade":3}}"#,
        )
        .unwrap();
        assert_eq!(r.story, "Once.");
        assert!(r.evaluation.sentiment.is_some());
        assert!(r.evaluation.coherence.is_none());
    }
}
