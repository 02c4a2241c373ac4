//! Form-encoded story stage, scored by the backend.

use super::{Stage, StageInput, StageOutput, StoryEvaluation};
use crate::client::{read_json, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const PATH: &str = "/api/generate-story";

/// `POST /api/generate-story` with form fields `scenario` and `model_choice`;
/// expects `{ story, sentiment, readability }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoryFormStage;

#[derive(Debug, Serialize)]
struct StoryForm<'a> {
    scenario: &'a str,
    model_choice: &'a str,
}

#[derive(Debug, Deserialize)]
struct StoryFormResponse {
    story: String,
    #[serde(flatten)]
    evaluation: StoryEvaluation,
}

#[async_trait]
impl Stage for StoryFormStage {
    fn name(&self) -> &'static str {
        "story"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let form = StoryForm {
            scenario: input.require_caption(self.name())?,
            model_choice: input.request.model_choice.as_str(),
        };
        let response = client.post_form(self.name(), PATH, &form).await?;
        let parsed: StoryFormResponse = read_json(self.name(), response).await?;
        debug!("story (form): {} chars", parsed.story.len());
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
    fn metrics_are_carried_as_evaluation() {
        let r: StoryFormResponse = serde_json::from_str(
            r#"{"story":"Once.","sentiment":{"compound":0.5},"readability":{"flesch":88.0}}"#,
        )
        .unwrap();
        let eval = r.evaluation.non_empty().expect("metrics");
        assert!(eval.sentiment.is_some());
        assert!(eval.readability.is_some());
        assert!(eval.rouge_scores.is_none());
    }
}
