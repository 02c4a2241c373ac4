//! Caption stage: image bytes → one-line scene description.

use super::{attachment_part, Stage, StageInput, StageOutput};
use crate::client::{read_json, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use tracing::debug;

pub const PATH: &str = "/api/image-to-text";

/// `POST /api/image-to-text` with multipart field `image`; expects `{ text }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptionStage;

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    text: String,
}

#[async_trait]
impl Stage for CaptionStage {
    fn name(&self) -> &'static str {
        "caption"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let form = Form::new().part("image", attachment_part(self.name(), &input.request.image)?);
        let response = client.post_multipart(self.name(), PATH, form).await?;
        let body: CaptionResponse = read_json(self.name(), response).await?;
        debug!("caption: {:?}", body.text);
        Ok(StageOutput {
            caption: Some(body.text),
            ..Default::default()
        })
    }
}
