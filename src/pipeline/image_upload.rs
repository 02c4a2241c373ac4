//! Image-upload stage: caption plus the server's echo of the image.

use super::{attachment_part, MediaPayload, Stage, StageInput, StageOutput};
use crate::client::{read_json, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use tracing::debug;

pub const PATH: &str = "/api/upload-image";

/// `POST /api/upload-image` with multipart field `file`; expects
/// `{ caption, image }` where `image` is a data URI of the upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageUploadStage;

#[derive(Debug, Deserialize)]
struct UploadResponse {
    caption: String,
    #[serde(default)]
    image: Option<String>,
}

#[async_trait]
impl Stage for ImageUploadStage {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let form = Form::new().part("file", attachment_part(self.name(), &input.request.image)?);
        let response = client.post_multipart(self.name(), PATH, form).await?;
        let body: UploadResponse = read_json(self.name(), response).await?;
        debug!("upload: caption {:?}", body.caption);
        Ok(StageOutput {
            caption: Some(body.caption),
            media: body.image.filter(|s| !s.is_empty()).map(MediaPayload::Inline),
            ..Default::default()
        })
    }
}
