//! Speech stage: story text → audio bytes.

use super::{MediaPayload, Stage, StageInput, StageOutput};
use crate::client::{read_binary, ApiClient};
use crate::error::StoryError;
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

pub const PATH: &str = "/api/text-to-speech";

/// Mime type assumed when the backend omits `Content-Type`.
/// The reference TTS model produces FLAC.
pub const FALLBACK_AUDIO_MIME: &str = "audio/flac";

/// `POST /api/text-to-speech` with `{ text }`; expects a binary audio body.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeechStage;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
}

#[async_trait]
impl Stage for SpeechStage {
    fn name(&self) -> &'static str {
        "speech"
    }

    async fn run(&self, client: &ApiClient, input: &StageInput) -> Result<StageOutput, StoryError> {
        let body = SpeechRequest {
            text: input.require_story(self.name())?,
        };
        let response = client.post_json(self.name(), PATH, &body).await?;
        let (bytes, mime_type) = read_binary(self.name(), response, FALLBACK_AUDIO_MIME).await?;
        debug!("speech: {} bytes of {}", bytes.len(), mime_type);
        Ok(StageOutput {
            media: Some(MediaPayload::Binary { bytes, mime_type }),
            ..Default::default()
        })
    }
}
