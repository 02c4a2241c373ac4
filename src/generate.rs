//! One-shot entry points: image file in, finished story out.
//!
//! These wrap an [`Orchestrator`] for callers that just want a single run
//! and don't care about intermediate state. Use the orchestrator directly
//! for interactive sessions (re-runs, cancellation, state snapshots).

use crate::client::ApiClient;
use crate::config::StoryConfig;
use crate::error::StoryError;
use crate::orchestrator::Orchestrator;
use crate::output::StoryOutput;
use crate::upload::Attachment;
use std::path::Path;
use tracing::info;

/// A finished story plus the session that owns its media.
///
/// Local media (narration audio) lives in the session's media store. When no
/// `media_dir` is configured that store is a temp directory, so the file is
/// only valid while this value is alive; use [`GeneratedStory::save_media`]
/// to keep it.
#[derive(Debug)]
pub struct GeneratedStory {
    pub output: StoryOutput,
    session: Orchestrator,
}

impl GeneratedStory {
    /// Copy the story's media to `dest`. Returns `false` if there is none.
    pub async fn save_media(&self, dest: impl AsRef<Path>) -> Result<bool, StoryError> {
        let Some(ref media) = self.output.media else {
            return Ok(false);
        };
        self.session.media_store().persist(media, dest.as_ref()).await?;
        Ok(true)
    }

    pub fn session(&self) -> &Orchestrator {
        &self.session
    }
}

/// Generate a story from an image file and an optional PDF.
///
/// # Errors
/// Validation errors for unreadable inputs; otherwise whatever error ended
/// the run (the failing stage's [`StoryError::Remote`] or
/// [`StoryError::Transport`]).
pub async fn generate(
    image_path: impl AsRef<Path>,
    pdf_path: Option<&Path>,
    config: &StoryConfig,
) -> Result<GeneratedStory, StoryError> {
    let image_path = image_path.as_ref();
    info!("Generating story for {}", image_path.display());

    let image = Attachment::image_from_path(image_path).await?;
    let pdf = match pdf_path {
        Some(p) => Some(Attachment::pdf_from_path(p).await?),
        None => None,
    };

    let mut session = Orchestrator::new(config)?;
    session.select_image(image).await;
    if let Some(pdf) = pdf {
        session.select_pdf(pdf).await;
    }

    let result = session.run().await?.clone();
    let output = StoryOutput {
        caption: result.caption.unwrap_or_default(),
        story: result.story.unwrap_or_default(),
        media: result.media,
        evaluation: result.evaluation,
        model_choice: session.state().upload.model_choice.clone(),
        shape: config.shape,
        stats: session.last_run_stats().clone(),
    };

    Ok(GeneratedStory { output, session })
}

/// Synchronous wrapper around [`generate`].
///
/// Creates a temporary tokio runtime internally. The returned session's
/// media store stays usable; its async methods need a runtime of their own.
pub fn generate_sync(
    image_path: impl AsRef<Path>,
    pdf_path: Option<&Path>,
    config: &StoryConfig,
) -> Result<GeneratedStory, StoryError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| StoryError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate(image_path, pdf_path, config))
}

/// Check that the backend is reachable; returns its greeting.
pub async fn check_backend(config: &StoryConfig) -> Result<String, StoryError> {
    ApiClient::new(config)?.ping().await
}
