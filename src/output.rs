//! Output types returned by the one-shot entry points.

use crate::config::PipelineShape;
use crate::media::MediaRef;
use crate::model::ModelChoice;
use crate::pipeline::StoryEvaluation;
use serde::Serialize;

/// Wall-clock time spent in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

/// Timing for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub run_id: u64,
    /// Completed stages, in execution order.
    pub stages: Vec<StageTiming>,
    pub total_duration_ms: u64,
}

/// A finished story.
#[derive(Debug, Clone, Serialize)]
pub struct StoryOutput {
    pub caption: String,
    pub story: String,
    /// Narration audio (chained) or server-rendered image (combined).
    pub media: Option<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<StoryEvaluation>,
    pub model_choice: ModelChoice,
    pub shape: PipelineShape,
    pub stats: RunStats,
}
