//! # img2story
//!
//! Turn a picture into a narrated children's story by driving a story
//! backend's caption, story and speech endpoints.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image (+ optional PDF, model choice)
//!  │
//!  ├─ chained shape
//!  │   ├─ 1. Caption  POST /api/image-to-text        → { text }
//!  │   ├─ 2. Story    POST /api/story-generator      → { story }
//!  │   └─ 3. Speech   POST /api/text-to-speech       → audio bytes
//!  │
//!  ├─ combined shape
//!  │   └─ 1. Combined POST /api/generate-story-from-image → { caption, story, image }
//!  │
//!  └─ modular shape
//!      ├─ 1. Upload   POST /api/upload-image             → { caption, image }
//!      └─ 2. Story    POST /api/generate-story (form)    → { story, metrics }
//! ```
//!
//! Stages run strictly one after another; each stage's output feeds the
//! next. Results appear in the session state as each stage completes, and a
//! failure keeps whatever earlier stages already produced.
//!
//! ## Architecture
//!
//! * [`state`] — the session state and a pure `reduce(state, event)` function
//! * [`orchestrator`] — owns the state, runs effects, spawns and cancels runs
//! * [`pipeline`] — the pluggable stage list and the four built-in stages
//! * [`media`] — local references for fetched audio, released on replacement
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2story::{generate, StoryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Base URL from IMG2STORY_BASE_URL, default http://127.0.0.1:8000
//!     let config = StoryConfig::from_env()?;
//!     let story = generate("boy_dog.jpg", None, &config).await?;
//!     println!("{}\n\n{}", story.output.caption, story.output.story);
//!     story.save_media("story.flac").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2story` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod media;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod state;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::ApiClient;
pub use config::{PipelineShape, StoryConfig, StoryConfigBuilder};
pub use error::{FailureKind, StoryError};
pub use generate::{check_backend, generate, generate_sync, GeneratedStory};
pub use media::{MediaRef, MediaStore};
pub use model::ModelChoice;
pub use orchestrator::Orchestrator;
pub use output::{RunStats, StageTiming, StoryOutput};
pub use pipeline::{Stage, StageInput, StageList, StageOutput, StoryEvaluation};
pub use progress::{NoopObserver, RunObserver, SharedObserver};
pub use render::{render_report, tidy_story};
pub use state::{reduce, Effect, Event, Notice, PipelineResult, RunState, SessionState, Transition};
pub use upload::{Attachment, Upload};
