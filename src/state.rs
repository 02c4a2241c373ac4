//! Session state and its pure transition function.
//!
//! Everything the user can see lives in [`SessionState`]. It only changes
//! through [`reduce`], which never performs I/O: it returns the next state
//! plus a list of [`Effect`]s for the [`crate::orchestrator::Orchestrator`]
//! to carry out (start a run, cancel one, release media, notify the user).
//!
//! ```text
//!            Submit (image present)
//!   Idle ─────────────────────────────▶ Running
//!    ▲ ▲                                 │  │
//!    │ └──────────── Cancel ─────────────┘  │ RunFinished
//!    │                                      ▼
//!    └──── Submit ◀──── Succeeded | Failed(reason)
//! ```
//!
//! Runs are numbered. Stage and finish events carry their run id, and any
//! event for a run that is no longer active is dropped, so a superseded run
//! can never overwrite what the user is looking at.

use crate::error::{FailureKind, StoryError};
use crate::media::MediaRef;
use crate::model::ModelChoice;
use crate::pipeline::StoryEvaluation;
use crate::upload::{Attachment, Upload};
use serde::Serialize;

/// Where the current (or last) run stands.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed(String),
}

/// Results accumulated by the current run, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineResult {
    pub caption: Option<String>,
    pub story: Option<String>,
    /// Playable audio (chained) or server-rendered image (combined).
    pub media: Option<MediaRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<StoryEvaluation>,
}

impl PipelineResult {
    pub fn is_empty(&self) -> bool {
        self.caption.is_none()
            && self.story.is_none()
            && self.media.is_none()
            && self.evaluation.is_none()
    }
}

/// Everything a run needs, captured at submission time.
///
/// Later changes to the upload or model choice do not reach a run already
/// in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub run_id: u64,
    pub image: Attachment,
    pub pdf: Option<Attachment>,
    pub model_choice: ModelChoice,
}

/// Fields a completed stage contributes to the visible result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPatch {
    pub caption: Option<String>,
    pub story: Option<String>,
    pub media: Option<MediaRef>,
    pub evaluation: Option<StoryEvaluation>,
}

/// A blocking, user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: FailureKind,
    pub message: String,
}

impl Notice {
    fn from_error(err: &StoryError) -> Self {
        Self {
            kind: err.kind(),
            message: err.reason(),
        }
    }
}

/// UI-visible state owned by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub run_state: RunState,
    pub result: PipelineResult,
    pub upload: Upload,
    /// Id of the run whose events are accepted, if one is in flight.
    pub active_run: Option<u64>,
    /// Id handed to the most recent run.
    pub last_run_id: u64,
    pub notice: Option<Notice>,
}

impl SessionState {
    pub fn new(model_choice: ModelChoice) -> Self {
        Self {
            upload: Upload::with_model(model_choice),
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.run_state == RunState::Running
    }

    /// Whether the submit control should be enabled.
    pub fn can_submit(&self) -> bool {
        !self.is_running()
    }

    fn accepts(&self, run_id: u64) -> bool {
        self.is_running() && self.active_run == Some(run_id)
    }
}

/// Inputs to [`reduce`].
#[derive(Debug, Clone)]
pub enum Event {
    ImageSelected(Attachment),
    PdfSelected(Attachment),
    ImageDeleted,
    PdfDeleted,
    ModelChanged(ModelChoice),
    Submit,
    Cancel,
    DismissNotice,
    StageCompleted {
        run_id: u64,
        stage: &'static str,
        patch: ResultPatch,
    },
    RunFinished {
        run_id: u64,
        outcome: Result<(), StoryError>,
    },
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartRun(RunRequest),
    CancelRun(u64),
    Release(MediaRef),
    Notify(Notice),
}

/// Next state plus the effects to perform, in order.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SessionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn unchanged(state: &SessionState) -> Self {
        Self {
            state: state.clone(),
            effects: Vec::new(),
        }
    }
}

/// Compute the next session state for `event`.
pub fn reduce(state: &SessionState, event: Event) -> Transition {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        Event::ImageSelected(image) => {
            release_into(next.upload.image_preview.take(), &mut effects);
            next.upload.image_preview = Some(MediaRef::inline(image.data_uri()));
            next.upload.image = Some(image);
        }
        Event::PdfSelected(pdf) => {
            release_into(next.upload.pdf_preview.take(), &mut effects);
            next.upload.pdf_preview = Some(MediaRef::inline(pdf.data_uri()));
            next.upload.pdf = Some(pdf);
        }
        Event::ImageDeleted => {
            release_into(next.upload.image_preview.take(), &mut effects);
            next.upload.image = None;
        }
        Event::PdfDeleted => {
            release_into(next.upload.pdf_preview.take(), &mut effects);
            next.upload.pdf = None;
        }
        Event::ModelChanged(choice) => {
            next.upload.model_choice = choice;
        }
        Event::DismissNotice => {
            next.notice = None;
        }
        Event::Submit => {
            if state.is_running() {
                return Transition::unchanged(state);
            }
            let Some(image) = next.upload.image.clone().filter(|i| !i.is_empty()) else {
                let notice = Notice::from_error(&StoryError::NoImageSelected);
                next.notice = Some(notice.clone());
                effects.push(Effect::Notify(notice));
                return Transition {
                    state: next,
                    effects,
                };
            };

            let run_id = state.last_run_id + 1;
            let old = std::mem::take(&mut next.result);
            release_into(old.media, &mut effects);

            next.last_run_id = run_id;
            next.active_run = Some(run_id);
            next.run_state = RunState::Running;
            next.notice = None;
            effects.push(Effect::StartRun(RunRequest {
                run_id,
                image,
                pdf: next.upload.pdf.clone(),
                model_choice: next.upload.model_choice.clone(),
            }));
        }
        Event::Cancel => {
            let Some(run_id) = state.active_run.filter(|_| state.is_running()) else {
                return Transition::unchanged(state);
            };
            next.active_run = None;
            next.run_state = RunState::Idle;
            effects.push(Effect::CancelRun(run_id));
        }
        Event::StageCompleted { run_id, patch, .. } => {
            if !state.accepts(run_id) {
                release_into(patch.media, &mut effects);
                return Transition {
                    state: next,
                    effects,
                };
            }
            if patch.caption.is_some() {
                next.result.caption = patch.caption;
            }
            if patch.story.is_some() {
                next.result.story = patch.story;
            }
            if patch.evaluation.is_some() {
                next.result.evaluation = patch.evaluation;
            }
            if let Some(media) = patch.media {
                release_into(next.result.media.replace(media), &mut effects);
            }
        }
        Event::RunFinished { run_id, outcome } => {
            if !state.accepts(run_id) {
                return Transition::unchanged(state);
            }
            next.active_run = None;
            match outcome {
                Ok(()) => next.run_state = RunState::Succeeded,
                Err(StoryError::Cancelled) => next.run_state = RunState::Idle,
                Err(err) => {
                    let notice = Notice::from_error(&err);
                    next.run_state = RunState::Failed(notice.message.clone());
                    next.notice = Some(notice.clone());
                    effects.push(Effect::Notify(notice));
                }
            }
        }
    }

    Transition {
        state: next,
        effects,
    }
}

fn release_into(media: Option<MediaRef>, effects: &mut Vec<Effect>) {
    if let Some(m) = media.filter(MediaRef::is_local) {
        effects.push(Effect::Release(m));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn image() -> Attachment {
        // Minimal GIF header is enough for format sniffing.
        Attachment::image_from_bytes("cat.gif", b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec())
            .unwrap()
    }

    fn local(id: u64) -> MediaRef {
        MediaRef::Local {
            id,
            path: PathBuf::from(format!("/tmp/media-{id}.flac")),
            mime_type: "audio/flac".into(),
        }
    }

    fn apply(state: &SessionState, event: Event) -> SessionState {
        reduce(state, event).state
    }

    fn running() -> SessionState {
        let s = apply(&SessionState::default(), Event::ImageSelected(image()));
        apply(&s, Event::Submit)
    }

    #[test]
    fn submit_without_image_stays_idle_with_notice() {
        let t = reduce(&SessionState::default(), Event::Submit);
        assert_eq!(t.state.run_state, RunState::Idle);
        assert_eq!(t.state.active_run, None);
        assert_eq!(t.state.notice.as_ref().unwrap().kind, FailureKind::Validation);
        assert!(matches!(t.effects.as_slice(), [Effect::Notify(_)]));
        assert!(!t.effects.iter().any(|e| matches!(e, Effect::StartRun(_))));
    }

    #[test]
    fn submit_snapshots_upload_and_model() {
        let mut s = apply(&SessionState::default(), Event::ImageSelected(image()));
        s = apply(&s, Event::ModelChanged(ModelChoice::HuggingFace));
        let t = reduce(&s, Event::Submit);
        assert_eq!(t.state.run_state, RunState::Running);
        assert!(!t.state.can_submit());
        match t.effects.as_slice() {
            [Effect::StartRun(req)] => {
                assert_eq!(req.run_id, 1);
                assert_eq!(req.model_choice, ModelChoice::HuggingFace);
                assert_eq!(req.image, image());
            }
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    #[test]
    fn second_submit_while_running_is_noop() {
        let s = running();
        let t = reduce(&s, Event::Submit);
        assert_eq!(t.state, s);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn model_change_mid_run_does_not_touch_active_run() {
        let s = running();
        let s = apply(&s, Event::ModelChanged(ModelChoice::HuggingFace));
        assert_eq!(s.upload.model_choice, ModelChoice::HuggingFace);
        assert_eq!(s.active_run, Some(1));
        assert!(s.is_running());
    }

    #[test]
    fn stage_outputs_merge_in_order() {
        let mut s = running();
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "caption",
                patch: ResultPatch {
                    caption: Some("a cat".into()),
                    ..Default::default()
                },
            },
        );
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "story",
                patch: ResultPatch {
                    story: Some("Once upon a time...".into()),
                    ..Default::default()
                },
            },
        );
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "speech",
                patch: ResultPatch {
                    media: Some(local(1)),
                    ..Default::default()
                },
            },
        );
        s = apply(&s, Event::RunFinished { run_id: 1, outcome: Ok(()) });

        assert_eq!(s.run_state, RunState::Succeeded);
        assert_eq!(s.result.caption.as_deref(), Some("a cat"));
        assert_eq!(s.result.story.as_deref(), Some("Once upon a time..."));
        assert_eq!(s.result.media, Some(local(1)));
        assert_eq!(s.active_run, None);
    }

    #[test]
    fn failure_keeps_partial_results() {
        let mut s = running();
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "caption",
                patch: ResultPatch {
                    caption: Some("a cat".into()),
                    ..Default::default()
                },
            },
        );
        let t = reduce(
            &s,
            Event::RunFinished {
                run_id: 1,
                outcome: Err(StoryError::Remote {
                    stage: "story",
                    status: 500,
                    body: "model overloaded".into(),
                }),
            },
        );
        assert_eq!(t.state.run_state, RunState::Failed("model overloaded".into()));
        assert_eq!(t.state.result.caption.as_deref(), Some("a cat"));
        assert!(t.state.can_submit());
        match t.effects.as_slice() {
            [Effect::Notify(n)] => {
                assert_eq!(n.kind, FailureKind::Remote);
                assert_eq!(n.message, "model overloaded");
            }
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    #[test]
    fn rerun_resets_result_and_releases_old_media() {
        let mut s = running();
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "speech",
                patch: ResultPatch {
                    caption: Some("a cat".into()),
                    story: Some("story".into()),
                    media: Some(local(7)),
                    ..Default::default()
                },
            },
        );
        s = apply(&s, Event::RunFinished { run_id: 1, outcome: Ok(()) });

        let t = reduce(&s, Event::Submit);
        assert!(t.state.result.is_empty());
        assert_eq!(t.state.active_run, Some(2));
        assert_eq!(t.effects[0], Effect::Release(local(7)));
        assert!(matches!(t.effects[1], Effect::StartRun(RunRequest { run_id: 2, .. })));
    }

    #[test]
    fn replacing_media_within_a_run_releases_previous() {
        let mut s = running();
        s = apply(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "a",
                patch: ResultPatch {
                    media: Some(local(1)),
                    ..Default::default()
                },
            },
        );
        let t = reduce(
            &s,
            Event::StageCompleted {
                run_id: 1,
                stage: "b",
                patch: ResultPatch {
                    media: Some(local(2)),
                    ..Default::default()
                },
            },
        );
        assert_eq!(t.effects, vec![Effect::Release(local(1))]);
        assert_eq!(t.state.result.media, Some(local(2)));
    }

    #[test]
    fn stale_stage_events_are_ignored_and_media_released() {
        let s = running();
        let t = reduce(
            &s,
            Event::StageCompleted {
                run_id: 99,
                stage: "speech",
                patch: ResultPatch {
                    caption: Some("stale".into()),
                    media: Some(local(3)),
                    ..Default::default()
                },
            },
        );
        assert_eq!(t.state.result.caption, None);
        assert_eq!(t.effects, vec![Effect::Release(local(3))]);

        let t = reduce(&s, Event::RunFinished { run_id: 99, outcome: Ok(()) });
        assert!(t.state.is_running());
    }

    #[test]
    fn cancel_returns_to_idle_and_ignores_late_results() {
        let s = running();
        let t = reduce(&s, Event::Cancel);
        assert_eq!(t.state.run_state, RunState::Idle);
        assert_eq!(t.effects, vec![Effect::CancelRun(1)]);

        let late = reduce(
            &t.state,
            Event::StageCompleted {
                run_id: 1,
                stage: "caption",
                patch: ResultPatch {
                    caption: Some("late".into()),
                    ..Default::default()
                },
            },
        );
        assert_eq!(late.state.result.caption, None);
    }

    #[test]
    fn cancel_when_idle_is_noop() {
        let t = reduce(&SessionState::default(), Event::Cancel);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn cancelled_outcome_is_silent() {
        let s = running();
        let t = reduce(
            &s,
            Event::RunFinished {
                run_id: 1,
                outcome: Err(StoryError::Cancelled),
            },
        );
        assert_eq!(t.state.run_state, RunState::Idle);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn delete_image_clears_upload_and_preview_even_mid_run() {
        let s = running();
        assert!(s.upload.image_preview.is_some());
        let s = apply(&s, Event::ImageDeleted);
        assert!(s.upload.image.is_none());
        assert!(s.upload.image_preview.is_none());
        // The in-flight run is not cancelled.
        assert!(s.is_running());
        assert_eq!(s.active_run, Some(1));
    }

    #[test]
    fn select_and_delete_pdf() {
        let pdf = Attachment::pdf_from_bytes("ref.pdf", b"%PDF-1.5 body".to_vec()).unwrap();
        let s = apply(&SessionState::default(), Event::PdfSelected(pdf));
        assert!(s.upload.pdf.is_some());
        assert!(s
            .upload
            .pdf_preview
            .as_ref()
            .unwrap()
            .location()
            .starts_with("data:application/pdf;base64,"));
        let s = apply(&s, Event::PdfDeleted);
        assert!(s.upload.pdf.is_none());
        assert!(s.upload.pdf_preview.is_none());
    }

    #[test]
    fn dismiss_notice() {
        let s = apply(&SessionState::default(), Event::Submit);
        assert!(s.notice.is_some());
        let s = apply(&s, Event::DismissNotice);
        assert!(s.notice.is_none());
    }
}
