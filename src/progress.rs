//! Observer trait for run and stage events.
//!
//! Inject an [`Arc<dyn RunObserver>`] via
//! [`crate::config::StoryConfigBuilder::observer`] to receive events as the
//! orchestrator drives a run: a terminal progress bar, a log line, a UI
//! refresh. The library knows nothing about how the host presents them.
//!
//! # Example
//!
//! ```rust
//! use img2story::{RunObserver, StoryConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter(AtomicUsize);
//!
//! impl RunObserver for StageCounter {
//!     fn on_stage_complete(&self, _index: usize, _total: usize, _stage: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = StoryConfig::builder()
//!     .observer(Arc::new(StageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// Stage hooks fire from the run's background task, the rest from the task
/// that owns the orchestrator, so implementations must be `Send + Sync`.
/// All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    /// A run was accepted and is about to dispatch its first stage.
    fn on_run_start(&self, run_id: u64, total_stages: usize) {
        let _ = (run_id, total_stages);
    }

    /// Called just before a stage's request is sent.
    ///
    /// # Arguments
    /// * `index` — 1-indexed stage position
    /// * `total` — number of stages in the run
    /// * `stage` — stage name, e.g. `"caption"`
    fn on_stage_start(&self, index: usize, total: usize, stage: &str) {
        let _ = (index, total, stage);
    }

    /// Called once a stage's response has been received and parsed.
    fn on_stage_complete(&self, index: usize, total: usize, stage: &str) {
        let _ = (index, total, stage);
    }

    /// The run finished with every stage successful.
    fn on_run_complete(&self, run_id: u64) {
        let _ = run_id;
    }

    /// The run ended in failure; `reason` is what the user should see.
    fn on_run_failed(&self, run_id: u64, reason: &str) {
        let _ = (run_id, reason);
    }

    /// A blocking, user-visible notification (validation or failure).
    fn on_notice(&self, message: &str) {
        let _ = message;
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::StoryConfig`].
pub type SharedObserver = Arc<dyn RunObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: AtomicUsize,
        notices: Mutex<Vec<String>>,
    }

    impl RunObserver for Recorder {
        fn on_stage_complete(&self, _index: usize, _total: usize, _stage: &str) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_notice(&self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let o = NoopObserver;
        o.on_run_start(1, 3);
        o.on_stage_start(1, 3, "caption");
        o.on_stage_complete(1, 3, "caption");
        o.on_run_failed(1, "boom");
        o.on_run_complete(2);
        o.on_notice("hello");
    }

    #[test]
    fn recorder_receives_overridden_events_only() {
        let r = Recorder::default();
        r.on_stage_start(1, 2, "caption");
        r.on_stage_complete(1, 2, "caption");
        r.on_stage_complete(2, 2, "story");
        r.on_notice("Please upload an image.");
        assert_eq!(r.stages.load(Ordering::SeqCst), 2);
        assert_eq!(r.notices.lock().unwrap().as_slice(), ["Please upload an image."]);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let o: SharedObserver = Arc::new(NoopObserver);
        o.on_run_start(7, 1);
    }
}
