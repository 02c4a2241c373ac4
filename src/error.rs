//! Error types for the img2story library.
//!
//! Every failure that ends a run is a [`StoryError`]. The variants group into
//! the three families a user can actually see (see [`FailureKind`]):
//!
//! * **Validation** — caught before any network call (no image selected,
//!   unreadable upload, bad configuration).
//! * **Remote** — the backend answered with a non-2xx status. The response
//!   body is kept verbatim because it is the message shown to the user.
//! * **Transport** — the request never produced a usable answer (connection
//!   refused, timeout, malformed JSON).
//!
//! None of them are retried automatically. A failed run keeps whatever
//! earlier stages already produced; see [`crate::state::reduce`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the img2story library.
#[derive(Debug, Clone, Error)]
pub enum StoryError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Submit was attempted without an image.
    #[error("Please upload an image.")]
    NoImageSelected,

    /// Upload path does not exist.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The bytes are not in any image format we can recognise.
    #[error("File is not a supported image: '{name}'")]
    NotAnImage { name: String },

    /// The file was read, but is not a PDF.
    #[error("File is not a valid PDF: '{name}'\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage needs a value no earlier stage produced.
    #[error("Stage '{stage}' needs a {field} but no earlier stage produced one")]
    MissingInput {
        stage: &'static str,
        field: &'static str,
    },

    // ── Remote errors ─────────────────────────────────────────────────────
    /// The backend returned a non-success HTTP status.
    #[error("{body}")]
    Remote {
        stage: &'static str,
        status: u16,
        body: String,
    },

    // ── Transport errors ──────────────────────────────────────────────────
    /// Network failure, timeout, or undecodable response body.
    #[error("{reason}")]
    Transport { stage: &'static str, reason: String },

    // ── Run control ───────────────────────────────────────────────────────
    /// The run was cancelled or superseded before it finished.
    #[error("Run cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write or copy a media file.
    #[error("Failed to write media file '{path}': {reason}")]
    MediaWriteFailed { path: PathBuf, reason: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The user-visible failure family of a [`StoryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Remote,
    Transport,
    Cancelled,
    Other,
}

impl StoryError {
    /// Classify this error into the family surfaced to the user.
    pub fn kind(&self) -> FailureKind {
        match self {
            StoryError::NoImageSelected
            | StoryError::FileNotFound { .. }
            | StoryError::PermissionDenied { .. }
            | StoryError::NotAnImage { .. }
            | StoryError::NotAPdf { .. }
            | StoryError::InvalidConfig(_)
            | StoryError::MissingInput { .. } => FailureKind::Validation,
            StoryError::Remote { .. } => FailureKind::Remote,
            StoryError::Transport { .. } => FailureKind::Transport,
            StoryError::Cancelled => FailureKind::Cancelled,
            StoryError::MediaWriteFailed { .. } | StoryError::Internal(_) => FailureKind::Other,
        }
    }

    /// The plain-text reason stored in `RunState::Failed`.
    ///
    /// For remote errors this is exactly the response body.
    pub fn reason(&self) -> String {
        self.to_string()
    }

    /// Name of the stage that failed, when the error came from one.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            StoryError::Remote { stage, .. }
            | StoryError::Transport { stage, .. }
            | StoryError::MissingInput { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub(crate) fn transport(stage: &'static str, err: impl std::fmt::Display) -> Self {
        StoryError::Transport {
            stage,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_reason_is_body_verbatim() {
        let e = StoryError::Remote {
            stage: "story",
            status: 500,
            body: "model overloaded".into(),
        };
        assert_eq!(e.reason(), "model overloaded");
        assert_eq!(e.kind(), FailureKind::Remote);
        assert_eq!(e.stage(), Some("story"));
    }

    #[test]
    fn no_image_is_validation() {
        let e = StoryError::NoImageSelected;
        assert_eq!(e.kind(), FailureKind::Validation);
        assert_eq!(e.to_string(), "Please upload an image.");
        assert_eq!(e.stage(), None);
    }

    #[test]
    fn transport_keeps_underlying_message() {
        let e = StoryError::transport("caption", "connection refused");
        assert_eq!(e.kind(), FailureKind::Transport);
        assert_eq!(e.reason(), "connection refused");
    }

    #[test]
    fn missing_input_display() {
        let e = StoryError::MissingInput {
            stage: "speech",
            field: "story",
        };
        let msg = e.to_string();
        assert!(msg.contains("speech"), "got: {msg}");
        assert!(msg.contains("story"), "got: {msg}");
    }

    #[test]
    fn not_a_pdf_display() {
        let e = StoryError::NotAPdf {
            name: "notes.txt".into(),
            magic: *b"hell",
        };
        assert!(e.to_string().contains("notes.txt"));
    }
}
