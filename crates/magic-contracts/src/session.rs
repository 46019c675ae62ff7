use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::artifact::ImageArtifact;
use crate::errors::EditError;

/// The single mutable record behind one editing interaction.
///
/// `Session::default()` is the empty creation state. Transitions are the only
/// way to mutate it; request ordering (which completion is allowed to land) is
/// decided by the owner before calling [`Session::complete_edit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    original: Option<ImageArtifact>,
    edited: Option<ImageArtifact>,
    is_editing: bool,
    last_error: Option<String>,
}

/// What the preview pane shows: the result once there is one, else the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preview<'a> {
    pub label: &'static str,
    pub artifact: &'a ImageArtifact,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn original(&self) -> Option<&ImageArtifact> {
        self.original.as_ref()
    }

    pub fn edited(&self) -> Option<&ImageArtifact> {
        self.edited.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        self.is_editing
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Intake published a new image: everything derived from the old one goes.
    pub fn replace_original(&mut self, artifact: ImageArtifact) {
        *self = Self {
            original: Some(artifact),
            ..Self::default()
        };
    }

    /// Marks an edit as in flight. Returns `false` and leaves the session
    /// untouched when there is no original to edit.
    pub fn begin_edit(&mut self) -> bool {
        if self.original.is_none() {
            return false;
        }
        self.is_editing = true;
        self.last_error = None;
        true
    }

    /// Applies the resolution of the latest edit. A failure keeps any prior
    /// successful result. `begin_edit` already cleared `last_error`, so a
    /// success only leaves one behind when an upload failed mid-edit.
    pub fn complete_edit(&mut self, outcome: Result<ImageArtifact, EditError>) {
        self.is_editing = false;
        match outcome {
            Ok(artifact) => {
                self.edited = Some(artifact);
            }
            Err(err) => {
                self.last_error = Some(err.user_message());
            }
        }
    }

    /// Surfaces an intake failure without touching the artifacts.
    pub fn record_intake_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn preview(&self) -> Option<Preview<'_>> {
        if let Some(edited) = self.edited.as_ref() {
            return Some(Preview {
                label: "Result",
                artifact: edited,
            });
        }
        self.original.as_ref().map(|artifact| Preview {
            label: "Original",
            artifact,
        })
    }

    /// Log-safe snapshot for the event stream.
    pub fn summary(&self) -> Map<String, Value> {
        json!({
            "original": self.original.as_ref().map(ImageArtifact::summary),
            "edited": self.edited.as_ref().map(ImageArtifact::summary),
            "is_editing": self.is_editing,
            "last_error": self.last_error,
        })
        .as_object()
        .cloned()
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::Session;
    use crate::artifact::ImageArtifact;
    use crate::errors::{EditError, EditErrorKind, GENERIC_EDIT_FAILURE};

    fn artifact(tag: u8) -> ImageArtifact {
        ImageArtifact::new("image/png", vec![tag; 4])
    }

    fn session_with(original: u8, edited: Option<u8>, error: Option<&str>) -> Session {
        let mut session = Session::new();
        session.replace_original(artifact(original));
        if let Some(tag) = edited {
            assert!(session.begin_edit());
            session.complete_edit(Ok(artifact(tag)));
        }
        if let Some(message) = error {
            assert!(session.begin_edit());
            session.complete_edit(Err(EditError::service(message)));
        }
        session
    }

    #[test]
    fn begin_edit_without_original_is_a_noop() {
        let mut session = Session::new();
        assert!(!session.begin_edit());
        assert_eq!(session, Session::default());

        session.record_intake_failure("Could not read image file: x");
        let before = session.clone();
        assert!(!session.begin_edit());
        assert_eq!(session, before);
    }

    #[test]
    fn intake_into_empty_session_sets_only_original() {
        let mut session = Session::new();
        session.replace_original(artifact(1));
        assert_eq!(session.original(), Some(&artifact(1)));
        assert!(session.edited().is_none());
        assert!(!session.is_editing());
        assert!(session.last_error().is_none());
    }

    #[test]
    fn intake_replaces_everything_regardless_of_prior_state() {
        let mut session = session_with(1, Some(2), Some("boom"));
        assert!(session.begin_edit());
        session.replace_original(artifact(3));

        let mut expected = Session::new();
        expected.replace_original(artifact(3));
        assert_eq!(session, expected);
    }

    #[test]
    fn begin_edit_clears_error_and_keeps_previous_result() {
        let mut session = session_with(1, Some(2), Some("x"));
        assert_eq!(session.last_error(), Some("x"));

        assert!(session.begin_edit());
        assert!(session.is_editing());
        assert!(session.last_error().is_none());
        assert_eq!(session.edited(), Some(&artifact(2)));
        assert_eq!(session.original(), Some(&artifact(1)));
    }

    #[test]
    fn successful_edit_sets_result_and_leaves_original() {
        let mut session = session_with(1, None, None);
        assert!(session.begin_edit());
        session.complete_edit(Ok(artifact(2)));

        assert!(!session.is_editing());
        assert_eq!(session.edited(), Some(&artifact(2)));
        assert!(session.last_error().is_none());
        assert_eq!(session.original(), Some(&artifact(1)));
    }

    #[test]
    fn failed_retry_keeps_prior_result() {
        let mut session = session_with(1, Some(2), None);
        assert!(session.begin_edit());
        session.complete_edit(Err(EditError::service("quota exceeded")));

        assert!(!session.is_editing());
        assert_eq!(session.edited(), Some(&artifact(2)));
        assert_eq!(session.last_error(), Some("quota exceeded"));
    }

    #[test]
    fn failure_without_message_uses_generic_text() {
        let mut session = session_with(1, None, None);
        assert!(session.begin_edit());
        session.complete_edit(Err(EditError::opaque(EditErrorKind::Transport)));
        assert_eq!(session.last_error(), Some(GENERIC_EDIT_FAILURE));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut session = session_with(1, Some(2), Some("x"));
        session.reset();
        assert_eq!(session, Session::default());
        session.reset();
        assert_eq!(session, Session::default());
    }

    #[test]
    fn intake_failure_keeps_artifacts() {
        let mut session = session_with(1, Some(2), None);
        session.record_intake_failure("Could not read image file: nope");
        assert_eq!(session.original(), Some(&artifact(1)));
        assert_eq!(session.edited(), Some(&artifact(2)));
        assert_eq!(session.last_error(), Some("Could not read image file: nope"));
    }

    #[test]
    fn intake_failure_during_edit_survives_success() {
        let mut session = session_with(1, None, None);
        assert!(session.begin_edit());
        session.record_intake_failure("Could not read image file: nope");
        assert!(session.is_editing());

        session.complete_edit(Ok(artifact(2)));
        assert!(!session.is_editing());
        assert_eq!(session.edited(), Some(&artifact(2)));
        assert_eq!(session.last_error(), Some("Could not read image file: nope"));
    }

    #[test]
    fn preview_prefers_result_over_original() {
        let mut session = Session::new();
        assert!(session.preview().is_none());

        session.replace_original(artifact(1));
        let preview = session.preview().map(|row| row.label);
        assert_eq!(preview, Some("Original"));

        assert!(session.begin_edit());
        session.complete_edit(Ok(artifact(2)));
        let preview = session.preview();
        assert_eq!(preview.map(|row| row.label), Some("Result"));
        assert_eq!(preview.map(|row| row.artifact), Some(&artifact(2)));
    }

    #[test]
    fn summary_reports_artifacts_without_payloads() {
        let session = session_with(1, Some(2), None);
        let summary = session.summary();
        assert_eq!(summary["original"]["bytes"], Value::from(4));
        assert_eq!(summary["is_editing"], Value::Bool(false));
        assert_eq!(summary["last_error"], Value::Null);
    }
}
