use std::fmt;
use std::path::{Path, PathBuf};

pub const GENERIC_EDIT_FAILURE: &str = "Failed to edit image. Please try again.";

/// The selected file could not be read during intake.
#[derive(Debug)]
pub struct IntakeError {
    path: PathBuf,
    source: std::io::Error,
}

impl IntakeError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user_message(&self) -> String {
        format!("Could not read image file: {}", self)
    }
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.source)
    }
}

impl std::error::Error for IntakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditErrorKind {
    /// Network-level failure talking to the collaborator.
    Transport,
    /// The collaborator answered but refused or produced no image.
    Rejected,
    /// Non-success HTTP status or malformed response.
    Service,
    Cancelled,
    /// The worker running the request stopped without reporting.
    Worker,
}

impl EditErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Rejected => "rejected",
            Self::Service => "service",
            Self::Cancelled => "cancelled",
            Self::Worker => "worker",
        }
    }
}

/// Failure reported by the edit collaborator. The message is optional; callers
/// present [`EditError::user_message`], which falls back to a fixed text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EditError {
    kind: EditErrorKind,
    message: Option<String>,
}

impl EditError {
    pub fn new(kind: EditErrorKind, message: Option<String>) -> Self {
        let message = message
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self { kind, message }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(EditErrorKind::Transport, Some(message.into()))
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(EditErrorKind::Rejected, Some(message.into()))
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(EditErrorKind::Service, Some(message.into()))
    }

    pub fn cancelled() -> Self {
        Self::new(
            EditErrorKind::Cancelled,
            Some("Edit request was cancelled.".to_string()),
        )
    }

    pub fn worker_stopped() -> Self {
        Self::new(
            EditErrorKind::Worker,
            Some("Edit worker stopped unexpectedly.".to_string()),
        )
    }

    /// Error without a human-readable message.
    pub fn opaque(kind: EditErrorKind) -> Self {
        Self::new(kind, None)
    }

    pub fn kind(&self) -> EditErrorKind {
        self.kind
    }

    pub fn user_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| GENERIC_EDIT_FAILURE.to_string())
    }
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for EditError {}
