pub mod artifact;
pub mod chat;
pub mod errors;
pub mod events;
pub mod models;
pub mod session;

pub use artifact::ImageArtifact;
pub use errors::{EditError, EditErrorKind, IntakeError, GENERIC_EDIT_FAILURE};
pub use session::{Preview, Session};
