use std::fs;
use std::path::Path;

use magic_contracts::artifact::{mime_for_path, FALLBACK_MIME_TYPE};
use magic_contracts::{ImageArtifact, IntakeError};

/// Reads a user-selected file into an artifact. No type or size checks: any
/// readable file is accepted and the collaborator decides what it can edit.
pub fn accept_file(path: &Path) -> Result<ImageArtifact, IntakeError> {
    let bytes = fs::read(path).map_err(|err| IntakeError::new(path, err))?;
    let mime_type = mime_for_path(path)
        .or_else(|| sniff_mime(&bytes))
        .unwrap_or(FALLBACK_MIME_TYPE);
    Ok(ImageArtifact::new(mime_type, bytes))
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}
