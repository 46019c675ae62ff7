use image::{DynamicImage, Rgba};
use magic_contracts::{EditError, ImageArtifact};
use sha2::{Digest, Sha256};

use super::{CancelToken, EditProvider, EditRequest};
use crate::compose::encode_png;

/// Offline collaborator: tints the original with a colour derived from the
/// instruction and returns it as PNG.
#[derive(Debug, Default)]
pub struct DryrunEditProvider;

impl DryrunEditProvider {
    pub fn new() -> Self {
        Self
    }
}

impl EditProvider for DryrunEditProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit(
        &self,
        request: &EditRequest,
        cancel: &CancelToken,
    ) -> Result<ImageArtifact, EditError> {
        if cancel.is_cancelled() {
            return Err(EditError::cancelled());
        }
        let decoded = image::load_from_memory(request.artifact.bytes())
            .map_err(|err| EditError::rejected(format!("Dryrun could not decode the image: {err}")))?;
        let tinted = tint(decoded, color_from_instruction(&request.instruction));
        let bytes = encode_png(&tinted)
            .map_err(|err| EditError::service(format!("Dryrun encode failed: {err}")))?;
        Ok(ImageArtifact::new("image/png", bytes))
    }
}

fn tint(image: DynamicImage, (r, g, b): (u8, u8, u8)) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for pixel in rgba.pixels_mut() {
        let Rgba([pr, pg, pb, pa]) = *pixel;
        *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), pa]);
    }
    DynamicImage::ImageRgba8(rgba)
}

fn blend(base: u8, tint: u8) -> u8 {
    ((base as u16 + tint as u16) / 2) as u8
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(instruction.trim().as_bytes());
    (digest[0], digest[1], digest[2])
}
