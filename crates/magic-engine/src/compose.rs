use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use magic_contracts::ImageArtifact;

const COMPARE_GAP_PX: u32 = 16;

/// Pixel size read from the header only. `None` for payloads `image` can't parse.
pub fn artifact_dimensions(artifact: &ImageArtifact) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(artifact.bytes()))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Original on the left, result on the right, both scaled to the shorter height.
pub fn compose_side_by_side(original: &ImageArtifact, edited: &ImageArtifact) -> Result<ImageArtifact> {
    let left = image::load_from_memory(original.bytes()).context("original image decode failed")?;
    let right = image::load_from_memory(edited.bytes()).context("edited image decode failed")?;
    let height = left.height().min(right.height()).max(1);
    let left = scale_to_height(&left, height).to_rgba8();
    let right = scale_to_height(&right, height).to_rgba8();

    let width = left.width() + COMPARE_GAP_PX + right.width();
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &left, 0, 0);
    imageops::overlay(
        &mut canvas,
        &right,
        (left.width() + COMPARE_GAP_PX) as i64,
        0,
    );

    let bytes = encode_png(&DynamicImage::ImageRgba8(canvas))?;
    Ok(ImageArtifact::new("image/png", bytes))
}

fn scale_to_height(image: &DynamicImage, height: u32) -> DynamicImage {
    if image.height() == height {
        return image.clone();
    }
    let width = ((image.width() as f64 * height as f64) / image.height().max(1) as f64)
        .round()
        .max(1.0) as u32;
    image.resize_exact(width, height, FilterType::Triangle)
}

pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("png encode failed")?;
    Ok(buffer)
}

pub fn write_artifact(path: &Path, artifact: &ImageArtifact) -> Result<()> {
    if let Some(parent) = path.parent().filter(|value| !value.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, artifact.bytes()).with_context(|| format!("failed to write {}", path.display()))
}

/// Download name for an exported result, matching its MIME type.
pub fn default_export_name(artifact: &ImageArtifact) -> String {
    format!("magic-edit.{}", artifact.extension())
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, Rgba, RgbaImage};
    use magic_contracts::ImageArtifact;

    use super::{
        artifact_dimensions, compose_side_by_side, default_export_name, encode_png,
        write_artifact, COMPARE_GAP_PX,
    };

    fn solid_png(width: u32, height: u32, color: [u8; 4]) -> anyhow::Result<ImageArtifact> {
        let image = RgbaImage::from_pixel(width, height, Rgba(color));
        Ok(ImageArtifact::new(
            "image/png",
            encode_png(&DynamicImage::ImageRgba8(image))?,
        ))
    }

    #[test]
    fn dimensions_come_from_header() -> anyhow::Result<()> {
        assert_eq!(artifact_dimensions(&solid_png(7, 5, [0, 0, 0, 255])?), Some((7, 5)));
        assert_eq!(
            artifact_dimensions(&ImageArtifact::new("image/png", vec![1, 2, 3])),
            None
        );
        Ok(())
    }

    #[test]
    fn side_by_side_scales_to_shared_height() -> anyhow::Result<()> {
        let original = solid_png(20, 10, [255, 0, 0, 255])?;
        let edited = solid_png(10, 20, [0, 0, 255, 255])?;
        let composed = compose_side_by_side(&original, &edited)?;
        let decoded = image::load_from_memory(composed.bytes())?.to_rgba8();

        // left 20x10, right scaled 5x10
        assert_eq!(decoded.dimensions(), (20 + COMPARE_GAP_PX + 5, 10));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(20, 0), &Rgba([255, 255, 255, 255]));
        Ok(())
    }

    #[test]
    fn side_by_side_rejects_undecodable_input() -> anyhow::Result<()> {
        let good = solid_png(2, 2, [0, 0, 0, 255])?;
        let bad = ImageArtifact::new("image/png", vec![0; 8]);
        assert!(compose_side_by_side(&good, &bad).is_err());
        Ok(())
    }

    #[test]
    fn write_artifact_creates_parent_dirs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("result.png");
        let artifact = ImageArtifact::new("image/png", vec![1, 2, 3]);
        write_artifact(&path, &artifact)?;
        assert_eq!(std::fs::read(&path)?, vec![1, 2, 3]);
        assert_eq!(default_export_name(&artifact), "magic-edit.png");
        assert_eq!(
            default_export_name(&ImageArtifact::new("image/jpeg", vec![])),
            "magic-edit.jpg"
        );
        Ok(())
    }
}
