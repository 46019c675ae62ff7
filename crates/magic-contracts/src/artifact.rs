use std::fmt;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Encoded image payload plus the MIME type it was published with.
///
/// The textual form is a `data:` URL, which is both directly displayable and
/// directly transmissible to the edit collaborator. Serde uses that form too.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageArtifact {
    mime_type: String,
    bytes: Vec<u8>,
}

impl ImageArtifact {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let mime_type = mime_type.into();
        let mime_type = mime_type.trim();
        Self {
            mime_type: if mime_type.is_empty() {
                FALLBACK_MIME_TYPE.to_string()
            } else {
                mime_type.to_ascii_lowercase()
            },
            bytes,
        }
    }

    pub fn from_base64(mime_type: impl Into<String>, data: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("image base64 decode failed")?;
        Ok(Self::new(mime_type, bytes))
    }

    pub fn from_data_url(raw: &str) -> Result<Self> {
        let Some(rest) = raw.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL is missing its payload separator");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("only base64 data URLs are supported");
        };
        Self::from_base64(mime_type, data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn base64_data(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Length of the base64 payload without encoding it.
    pub fn encoded_len(&self) -> usize {
        self.bytes.len().div_ceil(3) * 4
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }

    /// First 12 hex chars of the SHA-256 of the payload.
    pub fn digest(&self) -> String {
        let digest = Sha256::digest(&self.bytes);
        hex::encode(&digest[..6])
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// Log-safe description: never includes the payload.
    pub fn summary(&self) -> Map<String, Value> {
        json!({
            "mime_type": self.mime_type,
            "bytes": self.bytes.len(),
            "digest": self.digest(),
        })
        .as_object()
        .cloned()
        .unwrap_or_default()
    }
}

impl fmt::Debug for ImageArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageArtifact")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .field("digest", &self.digest())
            .finish()
    }
}

impl TryFrom<String> for ImageArtifact {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_data_url(&value)
    }
}

impl From<ImageArtifact> for String {
    fn from(value: ImageArtifact) -> Self {
        value.to_data_url()
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let mut lowered = mime.trim().to_ascii_lowercase();
    if let Some(value) = lowered.strip_prefix("image/") {
        lowered = value.to_string();
    }
    match lowered.as_str() {
        "jpg" | "jpeg" => "jpg",
        "webp" => "webp",
        "gif" => "gif",
        "bmp" => "bmp",
        "heic" => "heic",
        "heif" => "heif",
        _ => "png",
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::{extension_for_mime, mime_for_path, ImageArtifact};

    #[test]
    fn data_url_embeds_mime_and_payload() {
        let artifact = ImageArtifact::new("image/png", vec![1, 2, 3]);
        assert_eq!(artifact.to_data_url(), "data:image/png;base64,AQID");
        assert_eq!(artifact.encoded_len(), "AQID".len());
    }

    #[test]
    fn from_data_url_reads_back_original_bytes() -> anyhow::Result<()> {
        let artifact = ImageArtifact::from_data_url("data:image/jpeg;base64,/9j/AA==")?;
        assert_eq!(artifact.mime_type(), "image/jpeg");
        assert_eq!(artifact.bytes(), &[0xff, 0xd8, 0xff, 0x00]);
        assert_eq!(artifact.extension(), "jpg");
        Ok(())
    }

    #[test]
    fn from_data_url_rejects_other_shapes() {
        assert!(ImageArtifact::from_data_url("https://example.com/a.png").is_err());
        assert!(ImageArtifact::from_data_url("data:image/png;base64").is_err());
        assert!(ImageArtifact::from_data_url("data:text/plain,hello").is_err());
        assert!(ImageArtifact::from_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn serde_uses_data_url_string() -> anyhow::Result<()> {
        let artifact = ImageArtifact::new("image/webp", vec![9, 9]);
        let value = serde_json::to_value(&artifact)?;
        assert_eq!(value, json!("data:image/webp;base64,CQk="));
        let parsed: ImageArtifact = serde_json::from_value(value)?;
        assert_eq!(parsed, artifact);
        Ok(())
    }

    #[test]
    fn blank_mime_falls_back_to_octet_stream() {
        let artifact = ImageArtifact::new("  ", vec![0]);
        assert_eq!(artifact.mime_type(), "application/octet-stream");
        assert_eq!(artifact.extension(), "png");
    }

    #[test]
    fn summary_and_debug_never_include_payload() {
        let artifact = ImageArtifact::new("image/png", vec![7; 64]);
        let summary = artifact.summary();
        assert_eq!(summary["bytes"], json!(64));
        assert_eq!(summary["digest"].as_str().map(str::len), Some(12));
        assert!(!format!("{artifact:?}").contains(&artifact.base64_data()));
    }

    #[test]
    fn mime_lookup_by_extension() {
        assert_eq!(mime_for_path(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("a.txt")), None);
        assert_eq!(extension_for_mime("image/webp"), "webp");
        assert_eq!(extension_for_mime("jpeg"), "jpg");
    }
}
