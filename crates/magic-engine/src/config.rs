use std::env;
use std::fmt;

use crate::non_empty_env;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_INLINE_BYTES: usize = 20 * 1024 * 1024;

/// Runtime settings for the editor, read from the environment.
///
/// | variable | default |
/// |---|---|
/// | `MAGIC_EDIT_MODEL` | registry default (`gemini-2.5-flash-image`) |
/// | `GEMINI_API_KEY` / `GOOGLE_API_KEY` | none |
/// | `GEMINI_API_BASE` | `https://generativelanguage.googleapis.com/v1beta` |
/// | `MAGIC_EDIT_REQUEST_TIMEOUT` | 90s, clamped to 15..=300 |
/// | `MAGIC_EDIT_TRANSPORT_RETRIES` | 2, clamped to 0..=4 |
/// | `MAGIC_EDIT_RETRY_BACKOFF` | 1.2s, clamped to 0.1..=10 |
/// | `MAGIC_EDIT_MAX_INLINE_BYTES` | 20 MiB of base64 payload |
#[derive(Clone)]
pub struct EditorConfig {
    pub model: Option<String>,
    pub gemini_api_base: String,
    pub gemini_api_key: Option<String>,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
    pub max_inline_bytes: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            model: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_api_key: None,
            request_timeout_s: 90.0,
            transport_retries: 2,
            retry_backoff_s: 1.2,
            max_inline_bytes: DEFAULT_MAX_INLINE_BYTES,
        }
    }
}

impl EditorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: non_empty_env("MAGIC_EDIT_MODEL"),
            gemini_api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.gemini_api_base),
            gemini_api_key: non_empty_env("GEMINI_API_KEY")
                .or_else(|| non_empty_env("GOOGLE_API_KEY")),
            request_timeout_s: env_f64("MAGIC_EDIT_REQUEST_TIMEOUT", 90.0, 15.0, 300.0),
            transport_retries: env_f64("MAGIC_EDIT_TRANSPORT_RETRIES", 2.0, 0.0, 4.0).round()
                as usize,
            retry_backoff_s: env_f64("MAGIC_EDIT_RETRY_BACKOFF", 1.2, 0.1, 10.0),
            max_inline_bytes: non_empty_env("MAGIC_EDIT_MAX_INLINE_BYTES")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_inline_bytes),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            self.model = Some(model);
        }
        self
    }
}

impl fmt::Debug for EditorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorConfig")
            .field("model", &self.model)
            .field("gemini_api_base", &self.gemini_api_base)
            .field(
                "gemini_api_key",
                &self.gemini_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("request_timeout_s", &self.request_timeout_s)
            .field("transport_retries", &self.transport_retries)
            .field("retry_backoff_s", &self.retry_backoff_s)
            .field("max_inline_bytes", &self.max_inline_bytes)
            .finish()
    }
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    parse_clamped_f64(non_empty_env(key).as_deref(), default, min, max)
}

fn parse_clamped_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
