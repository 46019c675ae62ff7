use std::time::Duration;

use magic_contracts::{EditError, ImageArtifact};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use super::{CancelToken, EditProvider, EditRequest};
use crate::config::EditorConfig;
use crate::{is_retryable_transport_error, truncate_text};

const DEFAULT_RESPONSE_MIME: &str = "image/png";

/// Edits through the Gemini `generateContent` endpoint: the original image as
/// inline data followed by the instruction as text.
pub struct GeminiEditProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
    request_timeout_s: f64,
    transport_retries: usize,
    retry_backoff_s: f64,
    max_inline_bytes: usize,
}

impl GeminiEditProvider {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
            http: HttpClient::new(),
            request_timeout_s: config.request_timeout_s,
            transport_retries: config.transport_retries,
            retry_backoff_s: config.retry_backoff_s,
            max_inline_bytes: config.max_inline_bytes,
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &EditRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.artifact.mime_type(),
                            "data": request.artifact.base64_data(),
                        }
                    },
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["IMAGE", "TEXT"],
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        cancel: &CancelToken,
    ) -> Result<HttpResponse, EditError> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(EditError::cancelled());
            }
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    // The URL carries the API key as a query parameter.
                    let raw = raw.without_url();
                    let retryable = is_retryable_transport_error(&raw);
                    if !retryable || attempt >= self.transport_retries {
                        return Err(EditError::transport(format!(
                            "Gemini request failed: {raw}"
                        )));
                    }
                    attempt += 1;
                    let delay_s = self.retry_backoff_s * attempt as f64;
                    if !cancel.sleep(Duration::from_secs_f64(delay_s)) {
                        return Err(EditError::cancelled());
                    }
                }
            }
        }
    }

    fn response_json_or_error(response: HttpResponse) -> Result<Value, EditError> {
        let status = response.status();
        let code = status.as_u16();
        let body = response.text().map_err(|err| {
            EditError::transport(format!(
                "Gemini response body read failed: {}",
                err.without_url()
            ))
        })?;
        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|parsed| {
                    parsed
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::trim)
                        .filter(|value| !value.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| truncate_text(body.trim(), 512));
            return Err(EditError::service(format!(
                "Gemini request failed ({code}): {detail}"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|_| EditError::service("Gemini returned invalid JSON payload"))
    }

    /// First inline image across all candidates. Without one, the text parts or
    /// the block/finish reason explain the refusal.
    fn extract_image(response_payload: &Value) -> Result<ImageArtifact, EditError> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut texts: Vec<String> = Vec::new();

        for candidate in &candidates {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                {
                    texts.push(text.to_string());
                    continue;
                }
                let Some(inline) = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(Value::as_object)
                else {
                    continue;
                };
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_RESPONSE_MIME);
                return ImageArtifact::from_base64(mime_type, data)
                    .map_err(|_| EditError::service("Gemini image base64 decode failed"));
            }
        }

        if !texts.is_empty() {
            return Err(EditError::rejected(truncate_text(&texts.join(" "), 512)));
        }
        if let Some(reason) = response_payload
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
        {
            return Err(EditError::rejected(format!(
                "Gemini blocked the request ({reason})."
            )));
        }
        if let Some(reason) = candidates
            .first()
            .and_then(|candidate| candidate.get("finishReason"))
            .and_then(Value::as_str)
        {
            return Err(EditError::rejected(format!(
                "Gemini returned no image (finish reason: {reason})."
            )));
        }
        Err(EditError::rejected("Gemini returned no image."))
    }
}

impl EditProvider for GeminiEditProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit(
        &self,
        request: &EditRequest,
        cancel: &CancelToken,
    ) -> Result<ImageArtifact, EditError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EditError::service("GEMINI_API_KEY or GOOGLE_API_KEY not set"));
        };
        let encoded_len = request.artifact.encoded_len();
        if encoded_len > self.max_inline_bytes {
            return Err(EditError::rejected(format!(
                "Image is too large to send ({:.1} MB encoded, limit {:.1} MB).",
                encoded_len as f64 / 1_048_576.0,
                self.max_inline_bytes as f64 / 1_048_576.0,
            )));
        }

        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self.post_with_transport_retries(&endpoint, api_key, &payload, cancel)?;
        if cancel.is_cancelled() {
            return Err(EditError::cancelled());
        }
        let response_payload = Self::response_json_or_error(response)?;
        Self::extract_image(&response_payload)
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use magic_contracts::{EditErrorKind, ImageArtifact};
    use mockito::Matcher;
    use serde_json::json;

    use super::GeminiEditProvider;
    use crate::config::EditorConfig;
    use crate::providers::{CancelToken, EditProvider, EditRequest};

    fn request() -> EditRequest {
        EditRequest {
            artifact: ImageArtifact::new("image/jpeg", vec![1, 2, 3]),
            instruction: "remove the flag".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
        }
    }

    fn provider_for(base: &str) -> GeminiEditProvider {
        GeminiEditProvider::new(&EditorConfig {
            gemini_api_base: base.to_string(),
            gemini_api_key: Some("test-key".to_string()),
            transport_retries: 0,
            ..EditorConfig::default()
        })
    }

    #[test]
    fn endpoint_prefixes_models_path_once() {
        let provider = provider_for("https://example.test/v1beta/");
        assert_eq!(
            provider.endpoint_for_model("gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model("models/gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
    }

    #[test]
    fn payload_puts_image_before_instruction() {
        let payload = GeminiEditProvider::build_payload(&request());
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("AQID"));
        assert_eq!(parts[1]["text"], json!("remove the flag"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn extract_image_reads_snake_and_camel_case() -> anyhow::Result<()> {
        let camel = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "CQk=" } }
                ]}
            }]
        });
        let artifact = GeminiEditProvider::extract_image(&camel)?;
        assert_eq!(artifact.mime_type(), "image/png");
        assert_eq!(artifact.bytes(), &[9, 9]);

        let snake = json!({
            "candidates": [{
                "content": { "parts": [
                    { "inline_data": { "mime_type": "image/webp", "data": "CQk=" } }
                ]}
            }]
        });
        assert_eq!(
            GeminiEditProvider::extract_image(&snake)?.mime_type(),
            "image/webp"
        );
        Ok(())
    }

    #[test]
    fn text_only_response_becomes_rejection_message() {
        let payload = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "I can't edit images of real people." }] },
                "finishReason": "STOP"
            }]
        });
        let err = GeminiEditProvider::extract_image(&payload).unwrap_err();
        assert_eq!(err.kind(), EditErrorKind::Rejected);
        assert_eq!(err.user_message(), "I can't edit images of real people.");
    }

    #[test]
    fn blocked_prompt_and_empty_candidates_are_explained() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert_eq!(
            GeminiEditProvider::extract_image(&blocked)
                .unwrap_err()
                .user_message(),
            "Gemini blocked the request (SAFETY)."
        );

        let finished = json!({ "candidates": [{ "finishReason": "IMAGE_SAFETY" }] });
        assert_eq!(
            GeminiEditProvider::extract_image(&finished)
                .unwrap_err()
                .user_message(),
            "Gemini returned no image (finish reason: IMAGE_SAFETY)."
        );

        assert_eq!(
            GeminiEditProvider::extract_image(&json!({}))
                .unwrap_err()
                .user_message(),
            "Gemini returned no image."
        );
    }

    #[test]
    fn missing_api_key_fails_without_network() {
        let provider = GeminiEditProvider::new(&EditorConfig {
            gemini_api_base: "http://127.0.0.1:9".to_string(),
            ..EditorConfig::default()
        });
        let err = provider
            .edit(&request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.user_message(), "GEMINI_API_KEY or GOOGLE_API_KEY not set");
    }

    #[test]
    fn oversized_artifact_is_rejected_before_sending() {
        let provider = GeminiEditProvider::new(&EditorConfig {
            gemini_api_base: "http://127.0.0.1:9".to_string(),
            gemini_api_key: Some("test-key".to_string()),
            max_inline_bytes: 2,
            ..EditorConfig::default()
        });
        let err = provider
            .edit(&request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), EditErrorKind::Rejected);
        assert!(err.user_message().starts_with("Image is too large to send"));
    }

    #[test]
    fn edit_round_trip_against_mock_server() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let edited = BASE64.encode([4u8, 5, 6]);
        let mock = server
            .mock(
                "POST",
                Matcher::Regex(r"^/models/gemini-2.5-flash-image:generateContent".to_string()),
            )
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(Matcher::PartialJson(json!({
                "contents": [{ "parts": [
                    { "inlineData": { "mimeType": "image/jpeg", "data": "AQID" } },
                    { "text": "remove the flag" }
                ]}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{
                        "content": { "parts": [
                            { "inlineData": { "mimeType": "image/png", "data": edited } }
                        ]}
                    }]
                })
                .to_string(),
            )
            .create();

        let provider = provider_for(&server.url());
        let artifact = provider
            .edit(&request(), &CancelToken::new())
            .map_err(anyhow::Error::msg)?;
        assert_eq!(artifact.bytes(), &[4, 5, 6]);
        assert_eq!(artifact.mime_type(), "image/png");
        mock.assert();
        Ok(())
    }

    #[test]
    fn service_error_message_is_surfaced() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", Matcher::Any)
            .with_status(429)
            .with_body(
                json!({ "error": { "code": 429, "message": "quota exceeded" } }).to_string(),
            )
            .create();

        let err = provider_for(&server.url())
            .edit(&request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), EditErrorKind::Service);
        assert_eq!(
            err.user_message(),
            "Gemini request failed (429): quota exceeded"
        );
        mock.assert();
    }

    #[test]
    fn transport_failure_does_not_leak_api_key() {
        let provider = provider_for("http://127.0.0.1:9");
        let err = provider
            .edit(&request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), EditErrorKind::Transport);
        assert!(!err.user_message().contains("test-key"));
    }

    #[test]
    fn cancelled_request_never_hits_the_network() {
        let mut server = mockito::Server::new();
        let mock = server.mock("POST", Matcher::Any).expect(0).create();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = provider_for(&server.url())
            .edit(&request(), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), EditErrorKind::Cancelled);
        mock.assert();
    }
}
