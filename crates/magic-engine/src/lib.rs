use std::env;

use serde_json::{Map, Value};

pub mod compose;
pub mod config;
pub mod intake;
pub mod orchestrator;
pub mod providers;

pub use compose::{artifact_dimensions, compose_side_by_side, default_export_name, write_artifact};
pub use config::EditorConfig;
pub use intake::accept_file;
pub use orchestrator::{EditOrchestrator, EditOutcome, EditToken};
pub use providers::{
    default_provider_registry, CancelToken, DryrunEditProvider, EditProvider,
    EditProviderRegistry, EditRequest, GeminiEditProvider,
};

/// Fresh id for one editor session, used to tag every logged event.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
