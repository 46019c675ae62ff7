use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use magic_contracts::{EditError, ImageArtifact};

use crate::config::EditorConfig;

mod dryrun;
mod gemini;

pub use dryrun::DryrunEditProvider;
pub use gemini::GeminiEditProvider;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct EditRequest {
    pub artifact: ImageArtifact,
    pub instruction: String,
    pub model: String,
}

/// Shared flag a provider checks between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` on cancel.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
        }
    }
}

/// The hosted service that performs the actual image transformation.
pub trait EditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest, cancel: &CancelToken)
        -> Result<ImageArtifact, EditError>;
}

#[derive(Default)]
pub struct EditProviderRegistry {
    providers: BTreeMap<String, Arc<dyn EditProvider>>,
}

impl EditProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: EditProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EditProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EditorConfig) -> EditProviderRegistry {
    let mut providers = EditProviderRegistry::new();
    providers.register(DryrunEditProvider::new());
    providers.register(GeminiEditProvider::new(config));
    providers
}
