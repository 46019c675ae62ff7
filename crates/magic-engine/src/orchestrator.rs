use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use magic_contracts::events::{EventPayload, EventWriter};
use magic_contracts::models::{ModelSelection, ModelSelector, EDIT_CAPABILITY};
use magic_contracts::{EditError, EditErrorKind, ImageArtifact, Session};
use serde_json::{json, Value};

use crate::compose::{compose_side_by_side, default_export_name, write_artifact};
use crate::config::EditorConfig;
use crate::intake::accept_file;
use crate::map_object;
use crate::providers::{
    default_provider_registry, CancelToken, EditProvider, EditProviderRegistry, EditRequest,
};

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Monotonically increasing id of one `request_edit` call.
pub type EditToken = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Succeeded { token: EditToken },
    Failed { token: EditToken, message: String },
    /// A superseded request resolved; the session was not touched.
    Discarded { token: EditToken },
}

impl EditOutcome {
    pub fn token(&self) -> EditToken {
        match self {
            Self::Succeeded { token } | Self::Failed { token, .. } | Self::Discarded { token } => {
                *token
            }
        }
    }
}

struct EditCompletion {
    token: EditToken,
    result: Result<ImageArtifact, EditError>,
    elapsed: Duration,
}

struct Settled {
    outcome: EditOutcome,
    event_type: &'static str,
    payload: EventPayload,
}

struct PendingEdit {
    token: EditToken,
    cancel: CancelToken,
    handle: Option<thread::JoinHandle<()>>,
    started_at: Instant,
}

/// Owns the session and the single outstanding edit.
///
/// Every `request_edit` gets a fresh token and supersedes the previous one:
/// the older worker is cancelled and whatever it eventually reports is
/// discarded. Intake and reset invalidate the outstanding token the same way.
/// Each transition is applied in full before it is appended to the event log,
/// so a failing log write never leaves the session half-updated.
pub struct EditOrchestrator {
    session: Session,
    events: EventWriter,
    providers: EditProviderRegistry,
    selector: ModelSelector,
    selection: ModelSelection,
    next_token: EditToken,
    pending: Option<PendingEdit>,
    sender: mpsc::Sender<EditCompletion>,
    receiver: mpsc::Receiver<EditCompletion>,
}

impl EditOrchestrator {
    pub fn new(
        providers: EditProviderRegistry,
        selector: ModelSelector,
        events: EventWriter,
        model: Option<&str>,
    ) -> Result<Self> {
        let selection = selector
            .select(model, EDIT_CAPABILITY)
            .map_err(|err| anyhow!(err))?;
        let (sender, receiver) = mpsc::channel();
        let orchestrator = Self {
            session: Session::new(),
            events,
            providers,
            selector,
            selection,
            next_token: 0,
            pending: None,
            sender,
            receiver,
        };
        orchestrator.events.emit(
            "session_started",
            map_object(json!({
                "model": orchestrator.selection.model.name,
                "provider": orchestrator.selection.model.provider,
                "fallback_reason": orchestrator.selection.fallback_reason,
                "providers": orchestrator.providers.names(),
            })),
        )?;
        Ok(orchestrator)
    }

    pub fn from_config(config: &EditorConfig, events: EventWriter) -> Result<Self> {
        Self::new(
            default_provider_registry(config),
            ModelSelector::new(None),
            events,
            config.model.as_deref(),
        )
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn selection(&self) -> &ModelSelection {
        &self.selection
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Token of the request whose result will be applied, if any.
    pub fn outstanding_token(&self) -> Option<EditToken> {
        self.pending.as_ref().map(|pending| pending.token)
    }

    /// Switches the model used by subsequent edits. In-flight work keeps the
    /// model it started with.
    pub fn set_model(&mut self, requested: &str) -> Result<&ModelSelection> {
        let selection = self
            .selector
            .select(Some(requested), EDIT_CAPABILITY)
            .map_err(|err| anyhow!(err))?;
        self.events.emit(
            "model_selected",
            map_object(json!({
                "model": selection.model.name,
                "provider": selection.model.provider,
                "requested": selection.requested,
                "fallback_reason": selection.fallback_reason,
            })),
        )?;
        self.selection = selection;
        Ok(&self.selection)
    }

    /// Reads `path` and publishes it as the new original. On an unreadable file
    /// the artifacts stay as they were, `last_error` explains the failure, and
    /// the returned error wraps the [`magic_contracts::IntakeError`].
    pub fn load_image(&mut self, path: &Path) -> Result<()> {
        match accept_file(path) {
            Ok(artifact) => self.accept_artifact(artifact, Some(path)),
            Err(err) => {
                let message = err.user_message();
                self.session.record_intake_failure(message.clone());
                self.events.emit(
                    "intake_failed",
                    map_object(json!({
                        "path": path.to_string_lossy(),
                        "error": message,
                    })),
                )?;
                Err(err.into())
            }
        }
    }

    pub fn accept_artifact(&mut self, artifact: ImageArtifact, source: Option<&Path>) -> Result<()> {
        let cancelled = self.cancel_pending();
        let mut payload = artifact.summary();
        payload.insert(
            "path".to_string(),
            source
                .map(|path| Value::String(path.to_string_lossy().to_string()))
                .unwrap_or(Value::Null),
        );
        self.session.replace_original(artifact);
        self.log_cancelled(cancelled, "image_replaced")?;
        self.events.emit("image_loaded", payload)?;
        Ok(())
    }

    /// Starts an edit of the current original. Without an original this is a
    /// silent no-op returning `None`.
    pub fn request_edit(&mut self, instruction: &str) -> Result<Option<EditToken>> {
        let Some(artifact) = self.session.original().cloned() else {
            return Ok(None);
        };
        let cancelled = self.cancel_pending();
        self.session.begin_edit();
        self.next_token += 1;
        let token = self.next_token;

        let request = EditRequest {
            artifact,
            instruction: instruction.to_string(),
            model: self.selection.model.name.clone(),
        };
        let provider_name = self.selection.model.provider.clone();
        let started = map_object(json!({
            "token": token,
            "instruction": request.instruction,
            "model": request.model,
            "provider": provider_name,
        }));

        let spawned = match self.providers.get(&provider_name) {
            Some(provider) => self.spawn_worker(token, provider, request),
            None => Err(EditError::service(format!(
                "No edit provider registered for '{provider_name}'."
            ))),
        };
        let settled = spawned
            .err()
            .map(|err| self.settle_latest(token, Err(err), Duration::ZERO));

        self.log_cancelled(cancelled, "superseded")?;
        self.events.emit("edit_started", started)?;
        if let Some(settled) = settled {
            self.events.emit(settled.event_type, settled.payload)?;
        }
        Ok(Some(token))
    }

    fn spawn_worker(
        &mut self,
        token: EditToken,
        provider: Arc<dyn EditProvider>,
        request: EditRequest,
    ) -> Result<(), EditError> {
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let sender = self.sender.clone();
        let handle = thread::Builder::new()
            .name(format!("magic-edit-{token}"))
            .spawn(move || {
                let started = Instant::now();
                let result = provider.edit(&request, &worker_cancel);
                let _ = sender.send(EditCompletion {
                    token,
                    result,
                    elapsed: started.elapsed(),
                });
            })
            .map_err(|err| {
                EditError::new(
                    EditErrorKind::Worker,
                    Some(format!("Edit worker spawn failed: {err}")),
                )
            })?;
        self.pending = Some(PendingEdit {
            token,
            cancel,
            handle: Some(handle),
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Applies every completion that has already arrived, without blocking.
    pub fn poll(&mut self) -> Result<Vec<EditOutcome>> {
        let mut outcomes = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            outcomes.push(self.apply_completion(completion)?);
        }
        if self.pending_worker_died() {
            outcomes.extend(self.poll_after_worker_exit()?);
        }
        Ok(outcomes)
    }

    /// Blocks until the outstanding request resolves. Returns `None` right away
    /// when nothing is outstanding.
    pub fn wait(&mut self) -> Result<Option<EditOutcome>> {
        loop {
            let Some(token) = self.outstanding_token() else {
                return Ok(None);
            };
            match self.receiver.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(completion) => {
                    let outcome = self.apply_completion(completion)?;
                    if outcome.token() == token {
                        return Ok(Some(outcome));
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.pending_worker_died() {
                        let outcomes = self.poll_after_worker_exit()?;
                        if let Some(outcome) = outcomes.into_iter().find(|row| row.token() == token) {
                            return Ok(Some(outcome));
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("edit completion channel disconnected"));
                }
            }
        }
    }

    /// Back to the empty creation state. The outstanding request, if any, is
    /// cancelled and its result will be ignored.
    pub fn reset(&mut self) -> Result<()> {
        let cancelled = self.cancel_pending();
        self.session.reset();
        self.log_cancelled(cancelled, "session_reset")?;
        self.events.emit("session_reset", EventPayload::new())?;
        Ok(())
    }

    /// Writes the edited artifact to `path`, or to `magic-edit.<ext>` inside
    /// `default_dir` when no path is given.
    pub fn export_edited(&self, path: Option<&Path>, default_dir: &Path) -> Result<PathBuf> {
        let edited = self
            .session
            .edited()
            .context("no edited image to export yet")?;
        let target = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_dir.join(default_export_name(edited)));
        write_artifact(&target, edited)?;
        self.emit_exported("edited", &target, edited)?;
        Ok(target)
    }

    /// Writes a PNG with the original and the result side by side.
    pub fn export_comparison(&self, path: Option<&Path>, default_dir: &Path) -> Result<PathBuf> {
        let (Some(original), Some(edited)) = (self.session.original(), self.session.edited())
        else {
            anyhow::bail!("comparison needs both an original and an edited image");
        };
        let composed = compose_side_by_side(original, edited)?;
        let target = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_dir.join("magic-edit-compare.png"));
        write_artifact(&target, &composed)?;
        self.emit_exported("comparison", &target, &composed)?;
        Ok(target)
    }

    /// Cancels outstanding work and logs the final session state.
    pub fn finish(&mut self) -> Result<()> {
        let cancelled = self.cancel_pending();
        self.log_cancelled(cancelled, "session_finished")?;
        self.events.emit("session_finished", self.session.summary())?;
        Ok(())
    }

    fn emit_exported(&self, kind: &str, target: &Path, artifact: &ImageArtifact) -> Result<()> {
        let mut payload = artifact.summary();
        payload.insert("kind".to_string(), Value::String(kind.to_string()));
        payload.insert(
            "path".to_string(),
            Value::String(target.to_string_lossy().to_string()),
        );
        self.events.emit("artifact_exported", payload)?;
        Ok(())
    }

    /// Stops tracking the outstanding request and signals its worker.
    fn cancel_pending(&mut self) -> Option<PendingEdit> {
        let pending = self.pending.take()?;
        pending.cancel.cancel();
        Some(pending)
    }

    fn log_cancelled(&self, pending: Option<PendingEdit>, reason: &str) -> Result<()> {
        let Some(pending) = pending else {
            return Ok(());
        };
        self.events.emit(
            "edit_cancelled",
            map_object(json!({
                "token": pending.token,
                "reason": reason,
                "elapsed_s": pending.started_at.elapsed().as_secs_f64(),
            })),
        )?;
        Ok(())
    }

    fn apply_completion(&mut self, completion: EditCompletion) -> Result<EditOutcome> {
        let is_latest = self.outstanding_token() == Some(completion.token);
        if !is_latest {
            self.events.emit(
                "edit_discarded",
                map_object(json!({
                    "token": completion.token,
                    "succeeded": completion.result.is_ok(),
                })),
            )?;
            return Ok(EditOutcome::Discarded {
                token: completion.token,
            });
        }
        if let Some(handle) = self.pending.take().and_then(|mut pending| pending.handle.take()) {
            let _ = handle.join();
        }
        self.finish_latest(completion.token, completion.result, completion.elapsed)
    }

    fn finish_latest(
        &mut self,
        token: EditToken,
        result: Result<ImageArtifact, EditError>,
        elapsed: Duration,
    ) -> Result<EditOutcome> {
        let settled = self.settle_latest(token, result, elapsed);
        self.events.emit(settled.event_type, settled.payload)?;
        Ok(settled.outcome)
    }

    /// Applies the latest request's result to the session and returns the
    /// event describing it, still to be logged.
    fn settle_latest(
        &mut self,
        token: EditToken,
        result: Result<ImageArtifact, EditError>,
        elapsed: Duration,
    ) -> Settled {
        match result {
            Ok(artifact) => {
                let mut payload = artifact.summary();
                payload.insert("token".to_string(), json!(token));
                payload.insert("latency_s".to_string(), json!(elapsed.as_secs_f64()));
                self.session.complete_edit(Ok(artifact));
                Settled {
                    outcome: EditOutcome::Succeeded { token },
                    event_type: "edit_succeeded",
                    payload,
                }
            }
            Err(err) => {
                let message = err.user_message();
                let payload = map_object(json!({
                    "token": token,
                    "kind": err.kind().as_str(),
                    "error": message,
                    "latency_s": elapsed.as_secs_f64(),
                }));
                self.session.complete_edit(Err(err));
                Settled {
                    outcome: EditOutcome::Failed { token, message },
                    event_type: "edit_failed",
                    payload,
                }
            }
        }
    }

    fn pending_worker_died(&self) -> bool {
        self.pending
            .as_ref()
            .and_then(|pending| pending.handle.as_ref())
            .map(|handle| handle.is_finished())
            .unwrap_or(false)
    }

    /// The worker thread is gone. Its completion is sent before it exits, so
    /// anything it reported is in the channel now; if not, it panicked.
    fn poll_after_worker_exit(&mut self) -> Result<Vec<EditOutcome>> {
        let mut outcomes = Vec::new();
        while let Ok(completion) = self.receiver.try_recv() {
            outcomes.push(self.apply_completion(completion)?);
        }
        if let Some(mut pending) = self.pending.take() {
            if let Some(handle) = pending.handle.take() {
                let _ = handle.join();
            }
            outcomes.push(self.finish_latest(
                pending.token,
                Err(EditError::worker_stopped()),
                pending.started_at.elapsed(),
            )?);
        }
        Ok(outcomes)
    }
}

impl Drop for EditOrchestrator {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
    }
}
