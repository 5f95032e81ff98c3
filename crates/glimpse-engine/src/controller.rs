use std::cell::RefCell;
use std::time::Instant;

use glimpse_contracts::events::{EventPayload, EventWriter};
use glimpse_contracts::session::{Session, Turn};
use glimpse_contracts::uploads::ImageUpload;
use serde_json::{json, Map, Value};

use crate::providers::{ChatRequest, ModelCallFailure, VisionModel};
use crate::strategy::{Mode, ModelCall, Step, TurnStrategy};

pub const REMEDIATION_HINT: &str =
    "Make sure the model server is running and the required model is installed.";

/// The assistant text shown when a model call fails.
pub fn format_model_failure(failure: &ModelCallFailure) -> String {
    format!("Error: {failure}\n\n{REMEDIATION_HINT}")
}

/// What one inbound event did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Answered { text: String },
    Failed { diagnostic: String },
    Pinned { name: String },
    Unchanged,
    Rejected { reason: String },
}

/// Drives one session: turns uploads and questions into model calls and turns.
///
/// The controller never owns the session; each operation borrows it for the
/// duration of the event, including the blocking model call.
pub struct TurnController {
    strategy: Box<dyn TurnStrategy>,
    provider: Box<dyn VisionModel>,
    model: String,
    events: Option<EventWriter>,
    warnings: RefCell<Vec<String>>,
}

impl TurnController {
    pub fn new(mode: Mode, provider: Box<dyn VisionModel>, model: impl Into<String>) -> Self {
        Self::with_strategy(mode.strategy(), provider, model)
    }

    pub fn with_strategy(
        strategy: Box<dyn TurnStrategy>,
        provider: Box<dyn VisionModel>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            provider,
            model: model.into(),
            events: None,
            warnings: RefCell::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn mode(&self) -> Mode {
        self.strategy.mode()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn events(&self) -> Option<&EventWriter> {
        self.events.as_ref()
    }

    /// Event-log write failures collected since the last call.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }

    pub fn handle_upload(&self, session: &mut Session, upload: &ImageUpload) -> TurnOutcome {
        self.emit(
            "image_uploaded",
            json!({
                "mode": self.mode().as_str(),
                "name": upload.name(),
                "size": upload.len(),
                "sha256": upload.sha256_hex(),
            }),
        );
        match self.strategy.on_upload(session, upload) {
            Step::Ask { turn, call } => {
                self.append(session, turn);
                self.ask(session, call)
            }
            Step::Pinned { name } => {
                self.emit("image_pinned", json!({ "name": name }));
                if let Some(announcement) = session.last() {
                    self.emit_turn_appended(announcement, session.len());
                }
                TurnOutcome::Pinned { name }
            }
            Step::Unchanged => TurnOutcome::Unchanged,
            Step::Rejected { reason } => self.reject_upload(upload.name(), reason),
        }
    }

    /// Records an upload that never became an [`ImageUpload`] (unreadable file,
    /// unsupported type, bytes that are not an image). The session is untouched.
    pub fn reject_upload(&self, source: &str, reason: impl Into<String>) -> TurnOutcome {
        let reason = reason.into();
        self.emit(
            "upload_rejected",
            json!({
                "mode": self.mode().as_str(),
                "source": source,
                "reason": reason,
            }),
        );
        TurnOutcome::Rejected { reason }
    }

    pub fn handle_question(&self, session: &mut Session, question: &str) -> TurnOutcome {
        match self.strategy.on_question(session, question) {
            Step::Ask { turn, call } => {
                self.append(session, turn);
                self.ask(session, call)
            }
            Step::Pinned { name } => TurnOutcome::Pinned { name },
            Step::Unchanged => TurnOutcome::Unchanged,
            Step::Rejected { reason } => {
                self.emit(
                    "question_rejected",
                    json!({
                        "reason": reason,
                        "state": format!("{:?}", session.state()),
                    }),
                );
                TurnOutcome::Rejected { reason }
            }
        }
    }

    pub fn clear(&self, session: &mut Session) {
        let dropped = session.len();
        session.reset();
        self.emit("history_cleared", json!({ "dropped_turns": dropped }));
    }

    fn ask(&self, session: &mut Session, call: ModelCall) -> TurnOutcome {
        let request = ChatRequest {
            model: self.model.clone(),
            prompt: call.prompt,
            images: vec![call.image],
        };
        self.emit(
            "model_call_started",
            json!({
                "provider": self.provider.name(),
                "model": request.model,
                "prompt_chars": request.prompt.chars().count(),
                "images": request.images.len(),
            }),
        );
        let started = Instant::now();
        let result = self.provider.chat(&request);
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => {
                self.emit(
                    "model_call_finished",
                    json!({
                        "provider": self.provider.name(),
                        "model": reply.model.as_deref().unwrap_or(request.model.as_str()),
                        "latency_ms": latency_ms,
                        "prompt_tokens": reply.prompt_tokens,
                        "output_tokens": reply.output_tokens,
                        "reply_chars": reply.text.chars().count(),
                    }),
                );
                self.append(session, Turn::assistant(reply.text.clone()));
                TurnOutcome::Answered { text: reply.text }
            }
            Err(failure) => {
                self.emit(
                    "model_call_failed",
                    json!({
                        "provider": self.provider.name(),
                        "model": request.model,
                        "latency_ms": latency_ms,
                        "kind": failure.kind().as_str(),
                        "error": failure.message(),
                    }),
                );
                let diagnostic = format_model_failure(&failure);
                self.append(session, Turn::assistant(diagnostic.clone()));
                TurnOutcome::Failed { diagnostic }
            }
        }
    }

    fn append(&self, session: &mut Session, turn: Turn) {
        let evicted = session.append(turn);
        if let Some(appended) = session.last() {
            self.emit_turn_appended(appended, session.len());
        }
        if !evicted.is_empty() {
            self.emit("turns_evicted", json!({ "count": evicted.len() }));
        }
    }

    fn emit_turn_appended(&self, turn: &Turn, session_len: usize) {
        self.emit(
            "turn_appended",
            json!({
                "role": turn.role(),
                "content_chars": turn.content().chars().count(),
                "has_image": turn.image().is_some(),
                "session_len": session_len,
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        let payload: EventPayload = payload.as_object().cloned().unwrap_or_else(Map::new);
        if let Err(err) = events.emit(event_type, payload) {
            let message = format!("event log write failed ({event_type}): {err:#}");
            let mut warnings = self.warnings.borrow_mut();
            if !warnings.iter().any(|existing| existing == &message) {
                warnings.push(message);
            }
        }
    }
}
