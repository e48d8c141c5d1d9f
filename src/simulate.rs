//! Scripted popup conversations replayed against the in-memory host.
//!
//! A transcript describes what the popup (and the user) do; the replay drives a real
//! [`DocumentClient`] through it and reports what the host side did in return.

use std::sync::Arc;
use std::time::Duration;

use handshake_engine::{ClientConfig, DocumentClient, SessionEvent, StartError};
use omnidocs_core_types::WindowId;
use popup_lifecycle::{InboundEnvelope, MemoryHost, MemoryWindow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::panel::DataRequestPanel;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to parse transcript: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("transcript has no popup url and none was given")]
    MissingUrl,
    #[error("failed to start session: {0}")]
    Start(#[from] StartError),
    #[error("session started without a popup window")]
    NoWindow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    #[serde(default)]
    pub url: Option<String>,
    /// The environment refuses to open the popup.
    #[serde(default)]
    pub block_popups: bool,
    /// The popup reports closure as an event instead of being polled.
    #[serde(default)]
    pub close_events: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Message posted by the popup.
    Send { message: Value },
    /// Message posted by some other window.
    SendForeign { message: Value },
    /// Operator answer to the pending data request; a string is sent as-is, anything
    /// else is serialized first.
    Respond { payload: Value },
    UserClose,
    WaitMs { ms: u64 },
}

impl Transcript {
    /// Parse YAML or JSON.
    pub fn parse(raw: &str) -> Result<Self, ReplayError> {
        Ok(serde_yaml::from_str(raw)?)
    }
}

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Overrides the transcript's url.
    pub url: Option<String>,
    pub default_url: Option<String>,
    /// Forces popup blocking regardless of the transcript.
    pub block_popups: bool,
    pub client: ClientConfig,
    pub countdown: Duration,
    /// Upper bound on waiting for the session to react to a step.
    pub settle: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            url: None,
            default_url: None,
            block_popups: false,
            client: ClientConfig::default(),
            countdown: crate::panel::DEFAULT_COUNTDOWN,
            settle: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Delivered { reference: String },
    Rejected { reason: String },
    Blocked { reason: String },
    Pending,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ReplayEvent {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&SessionEvent> for ReplayEvent {
    fn from(event: &SessionEvent) -> Self {
        let detail = match event {
            SessionEvent::Opened { url, .. } => Some(url.clone()),
            SessionEvent::InitCompleted { correlation_id, .. } => Some(correlation_id.clone()),
            SessionEvent::DataRequested { request, .. } => Some(request.id.clone()),
            SessionEvent::DataResponded { request_id, .. } => request_id.clone(),
            SessionEvent::Delivered { reference, .. } => Some(reference.clone()),
            SessionEvent::Cancelled { reason, .. } => Some(reason.to_string()),
            SessionEvent::MessageIgnored { reason, .. } => Some(reason.to_string()),
            SessionEvent::Closed { .. } => None,
        };
        Self {
            event: event.label(),
            detail,
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ReplayReport {
    pub url: String,
    pub outcome: ReplayOutcome,
    /// Final engine state, when a session ran.
    pub final_state: Option<String>,
    /// Messages the host posted into the popup, in order.
    pub posted: Vec<Value>,
    /// Messages discarded because the popup had navigated away from the target origin.
    pub dropped: usize,
    pub window_close_calls: usize,
    pub events: Vec<ReplayEvent>,
    /// Steps that could not be carried out, e.g. a response after the countdown.
    pub step_errors: Vec<String>,
}

impl ReplayReport {
    pub fn event_labels(&self) -> Vec<&'static str> {
        self.events.iter().map(|event| event.event).collect()
    }
}

struct Replay {
    host: MemoryHost,
    client: DocumentClient,
    panel: DataRequestPanel,
    rx: broadcast::Receiver<SessionEvent>,
    events: Vec<ReplayEvent>,
    step_errors: Vec<String>,
    settle: Duration,
}

impl Replay {
    fn record(&mut self, event: &SessionEvent) {
        debug!(target: "replay", event = event.label(), "session event");
        self.events.push(ReplayEvent::from(event));
    }

    /// Collect events until one satisfies `done` or the settle time runs out.
    async fn settle_until(&mut self, done: impl Fn(&SessionEvent) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + self.settle;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Ok(event)) => {
                    self.record(&event);
                    if done(&event) {
                        return true;
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(target: "replay", skipped, "replay fell behind the event bus");
                }
                Ok(Err(RecvError::Closed)) | Err(_) => return false,
            }
        }
    }

    fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.record(&event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    async fn run_step(&mut self, index: usize, step: &Step, window: &MemoryWindow) {
        match step {
            Step::Send { message } => {
                self.drain();
                if self.host.post_from(window, message.clone()) > 0 {
                    self.settle_until(|_| true).await;
                } else {
                    debug!(target: "replay", step = index, "no listener for popup message");
                }
            }
            Step::SendForeign { message } => {
                self.drain();
                let delivered = self.host.dispatch(InboundEnvelope {
                    source: WindowId::new(),
                    origin: window.origin(),
                    data: message.clone(),
                });
                if delivered > 0 {
                    self.settle_until(|_| true).await;
                }
            }
            Step::Respond { payload } => {
                let raw = match payload {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                if let Err(err) = self.panel.submit(&self.client, &raw) {
                    warn!(target: "replay", step = index, %err, "respond step failed");
                    self.step_errors.push(format!("step {}: {}", index, err));
                }
            }
            Step::UserClose => {
                self.drain();
                window.user_close();
                self.settle_until(SessionEvent::is_final).await;
            }
            Step::WaitMs { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
        }
    }
}

/// Replay `transcript` against a fresh [`MemoryHost`].
pub async fn run_transcript(
    transcript: &Transcript,
    options: ReplayOptions,
) -> Result<ReplayReport, ReplayError> {
    let url = options
        .url
        .clone()
        .or_else(|| transcript.url.clone())
        .or_else(|| options.default_url.clone())
        .ok_or(ReplayError::MissingUrl)?;

    let host = if transcript.close_events {
        MemoryHost::new().with_close_events()
    } else {
        MemoryHost::new()
    };
    host.block_popups(transcript.block_popups || options.block_popups);

    let panel = DataRequestPanel::new(options.countdown);
    let client = DocumentClient::new(
        Arc::new(host.clone()),
        Arc::new(panel.clone()),
        options.client.clone(),
    );
    let rx = client.subscribe();
    let mut replay = Replay {
        host: host.clone(),
        client,
        panel,
        rx,
        events: Vec::new(),
        step_errors: Vec::new(),
        settle: options.settle,
    };

    info!(target: "replay", %url, steps = transcript.steps.len(), "replaying transcript");
    let mut pending = match replay.client.get_document_url(&url) {
        Ok(pending) => pending,
        Err(StartError::PopupBlocked(reason)) => {
            replay.drain();
            return Ok(ReplayReport {
                url,
                outcome: ReplayOutcome::Blocked {
                    reason: reason.to_string(),
                },
                final_state: None,
                posted: Vec::new(),
                dropped: 0,
                window_close_calls: 0,
                events: replay.events,
                step_errors: replay.step_errors,
            });
        }
        Err(err) => return Err(err.into()),
    };
    let Some(window) = host.last_window() else {
        return Err(ReplayError::NoWindow);
    };
    replay.settle_until(|event| matches!(event, SessionEvent::Opened { .. })).await;

    for (index, step) in transcript.steps.iter().enumerate() {
        replay.run_step(index, step, &window).await;
    }

    let outcome = match pending.try_result() {
        Some(Ok(reference)) => ReplayOutcome::Delivered { reference },
        Some(Err(err)) => ReplayOutcome::Rejected {
            reason: err.to_string(),
        },
        None => ReplayOutcome::Pending,
    };
    if outcome == ReplayOutcome::Pending || replay.client.active_session().is_some() {
        replay.client.cancel();
    }
    let final_state = replay
        .client
        .join_session()
        .await
        .map(|state| format!("{:?}", state));
    replay.drain();

    info!(target: "replay", %url, ?outcome, "transcript finished");
    Ok(ReplayReport {
        url,
        outcome,
        final_state,
        posted: window
            .posted()
            .into_iter()
            .map(|posted| posted.message)
            .collect(),
        dropped: window.dropped().len(),
        window_close_calls: window.close_calls(),
        events: replay.events,
        step_errors: replay.step_errors,
    })
}
