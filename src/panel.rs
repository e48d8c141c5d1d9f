//! Operator panel for data requests.
//!
//! Shows the pending request with a pre-filled response template and gives the
//! operator a fixed time to answer. Expiry only disables the panel; the session
//! itself keeps running.

use std::sync::Arc;
use std::time::Duration;

use handshake_engine::{BridgeError, DataRequestDisplay, DocumentClient};
use message_schema::{DataRequest, FormContext};
use omnidocs_core_types::SessionId;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_COUNTDOWN: Duration = Duration::from_secs(30);
const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum PanelError {
    #[error("no data request is displayed")]
    NoRequest,
    #[error("response window for data request {request_id} has expired")]
    Expired { request_id: String },
    #[error(transparent)]
    Send(#[from] BridgeError),
}

/// What the panel currently shows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PanelSnapshot {
    pub session: Option<SessionId>,
    pub request_id: Option<String>,
    pub form_context: Option<FormContext>,
    /// JSON text the operator edits before submitting.
    pub response_template: String,
    pub remaining_secs: u64,
    pub enabled: bool,
    pub submissions: usize,
}

#[derive(Default)]
struct PanelState {
    view: PanelSnapshot,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct DataRequestPanel {
    countdown: Duration,
    state: Arc<Mutex<PanelState>>,
}

impl Default for DataRequestPanel {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN)
    }
}

impl DataRequestPanel {
    pub fn new(countdown: Duration) -> Self {
        Self {
            countdown: countdown.max(TICK),
            state: Arc::new(Mutex::new(PanelState::default())),
        }
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        self.state.lock().view.clone()
    }

    /// Forward `raw` to the active session while the countdown is running.
    pub fn submit(&self, client: &DocumentClient, raw: &str) -> Result<(), PanelError> {
        let request_id = {
            let state = self.state.lock();
            let Some(request_id) = state.view.request_id.clone() else {
                return Err(PanelError::NoRequest);
            };
            if !state.view.enabled {
                return Err(PanelError::Expired { request_id });
            }
            request_id
        };

        client.send_data_response(raw)?;
        self.state.lock().view.submissions += 1;
        info!(target: "panel", request = %request_id, "operator response submitted");
        Ok(())
    }

    fn start_countdown(&self, state: &mut PanelState) {
        if let Some(previous) = state.ticker.take() {
            previous.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(target: "panel", "no runtime; countdown not started");
            return;
        };

        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        state.ticker = Some(runtime.spawn(async move {
            loop {
                tokio::time::sleep(TICK).await;
                let mut state = shared.lock();
                if state.generation != generation {
                    break;
                }
                state.view.remaining_secs = state.view.remaining_secs.saturating_sub(1);
                if state.view.remaining_secs == 0 {
                    state.view.enabled = false;
                    warn!(
                        target: "panel",
                        request = state.view.request_id.as_deref().unwrap_or("-"),
                        "data request countdown expired"
                    );
                    break;
                }
            }
        }));
    }
}

impl DataRequestDisplay for DataRequestPanel {
    fn display_data_request(&self, session: SessionId, request: &DataRequest) {
        let template = serde_json::to_string(&request.response_template())
            .unwrap_or_else(|_| "[]".to_string());

        let mut state = self.state.lock();
        state.generation += 1;
        state.view = PanelSnapshot {
            session: Some(session),
            request_id: Some(request.id.clone()),
            form_context: Some(request.form_context),
            response_template: template,
            remaining_secs: self.countdown.as_secs(),
            enabled: true,
            submissions: 0,
        };
        self.start_countdown(&mut state);
        info!(
            target: "panel",
            %session,
            request = %request.id,
            form_context = ?request.form_context,
            "data request displayed"
        );
    }
}
