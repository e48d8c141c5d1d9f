use std::sync::Arc;
use std::time::Duration;

use omnidocs_core_types::{Origin, SessionId};
use parking_lot::Mutex;
use popup_lifecycle::{
    CancelController, CancelReason, PopupError, PopupLifecycle, PopupWindow, WindowFeatures,
    WindowHost, DEFAULT_POLL_INTERVAL,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::bridge::{DataExchangeBridge, PendingDataContext};
use crate::display::DataRequestDisplay;
use crate::engine::{HandshakeEngine, SessionParts, SessionState};
use crate::error::{BridgeError, SessionError, StartError};
use crate::events::{SessionEvent, SessionEventBus};
use crate::outcome::{outcome_channel, PendingDocument};

/// Tunables for a [`DocumentClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub features: WindowFeatures,
    pub poll_interval: Duration,
    pub strict_origin: bool,
    /// Capacity of the session event bus.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            features: WindowFeatures::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            strict_origin: false,
            event_capacity: 256,
        }
    }
}

struct ActiveSession {
    session: SessionId,
    window: Arc<dyn PopupWindow>,
    controller: CancelController,
    task: Option<JoinHandle<SessionState>>,
}

/// Host-facing entry point: one popup session at a time, started by
/// [`DocumentClient::get_document_url`].
pub struct DocumentClient {
    host: Arc<dyn WindowHost>,
    lifecycle: PopupLifecycle,
    display: Arc<dyn DataRequestDisplay>,
    bridge: DataExchangeBridge,
    events: SessionEventBus,
    strict_origin: bool,
    active: Mutex<Option<ActiveSession>>,
}

impl DocumentClient {
    pub fn new(
        host: Arc<dyn WindowHost>,
        display: Arc<dyn DataRequestDisplay>,
        config: ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let lifecycle = PopupLifecycle::new(Arc::clone(&host))
            .with_features(config.features)
            .with_poll_interval(config.poll_interval);
        Self {
            host,
            lifecycle,
            display,
            bridge: DataExchangeBridge::new(),
            events,
            strict_origin: config.strict_origin,
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> SessionEventBus {
        self.events.clone()
    }

    pub fn bridge(&self) -> &DataExchangeBridge {
        &self.bridge
    }

    /// Open the capture popup at `popup_url` and return the document reference it
    /// eventually delivers.
    ///
    /// Call from a user gesture. A blocked popup fails here; every later failure
    /// arrives through the returned [`PendingDocument`].
    pub fn get_document_url(&self, popup_url: &str) -> Result<PendingDocument, StartError> {
        let url = Url::parse(popup_url).map_err(|err| StartError::InvalidUrl {
            url: popup_url.to_string(),
            reason: err.to_string(),
        })?;
        let origin =
            Origin::from_url(&url).map_err(|_| StartError::OpaqueOrigin(popup_url.to_string()))?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(StartError::NoRuntime);
        }

        self.supersede();

        let session = SessionId::new();
        let (outcome, pending) = outcome_channel(session);
        let controller = CancelController::new();

        let opened = match self.lifecycle.open(&url, &controller) {
            Ok(opened) => opened,
            Err(PopupError::Blocked { reason, .. }) => {
                outcome.reject(SessionError::Cancelled(reason.clone()));
                self.publish(SessionEvent::Cancelled {
                    session,
                    reason: reason.clone(),
                });
                return Err(StartError::PopupBlocked(reason));
            }
            Err(PopupError::NoRuntime) => return Err(StartError::NoRuntime),
        };

        let window = opened.window;
        let inbox = self.host.listen(controller.scope());
        self.bridge.attach(session, Arc::clone(&window), origin.clone());
        self.publish(SessionEvent::Opened {
            session,
            window: window.id(),
            url: url.to_string(),
        });

        let mut engine = HandshakeEngine::new(SessionParts {
            session,
            window: Arc::clone(&window),
            watch: Some(opened.watch),
            origin,
            controller: controller.clone(),
            outcome,
            bridge: self.bridge.clone(),
            display: Arc::clone(&self.display),
            events: self.events.clone(),
            strict_origin: self.strict_origin,
        });
        engine.begin();
        let task = tokio::spawn(engine.run(inbox));

        info!(target: "handshake", %session, %url, "document session started");
        *self.active.lock() = Some(ActiveSession {
            session,
            window,
            controller,
            task: Some(task),
        });
        Ok(pending)
    }

    /// Answer the pending data request of the active session.
    pub fn send_data_response(&self, raw: &str) -> Result<(), BridgeError> {
        let receipt = self.bridge.send_data_response(raw)?;
        self.publish(SessionEvent::DataResponded {
            session: receipt.session,
            request_id: receipt.answered.map(|context| context.id),
        });
        Ok(())
    }

    pub fn pending_data_request(&self) -> Option<PendingDataContext> {
        self.bridge.pending()
    }

    /// Session still exchanging messages, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.active
            .lock()
            .as_ref()
            .filter(|active| !active.controller.is_cancelled())
            .map(|active| active.session)
    }

    /// Abort the active session. Returns `false` when nothing was running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => active
                .controller
                .cancel(CancelReason::Aborted("cancelled by host".into())),
            None => false,
        }
    }

    /// Wait for the most recent session's loop to finish and return its final state.
    pub async fn join_session(&self) -> Option<SessionState> {
        let task = self.active.lock().as_mut().and_then(|active| active.task.take())?;
        task.await.ok()
    }

    /// Cancel the active session and close its popup; nothing listens to it any more.
    fn supersede(&self) {
        let Some(previous) = self.active.lock().take() else {
            return;
        };
        if previous.controller.cancel(CancelReason::Superseded) {
            debug!(target: "handshake", session = %previous.session, "previous session superseded");
        }
        if !previous.window.is_closed() {
            previous.window.close();
        }
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for DocumentClient {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active
                .controller
                .cancel(CancelReason::Aborted("document client dropped".into()));
        }
    }
}
