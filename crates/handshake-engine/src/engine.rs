//! Handshake state machine for one popup session.
//!
//! ```text
//! Idle -> AwaitingInit -> Ready -> (Exchanging)* -> Delivering -> Closed
//!                  \________________ any non-terminal ________________/ -> Cancelled
//! ```
//!
//! [`HandshakeEngine::handle`] never suspends: every inbound message is admitted or
//! ignored, then applied, within one call. [`HandshakeEngine::run`] feeds it from the
//! listener registration until the session is over.

use std::sync::Arc;

use message_schema::{
    classify, CloseRequest, DataRequest, DeliveryRequest, InitRequest, Request, Response,
};
use omnidocs_core_types::{Origin, SessionId};
use popup_lifecycle::{CancelController, CancelReason, ClosureWatch, InboundEnvelope, PopupWindow};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::DataExchangeBridge;
use crate::display::DataRequestDisplay;
use crate::error::{Ignored, SessionError};
use crate::events::{SessionEvent, SessionEventBus};
use crate::outcome::OutcomeSender;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    AwaitingInit,
    Ready,
    Exchanging,
    Delivering,
    Closed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Cancelled)
    }

    fn accepts(self, request: &Request) -> bool {
        use SessionState::*;
        match request {
            Request::Init(_) | Request::Delivery(_) => {
                matches!(self, AwaitingInit | Ready | Exchanging)
            }
            Request::Data(_) => matches!(self, Ready | Exchanging | Delivering),
            Request::Close(_) => !matches!(self, Idle | Closed | Cancelled),
        }
    }
}

/// What the engine did with one inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Dispatch {
    Replied(Response),
    Forwarded(DataRequest),
    Delivered(String),
    Closed,
    Ignored(Ignored),
}

/// Everything a session engine owns.
pub struct SessionParts {
    pub session: SessionId,
    pub window: Arc<dyn PopupWindow>,
    pub watch: Option<ClosureWatch>,
    /// Origin recorded from the popup URL; every response targets it.
    pub origin: Origin,
    pub controller: CancelController,
    pub outcome: OutcomeSender,
    pub bridge: DataExchangeBridge,
    pub display: Arc<dyn DataRequestDisplay>,
    pub events: SessionEventBus,
    /// Also drop messages whose origin differs from the recorded one.
    pub strict_origin: bool,
}

pub struct HandshakeEngine {
    session: SessionId,
    state: SessionState,
    window: Arc<dyn PopupWindow>,
    watch: Option<ClosureWatch>,
    origin: Origin,
    controller: CancelController,
    outcome: OutcomeSender,
    bridge: DataExchangeBridge,
    display: Arc<dyn DataRequestDisplay>,
    events: SessionEventBus,
    strict_origin: bool,
    correlation_id: Option<String>,
}

impl HandshakeEngine {
    pub fn new(parts: SessionParts) -> Self {
        Self {
            session: parts.session,
            state: SessionState::Idle,
            window: parts.window,
            watch: parts.watch,
            origin: parts.origin,
            controller: parts.controller,
            outcome: parts.outcome,
            bridge: parts.bridge,
            display: parts.display,
            events: parts.events,
            strict_origin: parts.strict_origin,
            correlation_id: None,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Correlation id announced by the popup, once one has been seen.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Whether the closure watch is still owned by this session.
    pub fn is_watching(&self) -> bool {
        self.watch.as_ref().is_some_and(|watch| !watch.is_finished())
    }

    /// Start accepting messages.
    pub fn begin(&mut self) {
        if self.state == SessionState::Idle {
            self.transition(SessionState::AwaitingInit);
        }
    }

    pub fn handle(&mut self, envelope: InboundEnvelope) -> Dispatch {
        match self.admit(&envelope) {
            Ok(request) => self.apply(request),
            Err(ignored) => {
                self.note_ignored(&ignored);
                Dispatch::Ignored(ignored)
            }
        }
    }

    /// Tear the session down for `reason`. The outcome is rejected unless it has
    /// already settled.
    pub fn cancel(&mut self, reason: CancelReason) {
        self.controller.cancel(reason.clone());
        self.stop_watch();
        self.bridge.detach(self.session);
        if self.state.is_terminal() {
            return;
        }

        if self.outcome.reject(SessionError::Cancelled(reason.clone())) {
            info!(target: "handshake", session = %self.session, %reason, "session cancelled");
            self.transition(SessionState::Cancelled);
            self.publish(SessionEvent::Cancelled {
                session: self.session,
                reason,
            });
        } else {
            // Document already delivered; the popup just went away.
            debug!(target: "handshake", session = %self.session, %reason, "session ended after delivery");
            self.transition(SessionState::Closed);
            self.publish(SessionEvent::Closed {
                session: self.session,
            });
        }
    }

    /// Process inbound messages until the session is closed or cancelled.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<InboundEnvelope>) -> SessionState {
        self.begin();
        let controller = self.controller.clone();
        loop {
            tokio::select! {
                biased;
                reason = controller.cancelled() => {
                    self.cancel(reason);
                    break;
                }
                received = inbox.recv() => match received {
                    Some(envelope) => {
                        self.handle(envelope);
                        if self.state.is_terminal() {
                            break;
                        }
                    }
                    None => {
                        controller.cancel(CancelReason::Aborted("message listener closed".into()));
                    }
                }
            }
        }
        self.bridge.detach(self.session);
        debug!(target: "handshake", session = %self.session, state = ?self.state, "session loop finished");
        self.state
    }

    fn admit(&self, envelope: &InboundEnvelope) -> Result<Request, Ignored> {
        if self.state.is_terminal() {
            return Err(Ignored::SessionOver);
        }
        if envelope.source != self.window.id() {
            return Err(Ignored::UntrustedSource(envelope.source));
        }
        if self.strict_origin && envelope.origin != self.origin {
            return Err(Ignored::ForeignOrigin(envelope.origin.clone()));
        }
        let request = classify(&envelope.data).map_err(Ignored::Malformed)?;
        if !self.state.accepts(&request) {
            return Err(Ignored::OutOfState {
                event: request.event_type(),
                state: self.state,
            });
        }
        Ok(request)
    }

    fn apply(&mut self, request: Request) -> Dispatch {
        self.track_correlation(request.correlation_id());
        match request {
            Request::Init(init) => self.on_init(init),
            Request::Data(data) => self.on_data(data),
            Request::Delivery(delivery) => self.on_delivery(delivery),
            Request::Close(close) => self.on_close(close),
        }
    }

    fn on_init(&mut self, init: InitRequest) -> Dispatch {
        let response = Response::init(&init);
        self.send(&response);
        if self.state == SessionState::AwaitingInit {
            self.transition(SessionState::Ready);
        }
        self.publish(SessionEvent::InitCompleted {
            session: self.session,
            correlation_id: init.correlation_id,
        });
        Dispatch::Replied(response)
    }

    fn on_data(&mut self, request: DataRequest) -> Dispatch {
        if let Some(previous) = self.bridge.stage(self.session, &request) {
            debug!(target: "handshake", session = %self.session, previous = %previous.id, next = %request.id, "unanswered data request replaced");
        }
        self.display.display_data_request(self.session, &request);
        if self.state == SessionState::Ready {
            self.transition(SessionState::Exchanging);
        }
        self.publish(SessionEvent::DataRequested {
            session: self.session,
            request: request.clone(),
        });
        Dispatch::Forwarded(request)
    }

    fn on_delivery(&mut self, delivery: DeliveryRequest) -> Dispatch {
        let reference = delivery.data;
        if !self.outcome.resolve(reference.clone()) {
            warn!(target: "handshake", session = %self.session, "outcome settled before delivery");
        }
        self.stop_watch();
        self.transition(SessionState::Delivering);
        self.send(&Response::deliver());
        info!(target: "handshake", session = %self.session, document_type = ?delivery.document_type, "document delivered");
        self.publish(SessionEvent::Delivered {
            session: self.session,
            document_type: delivery.document_type,
            reference: reference.clone(),
        });
        Dispatch::Delivered(reference)
    }

    fn on_close(&mut self, _close: CloseRequest) -> Dispatch {
        self.stop_watch();
        if !self.window.is_closed() {
            self.window.close();
        }

        let reason = if self.outcome.is_settled() {
            CancelReason::Finished
        } else {
            CancelReason::ClosedByRemote
        };
        if self.outcome.reject(SessionError::Cancelled(reason.clone())) {
            warn!(target: "handshake", session = %self.session, "popup closed the session before delivering");
        }

        self.transition(SessionState::Closed);
        self.bridge.detach(self.session);
        self.publish(SessionEvent::Closed {
            session: self.session,
        });
        self.controller.cancel(reason);
        Dispatch::Closed
    }

    fn send(&self, response: &Response) {
        let wire = match response.to_wire() {
            Ok(wire) => wire,
            Err(err) => {
                warn!(target: "handshake", session = %self.session, event = response.event_type(), %err, "failed to encode response");
                return;
            }
        };
        if let Err(err) = self.window.post_message(wire, &self.origin) {
            warn!(target: "handshake", session = %self.session, event = response.event_type(), %err, "failed to post response");
        }
    }

    fn track_correlation(&mut self, correlation_id: &str) {
        match &self.correlation_id {
            None => self.correlation_id = Some(correlation_id.to_string()),
            Some(known) if known != correlation_id => {
                warn!(target: "handshake", session = %self.session, expected = %known, received = %correlation_id, "correlation id changed mid-session");
            }
            Some(_) => {}
        }
    }

    fn note_ignored(&self, ignored: &Ignored) {
        match ignored {
            Ignored::UntrustedSource(_) | Ignored::ForeignOrigin(_) => {
                warn!(target: "handshake", session = %self.session, reason = %ignored, "message ignored");
            }
            _ => {
                debug!(target: "handshake", session = %self.session, reason = %ignored, "message ignored");
            }
        }
        self.publish(SessionEvent::MessageIgnored {
            session: self.session,
            reason: ignored.clone(),
        });
    }

    fn stop_watch(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(target: "handshake", session = %self.session, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
