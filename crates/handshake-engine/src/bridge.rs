use std::sync::Arc;

use message_schema::{parse_field_values, DataRequest, FormContext, Response};
use omnidocs_core_types::{Origin, SessionId};
use parking_lot::Mutex;
use popup_lifecycle::{PopupWindow, WindowError};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

/// The data request an operator is expected to answer next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDataContext {
    pub session: SessionId,
    pub id: String,
    pub correlation_id: String,
    pub form_context: FormContext,
    pub fields: Vec<String>,
}

impl PendingDataContext {
    fn from_request(session: SessionId, request: &DataRequest) -> Self {
        Self {
            session,
            id: request.id.clone(),
            correlation_id: request.correlation_id.clone(),
            form_context: request.form_context,
            fields: request.data.clone(),
        }
    }
}

/// Result of a successful [`DataExchangeBridge::send_data_response`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataResponseReceipt {
    pub session: SessionId,
    /// The request this response answered, if one was pending.
    pub answered: Option<PendingDataContext>,
}

struct Target {
    session: SessionId,
    window: Arc<dyn PopupWindow>,
    origin: Origin,
}

#[derive(Default)]
struct Slot {
    target: Option<Target>,
    pending: Option<PendingDataContext>,
}

/// Carries operator answers back to the popup of the active session.
///
/// Holds the session's window and recorded origin plus at most one pending data
/// request; a newer request replaces an unanswered one.
#[derive(Clone, Default)]
pub struct DataExchangeBridge {
    slot: Arc<Mutex<Slot>>,
}

impl DataExchangeBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, session: SessionId, window: Arc<dyn PopupWindow>, origin: Origin) {
        let mut slot = self.slot.lock();
        slot.target = Some(Target {
            session,
            window,
            origin,
        });
        slot.pending = None;
    }

    /// Forget `session`. A bridge already attached to a newer session is left alone.
    pub fn detach(&self, session: SessionId) -> bool {
        let mut slot = self.slot.lock();
        match &slot.target {
            Some(target) if target.session == session => {
                slot.target = None;
                slot.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.slot.lock().target.as_ref().map(|target| target.session)
    }

    /// Record `request` as the one awaiting an answer; returns the request it replaced.
    pub fn stage(
        &self,
        session: SessionId,
        request: &DataRequest,
    ) -> Option<PendingDataContext> {
        let mut slot = self.slot.lock();
        if slot.target.as_ref().map(|target| target.session) != Some(session) {
            return None;
        }
        slot.pending
            .replace(PendingDataContext::from_request(session, request))
    }

    pub fn pending(&self) -> Option<PendingDataContext> {
        self.slot.lock().pending.clone()
    }

    /// Parse `raw` as field values and post a data response to the active popup.
    pub fn send_data_response(&self, raw: &str) -> Result<DataResponseReceipt, BridgeError> {
        let (session, window, origin, pending) = {
            let slot = self.slot.lock();
            let target = slot.target.as_ref().ok_or(BridgeError::NoActiveSession)?;
            (
                target.session,
                Arc::clone(&target.window),
                target.origin.clone(),
                slot.pending.clone(),
            )
        };

        if window.is_closed() {
            return Err(BridgeError::WindowClosed);
        }

        let values = parse_field_values(raw)?;
        match &pending {
            Some(context) => {
                let missing: Vec<&String> = context
                    .fields
                    .iter()
                    .filter(|key| !values.contains_key(key.as_str()))
                    .collect();
                if !missing.is_empty() {
                    debug!(target: "bridge", %session, request = %context.id, ?missing, "data response leaves fields unanswered");
                }
            }
            None => {
                warn!(target: "bridge", %session, "sending data response with no data request pending");
            }
        }

        let wire = Response::data(values)
            .to_wire()
            .map_err(|err| BridgeError::Encode(err.to_string()))?;
        window.post_message(wire, &origin).map_err(|err| match err {
            WindowError::Closed(_) => BridgeError::WindowClosed,
            other => BridgeError::Post(other.to_string()),
        })?;

        let answered = {
            let mut slot = self.slot.lock();
            if slot.pending.is_some() && slot.pending == pending {
                slot.pending.take()
            } else {
                pending
            }
        };
        info!(
            target: "bridge",
            %session,
            request = answered.as_ref().map(|context| context.id.as_str()).unwrap_or("-"),
            "data response sent"
        );
        Ok(DataResponseReceipt { session, answered })
    }
}
