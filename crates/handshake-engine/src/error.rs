use message_schema::SchemaError;
use omnidocs_core_types::{Origin, WindowId};
use popup_lifecycle::CancelReason;
use thiserror::Error;

use crate::engine::SessionState;

/// Failure settling a session's outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session cancelled: {0}")]
    Cancelled(#[from] CancelReason),
    #[error("session ended without settling")]
    Abandoned,
}

/// Synchronous failures of [`crate::DocumentClient::get_document_url`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("invalid popup url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("popup url {0} has an opaque origin")]
    OpaqueOrigin(String),
    #[error("popup blocked: {0}")]
    PopupBlocked(CancelReason),
    #[error("no tokio runtime available")]
    NoRuntime,
}

/// Failures of [`crate::DataExchangeBridge::send_data_response`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no active session to answer")]
    NoActiveSession,
    #[error("popup window is closed")]
    WindowClosed,
    #[error("invalid data response payload: {0}")]
    InvalidPayload(#[from] SchemaError),
    #[error("failed to encode data response: {0}")]
    Encode(String),
    #[error("failed to post data response: {0}")]
    Post(String),
}

/// Why an inbound message was dropped without effect.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Ignored {
    #[error("session is over")]
    SessionOver,
    #[error("message from untrusted window {0}")]
    UntrustedSource(WindowId),
    #[error("message from foreign origin {0}")]
    ForeignOrigin(Origin),
    #[error("malformed message: {0}")]
    Malformed(SchemaError),
    #[error("{event} is not accepted while {state:?}")]
    OutOfState {
        event: &'static str,
        state: SessionState,
    },
}
