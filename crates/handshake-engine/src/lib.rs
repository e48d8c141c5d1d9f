//! OmniDocs popup handshake.
//!
//! [`DocumentClient`] opens the capture popup, runs one [`HandshakeEngine`] per session
//! and hands the caller a [`PendingDocument`] that settles exactly once: with the
//! delivered document reference, or with the reason the session was cancelled.

mod bridge;
mod client;
mod display;
mod engine;
mod error;
mod events;
mod outcome;

pub use bridge::{DataExchangeBridge, DataResponseReceipt, PendingDataContext};
pub use client::{ClientConfig, DocumentClient};
pub use display::{DataRequestDisplay, LogDisplay};
pub use engine::{Dispatch, HandshakeEngine, SessionParts, SessionState};
pub use error::{BridgeError, Ignored, SessionError, StartError};
pub use events::{SessionEvent, SessionEventBus};
pub use outcome::{outcome_channel, DocumentResult, OutcomeSender, PendingDocument};
