//! Popup window capability and lifecycle for the OmniDocs bridge.
//!
//! The windowing environment is injected through [`WindowHost`] / [`PopupWindow`].
//! [`PopupLifecycle`] opens the capture popup and watches it for user-driven closure,
//! reporting both outcomes through a [`CancelController`]. [`memory::MemoryHost`] is a
//! complete in-memory environment used by tests and transcript replays.

mod cancel;
mod host;
mod lifecycle;
pub mod memory;

pub use cancel::{CancelController, CancelReason};
pub use host::{
    InboundEnvelope, PopupWindow, WindowError, WindowFeatures, WindowHost, POPUP_TARGET,
};
pub use lifecycle::{ClosureWatch, OpenedPopup, PopupError, PopupLifecycle, DEFAULT_POLL_INTERVAL};
pub use memory::{MemoryHost, MemoryWindow, PostedMessage};
