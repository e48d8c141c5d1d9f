//! Capability traits for the windowing environment the bridge runs in.

use std::sync::Arc;

use futures::future::BoxFuture;
use omnidocs_core_types::{Origin, WindowId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Browsing-context name used when opening the popup.
pub const POPUP_TARGET: &str = "_blank";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("window {0} is closed")]
    Closed(WindowId),
    #[error("post failed: {0}")]
    Post(String),
}

/// A message received from some window, as the environment reports it.
#[derive(Clone, Debug)]
pub struct InboundEnvelope {
    /// Window that posted the message.
    pub source: WindowId,
    /// Origin of the document that posted the message.
    pub origin: Origin,
    pub data: Value,
}

/// Layout of the popup window. The default matches what the capture surface expects:
/// no browser chrome and a fixed 1500x1000 size.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowFeatures {
    pub menubar: bool,
    pub location: bool,
    pub resizable: bool,
    pub scrollbars: bool,
    pub status: bool,
    pub titlebar: bool,
    pub toolbar: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowFeatures {
    fn default() -> Self {
        Self {
            menubar: false,
            location: false,
            resizable: false,
            scrollbars: false,
            status: false,
            titlebar: false,
            toolbar: false,
            width: 1500,
            height: 1000,
        }
    }
}

impl WindowFeatures {
    /// Render as a `window.open` feature string.
    pub fn to_feature_string(&self) -> String {
        let flag = |on: bool| if on { "yes" } else { "no" };
        format!(
            "menubar={},location={},resizable={},scrollbars={},status={},titlebar={},toolbar={},width={},height={}",
            flag(self.menubar),
            flag(self.location),
            flag(self.resizable),
            flag(self.scrollbars),
            flag(self.status),
            flag(self.titlebar),
            flag(self.toolbar),
            self.width,
            self.height
        )
    }
}

/// Handle to a window opened by the host environment.
pub trait PopupWindow: Send + Sync {
    fn id(&self) -> WindowId;

    fn is_closed(&self) -> bool;

    /// Deliver `message` to the window, only if its document is at `target_origin`.
    fn post_message(&self, message: Value, target_origin: &Origin) -> Result<(), WindowError>;

    fn close(&self);

    /// Completes once the window is closed, for environments that can report closure
    /// as an event. `None` means closure has to be polled through [`PopupWindow::is_closed`].
    fn closed_signal(&self) -> Option<BoxFuture<'static, ()>> {
        None
    }
}

/// The windowing environment: opens popups and delivers cross-window messages.
pub trait WindowHost: Send + Sync {
    /// Open a top-level window. `None` when the environment refuses, typically because
    /// the call did not originate from a user gesture.
    fn open(
        &self,
        url: &Url,
        target: &str,
        features: &WindowFeatures,
    ) -> Option<Arc<dyn PopupWindow>>;

    /// Register a listener for inbound messages. The registration lives until `scope`
    /// is cancelled.
    fn listen(&self, scope: CancellationToken) -> mpsc::UnboundedReceiver<InboundEnvelope>;
}
