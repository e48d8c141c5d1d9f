use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::cancel::{CancelController, CancelReason};
use crate::host::{PopupWindow, WindowFeatures, WindowHost, POPUP_TARGET};

/// How often a popup without closure events is checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PopupError {
    #[error("popup for {url} was blocked: {reason}")]
    Blocked { url: String, reason: CancelReason },
    #[error("no tokio runtime available to watch the popup")]
    NoRuntime,
}

/// Opens popups and watches them for user-driven closure.
#[derive(Clone)]
pub struct PopupLifecycle {
    host: Arc<dyn WindowHost>,
    features: WindowFeatures,
    poll_interval: Duration,
}

impl PopupLifecycle {
    pub fn new(host: Arc<dyn WindowHost>) -> Self {
        Self {
            host,
            features: WindowFeatures::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_features(mut self, features: WindowFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn features(&self) -> &WindowFeatures {
        &self.features
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Open `url` in a new popup and start watching it.
    ///
    /// Must run while handling a user gesture, otherwise the environment is likely to
    /// refuse the window. On refusal `controller` is cancelled with
    /// [`CancelReason::PopupBlocked`].
    pub fn open(&self, url: &Url, controller: &CancelController) -> Result<OpenedPopup, PopupError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PopupError::NoRuntime);
        }

        let Some(window) = self.host.open(url, POPUP_TARGET, &self.features) else {
            warn!(target: "popup-lifecycle", %url, "popup blocked by host environment");
            controller.cancel(CancelReason::PopupBlocked);
            return Err(PopupError::Blocked {
                url: url.to_string(),
                reason: CancelReason::PopupBlocked,
            });
        };

        info!(target: "popup-lifecycle", %url, window = %window.id(), "popup opened");
        let watch = ClosureWatch::spawn(Arc::clone(&window), controller.clone(), self.poll_interval);
        Ok(OpenedPopup { window, watch })
    }
}

pub struct OpenedPopup {
    pub window: Arc<dyn PopupWindow>,
    pub watch: ClosureWatch,
}

/// Background task cancelling the session once the popup is gone.
///
/// Prefers the window's closure event and falls back to polling. The task ends after it
/// fires, when the controller is cancelled for another reason, or on [`ClosureWatch::stop`].
pub struct ClosureWatch {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ClosureWatch {
    fn spawn(window: Arc<dyn PopupWindow>, controller: CancelController, poll: Duration) -> Self {
        let stop = CancellationToken::new();
        let task = tokio::spawn(watch_closure(window, controller, stop.clone(), poll));
        Self { stop, task }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClosureWatch {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn watch_closure(
    window: Arc<dyn PopupWindow>,
    controller: CancelController,
    stop: CancellationToken,
    poll: Duration,
) {
    let window_id = window.id();

    if let Some(closed) = window.closed_signal() {
        tokio::select! {
            _ = closed => {
                if controller.cancel(CancelReason::PopupClosed) {
                    info!(target: "popup-lifecycle", window = %window_id, "popup closed by user");
                }
            }
            _ = stop.cancelled() => {}
            _ = controller.cancelled() => {}
        }
        debug!(target: "popup-lifecycle", window = %window_id, "closure event watch ended");
        return;
    }

    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = controller.cancelled() => break,
            _ = ticker.tick() => {
                if window.is_closed() {
                    if controller.cancel(CancelReason::PopupClosed) {
                        info!(target: "popup-lifecycle", window = %window_id, "popup closed by user");
                    }
                    break;
                }
            }
        }
    }
    debug!(target: "popup-lifecycle", window = %window_id, "closure poll stopped");
}
