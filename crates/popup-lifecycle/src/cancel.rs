use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why a session was cancelled.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CancelReason {
    #[error("Popup was not opened, make sure this function is run from a click action.")]
    PopupBlocked,
    #[error("popup was closed")]
    PopupClosed,
    #[error("popup requested close before delivering a document")]
    ClosedByRemote,
    #[error("superseded by a new session")]
    Superseded,
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("session finished")]
    Finished,
}

/// One-shot cancellation carrying the reason of the first cancel.
#[derive(Clone, Debug, Default)]
pub struct CancelController {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancelController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `reason`. Returns `false` if the controller was already cancelled,
    /// in which case the original reason is kept.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().cloned()
    }

    /// Token for registrations that must end with this controller. Cancelling the
    /// returned token does not cancel the controller.
    pub fn scope(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub async fn cancelled(&self) -> CancelReason {
        self.token.cancelled().await;
        self.reason()
            .unwrap_or_else(|| CancelReason::Aborted("cancelled without a reason".into()))
    }
}
