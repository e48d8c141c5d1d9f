use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use omnidocs_core_types::SessionId;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::SessionError;

pub type DocumentResult = Result<String, SessionError>;

/// Create the single-resolution outcome of one session.
pub fn outcome_channel(session: SessionId) -> (OutcomeSender, PendingDocument) {
    let (tx, rx) = oneshot::channel();
    (
        OutcomeSender {
            session,
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        PendingDocument { session, rx },
    )
}

/// Settling side of the outcome. Only the first `resolve`/`reject` has an effect.
#[derive(Clone, Debug)]
pub struct OutcomeSender {
    session: SessionId,
    slot: Arc<Mutex<Option<oneshot::Sender<DocumentResult>>>>,
}

impl OutcomeSender {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn resolve(&self, reference: String) -> bool {
        self.settle(Ok(reference))
    }

    pub fn reject(&self, error: SessionError) -> bool {
        self.settle(Err(error))
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }

    fn settle(&self, result: DocumentResult) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        // The caller may have stopped waiting; the session still counts as settled.
        let _ = tx.send(result);
        true
    }
}

/// Handle the caller awaits for the delivered document reference.
#[derive(Debug)]
pub struct PendingDocument {
    session: SessionId,
    rx: oneshot::Receiver<DocumentResult>,
}

impl PendingDocument {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Non-blocking peek; `None` while the session is still running.
    pub fn try_result(&mut self) -> Option<DocumentResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(SessionError::Abandoned)),
        }
    }
}

impl Future for PendingDocument {
    type Output = DocumentResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(SessionError::Abandoned)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use popup_lifecycle::CancelReason;

    #[tokio::test]
    async fn first_settlement_wins() {
        let (sender, pending) = outcome_channel(SessionId::new());
        assert!(!sender.is_settled());
        assert!(sender.resolve("https://files.example.com/a.pdf".into()));
        assert!(!sender.resolve("https://files.example.com/b.pdf".into()));
        assert!(!sender.reject(SessionError::Cancelled(CancelReason::PopupClosed)));
        assert!(sender.is_settled());
        assert_eq!(pending.await, Ok("https://files.example.com/a.pdf".into()));
    }

    #[tokio::test]
    async fn rejection_carries_reason() {
        let (sender, pending) = outcome_channel(SessionId::new());
        sender.reject(SessionError::Cancelled(CancelReason::PopupClosed));
        assert_eq!(
            pending.await,
            Err(SessionError::Cancelled(CancelReason::PopupClosed))
        );
    }

    #[tokio::test]
    async fn dropped_sender_abandons() {
        let (sender, mut pending) = outcome_channel(SessionId::new());
        assert_eq!(pending.try_result(), None);
        drop(sender);
        assert_eq!(pending.try_result(), Some(Err(SessionError::Abandoned)));
    }
}
