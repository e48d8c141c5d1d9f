use message_schema::{DataRequest, DocumentType};
use omnidocs_core_types::{SessionId, WindowId};
use popup_lifecycle::CancelReason;
use tokio::sync::broadcast;

use crate::error::Ignored;

/// Session event bus shared by the client, its engines and observers.
pub type SessionEventBus = broadcast::Sender<SessionEvent>;

/// Events emitted while a session progresses.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    Opened {
        session: SessionId,
        window: WindowId,
        url: String,
    },
    InitCompleted {
        session: SessionId,
        correlation_id: String,
    },
    DataRequested {
        session: SessionId,
        request: DataRequest,
    },
    DataResponded {
        session: SessionId,
        request_id: Option<String>,
    },
    Delivered {
        session: SessionId,
        document_type: DocumentType,
        reference: String,
    },
    Closed {
        session: SessionId,
    },
    Cancelled {
        session: SessionId,
        reason: CancelReason,
    },
    MessageIgnored {
        session: SessionId,
        reason: Ignored,
    },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::Opened { session, .. }
            | SessionEvent::InitCompleted { session, .. }
            | SessionEvent::DataRequested { session, .. }
            | SessionEvent::DataResponded { session, .. }
            | SessionEvent::Delivered { session, .. }
            | SessionEvent::Closed { session }
            | SessionEvent::Cancelled { session, .. }
            | SessionEvent::MessageIgnored { session, .. } => *session,
        }
    }

    /// Short label used by logs and replay reports.
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::Opened { .. } => "opened",
            SessionEvent::InitCompleted { .. } => "init_completed",
            SessionEvent::DataRequested { .. } => "data_requested",
            SessionEvent::DataResponded { .. } => "data_responded",
            SessionEvent::Delivered { .. } => "delivered",
            SessionEvent::Closed { .. } => "closed",
            SessionEvent::Cancelled { .. } => "cancelled",
            SessionEvent::MessageIgnored { .. } => "message_ignored",
        }
    }

    /// True for the last event a session emits.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SessionEvent::Closed { .. } | SessionEvent::Cancelled { .. }
        )
    }
}
