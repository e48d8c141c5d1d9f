//! In-memory windowing environment for tests and headless replays.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use omnidocs_core_types::{Origin, WindowId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::host::{InboundEnvelope, PopupWindow, WindowError, WindowFeatures, WindowHost};

/// A message the host posted into a [`MemoryWindow`].
#[derive(Clone, Debug, PartialEq)]
pub struct PostedMessage {
    pub message: Value,
    pub target_origin: Origin,
}

impl PostedMessage {
    pub fn event_type(&self) -> Option<&str> {
        self.message.get("eventType").and_then(Value::as_str)
    }
}

pub struct MemoryWindow {
    id: WindowId,
    url: Url,
    target: String,
    features: String,
    origin: Mutex<Origin>,
    closed: watch::Sender<bool>,
    close_events: bool,
    close_calls: AtomicUsize,
    outbox: Mutex<Vec<PostedMessage>>,
    dropped: Mutex<Vec<PostedMessage>>,
}

impl MemoryWindow {
    fn new(url: &Url, target: &str, features: &WindowFeatures, close_events: bool) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: WindowId::new(),
            url: url.clone(),
            target: target.to_string(),
            features: features.to_feature_string(),
            origin: Mutex::new(Origin::from_url(url).unwrap_or_else(|_| Origin::opaque())),
            closed,
            close_events,
            close_calls: AtomicUsize::new(0),
            outbox: Mutex::new(Vec::new()),
            dropped: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn features(&self) -> &str {
        &self.features
    }

    /// Origin of the document currently loaded in the window.
    pub fn origin(&self) -> Origin {
        self.origin.lock().clone()
    }

    /// Simulate the popup navigating to another document.
    pub fn navigate(&self, url: &Url) {
        *self.origin.lock() = Origin::from_url(url).unwrap_or_else(|_| Origin::opaque());
    }

    /// Simulate the user closing the window by hand.
    pub fn user_close(&self) {
        self.closed.send_replace(true);
    }

    /// Number of times the host called [`PopupWindow::close`].
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Messages delivered to the window's document.
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.outbox.lock().clone()
    }

    pub fn posted_event_types(&self) -> Vec<String> {
        self.outbox
            .lock()
            .iter()
            .filter_map(|posted| posted.event_type().map(str::to_string))
            .collect()
    }

    /// Messages discarded because their target origin did not match the document.
    pub fn dropped(&self) -> Vec<PostedMessage> {
        self.dropped.lock().clone()
    }
}

impl PopupWindow for MemoryWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn post_message(&self, message: Value, target_origin: &Origin) -> Result<(), WindowError> {
        if self.is_closed() {
            return Err(WindowError::Closed(self.id));
        }
        let posted = PostedMessage {
            message,
            target_origin: target_origin.clone(),
        };
        if &self.origin() != target_origin {
            debug!(target: "memory-host", window = %self.id, %target_origin, "target origin mismatch; message dropped");
            self.dropped.lock().push(posted);
            return Ok(());
        }
        self.outbox.lock().push(posted);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }

    fn closed_signal(&self) -> Option<BoxFuture<'static, ()>> {
        if !self.close_events {
            return None;
        }
        let mut rx = self.closed.subscribe();
        Some(Box::pin(async move {
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }))
    }
}

struct Listener {
    scope: CancellationToken,
    tx: mpsc::UnboundedSender<InboundEnvelope>,
}

#[derive(Default)]
struct HostState {
    block_popups: bool,
    close_events: bool,
    windows: Vec<Arc<MemoryWindow>>,
    listeners: Vec<Listener>,
    registrations: usize,
}

impl HostState {
    fn prune(&mut self) {
        self.listeners
            .retain(|listener| !listener.scope.is_cancelled() && !listener.tx.is_closed());
    }
}

/// Windowing environment that keeps every window and message in memory.
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Windows opened from now on report closure as an event instead of being polled.
    pub fn with_close_events(self) -> Self {
        self.state.lock().close_events = true;
        self
    }

    /// Refuse (or allow again) every subsequent `open`.
    pub fn block_popups(&self, blocked: bool) {
        self.state.lock().block_popups = blocked;
    }

    pub fn windows(&self) -> Vec<Arc<MemoryWindow>> {
        self.state.lock().windows.clone()
    }

    pub fn last_window(&self) -> Option<Arc<MemoryWindow>> {
        self.state.lock().windows.last().cloned()
    }

    /// Total listener registrations ever made.
    pub fn registrations(&self) -> usize {
        self.state.lock().registrations
    }

    /// Listeners whose scope is still alive.
    pub fn active_listeners(&self) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state.listeners.len()
    }

    /// Deliver `envelope` to every live listener; returns how many received it.
    pub fn dispatch(&self, envelope: InboundEnvelope) -> usize {
        let mut state = self.state.lock();
        state.prune();
        state
            .listeners
            .iter()
            .filter(|listener| listener.tx.send(envelope.clone()).is_ok())
            .count()
    }

    /// Deliver `data` as if posted by the document loaded in `window`.
    pub fn post_from(&self, window: &MemoryWindow, data: Value) -> usize {
        self.dispatch(InboundEnvelope {
            source: window.id(),
            origin: window.origin(),
            data,
        })
    }
}

impl WindowHost for MemoryHost {
    fn open(
        &self,
        url: &Url,
        target: &str,
        features: &WindowFeatures,
    ) -> Option<Arc<dyn PopupWindow>> {
        let mut state = self.state.lock();
        if state.block_popups {
            return None;
        }
        let window = Arc::new(MemoryWindow::new(url, target, features, state.close_events));
        state.windows.push(Arc::clone(&window));
        Some(window)
    }

    fn listen(&self, scope: CancellationToken) -> mpsc::UnboundedReceiver<InboundEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.registrations += 1;
        state.listeners.push(Listener { scope, tx });
        rx
    }
}
