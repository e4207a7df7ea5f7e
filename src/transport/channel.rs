//! Abstract command/event channel.
//!
//! The interception layer talks to the remote end only through
//! [`Channel`]: run a command and wait for its single reply, manage remote
//! event subscriptions, and open a local stream of events of one type.
//!
//! # Listener Semantics
//!
//! - At most one live [`EventListener`] per event name. Opening a second one
//!   replaces the first, which then sees its stream end.
//! - Closing a listener only stops local delivery; the remote subscription
//!   stays until [`Channel::unsubscribe`] is called.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Command, Event, SessionCommand};

// ============================================================================
// Channel
// ============================================================================

/// Duplex command/event capability consumed by the interception layer.
///
/// Implementations must be safe to share across tasks. Timeouts, if any,
/// belong to the implementation.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Executes a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the remote end rejected the command
    /// - a transport error if the reply could not be obtained
    async fn execute(&self, command: Command) -> Result<Value>;

    /// Subscribes remotely to `event`.
    async fn subscribe(&self, event: &str) -> Result<()> {
        self.execute(SessionCommand::subscribe(event).into())
            .await
            .map(drop)
    }

    /// Unsubscribes remotely from `event`.
    async fn unsubscribe(&self, event: &str) -> Result<()> {
        self.execute(SessionCommand::unsubscribe(event).into())
            .await
            .map(drop)
    }

    /// Opens the local stream of `event` notifications.
    fn listen(&self, event: &str) -> EventListener;
}

// ============================================================================
// EventListener
// ============================================================================

/// Items delivered to a listener. `Err` signals a channel failure; the
/// stream ends right after it.
pub type EventItem = Result<Event>;

/// Callback run once when a listener is closed or dropped.
type CloseHook = Box<dyn FnOnce() + Send>;

/// Local stream of events of one type.
pub struct EventListener {
    /// Event name this listener receives.
    event: String,
    /// Incoming events.
    rx: mpsc::UnboundedReceiver<EventItem>,
    /// Detaches the listener from its source.
    on_close: Option<CloseHook>,
}

impl EventListener {
    /// Creates a listener over a raw receiver.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>, rx: mpsc::UnboundedReceiver<EventItem>) -> Self {
        Self {
            event: event.into(),
            rx,
            on_close: None,
        }
    }

    /// Sets a callback to run when the listener is closed.
    #[inline]
    #[must_use]
    pub fn with_close_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Returns the event name.
    #[inline]
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<EventItem> {
        self.rx.recv().await
    }

    /// Takes the next event if one is already buffered.
    ///
    /// Returns `None` when nothing is queued or the stream is closed.
    pub fn try_recv(&mut self) -> Option<EventItem> {
        self.rx.try_recv().ok()
    }

    /// Stops local delivery. Does not unsubscribe remotely.
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        self.rx.close();
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Drop for EventListener {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for EventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListener")
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventRouter
// ============================================================================

/// Map of event names to listener senders.
type ListenerMap = FxHashMap<String, mpsc::UnboundedSender<EventItem>>;

/// Routes incoming events to per-name listeners.
///
/// Building block for [`Channel`] implementations.
#[derive(Clone, Default)]
pub struct EventRouter {
    listeners: Arc<Mutex<ListenerMap>>,
}

impl EventRouter {
    /// Creates an empty router.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a listener for `event`, replacing any previous one.
    #[must_use]
    pub fn listen(&self, event: &str) -> EventListener {
        let (tx, rx) = mpsc::unbounded_channel();

        // The hook must not keep the stream alive.
        let weak_tx = tx.downgrade();
        let replaced = self.listeners.lock().insert(event.to_string(), tx);
        if replaced.is_some() {
            warn!(event, "Replacing existing event listener");
        }

        let listeners = Arc::clone(&self.listeners);
        let name = event.to_string();
        EventListener::new(event, rx).with_close_hook(move || {
            let Some(tx) = weak_tx.upgrade() else {
                return;
            };
            let mut listeners = listeners.lock();
            if listeners.get(&name).is_some_and(|current| current.same_channel(&tx)) {
                listeners.remove(&name);
                debug!(event = %name, "Event listener closed");
            }
        })
    }

    /// Delivers an event to its listener.
    ///
    /// Returns `false` if nobody is listening.
    pub fn dispatch(&self, event: Event) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(tx) = listeners.get(&event.method) else {
            trace!(method = %event.method, "No listener for event");
            return false;
        };

        let method = event.method.clone();
        if tx.send(Ok(event)).is_err() {
            listeners.remove(&method);
            return false;
        }
        true
    }

    /// Returns `true` if `event` has a live listener.
    #[inline]
    #[must_use]
    pub fn is_listening(&self, event: &str) -> bool {
        self.listeners.lock().contains_key(event)
    }

    /// Ends the stream for `event` without error.
    pub fn close(&self, event: &str) {
        self.listeners.lock().remove(event);
    }

    /// Ends the stream for `event` with an error.
    pub fn fail(&self, event: &str, error: Error) {
        if let Some(tx) = self.listeners.lock().remove(event) {
            let _ = tx.send(Err(error));
        }
    }

    /// Ends every stream, reporting `make_error()` to each listener.
    pub fn fail_all(&self, make_error: impl Fn() -> Error) {
        let listeners: Vec<_> = self.listeners.lock().drain().collect();
        let count = listeners.len();

        for (_, tx) in listeners {
            let _ = tx.send(Err(make_error()));
        }

        if count > 0 {
            debug!(count, "Failed event listeners on shutdown");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
