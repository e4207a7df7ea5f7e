//! BiDi session socket.
//!
//! A single tokio task owns the socket. It writes queued commands, matches
//! replies to their callers by command id, and hands events to the
//! [`EventRouter`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CommandId;
use crate::protocol::{Command, Event, Request, Response};

use super::channel::{Channel, EventListener, EventRouter};
use super::options::ConnectionOptions;

// ============================================================================
// Types
// ============================================================================

/// Callers waiting for a reply, keyed by command id.
type CorrelationMap = FxHashMap<CommandId, oneshot::Sender<Result<Response>>>;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Work queued for the socket task.
enum ConnectionCommand {
    /// Write `request` and deliver its reply to `response_tx`.
    Send {
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
    },
    /// Forget a caller that gave up waiting.
    RemoveCorrelation(CommandId),
    /// Stop the socket task.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the remote end.
///
/// The connection spawns an internal event loop task which ends when
/// [`Connection::shutdown`] is called, the remote end closes, or every
/// clone has been dropped.
///
/// Clones share the same socket task.
#[derive(Clone)]
pub struct Connection {
    /// Queue into the socket task.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Pending replies.
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Per-event-name listeners.
    router: EventRouter,
    /// Timeouts and limits.
    options: ConnectionOptions,
}

impl Connection {
    /// Connects to a WebSocket endpoint, e.g. `ws://127.0.0.1:9222/session`.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds the timeout
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn connect(url: &str, options: ConnectionOptions) -> Result<Self> {
        let (ws_stream, _) = timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| Error::connection_timeout(millis(options.connect_timeout)))??;

        info!(url, "WebSocket connection established");

        Ok(Self::from_stream(ws_stream, options))
    }

    /// Wraps an already-upgraded stream and starts its socket task.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>, options: ConnectionOptions) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let router = EventRouter::new();

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            router.clone(),
        ));

        Self {
            command_tx,
            correlation,
            router,
            options,
        }
    }

    /// Sends `request` and awaits its reply under the default command timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] once the socket task has stopped
    /// - [`Error::RequestTimeout`] when no reply arrives in time
    /// - [`Error::Connection`] when `max_pending` replies are outstanding
    pub async fn send(&self, request: Request) -> Result<Response> {
        self.send_with_timeout(request, self.options.command_timeout)
            .await
    }

    /// Like [`Connection::send`] with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub async fn send_with_timeout(
        &self,
        request: Request,
        request_timeout: Duration,
    ) -> Result<Response> {
        let command_id = request.id;

        // Bounded in-flight commands
        {
            let correlation = self.correlation.lock();
            if correlation.len() >= self.options.max_pending {
                warn!(
                    pending = correlation.len(),
                    max = self.options.max_pending,
                    "Pending limit reached"
                );
                return Err(Error::connection(format!(
                    "pending limit reached: {}/{}",
                    correlation.len(),
                    self.options.max_pending
                )));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(ConnectionCommand::Send {
                request,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout(request_timeout, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                let _ = self
                    .command_tx
                    .send(ConnectionCommand::RemoveCorrelation(command_id));

                Err(Error::request_timeout(
                    command_id,
                    millis(request_timeout),
                ))
            }
        }
    }

    /// Commands still awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` while the event loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Asks the socket task to stop. Pending callers see [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Socket task body.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        router: EventRouter,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                // Inbound frames
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &router);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Remote end sent close frame");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Socket read failed");
                            break;
                        }

                        None => {
                            debug!("Socket stream exhausted");
                            break;
                        }

                        // Only text frames carry BiDi messages
                        _ => {}
                    }
                }

                // Local work queue
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { request, response_tx }) => {
                            Self::handle_send_command(
                                request,
                                response_tx,
                                &mut ws_write,
                                &correlation,
                            ).await;
                        }

                        Some(ConnectionCommand::RemoveCorrelation(command_id)) => {
                            correlation.lock().remove(&command_id);
                            debug!(%command_id, "Removed timed-out correlation");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown requested");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("All connection handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        // Fail everything still waiting on this connection
        command_rx.close();
        Self::fail_pending_requests(&correlation);
        router.fail_all(|| Error::ConnectionClosed);

        debug!("Socket task stopped");
    }

    /// Classifies one inbound text frame as a reply or an event.
    fn handle_incoming_message(
        text: &str,
        correlation: &Arc<Mutex<CorrelationMap>>,
        router: &EventRouter,
    ) {
        // Replies carry a success/error type tag
        if let Ok(response) = from_str::<Response>(text) {
            let Some(id) = response.id else {
                warn!(
                    error = ?response.error,
                    message = ?response.message,
                    "Error response without command id"
                );
                return;
            };

            let tx = correlation.lock().remove(&id);
            if let Some(tx) = tx {
                let _ = tx.send(Ok(response));
            } else {
                warn!(%id, "Response for unknown command");
            }
            return;
        }

        if let Ok(event) = from_str::<Event>(text) {
            trace!(method = %event.method, "Event received");
            router.dispatch(event);
            return;
        }

        warn!(text = %text, "Failed to parse incoming message");
    }

    /// Writes one command frame, registering its caller first.
    async fn handle_send_command<S>(
        request: Request,
        response_tx: oneshot::Sender<Result<Response>>,
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
        correlation: &Arc<Mutex<CorrelationMap>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let command_id = request.id;

        let json = match to_string(&request) {
            Ok(j) => j,
            Err(e) => {
                let _ = response_tx.send(Err(Error::Json(e)));
                return;
            }
        };

        // Register before writing
        correlation.lock().insert(command_id, response_tx);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            if let Some(tx) = correlation.lock().remove(&command_id) {
                let _ = tx.send(Err(Error::connection(e.to_string())));
            }
            return;
        }

        trace!(%command_id, method = request.command.method(), "Request sent");
    }

    /// Drains every waiting caller with [`Error::ConnectionClosed`].
    fn fail_pending_requests(correlation: &Arc<Mutex<CorrelationMap>>) {
        let pending: Vec<_> = correlation.lock().drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Dropped pending replies");
        }
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Channel
// ============================================================================

#[async_trait]
impl Channel for Connection {
    async fn execute(&self, command: Command) -> Result<Value> {
        self.send(Request::new(command)).await?.into_result()
    }

    fn listen(&self, event: &str) -> EventListener {
        self.router.listen(event)
    }
}

// ============================================================================
// Tests
// ============================================================================
