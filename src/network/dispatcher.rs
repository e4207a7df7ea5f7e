//! Per-phase event dispatcher.
//!
//! Each active phase owns one background task that pulls events from its
//! listener, skips telemetry (non-blocked) events, runs the handler
//! pipeline, and resumes the paused request.
//!
//! # Ordering
//!
//! Events of one phase are handled strictly one after another, each
//! resumed before the next is pulled. Tasks of different phases run
//! concurrently.
//!
//! # Stopping
//!
//! A stopped task first handles every event already buffered in its
//! listener, so no paused request is left behind.
//!
//! # Failures
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Handler error | Reported; request resumed with last good state |
//! | Undecodable blocked event | Reported; request resumed unchanged |
//! | Continuation rejected or timed out | Reported; task continues |
//! | Listener or channel broken | Reported; task ends |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Event, EventDecoders, InterceptPhase};
use crate::transport::{Channel, EventListener};

use super::pipeline::{self, CapturedRequest};
use super::registry::InterceptRegistry;

// ============================================================================
// InterceptFailure
// ============================================================================

/// A failure that happened while processing an intercepted request.
#[derive(Debug)]
pub struct InterceptFailure {
    /// Phase whose dispatcher hit the failure.
    pub phase: InterceptPhase,

    /// Affected request, when known.
    pub request: Option<RequestId>,

    /// What went wrong.
    pub error: Error,
}

// ============================================================================
// DispatchContext
// ============================================================================

/// Everything a dispatcher task needs, shared with the owning session.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub channel: Arc<dyn Channel>,
    pub registry: Arc<Mutex<InterceptRegistry>>,
    pub decoders: Arc<EventDecoders>,
    pub failures: mpsc::UnboundedSender<InterceptFailure>,
}

impl DispatchContext {
    /// Handles one event to completion.
    ///
    /// Returns `Err` only for failures that should end the task.
    async fn handle_event(&self, phase: InterceptPhase, event: Event) -> Result<()> {
        let params = match self.decoders.decode(&event) {
            Ok(params) => params,
            Err(e) => {
                warn!(%phase, method = %event.method, error = %e, "Failed to decode event");
                let request = event.blocked_request_id();
                if let Some(request) = &request {
                    let command = pipeline::bare_continuation(phase, request.clone());
                    self.resume(phase, command, request).await?;
                }
                self.report(phase, request, e);
                return Ok(());
            }
        };

        if !params.is_blocked() {
            trace!(%phase, "Skipping non-blocked event");
            return Ok(());
        }

        let Some(captured) = CapturedRequest::from_params(&params) else {
            trace!(%phase, method = %event.method, "Skipping non-network event");
            return Ok(());
        };

        let handlers = self.registry.lock().handlers_for(&captured.intercepts);
        if handlers.is_empty() {
            debug!(%phase, request = %captured.request, "No handlers apply, resuming unchanged");
        }

        let outcome = pipeline::run(captured.clone(), &handlers);
        if let Some((index, e)) = outcome.failure {
            warn!(
                %phase,
                request = %captured.request,
                handler = index,
                error = %e,
                "Handler failed"
            );
            self.report(phase, Some(captured.request.clone()), e);
        }

        let command = pipeline::continuation(&captured, &outcome.request);
        self.resume(phase, command, &captured.request).await
    }

    /// Sends a continuation.
    async fn resume(&self, phase: InterceptPhase, command: Command, request: &RequestId) -> Result<()> {
        let method = command.method();

        match self.channel.execute(command).await {
            Ok(_) => {
                trace!(%phase, %request, method, "Request resumed");
                Ok(())
            }
            Err(e) if e.is_transport_error() && !e.is_timeout() => Err(e),
            Err(e) => {
                warn!(%phase, %request, method, error = %e, "Continuation failed");
                self.report(phase, Some(request.clone()), e);
                Ok(())
            }
        }
    }

    fn report(&self, phase: InterceptPhase, request: Option<RequestId>, error: Error) {
        let _ = self.failures.send(InterceptFailure {
            phase,
            request,
            error,
        });
    }
}

// ============================================================================
// ActiveSubscription
// ============================================================================

/// A live remote subscription and the task draining it.
pub(crate) struct ActiveSubscription {
    /// Phase being dispatched.
    pub phase: InterceptPhase,

    /// Number of rules that keep this subscription alive.
    pub ref_count: usize,

    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ActiveSubscription {
    /// Spawns the dispatcher task for `phase`.
    pub fn spawn(phase: InterceptPhase, listener: EventListener, context: DispatchContext) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            debug!(%phase, "Dispatcher started");

            let failures = context.failures.clone();
            if let Err(e) = run(phase, listener, stop_rx, &context).await {
                error!(%phase, error = %e, "Dispatcher terminated");
                let _ = failures.send(InterceptFailure {
                    phase,
                    request: None,
                    error: e,
                });
            }
        });

        Self {
            phase,
            ref_count: 0,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Signals the task to stop and waits for it.
    ///
    /// Events already buffered are resumed before the task exits.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Err(e) = (&mut self.handle).await {
            warn!(phase = %self.phase, error = %e, "Dispatcher task did not exit cleanly");
        }
    }

    /// Aborts the task without waiting.
    #[inline]
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Dispatcher loop.
async fn run(
    phase: InterceptPhase,
    mut listener: EventListener,
    mut stop_rx: oneshot::Receiver<()>,
    context: &DispatchContext,
) -> Result<()> {
    loop {
        let item = tokio::select! {
            biased;

            _ = &mut stop_rx => {
                drain(phase, &mut listener, context).await?;
                debug!(%phase, "Dispatcher stopped");
                return Ok(());
            }

            item = listener.recv() => item,
        };

        match item {
            Some(Ok(event)) => context.handle_event(phase, event).await?,
            Some(Err(e)) => return Err(e),
            None => {
                debug!(%phase, "Event stream closed");
                return Ok(());
            }
        }
    }
}

/// Handles every event already buffered when the stop signal arrives.
///
/// Rules removed by then contribute no handlers, so blocked requests are
/// resumed unchanged.
async fn drain(
    phase: InterceptPhase,
    listener: &mut EventListener,
    context: &DispatchContext,
) -> Result<()> {
    let mut drained = 0usize;

    while let Some(item) = listener.try_recv() {
        context.handle_event(phase, item?).await?;
        drained += 1;
    }

    if drained > 0 {
        debug!(%phase, drained, "Drained buffered events");
    }
    Ok(())
}
