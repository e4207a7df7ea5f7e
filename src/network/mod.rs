//! Network request interception.
//!
//! [`Network`] registers handlers for paused requests, keeps one remote
//! subscription and one dispatcher task per active phase, and tears both
//! down together with the last rule of that phase.
//!
//! # Example
//!
//! ```ignore
//! use bidi_network::{ConnectionOptions, Network, UrlPattern};
//!
//! Network::connect("ws://127.0.0.1:9222/session", ConnectionOptions::new(), |network| async move {
//!     let id = network
//!         .add_request_handler(
//!             |req| Ok(req.with_url("https://example.com/mirror")),
//!             Some(vec![UrlPattern::string("https://example.com/original")]),
//!         )
//!         .await?;
//!
//!     // ... drive the browser ...
//!
//!     network.remove_intercept(&id).await
//! })
//! .await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `dispatcher` | Per-phase event task |
//! | `pipeline` | Handler fold and continuation |
//! | `registry` | Intercept rule table |

// ============================================================================
// Submodules
// ============================================================================

/// Per-phase event dispatcher.
pub mod dispatcher;

/// Handler pipeline and continuation.
pub mod pipeline;

/// Interception rule registry.
pub mod registry;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::InterceptId;
use crate::protocol::{
    AddInterceptParameters, AddInterceptResult, EventDecoders, InterceptPhase, NetworkCommand,
    UrlPattern, codec,
};
use crate::transport::{Channel, Connection, ConnectionOptions};

use dispatcher::{ActiveSubscription, DispatchContext};
use registry::InterceptRegistry;

// ============================================================================
// Re-exports
// ============================================================================

pub use dispatcher::InterceptFailure;
pub use pipeline::{CapturedRequest, Handler, PipelineOutcome};
pub use registry::InterceptRule;

/// Protocol error code for an intercept the remote end no longer knows.
const NO_SUCH_INTERCEPT: &str = "no such intercept";

// ============================================================================
// Network
// ============================================================================

/// Interception session over one [`Channel`].
///
/// Cheap to clone; clones share state. Control operations are serialized
/// with each other; dispatcher tasks only read the rule table.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    context: DispatchContext,
    control: AsyncMutex<ControlState>,
    failures_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<InterceptFailure>>>,
}

#[derive(Default)]
struct ControlState {
    subscriptions: FxHashMap<InterceptPhase, ActiveSubscription>,
    closed: bool,
}

impl Drop for NetworkInner {
    fn drop(&mut self) {
        for subscription in self.control.get_mut().subscriptions.values() {
            subscription.abort();
        }
    }
}

// ============================================================================
// Network - Constructors
// ============================================================================

impl Network {
    /// Creates a session decoding the standard network events.
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self::with_decoders(channel, EventDecoders::network())
    }

    /// Creates a session with a custom event decoder table.
    #[must_use]
    pub fn with_decoders(channel: Arc<dyn Channel>, decoders: EventDecoders) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(NetworkInner {
                context: DispatchContext {
                    channel,
                    registry: Arc::new(parking_lot::Mutex::new(InterceptRegistry::new())),
                    decoders: Arc::new(decoders),
                    failures: failures_tx,
                },
                control: AsyncMutex::new(ControlState::default()),
                failures_rx: parking_lot::Mutex::new(Some(failures_rx)),
            }),
        }
    }

    /// Runs `body` with a fresh session, closing it afterwards.
    ///
    /// Every rule and subscription created inside is torn down whether
    /// `body` succeeds or fails.
    ///
    /// # Errors
    ///
    /// Returns whatever `body` returns.
    pub async fn scope<F, Fut, T>(channel: Arc<dyn Channel>, body: F) -> Result<T>
    where
        F: FnOnce(Network) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let network = Self::new(channel);
        let result = body(network.clone()).await;
        network.close().await;
        result
    }

    /// Connects to `url`, runs `body` in a session over that connection,
    /// then closes the session and the connection.
    ///
    /// # Errors
    ///
    /// - A transport error if the connection cannot be established
    /// - Otherwise whatever `body` returns
    pub async fn connect<F, Fut, T>(url: &str, options: ConnectionOptions, body: F) -> Result<T>
    where
        F: FnOnce(Network) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = Connection::connect(url, options).await?;
        let result = Self::scope(Arc::new(connection.clone()), body).await;
        connection.shutdown();
        result
    }
}

// ============================================================================
// Network - Registration
// ============================================================================

impl Network {
    /// Intercepts requests before they are sent.
    ///
    /// # Errors
    ///
    /// See [`Network::add_handler`].
    pub async fn add_request_handler<F>(
        &self,
        handler: F,
        url_patterns: Option<Vec<UrlPattern>>,
    ) -> Result<InterceptId>
    where
        F: Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync + 'static,
    {
        self.add_handler(InterceptPhase::BeforeRequestSent, handler, url_patterns)
            .await
    }

    /// Intercepts responses once their headers arrive.
    ///
    /// # Errors
    ///
    /// See [`Network::add_handler`].
    pub async fn add_response_handler<F>(
        &self,
        handler: F,
        url_patterns: Option<Vec<UrlPattern>>,
    ) -> Result<InterceptId>
    where
        F: Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync + 'static,
    {
        self.add_handler(InterceptPhase::ResponseStarted, handler, url_patterns)
            .await
    }

    /// Intercepts authentication challenges.
    ///
    /// # Errors
    ///
    /// See [`Network::add_handler`].
    pub async fn add_auth_handler<F>(
        &self,
        handler: F,
        url_patterns: Option<Vec<UrlPattern>>,
    ) -> Result<InterceptId>
    where
        F: Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync + 'static,
    {
        self.add_handler(InterceptPhase::AuthRequired, handler, url_patterns)
            .await
    }

    /// Creates a remote intercept for `phase` with one handler.
    ///
    /// Each call creates its own intercept, even for identical filters.
    /// The first rule of a phase also subscribes to its event and starts
    /// its dispatcher.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the remote end rejects the intercept
    /// - [`Error::ConnectionClosed`] if the session is closed
    /// - a transport error if the channel fails
    pub async fn add_handler<F>(
        &self,
        phase: InterceptPhase,
        handler: F,
        url_patterns: Option<Vec<UrlPattern>>,
    ) -> Result<InterceptId>
    where
        F: Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync + 'static,
    {
        self.add_shared_handler(phase, Arc::new(handler), url_patterns)
            .await
    }

    /// Like [`Network::add_handler`], for a handler shared between rules.
    ///
    /// # Errors
    ///
    /// See [`Network::add_handler`].
    pub async fn add_shared_handler(
        &self,
        phase: InterceptPhase,
        handler: Handler,
        url_patterns: Option<Vec<UrlPattern>>,
    ) -> Result<InterceptId> {
        let mut control = self.inner.control.lock().await;
        if control.closed {
            return Err(Error::ConnectionClosed);
        }

        let fresh = !control.subscriptions.contains_key(&phase);
        if fresh {
            let subscription = self.start_subscription(phase).await?;
            control.subscriptions.insert(phase, subscription);
        }

        let params = AddInterceptParameters::new(phase).with_url_patterns(url_patterns);
        let intercept = match self.add_intercept(params).await {
            Ok(intercept) => intercept,
            Err(e) => {
                if fresh {
                    self.roll_back(&mut control, phase).await;
                }
                return Err(e);
            }
        };

        let inserted = self
            .inner
            .context
            .registry
            .lock()
            .insert(intercept.clone(), phase, handler);
        if let Err(e) = inserted {
            let command = NetworkCommand::remove_intercept(intercept.clone()).into();
            if let Err(remove_err) = self.channel().execute(command).await {
                warn!(%intercept, error = %remove_err, "Failed to remove unregistered intercept");
            }
            if fresh {
                self.roll_back(&mut control, phase).await;
            }
            return Err(e);
        }

        if let Some(subscription) = control.subscriptions.get_mut(&phase) {
            subscription.ref_count += 1;
        }

        info!(%phase, %intercept, "Intercept added");
        Ok(intercept)
    }

    /// Appends a handler to an existing intercept.
    ///
    /// It runs after the handlers already registered there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InterceptNotFound`] if `id` is unknown.
    pub async fn append_handler<F>(&self, id: &InterceptId, handler: F) -> Result<()>
    where
        F: Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync + 'static,
    {
        let _control = self.inner.control.lock().await;
        let handlers = self
            .inner
            .context
            .registry
            .lock()
            .append_handler(id, Arc::new(handler))?;

        debug!(intercept = %id, handlers, "Handler appended");
        Ok(())
    }

    async fn add_intercept(&self, params: AddInterceptParameters) -> Result<InterceptId> {
        let value = self
            .channel()
            .execute(NetworkCommand::AddIntercept(params).into())
            .await?;
        let result: AddInterceptResult = codec::decode(value)?;
        Ok(result.intercept)
    }
}

// ============================================================================
// Network - Removal
// ============================================================================

impl Network {
    /// Removes one intercept and its handlers.
    ///
    /// Removing the last intercept of a phase also unsubscribes from its
    /// event and stops its dispatcher.
    ///
    /// # Errors
    ///
    /// - [`Error::InterceptNotFound`] if `id` is unknown; nothing is sent
    /// - [`Error::Protocol`] if the remote end refuses; the rule is kept
    /// - an unsubscribe failure, after local state has been released
    pub async fn remove_intercept(&self, id: &InterceptId) -> Result<()> {
        let mut control = self.inner.control.lock().await;
        self.remove_locked(&mut control, id).await
    }

    /// Alias of [`Network::remove_intercept`].
    ///
    /// # Errors
    ///
    /// See [`Network::remove_intercept`].
    pub async fn remove_request_handler(&self, id: &InterceptId) -> Result<()> {
        self.remove_intercept(id).await
    }

    /// Removes every intercept registered when the call starts.
    ///
    /// Intercepts added while the sweep runs are kept. Intercepts removed
    /// concurrently are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first removal failure; the sweep still visits every id.
    pub async fn clear_intercepts(&self) -> Result<()> {
        let snapshot = self.inner.context.registry.lock().ids();
        debug!(count = snapshot.len(), "Clearing intercepts");

        let mut first_error = None;
        for id in snapshot {
            let mut control = self.inner.control.lock().await;
            match self.remove_locked(&mut control, &id).await {
                Ok(()) | Err(Error::InterceptNotFound { .. }) => {}
                Err(e) => {
                    warn!(intercept = %id, error = %e, "Failed to clear intercept");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Alias of [`Network::clear_intercepts`].
    ///
    /// # Errors
    ///
    /// See [`Network::clear_intercepts`].
    pub async fn clear_request_handlers(&self) -> Result<()> {
        self.clear_intercepts().await
    }

    /// Stops every dispatcher and removes every intercept and subscription.
    ///
    /// Remote failures are logged; local state is released regardless.
    /// Later registrations fail with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        let mut control = self.inner.control.lock().await;
        if control.closed {
            return;
        }
        control.closed = true;

        let ids = self.inner.context.registry.lock().ids();
        for id in &ids {
            let command = NetworkCommand::remove_intercept(id.clone()).into();
            if let Err(e) = self.channel().execute(command).await {
                warn!(intercept = %id, error = %e, "Failed to remove intercept on close");
            }
            let _ = self.inner.context.registry.lock().remove(id);
        }

        let subscriptions: Vec<_> = control.subscriptions.drain().map(|(_, s)| s).collect();
        for subscription in subscriptions {
            let _ = self.stop_subscription(subscription).await;
        }

        info!(intercepts = ids.len(), "Network interception closed");
    }

    async fn remove_locked(&self, control: &mut ControlState, id: &InterceptId) -> Result<()> {
        let Some(phase) = self.inner.context.registry.lock().phase_of(id) else {
            return Err(Error::intercept_not_found(id.clone()));
        };

        let command = NetworkCommand::remove_intercept(id.clone()).into();
        match self.channel().execute(command).await {
            Ok(_) => {}
            Err(Error::Protocol { code, message }) if code == NO_SUCH_INTERCEPT => {
                warn!(intercept = %id, %message, "Intercept already gone remotely");
            }
            Err(e) => return Err(e),
        }

        self.inner.context.registry.lock().remove(id)?;
        info!(%phase, intercept = %id, "Intercept removed");

        self.release(control, phase).await
    }
}

// ============================================================================
// Network - Subscriptions
// ============================================================================

impl Network {
    async fn start_subscription(&self, phase: InterceptPhase) -> Result<ActiveSubscription> {
        let event = phase.event_name();

        // Listen first so no event is missed between subscribe and spawn.
        let listener = self.channel().listen(event);
        self.channel().subscribe(event).await?;

        debug!(%phase, "Subscribed");
        Ok(ActiveSubscription::spawn(
            phase,
            listener,
            self.inner.context.clone(),
        ))
    }

    /// Drops one reference to `phase`, tearing it down at zero.
    async fn release(&self, control: &mut ControlState, phase: InterceptPhase) -> Result<()> {
        let Some(subscription) = control.subscriptions.get_mut(&phase) else {
            return Ok(());
        };

        subscription.ref_count = subscription.ref_count.saturating_sub(1);
        if subscription.ref_count > 0 {
            return Ok(());
        }

        match control.subscriptions.remove(&phase) {
            Some(subscription) => self.stop_subscription(subscription).await,
            None => Ok(()),
        }
    }

    /// Tears down a subscription created by a registration that failed.
    ///
    /// Teardown failures are logged; the caller gets the registration error.
    async fn roll_back(&self, control: &mut ControlState, phase: InterceptPhase) {
        if let Err(e) = self.release(control, phase).await {
            warn!(%phase, error = %e, "Rollback failed");
        }
    }

    async fn stop_subscription(&self, subscription: ActiveSubscription) -> Result<()> {
        let phase = subscription.phase;
        subscription.stop().await;

        self.channel()
            .unsubscribe(phase.event_name())
            .await
            .inspect(|_| debug!(%phase, "Unsubscribed"))
            .inspect_err(|e| warn!(%phase, error = %e, "Failed to unsubscribe"))
    }
}

// ============================================================================
// Network - Accessors
// ============================================================================

impl Network {
    /// Returns the underlying channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.inner.context.channel
    }

    /// Returns every live intercept, in registration order.
    #[must_use]
    pub fn intercept_ids(&self) -> Vec<InterceptId> {
        self.inner.context.registry.lock().ids()
    }

    /// Returns every phase with a live subscription, in lifecycle order.
    pub async fn active_phases(&self) -> Vec<InterceptPhase> {
        let control = self.inner.control.lock().await;
        InterceptPhase::ALL
            .into_iter()
            .filter(|phase| control.subscriptions.contains_key(phase))
            .collect()
    }

    /// Takes the receiver of processing failures.
    ///
    /// Returns `None` after the first call.
    #[must_use]
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<InterceptFailure>> {
        self.inner.failures_rx.lock().take()
    }

    /// Returns `true` once [`Network::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.inner.control.lock().await.closed
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proptest::prelude::*;
    use serde_json::json;
    use tokio::time::timeout;

    use crate::identifiers::RequestId;
    use crate::protocol::{AuthAction, Command, Event};

    use super::testing::{FakeBrowser, event_params};

    const U1: &str = "https://example.com/one";
    const U2: &str = "https://example.com/two";
    const U3: &str = "https://example.com/three";

    fn setup() -> (Arc<FakeBrowser>, Network) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let browser = Arc::new(FakeBrowser::new());
        let network = Network::new(browser.clone());
        (browser, network)
    }

    async fn next_failure(
        failures: &mut mpsc::UnboundedReceiver<InterceptFailure>,
    ) -> InterceptFailure {
        timeout(Duration::from_secs(5), failures.recv())
            .await
            .expect("no failure reported")
            .expect("failure channel closed")
    }

    fn continued_url(command: &Command) -> Option<String> {
        match command {
            Command::Network(NetworkCommand::ContinueRequest(params)) => params.url.clone(),
            other => panic!("expected continueRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_scenario() -> anyhow::Result<()> {
        let (browser, network) = setup();

        let a = network
            .add_request_handler(
                |req| Ok(req.with_url(U3)),
                Some(vec![UrlPattern::string(U1)]),
            )
            .await?;
        let b = network
            .add_request_handler(
                |req| Ok(req.with_url(U3)),
                Some(vec![UrlPattern::string(U2)]),
            )
            .await?;
        assert_ne!(a, b);

        assert_eq!(browser.navigate(U1).await, U3);
        assert_eq!(browser.navigate(U2).await, U3);

        network.remove_intercept(&b).await?;
        assert_eq!(browser.navigate(U2).await, U2);
        assert_eq!(browser.navigate(U1).await, U3);

        network.remove_intercept(&a).await?;
        assert_eq!(browser.navigate(U1).await, U1);

        assert!(browser.subscribed_events().is_empty());
        assert!(network.active_phases().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_phase_unsubscribes_once() -> anyhow::Result<()> {
        let (browser, network) = setup();

        let first = network.add_request_handler(Ok, None).await?;
        let second = network.add_request_handler(Ok, None).await?;
        assert_eq!(browser.count("session.subscribe"), 1);

        network.remove_intercept(&first).await?;
        assert!(browser.is_subscribed("network.beforeRequestSent"));
        assert_eq!(
            network.active_phases().await,
            vec![InterceptPhase::BeforeRequestSent]
        );
        assert_eq!(browser.count("session.unsubscribe"), 0);

        network.remove_intercept(&second).await?;
        assert!(!browser.is_subscribed("network.beforeRequestSent"));
        assert_eq!(browser.count("session.unsubscribe"), 1);
        assert!(network.active_phases().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_handler_failure_continues_with_last_good_state() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let mut failures = network.take_failures().expect("failures");

        let id = network
            .add_request_handler(|req| Ok(req.with_url(U2)), None)
            .await?;
        network
            .append_handler(&id, |req| {
                if req.url == U2 && req.header("X-Skip").is_none() {
                    Err(Error::handler("refusing"))
                } else {
                    Ok(req)
                }
            })
            .await?;
        network
            .append_handler(&id, |req| Ok(req.with_url(U3)))
            .await?;

        assert_eq!(browser.navigate(U1).await, U2);

        let failure = next_failure(&mut failures).await;
        assert_eq!(failure.phase, InterceptPhase::BeforeRequestSent);
        assert!(failure.request.is_some());
        assert!(matches!(failure.error, Error::Handler { .. }));

        // The dispatcher keeps going.
        assert_eq!(browser.navigate(U1).await, U2);
        assert_eq!(browser.count("network.continueRequest"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_handlers_still_continue() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;

        let command = browser
            .pause(
                InterceptPhase::BeforeRequestSent,
                U1,
                &[InterceptId::new("intercept-unknown")],
            )
            .await;

        assert_eq!(continued_url(&command), None);
        assert_eq!(browser.count("network.continueRequest"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_exactly_one_continuation_per_blocked_event() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;
        network.add_request_handler(Ok, None).await?;

        // Both intercepts block the same request.
        assert_eq!(browser.navigate(U1).await, U1);
        assert_eq!(browser.count("network.continueRequest"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_handlers_compose_in_order() -> anyhow::Result<()> {
        let (browser, network) = setup();

        let id = network
            .add_request_handler(|req| Ok(req.with_url(format!("{}/h1", U1))), None)
            .await?;
        network
            .append_handler(&id, |req| {
                let url = format!("{}/h2", req.url);
                Ok(req.with_url(url))
            })
            .await?;

        assert_eq!(browser.navigate(U1).await, format!("{U1}/h1/h2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let id = network.add_request_handler(Ok, None).await?;

        let err = network
            .remove_intercept(&InterceptId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InterceptNotFound { .. }));

        assert_eq!(network.intercept_ids(), vec![id]);
        assert_eq!(browser.count("network.removeIntercept"), 0);
        assert_eq!(browser.intercept_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_append_unknown_is_not_found() {
        let (_browser, network) = setup();
        let err = network
            .append_handler(&InterceptId::new("nope"), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InterceptNotFound { .. }));
    }

    #[tokio::test]
    async fn test_clear_keeps_rules_added_after_snapshot() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;
        network.add_response_handler(Ok, None).await?;

        let (cleared, added) = tokio::join!(
            network.clear_intercepts(),
            network.add_request_handler(Ok, None)
        );
        cleared?;
        let added = added?;

        assert_eq!(network.intercept_ids(), vec![added]);
        assert_eq!(browser.intercept_count(), 1);
        assert_eq!(
            network.active_phases().await,
            vec![InterceptPhase::BeforeRequestSent]
        );
        assert_eq!(
            browser.subscribed_events(),
            vec!["network.beforeRequestSent".to_string()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_continues_after_failure() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;
        network.add_request_handler(Ok, None).await?;

        browser.reject("network.removeIntercept", "unknown error", "flaky");
        let err = network.clear_intercepts().await.unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(browser.count("network.removeIntercept"), 2);
        assert_eq!(network.intercept_ids().len(), 2);

        browser.accept("network.removeIntercept");
        network.clear_request_handlers().await?;
        assert!(network.intercept_ids().is_empty());
        assert!(browser.subscribed_events().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_add_rolls_back_subscription() {
        let (browser, network) = setup();
        browser.reject("network.addIntercept", "invalid argument", "bad pattern");

        let err = network
            .add_request_handler(Ok, Some(vec![UrlPattern::string("::")]))
            .await
            .unwrap_err();
        assert!(err.is_protocol_error());

        assert!(network.intercept_ids().is_empty());
        assert!(network.active_phases().await.is_empty());
        assert!(browser.subscribed_events().is_empty());
        assert_eq!(browser.count("session.unsubscribe"), 1);
    }

    #[tokio::test]
    async fn test_rejected_add_error_survives_failed_rollback() {
        let (browser, network) = setup();
        browser.reject("network.addIntercept", "invalid argument", "bad pattern");
        browser.reject("session.unsubscribe", "unknown error", "down");

        let err = network.add_request_handler(Ok, None).await.unwrap_err();
        assert!(matches!(&err, Error::Protocol { code, .. } if code == "invalid argument"));
        assert!(network.intercept_ids().is_empty());
        assert!(network.active_phases().await.is_empty());
    }

    #[tokio::test]
    async fn test_reused_intercept_id_is_removed_and_rolled_back() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let first = network.add_request_handler(Ok, None).await?;

        browser.reuse_last_intercept_id();
        let err = network.add_response_handler(Ok, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        assert_eq!(browser.count("network.removeIntercept"), 1);
        assert_eq!(browser.intercept_count(), 0);
        assert_eq!(network.intercept_ids(), vec![first.clone()]);
        assert_eq!(
            network.active_phases().await,
            vec![InterceptPhase::BeforeRequestSent]
        );
        assert!(!browser.is_subscribed("network.responseStarted"));

        // Already gone remotely; local teardown still completes.
        network.remove_intercept(&first).await?;
        assert!(browser.subscribed_events().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_add_keeps_existing_subscription() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let id = network.add_request_handler(Ok, None).await?;

        browser.reject("network.addIntercept", "invalid argument", "bad pattern");
        assert!(network.add_request_handler(Ok, None).await.is_err());

        assert_eq!(network.intercept_ids(), vec![id.clone()]);
        assert!(browser.is_subscribed("network.beforeRequestSent"));

        network.remove_intercept(&id).await?;
        assert!(browser.subscribed_events().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_remove_keeps_rule() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let id = network.add_request_handler(Ok, None).await?;

        browser.reject("network.removeIntercept", "unknown error", "busy");
        assert!(network.remove_intercept(&id).await.is_err());
        assert_eq!(network.intercept_ids(), vec![id.clone()]);
        assert!(browser.is_subscribed("network.beforeRequestSent"));

        browser.reject("network.removeIntercept", NO_SUCH_INTERCEPT, "gone");
        network.remove_intercept(&id).await?;
        assert!(network.intercept_ids().is_empty());
        assert!(!browser.is_subscribed("network.beforeRequestSent"));
        Ok(())
    }

    #[tokio::test]
    async fn test_response_and_auth_phases() -> anyhow::Result<()> {
        let (browser, network) = setup();

        network
            .add_response_handler(|req| Ok(req.with_status(404, "Not Found")), None)
            .await?;
        network
            .add_auth_handler(|req| Ok(req.with_credentials("user", "secret")), None)
            .await?;
        assert_eq!(
            network.active_phases().await,
            vec![InterceptPhase::ResponseStarted, InterceptPhase::AuthRequired]
        );

        match browser.request(InterceptPhase::ResponseStarted, U1).await {
            Some(Command::Network(NetworkCommand::ContinueResponse(params))) => {
                assert_eq!(params.status_code, Some(404));
                assert_eq!(params.reason_phrase.as_deref(), Some("Not Found"));
            }
            other => panic!("expected continueResponse, got {other:?}"),
        }

        match browser.request(InterceptPhase::AuthRequired, U1).await {
            Some(Command::Network(NetworkCommand::ContinueWithAuth(params))) => {
                assert!(matches!(
                    params.action,
                    AuthAction::ProvideCredentials { ref credentials } if credentials.username == "user"
                ));
            }
            other => panic!("expected continueWithAuth, got {other:?}"),
        }

        // No request-phase intercept, so nothing pauses there.
        assert!(browser.request(InterceptPhase::BeforeRequestSent, U1).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_non_blocked_events_are_ignored() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        network
            .add_request_handler(
                move |req| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(req)
                },
                Some(vec![UrlPattern::string(U1)]),
            )
            .await?;

        // Subscribed, but the pattern does not match: telemetry only.
        assert_eq!(browser.navigate(U2).await, U2);
        assert_eq!(browser.navigate(U1).await, U1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(browser.count("network.continueRequest"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_undecodable_blocked_event_is_released() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let mut failures = network.take_failures().expect("failures");
        network.add_request_handler(Ok, None).await?;

        let request = RequestId::new("request-broken");
        let resumed = browser.hold(&request);
        browser.emit_raw(Event::new(
            "network.beforeRequestSent",
            json!({ "isBlocked": true, "request": { "request": "request-broken" } }),
        ));

        let command = timeout(Duration::from_secs(5), resumed).await??;
        assert_eq!(continued_url(&command), None);

        let failure = next_failure(&mut failures).await;
        assert_eq!(failure.request, Some(request));
        assert!(matches!(failure.error, Error::Decode { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_continuation_is_reported() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let mut failures = network.take_failures().expect("failures");
        let id = network.add_request_handler(Ok, None).await?;

        browser.reject("network.continueRequest", "no such request", "late");
        let request = RequestId::new("request-late");
        browser.emit_raw(Event::new(
            "network.beforeRequestSent",
            event_params(
                InterceptPhase::BeforeRequestSent,
                &request,
                U1,
                true,
                &[id],
            ),
        ));

        let failure = next_failure(&mut failures).await;
        assert_eq!(failure.request, Some(request));
        assert!(failure.error.is_protocol_error());

        browser.accept("network.continueRequest");
        assert_eq!(browser.navigate(U1).await, U1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_failure_ends_only_that_phase() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let mut failures = network.take_failures().expect("failures");
        network.add_request_handler(|req| Ok(req.with_url(U3)), None).await?;
        network
            .add_response_handler(|req| Ok(req.with_status(204, "No Content")), None)
            .await?;

        browser.fail_stream(InterceptPhase::BeforeRequestSent, Error::ConnectionClosed);

        let failure = next_failure(&mut failures).await;
        assert_eq!(failure.phase, InterceptPhase::BeforeRequestSent);
        assert_eq!(failure.request, None);
        assert!(matches!(failure.error, Error::ConnectionClosed));

        match browser.request(InterceptPhase::ResponseStarted, U1).await {
            Some(Command::Network(NetworkCommand::ContinueResponse(params))) => {
                assert_eq!(params.status_code, Some(204));
            }
            other => panic!("expected continueResponse, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_stream_is_not_a_failure() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let mut failures = network.take_failures().expect("failures");
        let id = network.add_request_handler(Ok, None).await?;

        browser.close_stream(InterceptPhase::BeforeRequestSent);
        network.remove_intercept(&id).await?;

        assert!(failures.try_recv().is_err());
        Ok(())
    }

    /// Emits `count` blocked requests naming `id` without waiting for them.
    fn queue_blocked(
        browser: &FakeBrowser,
        id: &InterceptId,
        count: usize,
    ) -> Vec<tokio::sync::oneshot::Receiver<Command>> {
        (0..count)
            .map(|n| {
                let request = RequestId::new(format!("request-queued-{n}"));
                let resumed = browser.hold(&request);
                browser.emit_raw(Event::new(
                    "network.beforeRequestSent",
                    event_params(
                        InterceptPhase::BeforeRequestSent,
                        &request,
                        U1,
                        true,
                        std::slice::from_ref(id),
                    ),
                ));
                resumed
            })
            .collect()
    }

    async fn assert_all_continued(
        resumed: Vec<tokio::sync::oneshot::Receiver<Command>>,
    ) -> anyhow::Result<()> {
        for rx in resumed {
            let command = timeout(Duration::from_secs(5), rx).await??;
            assert!(matches!(
                command,
                Command::Network(NetworkCommand::ContinueRequest(_))
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_removal_resumes_buffered_requests() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let id = network
            .add_request_handler(|req| Ok(req.with_url(U2)), None)
            .await?;

        let resumed = queue_blocked(&browser, &id, 10);
        network.remove_intercept(&id).await?;

        assert_all_continued(resumed).await?;
        assert_eq!(browser.count("network.continueRequest"), 10);
        assert!(browser.subscribed_events().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_close_resumes_buffered_requests() -> anyhow::Result<()> {
        let (browser, network) = setup();
        let id = network.add_request_handler(Ok, None).await?;

        let resumed = queue_blocked(&browser, &id, 10);
        network.close().await;

        assert_all_continued(resumed).await?;
        assert_eq!(browser.count("network.continueRequest"), 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_releases_everything() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;
        network.add_response_handler(Ok, None).await?;
        network.add_auth_handler(Ok, None).await?;

        network.close().await;
        network.close().await;

        assert!(network.is_closed().await);
        assert!(network.intercept_ids().is_empty());
        assert!(network.active_phases().await.is_empty());
        assert_eq!(browser.intercept_count(), 0);
        assert!(browser.subscribed_events().is_empty());
        assert_eq!(browser.count("session.unsubscribe"), 3);

        let err = network.add_request_handler(Ok, None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_releases_locally_when_remote_fails() -> anyhow::Result<()> {
        let (browser, network) = setup();
        network.add_request_handler(Ok, None).await?;

        browser.reject("network.removeIntercept", "unknown error", "down");
        browser.reject("session.unsubscribe", "unknown error", "down");
        network.close().await;

        assert!(network.intercept_ids().is_empty());
        assert!(network.active_phases().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_scope_tears_down_on_error() {
        let (browser, _) = setup();

        let result: Result<()> = Network::scope(browser.clone(), |network| async move {
            network.add_request_handler(Ok, None).await?;
            network.add_auth_handler(Ok, None).await?;
            Err(Error::handler("body failed"))
        })
        .await;

        assert!(matches!(result, Err(Error::Handler { .. })));
        assert_eq!(browser.intercept_count(), 0);
        assert!(browser.subscribed_events().is_empty());
    }

    #[tokio::test]
    async fn test_scope_returns_body_value() -> anyhow::Result<()> {
        let (browser, _) = setup();

        let url = Network::scope(browser.clone(), |network| {
            let browser = Arc::clone(&browser);
            async move {
                network
                    .add_request_handler(|req| Ok(req.with_url(U3)), None)
                    .await?;
                Ok::<_, Error>(browser.navigate(U1).await)
            }
        })
        .await?;

        assert_eq!(url, U3);
        assert!(browser.subscribed_events().is_empty());
        Ok(())
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Remove(usize),
        RemoveUnknown,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize).prop_map(Op::Add),
            (0..8usize).prop_map(Op::Remove),
            Just(Op::RemoveUnknown),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_subscriptions_match_live_phases(ops in prop::collection::vec(op(), 0..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async {
                let browser = Arc::new(FakeBrowser::new());
                let network = Network::new(browser.clone());
                let mut live: Vec<(InterceptId, InterceptPhase)> = Vec::new();

                for op in ops {
                    match op {
                        Op::Add(p) => {
                            let phase = InterceptPhase::ALL[p];
                            let id = network.add_handler(phase, Ok, None).await.expect("add");
                            live.push((id, phase));
                        }
                        Op::Remove(i) if !live.is_empty() => {
                            let (id, _) = live.remove(i % live.len());
                            network.remove_intercept(&id).await.expect("remove");
                        }
                        Op::Remove(_) | Op::RemoveUnknown => {
                            let err = network.remove_intercept(&InterceptId::new("nope")).await;
                            assert!(matches!(err, Err(Error::InterceptNotFound { .. })));
                        }
                    }

                    let expected: Vec<_> = InterceptPhase::ALL
                        .into_iter()
                        .filter(|phase| live.iter().any(|(_, p)| p == phase))
                        .collect();
                    assert_eq!(network.active_phases().await, expected);

                    let mut remote: Vec<_> =
                        expected.iter().map(|p| p.event_name().to_string()).collect();
                    remote.sort();
                    assert_eq!(browser.subscribed_events(), remote);
                }
            });
        }
    }
}
