//! In-memory browser for exercising the interception layer.
//!
//! [`FakeBrowser`] implements [`Channel`]: it records every command, issues
//! intercept ids, matches URL patterns, and pauses simulated requests until
//! the matching continuation arrives.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::identifiers::{InterceptId, RequestId};
use crate::protocol::{
    Command, Event, InterceptPhase, NetworkCommand, SessionCommand, UrlPattern,
};
use crate::transport::{Channel, EventListener, EventRouter};

/// How long a simulated request waits for its continuation.
const RESUME_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// FakeBrowser
// ============================================================================

struct RemoteIntercept {
    id: InterceptId,
    phase: InterceptPhase,
    url_patterns: Option<Vec<UrlPattern>>,
}

#[derive(Default)]
struct FakeState {
    commands: Vec<Command>,
    next_intercept: u64,
    next_request: u64,
    intercepts: Vec<RemoteIntercept>,
    subscriptions: FxHashMap<String, usize>,
    rejections: FxHashMap<String, (String, String)>,
    paused: FxHashMap<RequestId, oneshot::Sender<Command>>,
}

/// Scriptable remote end.
#[derive(Default)]
pub(crate) struct FakeBrowser {
    state: Mutex<FakeState>,
    router: EventRouter,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `method` command fail with a protocol error.
    pub fn reject(&self, method: &str, code: &str, message: &str) {
        self.state
            .lock()
            .rejections
            .insert(method.to_string(), (code.to_string(), message.to_string()));
    }

    /// Undoes [`FakeBrowser::reject`].
    pub fn accept(&self, method: &str) {
        self.state.lock().rejections.remove(method);
    }

    /// Number of `method` commands received so far.
    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.method() == method)
            .count()
    }

    /// Returns `true` while `event` is subscribed remotely.
    pub fn is_subscribed(&self, event: &str) -> bool {
        self.state.lock().subscriptions.contains_key(event)
    }

    /// Subscribed event names, sorted.
    pub fn subscribed_events(&self) -> Vec<String> {
        let mut events: Vec<_> = self.state.lock().subscriptions.keys().cloned().collect();
        events.sort();
        events
    }

    /// Makes the next `network.addIntercept` hand out the previous id again.
    pub fn reuse_last_intercept_id(&self) {
        let mut state = self.state.lock();
        state.next_intercept = state.next_intercept.saturating_sub(1);
    }

    /// Number of live remote intercepts.
    pub fn intercept_count(&self) -> usize {
        self.state.lock().intercepts.len()
    }

    /// Loads `url` and returns the URL the request finally went to.
    pub async fn navigate(&self, url: &str) -> String {
        match self.request(InterceptPhase::BeforeRequestSent, url).await {
            Some(Command::Network(NetworkCommand::ContinueRequest(params))) => {
                params.url.unwrap_or_else(|| url.to_string())
            }
            Some(other) => panic!("unexpected continuation {other:?}"),
            None => url.to_string(),
        }
    }

    /// Simulates a request reaching `phase`.
    ///
    /// Returns the continuation if an intercept paused it.
    pub async fn request(&self, phase: InterceptPhase, url: &str) -> Option<Command> {
        let matching: Vec<_> = {
            let state = self.state.lock();
            if !state.subscriptions.contains_key(phase.event_name()) {
                return None;
            }
            state
                .intercepts
                .iter()
                .filter(|i| i.phase == phase)
                .filter(|i| match &i.url_patterns {
                    None => true,
                    Some(patterns) => patterns.iter().any(|p| p.matches(url)),
                })
                .map(|i| i.id.clone())
                .collect()
        };

        if matching.is_empty() {
            let request = self.next_request_id();
            self.emit(phase, &request, url, false, &[]);
            return None;
        }

        Some(self.pause(phase, url, &matching).await)
    }

    /// Emits a blocked event naming `intercepts` and waits for its
    /// continuation.
    pub async fn pause(&self, phase: InterceptPhase, url: &str, intercepts: &[InterceptId]) -> Command {
        let request = self.next_request_id();
        let rx = self.hold(&request);
        self.emit(phase, &request, url, true, intercepts);

        timeout(RESUME_TIMEOUT, rx)
            .await
            .expect("request was never resumed")
            .expect("continuation dropped")
    }

    /// Registers a paused request without emitting anything.
    pub fn hold(&self, request: &RequestId) -> oneshot::Receiver<Command> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().paused.insert(request.clone(), tx);
        rx
    }

    /// Delivers a raw event to the listener of its name.
    pub fn emit_raw(&self, event: Event) -> bool {
        self.router.dispatch(event)
    }

    /// Ends the local stream of `phase` without error.
    pub fn close_stream(&self, phase: InterceptPhase) {
        self.router.close(phase.event_name());
    }

    /// Ends the local stream of `phase` with `error`.
    pub fn fail_stream(&self, phase: InterceptPhase, error: Error) {
        self.router.fail(phase.event_name(), error);
    }

    fn next_request_id(&self) -> RequestId {
        let mut state = self.state.lock();
        state.next_request += 1;
        RequestId::new(format!("request-{}", state.next_request))
    }

    fn emit(
        &self,
        phase: InterceptPhase,
        request: &RequestId,
        url: &str,
        blocked: bool,
        intercepts: &[InterceptId],
    ) {
        let params = event_params(phase, request, url, blocked, intercepts);
        self.router.dispatch(Event::new(phase.event_name(), params));
    }

    fn apply(&self, command: &Command) -> Result<Value> {
        let mut state = self.state.lock();
        state.commands.push(command.clone());

        if let Some((code, message)) = state.rejections.get(command.method()) {
            return Err(Error::protocol(code.clone(), message.clone()));
        }

        match command {
            Command::Session(SessionCommand::Subscribe(params)) => {
                for event in &params.events {
                    *state.subscriptions.entry(event.clone()).or_default() += 1;
                }
                Ok(json!({ "subscription": "subscription-1" }))
            }

            Command::Session(SessionCommand::Unsubscribe(params)) => {
                for event in &params.events {
                    if state.subscriptions.remove(event).is_none() {
                        return Err(Error::protocol("invalid argument", "not subscribed"));
                    }
                }
                Ok(json!({}))
            }

            Command::Network(NetworkCommand::AddIntercept(params)) => {
                state.next_intercept += 1;
                let id = InterceptId::new(format!("intercept-{}", state.next_intercept));
                for phase in &params.phases {
                    state.intercepts.push(RemoteIntercept {
                        id: id.clone(),
                        phase: *phase,
                        url_patterns: params.url_patterns.clone(),
                    });
                }
                Ok(json!({ "intercept": id }))
            }

            Command::Network(NetworkCommand::RemoveIntercept(params)) => {
                let before = state.intercepts.len();
                state.intercepts.retain(|i| i.id != params.intercept);
                if state.intercepts.len() == before {
                    return Err(Error::protocol("no such intercept", params.intercept.to_string()));
                }
                Ok(json!({}))
            }

            Command::Network(
                NetworkCommand::ContinueRequest(_)
                | NetworkCommand::ContinueResponse(_)
                | NetworkCommand::ContinueWithAuth(_),
            ) => {
                let request = continued_request(command);
                let Some(tx) = state.paused.remove(&request) else {
                    return Err(Error::protocol("no such request", request.to_string()));
                };
                let _ = tx.send(command.clone());
                Ok(json!({}))
            }
        }
    }
}

#[async_trait]
impl Channel for FakeBrowser {
    async fn execute(&self, command: Command) -> Result<Value> {
        tokio::task::yield_now().await;
        self.apply(&command)
    }

    fn listen(&self, event: &str) -> EventListener {
        self.router.listen(event)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn continued_request(command: &Command) -> RequestId {
    match command {
        Command::Network(NetworkCommand::ContinueRequest(p)) => p.request.clone(),
        Command::Network(NetworkCommand::ContinueResponse(p)) => p.request.clone(),
        Command::Network(NetworkCommand::ContinueWithAuth(p)) => p.request.clone(),
        _ => RequestId::new(""),
    }
}

/// Wire params of a network phase event.
pub(crate) fn event_params(
    phase: InterceptPhase,
    request: &RequestId,
    url: &str,
    blocked: bool,
    intercepts: &[InterceptId],
) -> Value {
    let mut params = json!({
        "isBlocked": blocked,
        "redirectCount": 0,
        "timestamp": 1_700_000_000_000u64,
        "context": "context-1",
        "initiator": { "type": "other" },
        "request": {
            "request": request,
            "url": url,
            "method": "GET",
            "headers": [
                { "name": "Accept", "value": { "type": "string", "value": "text/html" } }
            ],
            "cookies": [],
            "headersSize": 32,
            "timings": {
                "timeOrigin": 0.0, "requestTime": 0.0, "redirectStart": 0.0,
                "redirectEnd": 0.0, "fetchStart": 0.0, "dnsStart": 0.0,
                "dnsEnd": 0.0, "connectStart": 0.0, "connectEnd": 0.0,
                "tlsStart": 0.0, "requestStart": 0.0, "responseStart": 0.0,
                "responseEnd": 0.0
            }
        }
    });

    if blocked {
        params["intercepts"] = json!(intercepts);
    }

    match phase {
        InterceptPhase::BeforeRequestSent => {}
        InterceptPhase::ResponseStarted => {
            params["response"] = json!({
                "url": url,
                "protocol": "http/1.1",
                "status": 200,
                "statusText": "OK",
                "headers": [],
                "mimeType": "text/html"
            });
        }
        InterceptPhase::AuthRequired => {
            params["response"] = json!({
                "url": url,
                "protocol": "http/1.1",
                "status": 401,
                "statusText": "Unauthorized",
                "headers": [],
                "mimeType": "text/html",
                "authChallenges": [{ "scheme": "basic", "realm": "test" }]
            });
        }
    }

    params
}
