//! Handler pipeline and continuation.
//!
//! A paused request is captured into a [`CapturedRequest`], folded through
//! the applicable handlers, and resumed with a continuation command that
//! carries only the fields the handlers changed.
//!
//! # Example
//!
//! ```ignore
//! let handler: Handler = Arc::new(|req: CapturedRequest| {
//!     Ok(req.with_url("https://example.com/replacement"))
//! });
//!
//! let outcome = pipeline::run(captured.clone(), &[handler]);
//! let command = pipeline::continuation(&captured, &outcome.request);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::identifiers::{InterceptId, RequestId};
use crate::protocol::{
    AuthAction, AuthCredentials, BytesValue, Command, ContinueRequestParameters,
    ContinueResponseParameters, ContinueWithAuthParameters, CookieHeader, EventParams, Header,
    InterceptPhase, NetworkCommand, RequestData, ResponseData,
};

// ============================================================================
// Handler
// ============================================================================

/// Caller-supplied transform applied to a paused request.
///
/// Returning `Err` aborts the remaining handlers for that request; the
/// request is still continued with the last good state.
pub type Handler = Arc<dyn Fn(CapturedRequest) -> Result<CapturedRequest> + Send + Sync>;

// ============================================================================
// CapturedRequest
// ============================================================================

/// Editable view of one paused request.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedRequest {
    /// Request identifier used for continuation.
    pub request: RequestId,

    /// Phase at which the request is paused.
    pub phase: InterceptPhase,

    /// Intercepts blocking the request, in event order.
    pub intercepts: Vec<InterceptId>,

    /// Target URL.
    pub url: String,

    /// HTTP method.
    pub method: String,

    /// Request headers.
    pub headers: Vec<Header>,

    /// Request cookies.
    pub cookies: Vec<CookieHeader>,

    /// Replacement request body. The original body is never reported.
    pub body: Option<BytesValue>,

    /// Response, for `responseStarted` and `authRequired`.
    pub response: Option<ResponseData>,

    /// Credentials to answer an auth challenge with.
    pub credentials: Option<AuthCredentials>,
}

impl CapturedRequest {
    /// Creates a bare captured request.
    #[must_use]
    pub fn new(
        phase: InterceptPhase,
        request: impl Into<RequestId>,
        url: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            request: request.into(),
            phase,
            intercepts: Vec::new(),
            url: url.into(),
            method: method.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
            response: None,
            credentials: None,
        }
    }

    /// Captures a decoded network event.
    ///
    /// Returns `None` for events that are not interception phases.
    #[must_use]
    pub fn from_params(params: &EventParams) -> Option<Self> {
        let (phase, request, response) = match params {
            EventParams::BeforeRequestSent(p) => (InterceptPhase::BeforeRequestSent, &p.request, None),
            EventParams::ResponseStarted(p) => {
                (InterceptPhase::ResponseStarted, &p.request, Some(&p.response))
            }
            EventParams::AuthRequired(p) => {
                (InterceptPhase::AuthRequired, &p.request, Some(&p.response))
            }
            EventParams::Unknown { .. } => return None,
        };

        let mut captured = Self::from_request_data(phase, request);
        captured.intercepts = params.intercepts().to_vec();
        captured.response = response.cloned();
        Some(captured)
    }

    fn from_request_data(phase: InterceptPhase, data: &RequestData) -> Self {
        let mut captured = Self::new(phase, data.request.clone(), &data.url, &data.method);
        captured.headers = data.headers.clone().unwrap_or_default();
        captured.cookies = data
            .cookies
            .iter()
            .flatten()
            .map(CookieHeader::from)
            .collect();
        captured
    }
}

// ============================================================================
// CapturedRequest - Accessors
// ============================================================================

impl CapturedRequest {
    /// Returns the text value of the first header named `name`
    /// (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .and_then(|h| h.value.as_text())
    }

    /// Returns the response status, if a response is attached.
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }
}

// ============================================================================
// CapturedRequest - Edits
// ============================================================================

impl CapturedRequest {
    /// Replaces the target URL.
    #[inline]
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replaces the HTTP method.
    #[inline]
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Sets a header, replacing every header of the same name.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let header = Header::new(name, value);
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(&header.name));
        self.headers.push(header);
        self
    }

    /// Removes every header named `name`.
    #[must_use]
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.retain(|h| !h.name.eq_ignore_ascii_case(name));
        self
    }

    /// Replaces the request body with text.
    #[inline]
    #[must_use]
    pub fn with_body_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(BytesValue::string(body));
        self
    }

    /// Replaces the response status line. No-op without a response.
    #[must_use]
    pub fn with_status(mut self, status: u16, reason_phrase: impl Into<String>) -> Self {
        if let Some(response) = self.response.as_mut() {
            response.status = status;
            response.status_text = reason_phrase.into();
        }
        self
    }

    /// Answers the auth challenge with a username and password.
    #[inline]
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(AuthCredentials::password(username, password));
        self
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Result of folding handlers over one request.
#[derive(Debug)]
pub struct PipelineOutcome {
    /// State after the last successful handler.
    pub request: CapturedRequest,

    /// Index and error of the handler that failed, if any.
    pub failure: Option<(usize, Error)>,
}

/// Folds `handlers` left to right over `captured`.
///
/// Stops at the first failing (or panicking) handler.
#[must_use]
pub fn run(captured: CapturedRequest, handlers: &[Handler]) -> PipelineOutcome {
    let mut current = captured;

    for (index, handler) in handlers.iter().enumerate() {
        let input = current.clone();
        let result = catch_unwind(AssertUnwindSafe(|| handler(input)))
            .unwrap_or_else(|payload| Err(Error::handler(panic_message(payload.as_ref()))));

        match result {
            Ok(next) => current = next,
            Err(error) => {
                return PipelineOutcome {
                    request: current,
                    failure: Some((index, error)),
                };
            }
        }
    }

    PipelineOutcome {
        request: current,
        failure: None,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {detail}")
}

// ============================================================================
// Continuation
// ============================================================================

/// Builds the command that resumes `original` with the edits in `edited`.
///
/// Only changed fields are sent. The request id always comes from
/// `original`.
#[must_use]
pub fn continuation(original: &CapturedRequest, edited: &CapturedRequest) -> Command {
    let request = original.request.clone();

    match original.phase {
        InterceptPhase::BeforeRequestSent => {
            NetworkCommand::ContinueRequest(ContinueRequestParameters {
                request,
                body: changed(&original.body, &edited.body).flatten(),
                cookies: changed(&original.cookies, &edited.cookies),
                headers: changed(&original.headers, &edited.headers),
                method: changed(&original.method, &edited.method),
                url: changed(&original.url, &edited.url),
            })
        }

        InterceptPhase::ResponseStarted => {
            let mut params = ContinueResponseParameters::unchanged(request);
            params.credentials = changed(&original.credentials, &edited.credentials).flatten();

            if let (Some(before), Some(after)) = (&original.response, &edited.response) {
                params.headers = changed(&before.headers, &after.headers).flatten();
                params.reason_phrase = changed(&before.status_text, &after.status_text);
                params.status_code = changed(&before.status, &after.status);
            }

            NetworkCommand::ContinueResponse(params)
        }

        InterceptPhase::AuthRequired => {
            let action = match &edited.credentials {
                Some(credentials) => AuthAction::ProvideCredentials {
                    credentials: credentials.clone(),
                },
                None => AuthAction::Default,
            };
            NetworkCommand::ContinueWithAuth(ContinueWithAuthParameters { request, action })
        }
    }
    .into()
}

/// Builds an unmodified continuation for a request that could not be
/// captured.
#[must_use]
pub fn bare_continuation(phase: InterceptPhase, request: RequestId) -> Command {
    match phase {
        InterceptPhase::BeforeRequestSent => {
            NetworkCommand::ContinueRequest(ContinueRequestParameters::unchanged(request))
        }
        InterceptPhase::ResponseStarted => {
            NetworkCommand::ContinueResponse(ContinueResponseParameters::unchanged(request))
        }
        InterceptPhase::AuthRequired => {
            NetworkCommand::ContinueWithAuth(ContinueWithAuthParameters {
                request,
                action: AuthAction::Default,
            })
        }
    }
    .into()
}

/// Returns the edited value when it differs from the original.
fn changed<T: PartialEq + Clone>(original: &T, edited: &T) -> Option<T> {
    (original != edited).then(|| edited.clone())
}

// ============================================================================
// Tests
// ============================================================================
