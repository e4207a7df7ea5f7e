//! Network module data types.
//!
//! Wire shapes for the `network.*` commands and events. Field names follow
//! the protocol's camelCase; fields that are semantically absent are
//! `Option`s and are omitted from the encoded form.
//!
//! # Interception Phases
//!
//! | Phase | Event | Continuation |
//! |-------|-------|--------------|
//! | [`InterceptPhase::BeforeRequestSent`] | `network.beforeRequestSent` | `network.continueRequest` |
//! | [`InterceptPhase::ResponseStarted`] | `network.responseStarted` | `network.continueResponse` |
//! | [`InterceptPhase::AuthRequired`] | `network.authRequired` | `network.continueWithAuth` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{InterceptId, RequestId};

// ============================================================================
// InterceptPhase
// ============================================================================

/// Point in the request lifecycle at which interception happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterceptPhase {
    /// Before the request is sent.
    BeforeRequestSent,
    /// After response headers arrive.
    ResponseStarted,
    /// When the server asks for credentials.
    AuthRequired,
}

impl InterceptPhase {
    /// Every phase, in lifecycle order.
    pub const ALL: [Self; 3] = [
        Self::BeforeRequestSent,
        Self::ResponseStarted,
        Self::AuthRequired,
    ];

    /// Returns the phase name used in `network.addIntercept`.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeRequestSent => "beforeRequestSent",
            Self::ResponseStarted => "responseStarted",
            Self::AuthRequired => "authRequired",
        }
    }

    /// Returns the event emitted for this phase.
    #[inline]
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::BeforeRequestSent => "network.beforeRequestSent",
            Self::ResponseStarted => "network.responseStarted",
            Self::AuthRequired => "network.authRequired",
        }
    }

    /// Maps an event name back to its phase.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.event_name() == name)
    }
}

impl fmt::Display for InterceptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// UrlPattern
// ============================================================================

/// URL filter attached to an intercept.
///
/// Absent fields of [`UrlPattern::Pattern`] match any value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UrlPattern {
    /// Structured pattern.
    Pattern {
        /// Scheme, e.g. `https`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        /// Host name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
        /// Port as a string.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<String>,
        /// Path, including the leading `/`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pathname: Option<String>,
        /// Query string without the leading `?`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search: Option<String>,
    },

    /// Exact URL string.
    String {
        /// URL to match.
        pattern: String,
    },
}

impl UrlPattern {
    /// Creates a pattern matching exactly `url`.
    #[inline]
    #[must_use]
    pub fn string(url: impl Into<String>) -> Self {
        Self::String {
            pattern: url.into(),
        }
    }

    /// Builds a structured pattern from the components of `url`.
    ///
    /// The port is left open when `url` uses the scheme's default port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `url` does not parse.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| Error::invalid_argument(format!("invalid url {url:?}: {e}")))?;

        Ok(Self::Pattern {
            protocol: Some(parsed.scheme().to_string()),
            hostname: parsed.host_str().map(str::to_string),
            port: parsed.port().map(|p| p.to_string()),
            pathname: Some(parsed.path().to_string()),
            search: parsed.query().map(str::to_string),
        })
    }

    /// Returns `true` if `url` satisfies this pattern.
    ///
    /// Lets callers check locally what the remote end will intercept.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::String { pattern } => match (Url::parse(pattern), Url::parse(url)) {
                (Ok(expected), Ok(actual)) => expected == actual,
                _ => pattern == url,
            },
            Self::Pattern {
                protocol,
                hostname,
                port,
                pathname,
                search,
            } => {
                let Ok(actual) = Url::parse(url) else {
                    return false;
                };

                let protocol_ok = protocol.as_deref().is_none_or(|p| {
                    p.trim_end_matches(':').eq_ignore_ascii_case(actual.scheme())
                });
                let hostname_ok = hostname.as_deref().is_none_or(|h| {
                    actual
                        .host_str()
                        .is_some_and(|actual_host| actual_host.eq_ignore_ascii_case(h))
                });
                let port_ok = port.as_deref().is_none_or(|p| {
                    actual
                        .port_or_known_default()
                        .is_some_and(|actual_port| actual_port.to_string() == p)
                });
                let pathname_ok = pathname.as_deref().is_none_or(|p| {
                    let expected = if p.starts_with('/') {
                        p.to_string()
                    } else {
                        format!("/{p}")
                    };
                    actual.path() == expected
                });
                let search_ok = search.as_deref().is_none_or(|s| {
                    actual.query().unwrap_or_default() == s.trim_start_matches('?')
                });

                protocol_ok && hostname_ok && port_ok && pathname_ok && search_ok
            }
        }
    }
}

// ============================================================================
// BytesValue
// ============================================================================

/// Header, cookie or body payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BytesValue {
    /// UTF-8 text.
    String {
        /// Text value.
        value: String,
    },
    /// Base64-encoded bytes.
    Base64 {
        /// Encoded value.
        value: String,
    },
}

impl BytesValue {
    /// Creates a text value.
    #[inline]
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::String {
            value: value.into(),
        }
    }

    /// Encodes raw bytes as a base64 value.
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Base64 {
            value: Base64Standard.encode(bytes),
        }
    }

    /// Returns the text if this is a string value.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String { value } => Some(value),
            Self::Base64 { .. } => None,
        }
    }

    /// Decodes the payload to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if a base64 value is malformed.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::String { value } => Ok(value.as_bytes().to_vec()),
            Self::Base64 { value } => Base64Standard
                .decode(value)
                .map_err(|e| Error::decode("BytesValue", e)),
        }
    }
}

// ============================================================================
// Headers & Cookies
// ============================================================================

/// HTTP header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name.
    pub name: String,
    /// Header value.
    pub value: BytesValue,
}

impl Header {
    /// Creates a header with a text value.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: BytesValue::string(value),
        }
    }
}

/// Cookie sent with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieHeader {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: BytesValue,
}

/// Cookie `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    /// `Strict`.
    Strict,
    /// `Lax`.
    Lax,
    /// `None`.
    None,
}

/// Cookie as reported by the remote end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: BytesValue,
    /// Cookie domain.
    pub domain: String,
    /// Cookie path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// `HttpOnly` flag.
    pub http_only: bool,
    /// `Secure` flag.
    pub secure: bool,
    /// `SameSite` attribute.
    pub same_site: SameSite,
    /// Expiry as seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

impl From<&Cookie> for CookieHeader {
    fn from(cookie: &Cookie) -> Self {
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
        }
    }
}

// ============================================================================
// Request & Response Data
// ============================================================================

/// Fetch timing information, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTimingInfo {
    pub time_origin: f64,
    pub request_time: f64,
    pub redirect_start: f64,
    pub redirect_end: f64,
    pub fetch_start: f64,
    pub dns_start: f64,
    pub dns_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub tls_start: f64,
    pub request_start: f64,
    pub response_start: f64,
    pub response_end: f64,
}

/// Request as seen by the remote end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    /// Request identifier, used for continuation.
    pub request: RequestId,
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<Header>>,
    /// Request cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<Cookie>>,
    /// Serialized size of the headers.
    pub headers_size: u64,
    /// Body size, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_size: Option<u64>,
    /// Timing information.
    pub timings: FetchTimingInfo,
}

/// What caused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    Parser,
    Script,
    Preflight,
    Other,
}

/// Request initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: InitiatorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    /// Script stack trace, left uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestId>,
}

/// Authentication challenge sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// Auth scheme, e.g. `basic`.
    pub scheme: String,
    /// Protection realm.
    pub realm: String,
}

/// Response as seen by the remote end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    /// Response URL.
    pub url: String,
    /// Protocol, e.g. `http/1.1`.
    #[serde(default)]
    pub protocol: String,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status text.
    pub status_text: String,
    /// Whether the response was served from cache.
    #[serde(default)]
    pub from_cache: bool,
    /// Response headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<Header>>,
    /// MIME type.
    #[serde(default)]
    pub mime_type: String,
    /// Bytes received so far.
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_size: Option<u64>,
    /// Challenges, present on `network.authRequired`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_challenges: Option<Vec<AuthChallenge>>,
}

// ============================================================================
// Event Parameters
// ============================================================================

/// Parameters of `network.beforeRequestSent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeRequestSentParameters {
    /// Whether the request is paused awaiting continuation.
    pub is_blocked: bool,
    pub redirect_count: u64,
    pub request: RequestData,
    pub timestamp: u64,
    pub initiator: Initiator,
    /// Browsing context id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Navigation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<String>,
    /// Intercepts currently blocking the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercepts: Option<Vec<InterceptId>>,
}

/// Parameters of `network.responseStarted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStartedParameters {
    pub is_blocked: bool,
    pub redirect_count: u64,
    pub request: RequestData,
    pub timestamp: u64,
    pub response: ResponseData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercepts: Option<Vec<InterceptId>>,
}

/// Parameters of `network.authRequired`.
///
/// Same shape as [`ResponseStartedParameters`]; the response carries
/// `authChallenges`.
pub type AuthRequiredParameters = ResponseStartedParameters;

// ============================================================================
// Command Parameters
// ============================================================================

/// Parameters of `network.addIntercept`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddInterceptParameters {
    /// Phases to intercept.
    pub phases: Vec<InterceptPhase>,
    /// Restrict to these browsing contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
    /// Restrict to matching URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_patterns: Option<Vec<UrlPattern>>,
}

impl AddInterceptParameters {
    /// Creates parameters for a single phase with no filters.
    #[inline]
    #[must_use]
    pub fn new(phase: InterceptPhase) -> Self {
        Self {
            phases: vec![phase],
            contexts: None,
            url_patterns: None,
        }
    }

    /// Sets the URL filter.
    #[inline]
    #[must_use]
    pub fn with_url_patterns(mut self, url_patterns: Option<Vec<UrlPattern>>) -> Self {
        self.url_patterns = url_patterns;
        self
    }

    /// Restricts to the given browsing contexts.
    #[inline]
    #[must_use]
    pub fn with_contexts(mut self, contexts: Vec<String>) -> Self {
        self.contexts = Some(contexts);
        self
    }
}

/// Result of `network.addIntercept`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddInterceptResult {
    /// Newly created intercept.
    pub intercept: InterceptId,
}

/// Parameters of `network.continueRequest`.
///
/// Absent fields leave the request unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueRequestParameters {
    pub request: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BytesValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<CookieHeader>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<Header>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ContinueRequestParameters {
    /// Continues `request` unchanged.
    #[inline]
    #[must_use]
    pub fn unchanged(request: RequestId) -> Self {
        Self {
            request,
            body: None,
            cookies: None,
            headers: None,
            method: None,
            url: None,
        }
    }
}

/// Username/password pair for `network.continueWithAuth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "password")]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

impl AuthCredentials {
    /// Creates password credentials.
    #[inline]
    #[must_use]
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Parameters of `network.continueResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueResponseParameters {
    pub request: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AuthCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<Header>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ContinueResponseParameters {
    /// Continues `request` unchanged.
    #[inline]
    #[must_use]
    pub fn unchanged(request: RequestId) -> Self {
        Self {
            request,
            credentials: None,
            headers: None,
            reason_phrase: None,
            status_code: None,
        }
    }
}

/// Decision for an auth challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum AuthAction {
    /// Let the browser handle the challenge.
    Default,
    /// Cancel the request.
    Cancel,
    /// Answer the challenge.
    ProvideCredentials {
        /// Credentials to send.
        credentials: AuthCredentials,
    },
}

/// Parameters of `network.continueWithAuth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueWithAuthParameters {
    pub request: RequestId,
    #[serde(flatten)]
    pub action: AuthAction,
}

/// Parameters of `network.removeIntercept`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveInterceptParameters {
    /// Intercept to remove.
    pub intercept: InterceptId,
}

// ============================================================================
// Tests
// ============================================================================
