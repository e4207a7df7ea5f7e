//! Event message types.
//!
//! Events are notifications pushed by the remote end. They arrive as a raw
//! [`Event`] (method + untyped params) and are turned into typed
//! [`EventParams`] by an [`EventDecoders`] table that maps each event name
//! to its decoder.
//!
//! # Event Types
//!
//! | Module | Events |
//! |--------|--------|
//! | `network` | `beforeRequestSent`, `responseStarted`, `authRequired` |

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::codec;
use super::network::{
    AuthRequiredParameters, BeforeRequestSentParameters, InterceptPhase, RequestData,
    ResponseStartedParameters,
};
use crate::error::Result;
use crate::identifiers::{InterceptId, RequestId};

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
///
/// # Format
///
/// ```json
/// {
///   "type": "event",
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns the module name from the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = Event::new("network.beforeRequestSent", json!({}));
    /// assert_eq!(event.module(), "network");
    /// ```
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Reads the request id of a blocked network event without decoding
    /// the whole payload.
    ///
    /// Used to release a request whose event is otherwise malformed.
    #[must_use]
    pub fn blocked_request_id(&self) -> Option<RequestId> {
        let blocked = self
            .params
            .get("isBlocked")
            .and_then(|v| v.as_bool())
            .unwrap_or_default();
        if !blocked {
            return None;
        }

        self.params
            .get("request")
            .and_then(|v| v.get("request"))
            .and_then(|v| v.as_str())
            .map(RequestId::new)
    }
}

// ============================================================================
// EventParams
// ============================================================================

/// Typed event parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum EventParams {
    /// `network.beforeRequestSent`.
    BeforeRequestSent(BeforeRequestSentParameters),

    /// `network.responseStarted`.
    ResponseStarted(ResponseStartedParameters),

    /// `network.authRequired`.
    AuthRequired(AuthRequiredParameters),

    /// Event with no registered decoder.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

impl EventParams {
    /// Returns the interception phase, if this is a network phase event.
    #[must_use]
    pub fn phase(&self) -> Option<InterceptPhase> {
        match self {
            Self::BeforeRequestSent(_) => Some(InterceptPhase::BeforeRequestSent),
            Self::ResponseStarted(_) => Some(InterceptPhase::ResponseStarted),
            Self::AuthRequired(_) => Some(InterceptPhase::AuthRequired),
            Self::Unknown { .. } => None,
        }
    }

    /// Returns `true` if the request is paused awaiting continuation.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        match self {
            Self::BeforeRequestSent(params) => params.is_blocked,
            Self::ResponseStarted(params) | Self::AuthRequired(params) => params.is_blocked,
            Self::Unknown { .. } => false,
        }
    }

    /// Returns the intercepts blocking the request, in event order.
    #[must_use]
    pub fn intercepts(&self) -> &[InterceptId] {
        let intercepts = match self {
            Self::BeforeRequestSent(params) => params.intercepts.as_deref(),
            Self::ResponseStarted(params) | Self::AuthRequired(params) => {
                params.intercepts.as_deref()
            }
            Self::Unknown { .. } => None,
        };
        intercepts.unwrap_or_default()
    }

    /// Returns the request data, if this is a network phase event.
    #[must_use]
    pub fn request(&self) -> Option<&RequestData> {
        match self {
            Self::BeforeRequestSent(params) => Some(&params.request),
            Self::ResponseStarted(params) | Self::AuthRequired(params) => Some(&params.request),
            Self::Unknown { .. } => None,
        }
    }
}

// ============================================================================
// EventDecoders
// ============================================================================

/// Decoder for one event type.
pub type EventDecoder = fn(Value) -> Result<EventParams>;

/// Maps event names to decoders.
///
/// Populated up front; unknown names decode to [`EventParams::Unknown`].
#[derive(Debug, Clone)]
pub struct EventDecoders {
    decoders: FxHashMap<String, EventDecoder>,
}

impl EventDecoders {
    /// Creates an empty table.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self {
            decoders: FxHashMap::default(),
        }
    }

    /// Creates a table with decoders for every network interception phase.
    #[must_use]
    pub fn network() -> Self {
        let mut decoders = Self::empty();
        decoders.register(InterceptPhase::BeforeRequestSent.event_name(), |params| {
            codec::decode(params).map(EventParams::BeforeRequestSent)
        });
        decoders.register(InterceptPhase::ResponseStarted.event_name(), |params| {
            codec::decode(params).map(EventParams::ResponseStarted)
        });
        decoders.register(InterceptPhase::AuthRequired.event_name(), |params| {
            codec::decode(params).map(EventParams::AuthRequired)
        });
        decoders
    }

    /// Registers (or replaces) the decoder for `method`.
    pub fn register(&mut self, method: impl Into<String>, decoder: EventDecoder) {
        self.decoders.insert(method.into(), decoder);
    }

    /// Returns `true` if `method` has a decoder.
    #[inline]
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.decoders.contains_key(method)
    }

    /// Decodes an event's params.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Decode`] if the params do not fit the
    /// registered shape.
    pub fn decode(&self, event: &Event) -> Result<EventParams> {
        match self.decoders.get(&event.method) {
            Some(decoder) => decoder(event.params.clone()),
            None => Ok(EventParams::Unknown {
                method: event.method.clone(),
                params: event.params.clone(),
            }),
        }
    }
}

impl Default for EventDecoders {
    fn default() -> Self {
        Self::network()
    }
}

// ============================================================================
// Tests
// ============================================================================
