//! Command definitions organized by module.
//!
//! Commands follow the `module.methodName` format and encode as
//! `{"method": ..., "params": {...}}`.
//!
//! # Command Modules
//!
//! | Module | Commands |
//! |--------|----------|
//! | `session` | `subscribe`, `unsubscribe` |
//! | `network` | `addIntercept`, `continueRequest`, `continueResponse`, `continueWithAuth`, `removeIntercept` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use super::network::{
    AddInterceptParameters, ContinueRequestParameters, ContinueResponseParameters,
    ContinueWithAuthParameters, RemoveInterceptParameters,
};
use crate::identifiers::InterceptId;

// ============================================================================
// Command Wrapper
// ============================================================================

/// All protocol commands organized by module.
///
/// This enum wraps module-specific command enums for unified serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// Session module commands.
    Session(SessionCommand),
    /// Network module commands.
    Network(NetworkCommand),
}

impl Command {
    /// Returns the wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Session(command) => command.method(),
            Self::Network(command) => command.method(),
        }
    }
}

impl From<SessionCommand> for Command {
    fn from(command: SessionCommand) -> Self {
        Self::Session(command)
    }
}

impl From<NetworkCommand> for Command {
    fn from(command: NetworkCommand) -> Self {
        Self::Network(command)
    }
}

// ============================================================================
// Session Commands
// ============================================================================

/// Event names for `session.subscribe` / `session.unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParameters {
    /// Event names.
    pub events: Vec<String>,
    /// Restrict to these browsing contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contexts: Option<Vec<String>>,
}

/// Session module commands for event subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum SessionCommand {
    /// Subscribe to events.
    #[serde(rename = "session.subscribe")]
    Subscribe(SubscriptionParameters),

    /// Unsubscribe from events.
    #[serde(rename = "session.unsubscribe")]
    Unsubscribe(SubscriptionParameters),
}

impl SessionCommand {
    /// Subscribes to a single event in every context.
    #[inline]
    #[must_use]
    pub fn subscribe(event: impl Into<String>) -> Self {
        Self::Subscribe(SubscriptionParameters {
            events: vec![event.into()],
            contexts: None,
        })
    }

    /// Unsubscribes from a single event in every context.
    #[inline]
    #[must_use]
    pub fn unsubscribe(event: impl Into<String>) -> Self {
        Self::Unsubscribe(SubscriptionParameters {
            events: vec![event.into()],
            contexts: None,
        })
    }

    /// Returns the wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "session.subscribe",
            Self::Unsubscribe(_) => "session.unsubscribe",
        }
    }
}

// ============================================================================
// Network Commands
// ============================================================================

/// Network module commands for request interception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum NetworkCommand {
    /// Register an intercept.
    #[serde(rename = "network.addIntercept")]
    AddIntercept(AddInterceptParameters),

    /// Resume a request blocked in `beforeRequestSent`.
    #[serde(rename = "network.continueRequest")]
    ContinueRequest(ContinueRequestParameters),

    /// Resume a request blocked in `responseStarted`.
    #[serde(rename = "network.continueResponse")]
    ContinueResponse(ContinueResponseParameters),

    /// Resume a request blocked in `authRequired`.
    #[serde(rename = "network.continueWithAuth")]
    ContinueWithAuth(ContinueWithAuthParameters),

    /// Remove an intercept.
    #[serde(rename = "network.removeIntercept")]
    RemoveIntercept(RemoveInterceptParameters),
}

impl NetworkCommand {
    /// Creates a `network.removeIntercept` command.
    #[inline]
    #[must_use]
    pub fn remove_intercept(intercept: InterceptId) -> Self {
        Self::RemoveIntercept(RemoveInterceptParameters { intercept })
    }

    /// Returns the wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::AddIntercept(_) => "network.addIntercept",
            Self::ContinueRequest(_) => "network.continueRequest",
            Self::ContinueResponse(_) => "network.continueResponse",
            Self::ContinueWithAuth(_) => "network.continueWithAuth",
            Self::RemoveIntercept(_) => "network.removeIntercept",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
