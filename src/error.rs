//! Error types for the BiDi network layer.
//!
//! Every fallible call returns [`Result<T>`]. Callers that treat an
//! already-removed intercept as success can match on the variant:
//!
//! ```ignore
//! use bidi_network::{Error, Result};
//!
//! async fn example(network: &Network) -> Result<()> {
//!     match network.remove_intercept(&id).await {
//!         Err(Error::InterceptNotFound { .. }) => {}
//!         other => other?,
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Where errors come from
//!
//! | Source | Variants |
//! |--------|----------|
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::RequestTimeout`], [`Error::WebSocket`], [`Error::ChannelClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Decode`], [`Error::Json`] |
//! | Interception | [`Error::InterceptNotFound`], [`Error::Handler`] |
//! | Local | [`Error::InvalidArgument`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CommandId, InterceptId};

// ============================================================================
// Result Alias
// ============================================================================

/// Shorthand for results carrying [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Everything that can go wrong while intercepting requests.
///
/// Variants are grouped by where the failure came from: the channel, the
/// remote end, or the caller.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Could not open or write to the socket.
    ///
    /// Returned when the connection cannot be established or a frame
    /// cannot be written.
    #[error("Connection failed: {message}")]
    Connection {
        /// What went wrong.
        message: String,
    },

    /// Timeout while opening the connection.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while an operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Command reply not received in time.
    #[error("Command {command_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The command that timed out.
        command_id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Remote end rejected a command.
    ///
    /// The reply was well-formed but carried an error, e.g. adding an
    /// intercept with an invalid URL pattern.
    #[error("Protocol error ({code}): {message}")]
    Protocol {
        /// Error code reported by the remote end (e.g. `invalid argument`).
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// A wire value did not match the requested shape.
    #[error("Failed to decode {target}: {message}")]
    Decode {
        /// Name of the target shape.
        target: String,
        /// Underlying decode failure.
        message: String,
    },

    // ========================================================================
    // Interception Errors
    // ========================================================================
    /// No local rule carries this intercept id.
    ///
    /// Returned when the intercept ID is not registered locally.
    #[error("Intercept not found: {intercept_id}")]
    InterceptNotFound {
        /// The id the caller passed.
        intercept_id: InterceptId,
    },

    /// A request handler failed.
    #[error("Handler failed: {message}")]
    Handler {
        /// Failure reported by the handler.
        message: String,
    },

    // ========================================================================
    // Local Errors
    // ========================================================================
    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Which argument and why.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// A frame could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// A reply slot was dropped before it was filled.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// [`Error::Connection`] with `message`.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// [`Error::ConnectionTimeout`] after `timeout_ms`.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// [`Error::RequestTimeout`] for `command_id`.
    #[inline]
    pub fn request_timeout(command_id: CommandId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            command_id,
            timeout_ms,
        }
    }

    /// [`Error::Protocol`] from a remote error reply.
    #[inline]
    pub fn protocol(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// [`Error::InterceptNotFound`] for `intercept_id`.
    #[inline]
    pub fn intercept_not_found(intercept_id: InterceptId) -> Self {
        Self::InterceptNotFound { intercept_id }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// [`Error::InvalidArgument`] with `message`.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` for connect and command timeouts.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if the channel itself failed.
    ///
    /// Transport errors end the dispatcher task that observed them.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::RequestTimeout { .. }
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if the remote end rejected a command or sent
    /// something we could not decode.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::Decode { .. } | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
