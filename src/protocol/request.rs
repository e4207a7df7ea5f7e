//! Command and reply frames.
//!
//! Defines the envelope for commands sent by the local end and the replies
//! returned by the remote end.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::CommandId;

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// Outgoing command frame.
///
/// # Format
///
/// ```json
/// {
///   "id": 1,
///   "method": "module.methodName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Echoed back in the matching [`Response`].
    pub id: CommandId,

    /// Flattened into `method` and `params`.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Wraps `command` with the next process-wide id.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            id: CommandId::next(),
            command,
        }
    }

    /// Wraps `command` with a caller-chosen id.
    #[inline]
    #[must_use]
    pub fn with_id(id: CommandId, command: Command) -> Self {
        Self { id, command }
    }
}

// ============================================================================
// Response
// ============================================================================

/// Reply frame for a single command.
///
/// # Format
///
/// Success:
/// ```json
/// {
///   "type": "success",
///   "id": 1,
///   "result": { ... }
/// }
/// ```
///
/// Error:
/// ```json
/// {
///   "type": "error",
///   "id": 1,
///   "error": "invalid argument",
///   "message": "error message"
/// }
/// ```
///
/// `id` is `null` when the remote end could not parse the command at all.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the command `id`.
    #[serde(default)]
    pub id: Option<CommandId>,

    /// Response type.
    #[serde(rename = "type")]
    pub response_type: ResponseType,

    /// Present on success.
    #[serde(default)]
    pub result: Option<Value>,

    /// Present on failure.
    #[serde(default)]
    pub error: Option<String>,

    /// Present on failure.
    #[serde(default)]
    pub message: Option<String>,
}

impl Response {
    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.response_type == ResponseType::Success
    }

    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Consumes the reply, yielding `result` on success.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the response was an error.
    pub fn into_result(self) -> Result<Value> {
        match self.response_type {
            ResponseType::Success => Ok(self.result.unwrap_or(Value::Null)),
            ResponseType::Error => {
                let code = self.error.unwrap_or_else(|| "unknown error".to_string());
                let message = self.message.unwrap_or_else(|| code.clone());
                Err(Error::protocol(code, message))
            }
        }
    }
}

// ============================================================================
// ResponseType
// ============================================================================

/// Response type discriminator.
///
/// Events carry `"type": "event"` and therefore never parse as a
/// [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Successful response.
    Success,
    /// Error response.
    Error,
}

// ============================================================================
// Tests
// ============================================================================
