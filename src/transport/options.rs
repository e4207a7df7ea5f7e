//! Connection configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bidi_network::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_max_pending(32);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default ceiling on commands awaiting a reply.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tunables for a [`Connection`](super::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Maximum time to wait for a command reply.
    pub command_timeout: Duration,

    /// Maximum time to wait for the WebSocket handshake.
    pub connect_timeout: Duration,

    /// Commands awaiting a reply before new ones are rejected.
    pub max_pending: usize,
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the command reply timeout.
    #[inline]
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pending command ceiling.
    #[inline]
    #[must_use]
    pub const fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.command_timeout.as_secs(), 30);
        assert_eq!(options.connect_timeout.as_secs(), 30);
        assert_eq!(options.max_pending, 100);
    }

    #[test]
    fn test_builder_chain() {
        let options = ConnectionOptions::new()
            .with_command_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(2))
            .with_max_pending(4);

        assert_eq!(options.command_timeout, Duration::from_millis(250));
        assert_eq!(options.connect_timeout, Duration::from_secs(2));
        assert_eq!(options.max_pending, 4);
    }
}
