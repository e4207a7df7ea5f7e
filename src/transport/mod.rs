//! Command/event transport.
//!
//! The interception layer only depends on the [`Channel`] trait. This
//! module also ships the WebSocket implementation used against a real
//! remote end.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Network (Rust) │                              │  Remote end     │
//! │                 │         WebSocket            │  (browser)      │
//! │  Connection     │◄────────────────────────────►│                 │
//! │  EventRouter    │     ws://host:port/session   │  BiDi server    │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::connect` - WebSocket handshake
//! 2. `Channel::execute` / `Channel::listen` - commands and events
//! 3. `Connection::shutdown` - close the socket and fail pending work
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | `Channel` trait, listeners and event routing |
//! | `connection` | WebSocket connection and event loop |
//! | `options` | Timeouts and limits |

// ============================================================================
// Submodules
// ============================================================================

/// Channel trait and event routing.
pub mod channel;

/// WebSocket connection and event loop.
pub mod connection;

/// Connection configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{Channel, EventItem, EventListener, EventRouter};
pub use connection::Connection;
pub use options::ConnectionOptions;
