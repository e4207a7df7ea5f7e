//! BiDi network interception - pause, edit and resume browser requests.
//!
//! This library implements the client side of WebDriver BiDi network
//! interception over a single duplex connection.
//!
//! # Architecture
//!
//! The layer follows a client-server model:
//!
//! - **Local End (Rust)**: Registers intercepts, runs handlers, resumes requests
//! - **Remote End (Browser)**: Pauses matching requests, emits events
//!
//! Key design principles:
//!
//! - One remote intercept per registration call
//! - One remote subscription and one dispatcher task per active phase
//! - Subscriptions live exactly as long as their last intercept
//! - A paused request is always resumed, even when a handler fails
//!
//! # Quick Start
//!
//! ```no_run
//! use bidi_network::{ConnectionOptions, Error, Network, Result, UrlPattern};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let url = "ws://127.0.0.1:9222/session";
//!
//!     Network::connect(url, ConnectionOptions::new(), |network| async move {
//!         // Send every request for /old to /new instead
//!         network
//!             .add_request_handler(
//!                 |req| Ok(req.with_url("https://example.com/new")),
//!                 Some(vec![UrlPattern::string("https://example.com/old")]),
//!             )
//!             .await?;
//!
//!         // Drive the browser here; intercepts are removed on exit
//!         Ok::<_, Error>(())
//!     })
//!     .await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`network`] | Interception session, registry, dispatcher |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Channel trait and WebSocket connection |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Network request interception.
///
/// Start with [`Network`].
pub mod network;

/// Wire message types.
///
/// Commands, responses, events and the network data model.
pub mod protocol;

/// Command/event transport.
///
/// The [`Channel`] seam and its WebSocket implementation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CommandId, InterceptId, RequestId};

// Network types
pub use network::{CapturedRequest, Handler, InterceptFailure, Network};

// Protocol types
pub use protocol::{AuthCredentials, BytesValue, Header, InterceptPhase, UrlPattern};

// Transport types
pub use transport::{Channel, Connection, ConnectionOptions, EventListener};
