//! BiDi wire format.
//!
//! Three frame kinds cross the socket:
//!
//! | Frame | Sent by | Carries |
//! |-------|---------|---------|
//! | `Request` | client | one command with an id |
//! | `Response` | browser | the result or error for that id |
//! | `Event` | browser | an unsolicited notification |
//!
//! # Method names
//!
//! Methods are `module.methodName`, for example:
//!
//! - `session.subscribe`
//! - `network.addIntercept`
//! - `network.continueRequest`
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `codec` | Typed value ↔ wire value conversion |
//! | `command` | Outgoing commands, grouped by BiDi module |
//! | `event` | Event frame and decoder table |
//! | `network` | `network.*` parameter and data types |
//! | `request` | Command and reply frames |

// ============================================================================
// Submodules
// ============================================================================

/// Typed value ↔ wire value conversion.
pub mod codec;

/// Outgoing commands.
pub mod command;

/// Incoming notifications.
pub mod event;

/// Network module data types.
pub mod network;

/// Command and reply frames.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, NetworkCommand, SessionCommand, SubscriptionParameters};
pub use event::{Event, EventDecoder, EventDecoders, EventParams};
pub use network::{
    AddInterceptParameters, AddInterceptResult, AuthAction, AuthChallenge, AuthCredentials,
    AuthRequiredParameters, BeforeRequestSentParameters, BytesValue, ContinueRequestParameters,
    ContinueResponseParameters, ContinueWithAuthParameters, Cookie, CookieHeader,
    FetchTimingInfo, Header, Initiator, InitiatorType, InterceptPhase, RemoveInterceptParameters,
    RequestData, ResponseData, ResponseStartedParameters, SameSite, UrlPattern,
};
pub use request::{Request, Response, ResponseType};
