//! Realtime client core for the LinkedIn messaging backend.
//!
//! The crate is organized by concern:
//! - `auth`: web login, session renewal and logout.
//! - `stream`: realtime connection, decoding, reconnects and dispatch.
//! - `config`: tunables with production defaults.
//! - `retry`: shared retry and backoff utilities.
//! - `urn`: LinkedIn entity identifiers.

/// Authentication and session management.
pub mod auth;
/// Client tunables.
pub mod config;
/// Retry and backoff helpers used across the crate.
pub mod retry;
/// Realtime stream client, protocol types, and dispatch.
pub mod stream;
/// Entity urn parsing.
pub mod urn;

pub use auth::{AuthError, Credentials, Session, SessionManager, VoyagerSessionManager};
pub use config::{RealtimeDefaults, RealtimeOptions};
pub use stream::client::{ClientBuildError, RealtimeClient};
pub use stream::controller::{ConnectionState, FatalAuthError, NoticeSink, StreamNotice};
pub use stream::dispatch::{HandlerResult, SubscriptionHandle};
pub use stream::event::{Event, EventKind};
pub use urn::Urn;
