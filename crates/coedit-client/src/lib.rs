//! coedit-client library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the client components, allowing
//! integration tests to access internal types.

pub mod ai;
pub mod connection;
pub mod persistence;
pub mod session;

// Re-export key types for convenience
pub use ai::HttpAssistant;
pub use connection::{
    collaboration_url, reconnect_delay, ws_base_from_http, ConnectionEvent, ConnectionManager,
    SessionIdentity, TransportError, MAX_RECONNECT_ATTEMPTS,
};
pub use persistence::HttpStore;
pub use session::{DocumentSession, SessionCommand, SessionConfig};
