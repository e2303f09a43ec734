//! Streaming session management
//!
//! Watch, exec and log operations outlive the command that started them. The
//! [`SessionManager`] owns every such session, routes follow-up frames to it,
//! and tears it down on explicit close or when its connection goes away.

mod driver;
pub mod io;
pub mod manager;
pub mod state;

// Re-export key types for convenience
pub use io::{OutputStream, SessionInput, SessionIo, StreamItem, Teardown};
pub use manager::{SessionManager, SessionRequest, SessionStart};
pub use state::{ConnectionId, SessionId, SessionInfo, SessionKind, SessionState};
