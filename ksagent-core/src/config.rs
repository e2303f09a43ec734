//! Router and session tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity of a connection's outbound frame queue
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
/// Default exec idle timeout (10 minutes)
pub const DEFAULT_EXEC_IDLE_TIMEOUT_MS: u64 = 600_000;
/// Default time allowed for one session to stop before it is aborted
pub const DEFAULT_TEARDOWN_TIMEOUT_MS: u64 = 2_000;
/// Default number of pending stdin frames per exec session
pub const DEFAULT_STDIN_BUFFER: usize = 64;

/// Connection-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Frames that may wait for the connection writer
    pub outbound_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Streaming session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Exec sessions close after this long without stdin or output
    pub exec_idle_timeout_ms: u64,
    /// Upper bound on stopping one session during close or connection loss
    pub teardown_timeout_ms: u64,
    /// Stdin frames buffered per exec session
    pub stdin_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exec_idle_timeout_ms: DEFAULT_EXEC_IDLE_TIMEOUT_MS,
            teardown_timeout_ms: DEFAULT_TEARDOWN_TIMEOUT_MS,
            stdin_buffer: DEFAULT_STDIN_BUFFER,
        }
    }
}

impl SessionConfig {
    /// Idle timeout applied to exec sessions; never zero
    pub fn exec_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_idle_timeout_ms.max(1))
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let router = RouterConfig::default();
        let sessions = SessionConfig::default();
        assert_eq!(router.outbound_buffer, DEFAULT_OUTBOUND_BUFFER);
        assert_eq!(sessions.exec_idle_timeout(), Duration::from_secs(600));
        assert_eq!(sessions.teardown_timeout(), Duration::from_secs(2));
        assert_eq!(sessions.stdin_buffer, DEFAULT_STDIN_BUFFER);
    }

    #[test]
    fn zero_idle_timeout_is_clamped() {
        let sessions = SessionConfig {
            exec_idle_timeout_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(sessions.exec_idle_timeout(), Duration::from_millis(1));
    }
}
