use ksagent_core::config::{
    DEFAULT_EXEC_IDLE_TIMEOUT_MS, DEFAULT_OUTBOUND_BUFFER, DEFAULT_STDIN_BUFFER,
    DEFAULT_TEARDOWN_TIMEOUT_MS,
};
use ksagent_core::{RouterConfig, SessionConfig};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawKsagentConfig {
    #[serde(default)]
    pub router: RawRouterConfig,

    #[serde(default)]
    pub sessions: RawSessionsConfig,
}

/// Router config as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRouterConfig {
    /// Frames that may queue for the connection writer
    pub outbound_buffer: Option<usize>,
}

/// Session config as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSessionsConfig {
    /// Exec sessions close after this long without traffic
    pub exec_idle_timeout_ms: Option<u64>,

    /// Upper bound on stopping one session
    pub teardown_timeout_ms: Option<u64>,

    /// Pending stdin frames per exec session
    pub stdin_buffer: Option<usize>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct KsagentConfig {
    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub sessions: SessionConfig,
}

impl RawKsagentConfig {
    /// Apply defaults for every unset field
    pub fn finalize(self) -> KsagentConfig {
        KsagentConfig {
            router: RouterConfig {
                outbound_buffer: self.router.outbound_buffer.unwrap_or(DEFAULT_OUTBOUND_BUFFER),
            },
            sessions: SessionConfig {
                exec_idle_timeout_ms: self
                    .sessions
                    .exec_idle_timeout_ms
                    .unwrap_or(DEFAULT_EXEC_IDLE_TIMEOUT_MS),
                teardown_timeout_ms: self
                    .sessions
                    .teardown_timeout_ms
                    .unwrap_or(DEFAULT_TEARDOWN_TIMEOUT_MS),
                stdin_buffer: self.sessions.stdin_buffer.unwrap_or(DEFAULT_STDIN_BUFFER),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = KsagentConfig::default();
        assert_eq!(config.router.outbound_buffer, 256);
        assert_eq!(config.sessions.exec_idle_timeout_ms, 600_000);
        assert_eq!(config.sessions.teardown_timeout_ms, 2_000);
        assert_eq!(config.sessions.stdin_buffer, 64);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = KsagentConfig {
            router: RouterConfig {
                outbound_buffer: 16,
            },
            sessions: SessionConfig {
                exec_idle_timeout_ms: 30_000,
                teardown_timeout_ms: 500,
                stdin_buffer: 8,
            },
        };

        let toml_str = toml::to_string(&config).unwrap();
        let parsed: KsagentConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_raw_config_partial_parsing() {
        let toml_str = r#"
[sessions]
exec_idle_timeout_ms = 1000
"#;
        let raw: RawKsagentConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(raw.sessions.exec_idle_timeout_ms, Some(1000));
        assert!(raw.sessions.teardown_timeout_ms.is_none());
        assert!(raw.router.outbound_buffer.is_none());
    }

    #[test]
    fn test_finalize_fills_defaults() {
        let raw = RawKsagentConfig {
            router: RawRouterConfig::default(),
            sessions: RawSessionsConfig {
                stdin_buffer: Some(4),
                ..Default::default()
            },
        };

        let config = raw.finalize();

        assert_eq!(config.sessions.stdin_buffer, 4);
        assert_eq!(config.sessions.teardown_timeout_ms, DEFAULT_TEARDOWN_TIMEOUT_MS);
        assert_eq!(config.router, RouterConfig::default());
    }
}
