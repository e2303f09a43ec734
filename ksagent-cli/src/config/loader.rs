use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::types::{KsagentConfig, RawKsagentConfig, RawRouterConfig, RawSessionsConfig};

/// Environment variable that relocates the project config directory
pub const PROJECT_CONFIG_DIR_ENV: &str = "KSAGENT_PROJECT_CONFIG_DIR";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<KsagentConfig> {
        let mut raw = RawKsagentConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        Ok(raw.finalize())
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ksagent").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with KSAGENT_PROJECT_CONFIG_DIR
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var(PROJECT_CONFIG_DIR_ENV) {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".ksagent/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawKsagentConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawKsagentConfig, overlay: RawKsagentConfig) -> RawKsagentConfig {
        RawKsagentConfig {
            router: RawRouterConfig {
                outbound_buffer: overlay.router.outbound_buffer.or(base.router.outbound_buffer),
            },
            sessions: RawSessionsConfig {
                exec_idle_timeout_ms: overlay
                    .sessions
                    .exec_idle_timeout_ms
                    .or(base.sessions.exec_idle_timeout_ms),
                teardown_timeout_ms: overlay
                    .sessions
                    .teardown_timeout_ms
                    .or(base.sessions.teardown_timeout_ms),
                stdin_buffer: overlay.sessions.stdin_buffer.or(base.sessions.stdin_buffer),
            },
        }
    }

    /// Load one config file with defaults applied (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<KsagentConfig> {
        if path.exists() {
            Ok(Self::read_raw(path)?.finalize())
        } else {
            Ok(KsagentConfig::default())
        }
    }
}
