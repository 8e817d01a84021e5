//! Orchestrator configuration
//!
//! Defaults come from the environment (`REPAIR_*`), then an optional TOML
//! file overrides individual fields. Every loader validates before returning.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arbiter::ArbiterConfig;
use crate::session::{Role, DEFAULT_MAX_ITERATIONS};

/// Errors from configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Per-role response windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTimeouts {
    pub coordinator_secs: u64,
    pub analyst_secs: u64,
    pub patcher_secs: u64,
    pub verifier_secs: u64,
}

impl Default for RoleTimeouts {
    fn default() -> Self {
        Self {
            coordinator_secs: 60,
            analyst_secs: 300,
            patcher_secs: 600,
            verifier_secs: 900,
        }
    }
}

impl RoleTimeouts {
    pub fn for_role(&self, role: Role) -> Duration {
        let secs = match role {
            Role::Coordinator => self.coordinator_secs,
            Role::Analyst => self.analyst_secs,
            Role::Patcher => self.patcher_secs,
            Role::Verifier => self.verifier_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Default ceiling for sessions that do not set their own.
    pub max_iterations: u32,
    pub arbiter: ArbiterConfig,
    /// Consecutive deadlocked rounds before escalating (0 disables).
    pub deadlock_escalation_threshold: u32,
    /// Allow WAIT → VERIFY re-verification of an unrejected patch.
    pub allow_cached_verify: bool,
    pub timeouts: RoleTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let mut arbiter = ArbiterConfig::default();
        if let Some(threshold) = env_parse("REPAIR_AGREEMENT_THRESHOLD") {
            arbiter.agreement_threshold = threshold;
        }
        Self {
            max_iterations: env_parse("REPAIR_MAX_ITERATIONS").unwrap_or(DEFAULT_MAX_ITERATIONS),
            arbiter,
            deadlock_escalation_threshold: 3,
            allow_cached_verify: true,
            timeouts: RoleTimeouts::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl OrchestratorConfig {
    /// Parse a TOML document; missing fields keep their defaults.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_iterations must be positive".to_string(),
            ));
        }
        let threshold = self.arbiter.agreement_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "arbiter.agreement_threshold {} outside (0, 1]",
                threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.arbiter.quorum) {
            return Err(ConfigError::Invalid(format!(
                "arbiter.quorum {} outside [0, 1]",
                self.arbiter.quorum
            )));
        }
        for role in Role::ALL {
            if self.timeouts.for_role(role).is_zero() {
                return Err(ConfigError::Invalid(format!("{} timeout is zero", role)));
            }
        }
        Ok(())
    }
}
