//! Scenario files describe a defect and its scripted agent pool in TOML.
//!
//! ```toml
//! name = "fd-leak"
//! max_iterations = 3
//!
//! [defect]
//! id = "BUG-1"
//! summary = "file descriptor leak in watcher"
//!
//! [[agents]]
//! name = "analyst-1"
//! role = "analyst"
//! steps = [{ decision = "root-cause:resource-leak" }]
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use repair_coordination::{AgentRegistry, DefectReference, OrchestratorConfig, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scripted::{ScriptStep, ScriptedAgent};

/// Errors from scenario loading
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Failed to read scenario {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid scenario: {0}")]
    Invalid(String),

    #[error("Invalid orchestrator section: {0}")]
    Config(#[from] repair_coordination::ConfigError),
}

/// Result type for scenario operations
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Defect under repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectSpec {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub artifact: Option<String>,
}

impl DefectSpec {
    pub fn to_reference(&self) -> DefectReference {
        let defect = DefectReference::new(&self.id, &self.summary);
        match &self.artifact {
            Some(artifact) => defect.with_artifact(artifact),
            None => defect,
        }
    }
}

/// One scripted agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: Role,
    pub steps: Vec<ScriptStep>,
}

/// A complete dry-run scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub defect: DefectSpec,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Orchestrator overrides; absent fields keep their defaults.
    #[serde(default)]
    pub orchestrator: Option<OrchestratorConfig>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

impl Scenario {
    pub fn from_toml_str(raw: &str) -> ScenarioResult<Self> {
        let scenario: Self = toml::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ScenarioResult<()> {
        if self.max_iterations == Some(0) {
            return Err(ScenarioError::Invalid(
                "max_iterations must be positive".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for agent in &self.agents {
            if !names.insert(agent.name.as_str()) {
                return Err(ScenarioError::Invalid(format!(
                    "duplicate agent name {}",
                    agent.name
                )));
            }
            if agent.steps.is_empty() {
                return Err(ScenarioError::Invalid(format!(
                    "agent {} has no steps",
                    agent.name
                )));
            }
        }
        if let Some(config) = &self.orchestrator {
            config.validate()?;
        }
        Ok(())
    }

    /// Orchestrator configuration: the scenario's section, else `base`.
    pub fn config_or(&self, base: OrchestratorConfig) -> OrchestratorConfig {
        self.orchestrator.clone().unwrap_or(base)
    }

    /// Build a registry of scripted agents, in file order.
    pub fn registry(&self) -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        for agent in &self.agents {
            registry.register(Arc::new(ScriptedAgent::new(
                &agent.name,
                agent.role,
                agent.steps.clone(),
            )));
        }
        registry
    }
}
