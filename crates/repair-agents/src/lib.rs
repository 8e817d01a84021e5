//! Scripted repair agents and TOML scenarios for dry-running the
//! coordination layer without real models behind the roles.

pub mod scenario;
pub mod scripted;

pub use scenario::{AgentSpec, DefectSpec, Scenario, ScenarioError, ScenarioResult};
pub use scripted::{ScriptStep, ScriptedAgent};
