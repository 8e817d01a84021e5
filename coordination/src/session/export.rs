//! Read-only export of a session record for audit, plus JSON round-tripping
//! for crash recovery.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::{schema::RootSchema, schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::record::{SessionError, SessionRecord, SessionResult};
use super::types::{
    AgentReport, DefectReference, EscalationRecord, RepairState, Role, SessionId,
};

/// One line of the exported transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionEntry {
    pub timestamp: DateTime<Utc>,
    pub from_state: RepairState,
    pub to_state: RepairState,
    pub trigger_role: Role,
    pub reason: String,
}

/// The artifact a human consults after an ESCALATED outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionExport {
    pub session_id: SessionId,
    pub defect: DefectReference,
    pub max_iterations: u32,
    pub final_state: RepairState,
    pub iteration_count: u32,
    pub transitions: Vec<TransitionEntry>,
    /// Every report received, keyed by the iteration it was collected in.
    pub reports_by_iteration: BTreeMap<u32, Vec<AgentReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationRecord>,
    #[serde(default)]
    pub stale_reports_discarded: u32,
}

impl SessionExport {
    /// JSON schema describing the export shape.
    pub fn json_schema() -> RootSchema {
        schema_for!(SessionExport)
    }
}

impl SessionRecord {
    /// Build the read-only audit export.
    pub fn export(&self) -> SessionExport {
        SessionExport {
            session_id: self.id().to_string(),
            defect: self.defect().clone(),
            max_iterations: self.max_iterations(),
            final_state: self.state(),
            iteration_count: self.iteration_count(),
            transitions: self
                .history()
                .iter()
                .map(|t| TransitionEntry {
                    timestamp: t.timestamp,
                    from_state: t.from_state,
                    to_state: t.to_state,
                    trigger_role: t.trigger_role,
                    reason: t.reason.clone(),
                })
                .collect(),
            reports_by_iteration: self.reports_by_iteration(),
            escalation: self.escalation().cloned(),
            stale_reports_discarded: self.stale_reports_discarded(),
        }
    }

    /// Serialize the complete record (history, rounds, decisions).
    pub fn to_json(&self) -> SessionResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SessionError::Malformed(e.to_string()))
    }

    /// Restore a record and re-validate it by replaying every transition.
    pub fn from_json(json: &str) -> SessionResult<Self> {
        let record: SessionRecord =
            serde_json::from_str(json).map_err(|e| SessionError::Malformed(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}
