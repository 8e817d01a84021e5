//! Creates sessions and runs many of them concurrently.
//!
//! Sessions share the agent registry, configuration, event bus and
//! escalation sink, but never a record: each session is driven by its own
//! serialized controller.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::info;

use super::session::{ControllerResult, SessionController};
use crate::agent::AgentRegistry;
use crate::config::OrchestratorConfig;
use crate::escalation::{EscalationSink, LogEscalationSink};
use crate::events::{EventBus, RepairEvent, SharedEventBus};
use crate::session::{DefectReference, SessionRecord};

/// Shared entry point for repair sessions.
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    registry: Arc<AgentRegistry>,
    bus: SharedEventBus,
    sink: Arc<dyn EscalationSink>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, registry: AgentRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            bus: EventBus::new().shared(),
            sink: Arc::new(LogEscalationSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EscalationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    /// Open a session in WAIT. `max_iterations` falls back to the configured default.
    pub fn create_session(
        &self,
        defect: DefectReference,
        max_iterations: Option<u32>,
    ) -> ControllerResult<SessionController> {
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);
        let record = SessionRecord::create(defect, max_iterations)?;

        info!(
            session_id = %record.id(),
            defect = %record.defect().id,
            max_iterations,
            "Session created"
        );
        let _ = self.bus.publish(RepairEvent::SessionCreated {
            session_id: record.id().to_string(),
            defect_id: record.defect().id.clone(),
            max_iterations,
            timestamp: Utc::now(),
        });

        Ok(self.controller(record))
    }

    /// Continue a session restored from its JSON form.
    pub fn resume(&self, json: &str) -> ControllerResult<SessionController> {
        let record = SessionRecord::from_json(json)?;
        info!(session_id = %record.id(), state = %record.state(), "Session resumed");
        Ok(self.controller(record))
    }

    /// Create and drive one session to a terminal state.
    pub async fn run_session(
        &self,
        defect: DefectReference,
        max_iterations: Option<u32>,
    ) -> ControllerResult<SessionRecord> {
        let mut controller = self.create_session(defect, max_iterations)?;
        controller.run().await;
        Ok(controller.into_record())
    }

    /// Drive independent sessions concurrently; results keep input order.
    pub async fn run_sessions(
        &self,
        defects: Vec<(DefectReference, Option<u32>)>,
    ) -> Vec<ControllerResult<SessionRecord>> {
        join_all(
            defects
                .into_iter()
                .map(|(defect, max)| self.run_session(defect, max)),
        )
        .await
    }

    fn controller(&self, record: SessionRecord) -> SessionController {
        SessionController::new(
            record,
            self.registry.clone(),
            self.config.clone(),
            self.bus.clone(),
            self.sink.clone(),
        )
    }
}
