//! Where ESCALATED sessions are handed to humans.

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::session::EscalationRecord;

/// Error type for escalation delivery
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Escalation receiver dropped")]
    Closed,

    #[error("Escalation delivery failed: {0}")]
    Delivery(String),
}

/// Receives escalation records exactly once per escalated session.
///
/// Delivery failure is logged by the caller and never affects the session
/// record, which is already terminal when the sink is notified.
#[async_trait]
pub trait EscalationSink: Send + Sync {
    async fn notify(&self, record: &EscalationRecord) -> Result<(), SinkError>;
}

/// Forwards escalations to a Tokio channel.
///
/// Never waits for room: a full channel is a delivery failure.
#[derive(Debug, Clone)]
pub struct ChannelEscalationSink {
    sender: mpsc::Sender<EscalationRecord>,
}

impl ChannelEscalationSink {
    pub fn new(sender: mpsc::Sender<EscalationRecord>) -> Self {
        Self { sender }
    }

    /// Sink plus the receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EscalationRecord>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl EscalationSink for ChannelEscalationSink {
    async fn notify(&self, record: &EscalationRecord) -> Result<(), SinkError> {
        self.sender.try_send(record.clone()).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Delivery(format!(
                "escalation channel full, dropped record for {}",
                record.session_id
            )),
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Logs escalations at WARN. The default when nothing else is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEscalationSink;

#[async_trait]
impl EscalationSink for LogEscalationSink {
    async fn notify(&self, record: &EscalationRecord) -> Result<(), SinkError> {
        warn!(
            session_id = %record.session_id,
            reason = %record.reason,
            iteration = record.iteration_at_escalation,
            from = %record.escalated_from,
            detail = %record.detail,
            "Session escalated to human"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EscalationReason, RepairState};
    use chrono::Utc;

    fn record() -> EscalationRecord {
        EscalationRecord {
            session_id: "s-1".to_string(),
            reason: EscalationReason::ArbitrationDeadlock,
            iteration_at_escalation: 3,
            escalated_from: RepairState::Analyze,
            detail: "3 consecutive deadlocks".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelEscalationSink::channel(4);
        sink.notify(&record()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.reason, EscalationReason::ArbitrationDeadlock);
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelEscalationSink::channel(1);
        drop(rx);
        assert!(matches!(
            sink.notify(&record()).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_channel_sink_full_does_not_wait() {
        let (sink, mut rx) = ChannelEscalationSink::channel(1);
        sink.notify(&record()).await.unwrap();
        assert!(matches!(
            sink.notify(&record()).await,
            Err(SinkError::Delivery(_))
        ));
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_log_sink_accepts() {
        assert!(LogEscalationSink.notify(&record()).await.is_ok());
    }
}
