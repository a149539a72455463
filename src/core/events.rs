use crate::core::session::SubjectId;
use crate::core::state_machine::CaptureStep;
use crate::core::submission::AttemptId;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Signals for whoever drives the wider onboarding flow.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StepChanged {
        subject: SubjectId,
        from: CaptureStep,
        to: CaptureStep,
    },
    /// Emitted once per accepted submission.
    VerificationSubmitted {
        subject: SubjectId,
        attempt: AttemptId,
        submitted_at: DateTime<Utc>,
    },
    SubmissionFailed {
        subject: SubjectId,
        message: String,
    },
    /// The capture session was thrown away without submitting.
    SessionDiscarded {
        subject: SubjectId,
    },
}

/// Broadcast bus for [`PipelineEvent`]s. Publishing never blocks and is a
/// no-op when nobody is subscribed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn emit_lossy(&self, event: PipelineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for pipeline event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let subject = SubjectId::new("s1").unwrap();

        bus.emit_lossy(PipelineEvent::SessionDiscarded { subject: subject.clone() });
        assert_eq!(rx.recv().await.unwrap(), PipelineEvent::SessionDiscarded { subject });
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        EventBus::new(4).emit_lossy(PipelineEvent::SessionDiscarded {
            subject: SubjectId::new("s2").unwrap(),
        });
    }
}
