use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use stepwise_core::{CoreError, DomainEventHandler, InstanceEvent, InstanceId};

/// Event handler that keeps every event it receives
#[derive(Clone, Default)]
pub struct RecordingEventHandler {
    events: Arc<Mutex<Vec<InstanceEvent>>>,
}

impl RecordingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in order
    pub fn events(&self) -> Vec<InstanceEvent> {
        self.events.lock().clone()
    }

    /// Event type names received for one instance, in order
    pub fn event_types_for(&self, id: &InstanceId) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.instance_id() == id)
            .map(|e| e.event_type())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl DomainEventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: InstanceEvent) -> Result<(), CoreError> {
        tracing::trace!(event_type = event.event_type(), "Recorded event");
        self.events.lock().push(event);
        Ok(())
    }
}
