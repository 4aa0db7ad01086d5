/// Workflow definition catalog
pub mod catalog;

/// Instance registry over the durable log
pub mod registry;

/// Event correlation
pub mod correlator;

/// Step execution engine
pub mod engine;

/// Batch creation
pub mod batch;

/// Runtime facade
pub mod runtime_interface;

use crate::domain::events::{DomainEventHandler, InstanceEvent};

/// Hand an event to the handler; handler failures are logged, never propagated
pub(crate) async fn publish(handler: &dyn DomainEventHandler, event: InstanceEvent) {
    let event_type = event.event_type();
    if let Err(e) = handler.handle_event(event).await {
        tracing::warn!(event_type, error = %e, "Event handler failed");
    }
}
