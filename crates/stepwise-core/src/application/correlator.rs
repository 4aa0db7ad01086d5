//! Event correlation between senders and suspended wait steps
//!
//! Each instance has a mailbox holding at most one posted waiter. Both
//! [`EventCorrelator::send`] and [`EventCorrelator::register_wait`] hold the
//! mailbox lock while they touch the registry, so an event can never slip
//! between "no waiter yet" and "waiter posted".

use super::publish;
use super::registry::InstanceRegistry;
use crate::domain::events::{DomainEventHandler, InstanceEvent};
use crate::domain::instance::{BufferedEvent, InstanceId, StepId};
use crate::domain::log::LogRecord;
use crate::{CoreError, Payload};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// What happened to a sent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    /// Handed to a suspended wait step and recorded as its output
    Delivered,
    /// Stored until a matching wait step runs
    Buffered,
    /// Instance is already terminal
    Dropped,
}

/// Outcome of posting a wait
#[derive(Debug)]
pub enum WaitRegistration {
    /// A buffered event satisfied the wait; its payload is already recorded
    Ready(Payload),
    /// Suspended; the receiver fires once a matching event is recorded
    Pending(oneshot::Receiver<Payload>),
}

struct Waiter {
    index: usize,
    step: StepId,
    event_type: String,
    tx: oneshot::Sender<Payload>,
}

type Mailbox = Arc<Mutex<Option<Waiter>>>;

/// Routes externally sent events to waiting instances
pub struct EventCorrelator {
    registry: Arc<InstanceRegistry>,
    handler: Arc<dyn DomainEventHandler>,
    mailboxes: DashMap<InstanceId, Mailbox>,
}

impl EventCorrelator {
    pub fn new(registry: Arc<InstanceRegistry>, handler: Arc<dyn DomainEventHandler>) -> Self {
        Self {
            registry,
            handler,
            mailboxes: DashMap::with_capacity(64),
        }
    }

    fn mailbox(&self, id: &InstanceId) -> Mailbox {
        self.mailboxes.entry(id.clone()).or_default().clone()
    }

    /// Deliver an event to an instance
    pub async fn send(
        &self,
        id: &InstanceId,
        event_type: &str,
        payload: Payload,
    ) -> Result<SendOutcome, CoreError> {
        // Unknown ids fail before a mailbox is allocated for them
        self.registry.get(id).await?;

        let mailbox = self.mailbox(id);
        let mut slot = mailbox.lock().await;
        let instance = self.registry.get(id).await?;

        if instance.status.is_terminal() {
            drop(slot);
            publish(
                self.handler.as_ref(),
                InstanceEvent::EventDropped {
                    instance_id: id.clone(),
                    event_type: event_type.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await;
            return Ok(SendOutcome::Dropped);
        }

        let matches_waiter = slot.as_ref().is_some_and(|w| {
            w.event_type == event_type && w.index == instance.next_step_index()
        });

        if matches_waiter {
            if let Some(waiter) = slot.take() {
                let record = LogRecord::step_completed(
                    waiter.index,
                    waiter.step.clone(),
                    payload.clone(),
                    None,
                );
                if let Err(e) = self.registry.record(id, record).await {
                    *slot = Some(waiter);
                    return Err(e);
                }

                let step = waiter.step.clone();
                if waiter.tx.send(payload).is_err() {
                    tracing::debug!(
                        instance_id = %id,
                        step = %step,
                        "Waiter went away after delivery was recorded"
                    );
                }
                drop(slot);

                tracing::info!(instance_id = %id, step = %step, event_type, "Delivered event");
                publish(
                    self.handler.as_ref(),
                    InstanceEvent::Resumed {
                        instance_id: id.clone(),
                        step,
                        event_type: event_type.to_string(),
                        timestamp: Utc::now(),
                    },
                )
                .await;
                return Ok(SendOutcome::Delivered);
            }
        }

        let record = LogRecord::EventBuffered {
            event: BufferedEvent::new(event_type, payload),
        };
        let outcome = match self.registry.record(id, record).await {
            Ok(_) => SendOutcome::Buffered,
            // Reached a terminal state after the check above
            Err(CoreError::InvalidStateTransition { .. }) => SendOutcome::Dropped,
            Err(e) => return Err(e),
        };
        drop(slot);

        let event = match outcome {
            SendOutcome::Buffered => {
                tracing::debug!(instance_id = %id, event_type, "Buffered event");
                InstanceEvent::EventBuffered {
                    instance_id: id.clone(),
                    event_type: event_type.to_string(),
                    timestamp: Utc::now(),
                }
            }
            _ => InstanceEvent::EventDropped {
                instance_id: id.clone(),
                event_type: event_type.to_string(),
                timestamp: Utc::now(),
            },
        };
        publish(self.handler.as_ref(), event).await;

        Ok(outcome)
    }

    /// Post a wait for the step at `index`
    ///
    /// Consumes the oldest buffered event of the same type if there is one.
    pub async fn register_wait(
        &self,
        id: &InstanceId,
        index: usize,
        step: &StepId,
        event_type: &str,
    ) -> Result<WaitRegistration, CoreError> {
        let mailbox = self.mailbox(id);
        let mut slot = mailbox.lock().await;
        let instance = self.registry.get(id).await?;

        if let Some(buffered) = instance.find_buffered(event_type).cloned() {
            let record = LogRecord::step_completed(
                index,
                step.clone(),
                buffered.payload.clone(),
                Some(buffered.id),
            );
            self.registry.record(id, record).await?;
            tracing::debug!(instance_id = %id, step = %step, event_type, "Consumed buffered event");
            return Ok(WaitRegistration::Ready(buffered.payload));
        }

        let (tx, rx) = oneshot::channel();
        *slot = Some(Waiter {
            index,
            step: step.clone(),
            event_type: event_type.to_string(),
            tx,
        });
        drop(slot);

        tracing::debug!(instance_id = %id, step = %step, event_type, "Suspended awaiting event");
        publish(
            self.handler.as_ref(),
            InstanceEvent::Suspended {
                instance_id: id.clone(),
                step: step.clone(),
                event_type: event_type.to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;

        Ok(WaitRegistration::Pending(rx))
    }

    /// Withdraw the waiter for `index`
    ///
    /// Returns false if there was none, meaning a delivery already won.
    pub async fn cancel_wait(&self, id: &InstanceId, index: usize) -> bool {
        let mailbox = self.mailbox(id);
        let mut slot = mailbox.lock().await;
        match slot.as_ref() {
            Some(waiter) if waiter.index == index => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a wait is currently posted for the instance
    pub async fn is_waiting(&self, id: &InstanceId) -> bool {
        match self.mailboxes.get(id).map(|m| m.value().clone()) {
            Some(mailbox) => mailbox.lock().await.is_some(),
            None => false,
        }
    }

    /// Drop the mailbox of an instance that will never wait again
    pub fn forget(&self, id: &InstanceId) {
        self.mailboxes.remove(id);
    }

    /// Drop every mailbox
    pub fn clear(&self) {
        self.mailboxes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::TracingEventHandler;
    use crate::domain::instance::{InstanceStatus, WorkflowName};
    use crate::domain::repository::memory::MemoryDurableLog;
    use serde_json::json;

    async fn setup(name: &str) -> (Arc<InstanceRegistry>, EventCorrelator, InstanceId) {
        let registry = Arc::new(InstanceRegistry::new(Arc::new(MemoryDurableLog::new())));
        let correlator = EventCorrelator::new(registry.clone(), Arc::new(TracingEventHandler));
        let id = InstanceId::parse(name).unwrap();
        registry
            .create(Some(id.clone()), WorkflowName::from("demo-events"), Payload::null())
            .await
            .unwrap();
        (registry, correlator, id)
    }

    #[tokio::test]
    async fn test_send_to_posted_waiter_delivers() {
        let (registry, correlator, id) = setup("deliver").await;
        let step = StepId::from("wait");

        let rx = match correlator.register_wait(&id, 0, &step, "event").await.unwrap() {
            WaitRegistration::Pending(rx) => rx,
            WaitRegistration::Ready(_) => panic!("nothing was buffered"),
        };
        assert!(correlator.is_waiting(&id).await);

        let outcome = correlator
            .send(&id, "event", Payload::new(json!({"event": true})))
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(rx.await.unwrap(), Payload::new(json!({"event": true})));

        let instance = registry.get(&id).await.unwrap();
        assert_eq!(instance.step_outputs.len(), 1);
        assert!(instance.pending_events.is_empty());
        assert!(!correlator.is_waiting(&id).await);
    }

    #[tokio::test]
    async fn test_event_before_wait_is_buffered_then_consumed() {
        let (registry, correlator, id) = setup("early").await;

        let outcome = correlator
            .send(&id, "event", Payload::from("early bird"))
            .await
            .unwrap();
        assert_eq!(outcome, SendOutcome::Buffered);
        assert_eq!(registry.get(&id).await.unwrap().pending_events.len(), 1);

        let registration = correlator
            .register_wait(&id, 0, &StepId::from("wait"), "event")
            .await
            .unwrap();
        match registration {
            WaitRegistration::Ready(payload) => assert_eq!(payload, Payload::from("early bird")),
            WaitRegistration::Pending(_) => panic!("buffered event should satisfy the wait"),
        }

        let instance = registry.get(&id).await.unwrap();
        assert!(instance.pending_events.is_empty());
        assert_eq!(instance.step_outputs[0].output, Payload::from("early bird"));
    }

    #[tokio::test]
    async fn test_mismatched_type_is_buffered() {
        let (_, correlator, id) = setup("mismatch").await;
        let _rx = correlator
            .register_wait(&id, 0, &StepId::from("wait"), "approval")
            .await
            .unwrap();

        let outcome = correlator.send(&id, "other", Payload::null()).await.unwrap();
        assert_eq!(outcome, SendOutcome::Buffered);
        assert!(correlator.is_waiting(&id).await);
    }

    #[tokio::test]
    async fn test_second_send_is_buffered() {
        let (_, correlator, id) = setup("twice").await;
        let _rx = correlator
            .register_wait(&id, 0, &StepId::from("wait"), "event")
            .await
            .unwrap();

        assert_eq!(
            correlator.send(&id, "event", Payload::from("1")).await.unwrap(),
            SendOutcome::Delivered
        );
        assert_eq!(
            correlator.send(&id, "event", Payload::from("2")).await.unwrap(),
            SendOutcome::Buffered
        );
    }

    #[tokio::test]
    async fn test_terminal_and_unknown_instances() {
        let (registry, correlator, id) = setup("finished").await;
        registry
            .record(&id, LogRecord::completed(Payload::null()))
            .await
            .unwrap();

        assert_eq!(
            correlator.send(&id, "event", Payload::null()).await.unwrap(),
            SendOutcome::Dropped
        );
        assert_eq!(registry.get(&id).await.unwrap().status, InstanceStatus::Complete);

        let err = correlator
            .send(&InstanceId::parse("nobody").unwrap(), "event", Payload::null())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancel_wait() {
        let (_, correlator, id) = setup("cancel").await;
        let _rx = correlator
            .register_wait(&id, 0, &StepId::from("wait"), "event")
            .await
            .unwrap();

        assert!(!correlator.cancel_wait(&id, 1).await);
        assert!(correlator.cancel_wait(&id, 0).await);
        assert!(!correlator.cancel_wait(&id, 0).await);
    }
}
