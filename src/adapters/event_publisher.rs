//! Event publishers
//!
//! `LoggingEventPublisher` writes every domain event to tracing;
//! `InMemoryEventCollector` keeps them for assertions in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Publishes domain events as tracing records with the event serialized to JSON.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    verbose: bool,
}

impl LoggingEventPublisher {
    /// Events go to `debug`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events go to `info`.
    pub fn info_level() -> Self {
        Self { verbose: true }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let payload = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(_) => format!("{:?}", event),
        };

        if self.verbose {
            info!(kind = event.event_type(), %payload, "Proxy group event");
        } else {
            debug!(kind = event.event_type(), %payload, "Proxy group event");
        }
        Ok(())
    }
}

/// Keeps published events in publication order.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    recorded: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far
    pub fn events(&self) -> Vec<DomainEvent> {
        self.recorded.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.recorded.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.recorded.lock().clear();
    }

    /// Published events whose `event_type()` is `kind`
    pub fn events_of_type(&self, kind: &str) -> Vec<DomainEvent> {
        let recorded = self.recorded.lock();
        recorded
            .iter()
            .filter(|event| event.event_type() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.recorded.lock().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.recorded.lock().extend(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stopped() -> DomainEvent {
        DomainEvent::ServiceStopped {
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_logging_publisher_accepts_every_event() {
        let publisher = LoggingEventPublisher::info_level();

        publisher.publish(stopped()).await.unwrap();
        LoggingEventPublisher::new()
            .publish(DomainEvent::ProxySynced {
                proxy_id: 9,
                mode: "PARTIAL".to_string(),
                known_revision: 3,
                hpmap_revision: 4,
                deleted_hosts: 1,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_collector_keeps_order_and_filters() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector.publish(stopped()).await.unwrap();
        collector
            .publish_all(vec![
                DomainEvent::MessageRejected {
                    code: 1,
                    reason: "short".to_string(),
                    timestamp: Utc::now(),
                },
                stopped(),
            ])
            .await
            .unwrap();

        assert_eq!(collector.len(), 3);
        assert_eq!(collector.events()[1].event_type(), "MessageRejected");
        assert_eq!(collector.events_of_type("ServiceStopped").len(), 2);

        collector.clear();
        assert!(collector.is_empty());
    }
}
