use crate::config::PublisherConfig;
use crate::domain::events::{OutboundEvent, PaymentEventKind};
use crate::domain::payment::Payment;
use crate::domain::ports::{
    ChannelConnectorBox, ChannelError, ExchangeKind, MessageChannel, MessageProperties,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Why an event did not reach the broker. Logged, never returned to callers.
#[derive(Error, Debug)]
enum PublishError {
    #[error("connect failed: {0}")]
    Connect(ChannelError),
    #[error("topology declaration failed: {0}")]
    Topology(ChannelError),
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(ChannelError),
}

/// Announces payment lifecycle changes on a topic exchange.
///
/// The connection is opened lazily on first use and re-opened (with the topology
/// re-declared) whenever a publish finds it closed. Delivery is best-effort: a failure
/// is logged and reported as `false`, never raised.
pub struct EventPublisher {
    config: PublisherConfig,
    connector: ChannelConnectorBox,
    channel: Mutex<Option<Box<dyn MessageChannel>>>,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig, connector: ChannelConnectorBox) -> Self {
        Self {
            config,
            connector,
            channel: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Publishes `payload` under `kind`'s routing key. Returns whether it was delivered.
    pub async fn publish(&self, kind: PaymentEventKind, payload: &Payment) -> bool {
        if !self.config.enabled {
            debug!(event = %kind, "Event publishing disabled, skipping");
            return false;
        }

        match self.try_publish(OutboundEvent::new(kind, payload.clone())).await {
            Ok(()) => {
                info!(event = %kind, payment_id = %payload.payment_id, "Published event");
                true
            }
            Err(e) => {
                error!(event = %kind, payment_id = %payload.payment_id, error = %e, "Failed to publish event");
                false
            }
        }
    }

    /// `true` when publishing is disabled or a channel to the broker is open.
    ///
    /// A missing or closed channel is re-opened here, so a fresh instance reports
    /// healthy as soon as the broker is reachable.
    pub async fn is_healthy(&self) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut slot = self.channel.lock().await;
        match self.ensure_open(&mut slot).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Event broker unavailable");
                false
            }
        }
    }

    pub async fn close(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
            info!("Event channel closed");
        }
    }

    async fn try_publish(&self, event: OutboundEvent) -> Result<(), PublishError> {
        let body = serde_json::to_vec(&event)?;
        let mut slot = self.channel.lock().await;
        self.ensure_open(&mut slot).await?;

        let Some(channel) = slot.as_ref() else {
            return Err(PublishError::Connect(ChannelError::Closed));
        };
        let outcome = channel
            .publish(
                &self.config.exchange,
                event.routing_key(),
                body,
                MessageProperties::persistent_json(),
            )
            .await;

        if let Err(e) = outcome {
            // Drop the channel so the next publish starts from a fresh connection
            *slot = None;
            return Err(PublishError::Publish(e));
        }
        Ok(())
    }

    async fn ensure_open(&self, slot: &mut Option<Box<dyn MessageChannel>>) -> Result<(), PublishError> {
        if slot.as_ref().is_some_and(|channel| channel.is_open()) {
            return Ok(());
        }
        if slot.is_some() {
            warn!("Event channel closed, reconnecting");
        }
        *slot = None;
        *slot = Some(self.connect().await?);
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn MessageChannel>, PublishError> {
        let channel = self.connector.connect().await.map_err(PublishError::Connect)?;

        channel
            .declare_exchange(&self.config.exchange, ExchangeKind::Topic, true)
            .await
            .map_err(PublishError::Topology)?;
        channel
            .declare_queue(&self.config.queue, true)
            .await
            .map_err(PublishError::Topology)?;
        channel
            .bind_queue(&self.config.queue, &self.config.exchange, &self.config.binding_key)
            .await
            .map_err(PublishError::Topology)?;

        info!(
            exchange = %self.config.exchange,
            queue = %self.config.queue,
            "Connected to event broker"
        );
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::NewPayment;
    use crate::infrastructure::broker::InMemoryBroker;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn enabled() -> PublisherConfig {
        PublisherConfig {
            enabled: true,
            ..PublisherConfig::default()
        }
    }

    fn payment() -> Payment {
        Payment::open(
            1,
            NewPayment {
                booking_ref: "BOOK-001".to_string(),
                amount: dec!(150.00),
                currency: None,
                payment_method: None,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_publisher_does_no_io() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(PublisherConfig::default(), Box::new(broker.clone()));

        assert!(!publisher.publish(PaymentEventKind::Created, &payment()).await);
        assert_eq!(broker.connections_opened(), 0);
        assert!(publisher.is_healthy().await);
    }

    #[tokio::test]
    async fn test_connects_lazily_and_reuses_channel() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(enabled(), Box::new(broker.clone()));
        assert_eq!(broker.connections_opened(), 0);

        assert!(publisher.publish(PaymentEventKind::Created, &payment()).await);
        assert!(publisher.publish(PaymentEventKind::Completed, &payment()).await);
        assert!(publisher.is_healthy().await);
        assert_eq!(broker.connections_opened(), 1);

        let messages = broker.drain("payment_events");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].routing_key, "payment.completed");
        assert_eq!(messages[0].properties.content_type, "application/json");
    }

    #[tokio::test]
    async fn test_health_check_opens_channel_and_declares_topology() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(enabled(), Box::new(broker.clone()));

        assert!(publisher.is_healthy().await);
        assert_eq!(broker.connections_opened(), 1);
        assert!(broker.has_exchange("payments"));

        // The channel opened by the check is the one publishing uses
        assert!(publisher.publish(PaymentEventKind::Created, &payment()).await);
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(broker.queue_len("payment_events"), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_broker() {
        let broker = InMemoryBroker::new();
        broker.set_online(false);
        let publisher = EventPublisher::new(enabled(), Box::new(broker.clone()));

        assert!(!publisher.is_healthy().await);
        assert_eq!(broker.connections_opened(), 0);

        broker.set_online(true);
        assert!(publisher.is_healthy().await);
    }

    #[tokio::test]
    async fn test_outage_returns_false_then_recovers() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(enabled(), Box::new(broker.clone()));
        assert!(publisher.publish(PaymentEventKind::Created, &payment()).await);

        broker.set_online(false);
        assert!(!publisher.publish(PaymentEventKind::Completed, &payment()).await);
        assert!(!publisher.is_healthy().await);

        broker.set_online(true);
        assert!(publisher.publish(PaymentEventKind::Refunded, &payment()).await);
        assert_eq!(broker.connections_opened(), 2);

        let keys: Vec<_> = broker
            .drain("payment_events")
            .into_iter()
            .map(|m| m.routing_key)
            .collect();
        assert_eq!(keys, ["payment.created", "payment.refunded"]);
    }

    #[tokio::test]
    async fn test_close_then_publish_reconnects() {
        let broker = InMemoryBroker::new();
        let publisher = EventPublisher::new(enabled(), Box::new(broker.clone()));
        assert!(publisher.publish(PaymentEventKind::Created, &payment()).await);

        publisher.close().await;
        assert!(publisher.publish(PaymentEventKind::Created, &payment()).await);
        assert_eq!(broker.connections_opened(), 2);
    }
}
