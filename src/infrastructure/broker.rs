//! An in-process message broker with AMQP-style exchanges, queues and bindings.
//!
//! Used by the replay binary and the tests in place of a networked broker. It can be
//! taken offline or have its connections dropped to exercise reconnect handling.

use crate::domain::ports::{
    ChannelConnector, ChannelError, ExchangeKind, MessageChannel, MessageProperties,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// A message as it sits in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
}

#[derive(Debug, Clone, Copy)]
struct Exchange {
    kind: ExchangeKind,
    durable: bool,
}

#[derive(Debug, Default)]
struct Queue {
    durable: bool,
    messages: VecDeque<Delivery>,
}

#[derive(Debug)]
struct Binding {
    queue: String,
    exchange: String,
    key: String,
}

#[derive(Debug)]
struct BrokerState {
    online: bool,
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    connections_opened: u64,
    live: Vec<Arc<AtomicBool>>,
}

impl Default for BrokerState {
    fn default() -> Self {
        Self {
            online: true,
            exchanges: HashMap::new(),
            queues: HashMap::new(),
            bindings: Vec::new(),
            connections_opened: 0,
            live: Vec::new(),
        }
    }
}

impl BrokerState {
    fn close_all(&mut self) {
        for flag in self.live.drain(..) {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taking the broker offline closes every live channel and refuses new ones.
    pub fn set_online(&self, online: bool) {
        let mut state = lock(&self.state);
        state.online = online;
        if !online {
            state.close_all();
        }
    }

    /// Closes every live channel, as a broker restart would.
    ///
    /// Durable exchanges, queues and their messages survive; the rest are discarded.
    pub fn restart(&self) {
        let mut state = lock(&self.state);
        state.close_all();
        state.exchanges.retain(|_, exchange| exchange.durable);
        state.queues.retain(|_, queue| queue.durable);
        let BrokerState {
            exchanges,
            queues,
            bindings,
            ..
        } = &mut *state;
        bindings.retain(|b| exchanges.contains_key(&b.exchange) && queues.contains_key(&b.queue));
        for queue in queues.values_mut() {
            queue.messages.retain(|m| m.properties.persistent);
        }
    }

    pub fn connections_opened(&self) -> u64 {
        lock(&self.state).connections_opened
    }

    /// Channels the broker still tracks. Closed ones are dropped on the next connect.
    pub fn tracked_channels(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        lock(&self.state).exchanges.contains_key(name)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        lock(&self.state)
            .queues
            .get(queue)
            .map_or(0, |q| q.messages.len())
    }

    /// Removes and returns every message waiting in `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Delivery> {
        lock(&self.state)
            .queues
            .get_mut(queue)
            .map(|q| q.messages.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelConnector for InMemoryBroker {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>, ChannelError> {
        let mut state = lock(&self.state);
        if !state.online {
            return Err(ChannelError::Unreachable("broker is offline".to_string()));
        }
        let open = Arc::new(AtomicBool::new(true));
        state.live.retain(|flag| flag.load(Ordering::SeqCst));
        state.live.push(open.clone());
        state.connections_opened += 1;
        debug!(connection = state.connections_opened, "In-memory broker connection opened");

        Ok(Box::new(InMemoryChannel {
            state: self.state.clone(),
            open,
        }))
    }
}

pub struct InMemoryChannel {
    state: Arc<Mutex<BrokerState>>,
    open: Arc<AtomicBool>,
}

impl InMemoryChannel {
    fn usable(&self) -> Result<MutexGuard<'_, BrokerState>, ChannelError> {
        let state = lock(&self.state);
        if !self.open.load(Ordering::SeqCst) || !state.online {
            return Err(ChannelError::Closed);
        }
        Ok(state)
    }
}

#[async_trait]
impl MessageChannel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), ChannelError> {
        let mut state = self.usable()?;
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.durable != durable => Err(
                ChannelError::Topology(format!("exchange '{name}' redeclared with other arguments")),
            ),
            Some(_) => Ok(()),
            None => {
                state
                    .exchanges
                    .insert(name.to_string(), Exchange { kind, durable });
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), ChannelError> {
        let mut state = self.usable()?;
        let queue = state.queues.entry(name.to_string()).or_default();
        queue.durable |= durable;
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> Result<(), ChannelError> {
        let mut state = self.usable()?;
        if !state.exchanges.contains_key(exchange) {
            return Err(ChannelError::Topology(format!("no exchange '{exchange}'")));
        }
        if !state.queues.contains_key(queue) {
            return Err(ChannelError::Topology(format!("no queue '{queue}'")));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.key == binding_key);
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                key: binding_key.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), ChannelError> {
        let mut state = self.usable()?;
        let kind = state
            .exchanges
            .get(exchange)
            .map(|e| e.kind)
            .ok_or_else(|| ChannelError::Topology(format!("no exchange '{exchange}'")))?;

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.key == routing_key,
                ExchangeKind::Topic => topic_matches(&b.key, routing_key),
                ExchangeKind::Fanout => true,
            })
            .map(|b| b.queue.clone())
            .collect();

        // Unroutable messages are dropped, as on a real broker
        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(Delivery {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.clone(),
                    properties: properties.clone(),
                });
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn go(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.split_first(), key.split_first()) {
            (None, None) => true,
            (Some((&"#", rest)), _) => {
                go(rest, key) || (!key.is_empty() && go(pattern, &key[1..]))
            }
            (Some((&"*", rest)), Some((_, key_rest))) => go(rest, key_rest),
            (Some((word, rest)), Some((k, key_rest))) => word == k && go(rest, key_rest),
            _ => false,
        }
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    go(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("payment.*", "payment.created"));
        assert!(!topic_matches("payment.*", "payment.created.v2"));
        assert!(!topic_matches("payment.*", "booking.created"));
        assert!(topic_matches("payment.#", "payment"));
        assert!(topic_matches("payment.#", "payment.created.v2"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("*.completed", "payment.completed"));
    }

    #[tokio::test]
    async fn test_routing_into_bound_queue() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange("payments", ExchangeKind::Topic, true)
            .await
            .unwrap();
        channel.declare_queue("payment_events", true).await.unwrap();
        channel
            .bind_queue("payment_events", "payments", "payment.*")
            .await
            .unwrap();

        channel
            .publish(
                "payments",
                "payment.created",
                b"{}".to_vec(),
                MessageProperties::persistent_json(),
            )
            .await
            .unwrap();
        channel
            .publish(
                "payments",
                "booking.created",
                b"{}".to_vec(),
                MessageProperties::persistent_json(),
            )
            .await
            .unwrap();

        let delivered = broker.drain("payment_events");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].routing_key, "payment.created");
        assert!(delivered[0].properties.persistent);
    }

    #[tokio::test]
    async fn test_offline_broker_closes_channels() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        assert!(channel.is_open());

        broker.set_online(false);
        assert!(!channel.is_open());
        assert!(matches!(
            broker.connect().await,
            Err(ChannelError::Unreachable(_))
        ));

        broker.set_online(true);
        assert!(broker.connect().await.is_ok());
        assert_eq!(broker.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_closed_channels_are_not_tracked() {
        let broker = InMemoryBroker::new();
        for _ in 0..5 {
            let channel = broker.connect().await.unwrap();
            channel.close().await;
        }
        let current = broker.connect().await.unwrap();

        assert_eq!(broker.connections_opened(), 6);
        assert_eq!(broker.tracked_channels(), 1);

        broker.restart();
        assert!(!current.is_open());
        assert_eq!(broker.tracked_channels(), 0);
    }

    #[tokio::test]
    async fn test_restart_keeps_durable_topology() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange("payments", ExchangeKind::Topic, true)
            .await
            .unwrap();
        channel
            .declare_exchange("scratch", ExchangeKind::Fanout, false)
            .await
            .unwrap();

        broker.restart();
        assert!(!channel.is_open());
        assert!(broker.has_exchange("payments"));
        assert!(!broker.has_exchange("scratch"));
    }

    #[tokio::test]
    async fn test_redeclare_with_other_kind_fails() {
        let broker = InMemoryBroker::new();
        let channel = broker.connect().await.unwrap();
        channel
            .declare_exchange("payments", ExchangeKind::Topic, true)
            .await
            .unwrap();
        assert!(matches!(
            channel
                .declare_exchange("payments", ExchangeKind::Direct, true)
                .await,
            Err(ChannelError::Topology(_))
        ));
    }
}
