//! External fan-out transports.
//!
//! The bus talks to a durable topic-routed broker and a low-latency
//! pub/sub channel only through these traits. The in-process
//! implementations here are built on `tokio::sync::broadcast` and are what
//! tests and single-node deployments use; concrete products plug in by
//! implementing the traits.

use super::pattern::glob_match;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use meshwork_core::MeshError;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// A message for the durable broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub exchange: String,
    /// Topic routing key (the event type).
    pub routing_key: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

/// A message on a pub/sub channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Durable, topic-routed message broker.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: BrokerMessage) -> Result<(), MeshError>;
}

/// Fire-and-forget pub/sub channels.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), MeshError>;

    /// Stream of messages on every channel matching the glob `pattern`.
    async fn psubscribe(&self, pattern: &str)
    -> Result<BoxStream<'static, PubSubMessage>, MeshError>;
}

// =============================================================================
// IN-PROCESS BROKER
// =============================================================================

/// Broker that delivers to in-process subscribers.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrokerMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<(), MeshError> {
        // A broker with no consumers drops the message, like an unbound exchange.
        let _ = self.sender.send(message);
        Ok(())
    }
}

// =============================================================================
// IN-PROCESS PUB/SUB
// =============================================================================

#[derive(Debug, Clone)]
pub struct InMemoryPubSub {
    sender: broadcast::Sender<PubSubMessage>,
}

impl Default for InMemoryPubSub {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl InMemoryPubSub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for InMemoryPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), MeshError> {
        let _ = self.sender.send(PubSubMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    async fn psubscribe(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, PubSubMessage>, MeshError> {
        let receiver = self.sender.subscribe();
        let pattern = pattern.to_string();

        let messages = stream::unfold(receiver, move |mut rx| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) if glob_match(&pattern, &message.channel) => {
                            return Some((message, rx));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%pattern, skipped, "Pub/sub subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(messages.boxed())
    }
}
