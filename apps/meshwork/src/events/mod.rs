//! # Event Bus
//!
//! Durable, fan-out publish/subscribe.
//!
//! ## Publish Flow
//!
//! ```text
//! publish ─► middleware chain ─► store event ─► dispatch ─► store results ─► fan-out
//!              (may drop)                      (one task      (all, before     (broker +
//!                                               per handler)   publish returns)  pub/sub)
//! ```
//!
//! Handlers for the event's type and every global handler run concurrently,
//! each in its own task. A handler that returns `Err`, panics or outlives
//! the event's timeout produces a FAILED result for itself only.
//!
//! Fan-out is best effort: broker (routing key = event type, header
//! `priority`) and pub/sub (`{prefix}:{event_type}`) failures are logged and
//! swallowed.

mod handler;
mod pattern;
mod transport;

pub use handler::{EventHandler, EventMiddleware, HandlerFn, MiddlewareFn, handler_fn, middleware_fn};
pub use pattern::glob_match;
pub use transport::{
    BrokerMessage, InMemoryBroker, InMemoryPubSub, MessageBroker, PubSub, PubSubMessage,
};

use futures::StreamExt;
use futures::future::join_all;
use meshwork_core::{Event, EventId, EventPriority, EventResult, EventStore, MeshError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

// =============================================================================
// CONFIGURATION & COUNTERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Pub/sub channels are `{channel_prefix}:{event_type}`.
    pub channel_prefix: String,
    pub exchange: String,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "events".to_string(),
            exchange: "meshwork.events".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    /// Handler results that completed.
    pub processed: u64,
    /// Handler results that failed.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn count(&self, result: &EventResult) {
        if result.is_success() {
            self.processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// EVENT BUS
// =============================================================================

pub struct EventBus {
    store: Arc<EventStore>,
    config: EventBusConfig,
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    global_handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    middleware: RwLock<Vec<Arc<dyn EventMiddleware>>>,
    broker: Option<Arc<dyn MessageBroker>>,
    pubsub: Option<Arc<dyn PubSub>>,
    counters: Arc<Counters>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("broker", &self.broker.is_some())
            .field("pubsub", &self.pubsub.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Arc::new(EventStore::in_memory()), EventBusConfig::default())
    }
}

impl EventBus {
    #[must_use]
    pub fn new(store: Arc<EventStore>, config: EventBusConfig) -> Self {
        Self {
            store,
            config,
            handlers: RwLock::new(HashMap::new()),
            global_handlers: RwLock::new(Vec::new()),
            middleware: RwLock::new(Vec::new()),
            broker: None,
            pubsub: None,
            counters: Arc::new(Counters::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_broker(mut self, broker: Arc<dyn MessageBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -------------------------------------------------------------------------
    // Subscription
    // -------------------------------------------------------------------------

    /// Handle every event of `event_type`.
    pub async fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(%event_type, handler = handler.name(), "Handler subscribed");
        self.handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Handle every event.
    pub async fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        tracing::debug!(handler = handler.name(), "Global handler subscribed");
        self.global_handlers.write().await.push(handler);
    }

    /// Append to the middleware chain. Middleware runs in insertion order.
    pub async fn add_middleware(&self, middleware: Arc<dyn EventMiddleware>) {
        self.middleware.write().await.push(middleware);
    }

    /// Listen on the pub/sub transport for channels matching the glob
    /// `pattern` and dispatch each decoded event to `handler`.
    pub async fn subscribe_to_pattern(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), MeshError> {
        let Some(pubsub) = &self.pubsub else {
            return Err(MeshError::ConfigError(
                "pattern subscriptions need a pub/sub transport".to_string(),
            ));
        };
        let mut messages = pubsub.psubscribe(pattern).await?;
        let counters = Arc::clone(&self.counters);
        let pattern_owned = pattern.to_string();

        let task = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                let event: Event = match serde_json::from_slice(&message.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(channel = %message.channel, error = %e, "Undecodable pub/sub message");
                        continue;
                    }
                };
                let result = run_handler(Arc::clone(&handler), event).await;
                counters.count(&result);
                tracing::debug!(
                    pattern = %pattern_owned,
                    handler = %result.handler,
                    status = ?result.status,
                    "Pattern handler finished"
                );
            }
        });
        self.listeners().push(task);
        tracing::info!(%pattern, "Pattern subscription started");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Publishing
    // -------------------------------------------------------------------------

    /// Build and publish an event.
    ///
    /// Returns the event id. An event dropped by middleware still gets an id
    /// but is never stored or dispatched.
    pub async fn publish(
        &self,
        event_type: impl Into<String>,
        data: Value,
        source: impl Into<String>,
        priority: EventPriority,
        correlation_id: Option<String>,
    ) -> Result<EventId, MeshError> {
        let mut event = Event::new(event_type, data, source).with_priority(priority);
        event.correlation_id = correlation_id;
        self.publish_event(event).await
    }

    /// Publish a fully built event.
    pub async fn publish_event(&self, event: Event) -> Result<EventId, MeshError> {
        event.validate()?;
        let id = event.id;

        let Some(event) = self.apply_middleware(event).await else {
            tracing::debug!(%id, "Event dropped by middleware");
            return Ok(id);
        };

        self.store.append(event.clone())?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let results = self.dispatch(&event).await;
        let mut first_error = None;
        for result in results {
            self.counters.count(&result);
            if !result.is_success() {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    handler = %result.handler,
                    error = result.error.as_deref().unwrap_or(""),
                    "Handler failed"
                );
            }
            let handler = result.handler.clone();
            if let Err(e) = self.store.add_result(result) {
                tracing::warn!(event_id = %event.id, %handler, error = %e, "Result not stored");
                first_error.get_or_insert(e);
            }
        }

        self.fan_out(&event).await;
        match first_error {
            Some(e) => Err(e),
            None => Ok(event.id),
        }
    }

    async fn apply_middleware(&self, event: Event) -> Option<Event> {
        let chain = self.middleware.read().await.clone();
        let mut current = event;
        for middleware in chain {
            current = middleware.process(current).await?;
        }
        Some(current)
    }

    async fn dispatch(&self, event: &Event) -> Vec<EventResult> {
        let mut handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .await
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        handlers.extend(self.global_handlers.read().await.iter().cloned());

        let runs = handlers
            .into_iter()
            .map(|handler| run_handler(handler, event.clone()));
        join_all(runs).await
    }

    async fn fan_out(&self, event: &Event) {
        if self.broker.is_none() && self.pubsub.is_none() {
            return;
        }
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "Cannot encode event for fan-out");
                return;
            }
        };

        if let Some(broker) = &self.broker {
            let message = BrokerMessage {
                exchange: self.config.exchange.clone(),
                routing_key: event.event_type.clone(),
                headers: BTreeMap::from([(
                    "priority".to_string(),
                    event.priority.level().to_string(),
                )]),
                payload: payload.clone(),
            };
            if let Err(e) = broker.publish(message).await {
                tracing::warn!(event_id = %event.id, error = %e, "Broker publish failed");
            }
        }

        if let Some(pubsub) = &self.pubsub {
            let channel = format!("{}:{}", self.config.channel_prefix, event.event_type);
            if let Err(e) = pubsub.publish(&channel, payload).await {
                tracing::warn!(event_id = %event.id, %channel, error = %e, "Pub/sub publish failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Stored events of `event_type` (all events for `None`), oldest first.
    #[must_use]
    pub fn replay_events(&self, event_type: Option<&str>) -> Vec<Event> {
        self.store.replay(event_type)
    }

    #[must_use]
    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        self.store.get_event(id)
    }

    #[must_use]
    pub fn get_events_by_type(&self, event_type: &str) -> Vec<Event> {
        self.store.by_type(event_type)
    }

    #[must_use]
    pub fn get_events_by_source(&self, source: &str) -> Vec<Event> {
        self.store.by_source(source)
    }

    #[must_use]
    pub fn get_results(&self, id: &EventId) -> Vec<EventResult> {
        self.store.get_results(id)
    }

    #[must_use]
    pub fn get_caused_by(&self, id: &EventId) -> Vec<Event> {
        self.store.caused_by(id)
    }

    /// False once any pattern listener has exited on its own.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.listeners().iter().all(|task| !task.is_finished())
    }

    /// Abort every pattern listener.
    pub fn stop(&self) {
        let mut listeners = self.listeners();
        let count = listeners.len();
        for task in listeners.drain(..) {
            task.abort();
        }
        if count > 0 {
            tracing::info!(listeners = count, "Event bus listeners stopped");
        }
    }
}

/// Run one handler in its own task, bounded by the event's timeout.
async fn run_handler(handler: Arc<dyn EventHandler>, event: Event) -> EventResult {
    let name = handler.name().to_string();
    let event_id = event.id;
    let timeout = event.timeout();
    let started = Instant::now();

    let task = tokio::spawn(async move { handler.handle(&event).await });
    let abort = task.abort_handle();

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => EventResult::completed(event_id, name, value, started.elapsed()),
        Ok(Ok(Err(e))) => EventResult::failed(event_id, name, e.to_string(), started.elapsed()),
        Ok(Err(join_error)) => {
            let reason = if join_error.is_panic() {
                "handler panicked".to_string()
            } else {
                format!("handler aborted: {}", join_error)
            };
            EventResult::failed(event_id, name, reason, started.elapsed())
        }
        Err(_) => {
            abort.abort();
            EventResult::failed(
                event_id,
                name,
                format!("handler timed out after {} ms", timeout.as_millis()),
                started.elapsed(),
            )
        }
    }
}
