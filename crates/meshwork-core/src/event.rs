//! # Event Model
//!
//! Events and per-handler results carried by the event bus.
//!
//! An [`Event`] is immutable once published. Each handler that sees it
//! produces exactly one [`EventResult`].

use crate::MeshError;
use crate::primitives::{DEFAULT_EVENT_TIMEOUT, DEFAULT_MAX_RETRIES, MAX_EVENT_TYPE_LENGTH};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an event id from its string form.
    pub fn parse(s: &str) -> Result<Self, MeshError> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MeshError::InvalidRequest(format!("invalid event id '{}': {}", s, e)))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// PRIORITY & STATUS
// =============================================================================

/// Delivery priority. Carried to the broker as a message header.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl EventPriority {
    /// Numeric level used in broker headers (1 = low .. 4 = critical).
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }
}

/// Processing status of one handler's work on one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
}

// =============================================================================
// EVENT
// =============================================================================

/// A published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub priority: EventPriority,
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// The event that caused this one.
    #[serde(default)]
    pub causation_id: Option<EventId>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    /// Per-handler deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Event {
    /// Build a new event with normal priority and default limits.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value, source: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data,
            metadata: BTreeMap::new(),
            priority: EventPriority::default(),
            correlation_id: None,
            causation_id: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_EVENT_TIMEOUT.as_millis() as u64,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark this event as caused by `parent`.
    ///
    /// The parent's correlation id is inherited unless one is already set.
    #[must_use]
    pub fn caused_by(mut self, parent: &Event) -> Self {
        self.causation_id = Some(parent.id);
        if self.correlation_id.is_none() {
            self.correlation_id = parent.correlation_id.clone();
        }
        self
    }

    /// Per-handler processing deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject events that cannot be routed.
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.event_type.is_empty() {
            return Err(MeshError::InvalidRequest(
                "event type must not be empty".to_string(),
            ));
        }
        if self.event_type.len() > MAX_EVENT_TYPE_LENGTH {
            return Err(MeshError::InvalidRequest(format!(
                "event type length {} exceeds maximum {}",
                self.event_type.len(),
                MAX_EVENT_TYPE_LENGTH
            )));
        }
        Ok(())
    }
}

// =============================================================================
// EVENT RESULT
// =============================================================================

/// Outcome of one handler processing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub event_id: EventId,
    pub handler: String,
    pub status: EventStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub processing_time_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl EventResult {
    #[must_use]
    pub fn completed(
        event_id: EventId,
        handler: impl Into<String>,
        result: Value,
        processing_time: Duration,
    ) -> Self {
        Self {
            event_id,
            handler: handler.into(),
            status: EventStatus::Completed,
            result: Some(result),
            error: None,
            processing_time_ms: processing_time.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(
        event_id: EventId,
        handler: impl Into<String>,
        error: impl Into<String>,
        processing_time: Duration,
    ) -> Self {
        Self {
            event_id,
            handler: handler.into(),
            status: EventStatus::Failed,
            result: None,
            error: Some(error.into()),
            processing_time_ms: processing_time.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == EventStatus::Completed
    }
}
