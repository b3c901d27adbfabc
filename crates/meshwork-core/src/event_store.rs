//! # Event Store
//!
//! Append-only store of published events and their handler results.
//!
//! One mutex covers the event map, the insertion order, the result map and
//! the causation index, so a reader never sees an event without its index
//! entries.
//!
//! With a persist directory, every event and result is also written as a
//! JSON file:
//!
//! ```text
//! {dir}/events/{event_id}.json
//! {dir}/results/{event_id}_{seq}_{handler}.json
//! ```
//!
//! `seq` is the result's position within its event, so handlers sharing a
//! name never share a file. The store is reloaded from these files on open.

use crate::event::{Event, EventId, EventResult};
use crate::MeshError;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct StoreInner {
    events: HashMap<EventId, Event>,
    /// Event ids in chronological order.
    order: Vec<EventId>,
    results: HashMap<EventId, Vec<EventResult>>,
    /// Parent event id -> ids of events it caused.
    causation: HashMap<EventId, Vec<EventId>>,
}

impl StoreInner {
    fn insert_event(&mut self, event: Event) {
        if let Some(parent) = event.causation_id {
            self.causation.entry(parent).or_default().push(event.id);
        }
        self.order.push(event.id);
        self.events.insert(event.id, event);
    }
}

/// Event and result store.
#[derive(Debug, Default)]
pub struct EventStore {
    persist_dir: Option<PathBuf>,
    inner: Mutex<StoreInner>,
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> MeshError {
    MeshError::IoError(format!("{} '{}': {}", context, path.display(), e))
}

/// Handler names become part of a file name.
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>, MeshError> {
    let mut items = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| io_err("cannot read", dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| io_err("cannot read", dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = fs::read(&path).map_err(|e| io_err("cannot read", &path, e))?;
        let item = serde_json::from_slice(&raw).map_err(|e| {
            MeshError::SerializationError(format!("{}: {}", path.display(), e))
        })?;
        items.push(item);
    }
    Ok(items)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), MeshError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| MeshError::SerializationError(e.to_string()))?;
    fs::write(path, bytes).map_err(|e| io_err("cannot write", path, e))
}

impl EventStore {
    /// Volatile store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Store persisted under `dir`, reloading anything already there.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self, MeshError> {
        let dir = dir.as_ref().to_path_buf();
        let events_dir = dir.join("events");
        let results_dir = dir.join("results");
        fs::create_dir_all(&events_dir).map_err(|e| io_err("cannot create", &events_dir, e))?;
        fs::create_dir_all(&results_dir).map_err(|e| io_err("cannot create", &results_dir, e))?;

        let mut events: Vec<Event> = read_json_dir(&events_dir)?;
        events.sort_by_key(|e| e.timestamp);
        let results: Vec<EventResult> = read_json_dir(&results_dir)?;

        let mut inner = StoreInner::default();
        for event in events {
            inner.insert_event(event);
        }
        for result in results {
            inner.results.entry(result.event_id).or_default().push(result);
        }
        for list in inner.results.values_mut() {
            list.sort_by_key(|r| r.completed_at);
        }

        Ok(Self {
            persist_dir: Some(dir),
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn persist_dir(&self) -> Option<&Path> {
        self.persist_dir.as_deref()
    }

    /// Append an event. Appending an id twice is an error.
    pub fn append(&self, event: Event) -> Result<(), MeshError> {
        let mut inner = self.lock();
        if inner.events.contains_key(&event.id) {
            return Err(MeshError::InvalidRequest(format!(
                "event {} already stored",
                event.id
            )));
        }
        if let Some(dir) = &self.persist_dir {
            write_json(&dir.join("events").join(format!("{}.json", event.id)), &event)?;
        }
        inner.insert_event(event);
        Ok(())
    }

    /// Record one handler's result.
    pub fn add_result(&self, result: EventResult) -> Result<(), MeshError> {
        let mut inner = self.lock();
        let results = inner.results.entry(result.event_id).or_default();
        if let Some(dir) = &self.persist_dir {
            let file = format!(
                "{}_{:04}_{}.json",
                result.event_id,
                results.len(),
                file_safe(&result.handler)
            );
            write_json(&dir.join("results").join(file), &result)?;
        }
        results.push(result);
        Ok(())
    }

    #[must_use]
    pub fn get_event(&self, id: &EventId) -> Option<Event> {
        self.lock().events.get(id).cloned()
    }

    #[must_use]
    pub fn get_results(&self, id: &EventId) -> Vec<EventResult> {
        self.lock().results.get(id).cloned().unwrap_or_default()
    }

    fn collect(&self, filter: impl Fn(&Event) -> bool) -> Vec<Event> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.events.get(id))
            .filter(|e| filter(e))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn by_type(&self, event_type: &str) -> Vec<Event> {
        self.collect(|e| e.event_type == event_type)
    }

    #[must_use]
    pub fn by_source(&self, source: &str) -> Vec<Event> {
        self.collect(|e| e.source == source)
    }

    /// Events of `event_type` in chronological order, or every event when
    /// `event_type` is `None`.
    #[must_use]
    pub fn replay(&self, event_type: Option<&str>) -> Vec<Event> {
        let mut events = self.collect(|e| event_type.is_none_or(|t| e.event_type == t));
        events.sort_by_key(|e| e.timestamp);
        events
    }

    /// Events whose `causation_id` is `parent`.
    #[must_use]
    pub fn caused_by(&self, parent: &EventId) -> Vec<Event> {
        let inner = self.lock();
        inner
            .causation
            .get(parent)
            .map(|ids| ids.iter().filter_map(|id| inner.events.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }
}
