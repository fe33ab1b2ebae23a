//! Provider event stream
//!
//! Every lifecycle, health, configuration and migration transition is
//! recorded as an immutable [`ProviderEvent`]. Events are appended to a
//! bounded ring buffer (oldest evicted first) and delivered synchronously to
//! callback listeners, then published on a broadcast channel for async
//! consumers.
//!
//! ## Delivery Order
//!
//! For each event, listeners subscribed to all events run first in
//! subscription order, then listeners subscribed to that event type run in
//! subscription order. A panicking listener is logged and skipped; delivery
//! to the remaining listeners continues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

/// Kind of transition an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ProviderRegistered,
    ProviderUnregistered,
    ProviderStarting,
    ProviderStarted,
    ProviderStopped,
    ProviderRestarted,
    ProviderFailed,
    HealthChanged,
    ConfigUpdated,
    DependencyAdded,
    DependencyRemoved,
    FailoverCandidate,
    DefaultProviderChanged,
    BackupCreated,
    BackupRestored,
    MigrationStarted,
    MigrationStepCompleted,
    MigrationStepFailed,
    MigrationCompleted,
    MigrationFailed,
    MigrationCancelled,
    MigrationRolledBack,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ProviderRegistered => "provider_registered",
            EventType::ProviderUnregistered => "provider_unregistered",
            EventType::ProviderStarting => "provider_starting",
            EventType::ProviderStarted => "provider_started",
            EventType::ProviderStopped => "provider_stopped",
            EventType::ProviderRestarted => "provider_restarted",
            EventType::ProviderFailed => "provider_failed",
            EventType::HealthChanged => "health_changed",
            EventType::ConfigUpdated => "config_updated",
            EventType::DependencyAdded => "dependency_added",
            EventType::DependencyRemoved => "dependency_removed",
            EventType::FailoverCandidate => "failover_candidate",
            EventType::DefaultProviderChanged => "default_provider_changed",
            EventType::BackupCreated => "backup_created",
            EventType::BackupRestored => "backup_restored",
            EventType::MigrationStarted => "migration_started",
            EventType::MigrationStepCompleted => "migration_step_completed",
            EventType::MigrationStepFailed => "migration_step_failed",
            EventType::MigrationCompleted => "migration_completed",
            EventType::MigrationFailed => "migration_failed",
            EventType::MigrationCancelled => "migration_cancelled",
            EventType::MigrationRolledBack => "migration_rolled_back",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Immutable record of one transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Monotonic per-registry sequence number
    pub id: u64,
    pub event_type: EventType,
    /// Originating provider (the source provider for migration events)
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// An event before it is stamped with id and timestamp
#[derive(Debug, Clone)]
pub(crate) struct EventDraft {
    pub event_type: EventType,
    pub provider_id: String,
    pub severity: Severity,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl EventDraft {
    pub fn info(event_type: EventType, provider_id: impl Into<String>) -> Self {
        Self {
            event_type,
            provider_id: provider_id.into(),
            severity: Severity::Info,
            payload: None,
            error: None,
        }
    }

    pub fn warning(event_type: EventType, provider_id: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::info(event_type, provider_id)
        }
    }

    pub fn error(
        event_type: EventType,
        provider_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            error: Some(error.into()),
            ..Self::info(event_type, provider_id)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Callback listener
pub type EventListener = Arc<dyn Fn(&ProviderEvent) + Send + Sync>;

struct ListenerEntry {
    id: u64,
    filter: Option<EventType>,
    callback: EventListener,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

/// Ring buffer + listener fan-out
pub(crate) struct EventBus {
    sequence: AtomicU64,
    capacity: usize,
    history: Mutex<VecDeque<ProviderEvent>>,
    listeners: Arc<Mutex<Listeners>>,
    broadcast: broadcast::Sender<ProviderEvent>,
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new(capacity: usize, channel_capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            sequence: AtomicU64::new(1),
            capacity: capacity.max(1),
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            broadcast,
        }
    }

    /// Stamp, record and deliver an event
    pub fn emit(&self, draft: EventDraft) -> ProviderEvent {
        let event = ProviderEvent {
            id: self.sequence.fetch_add(1, Ordering::SeqCst),
            event_type: draft.event_type,
            provider_id: draft.provider_id,
            timestamp: Utc::now(),
            severity: draft.severity,
            payload: draft.payload,
            error: draft.error,
        };

        {
            let mut history = lock(&self.history);
            while history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        self.deliver(&event);

        // No receivers is fine
        let _ = self.broadcast.send(event.clone());

        event
    }

    fn deliver(&self, event: &ProviderEvent) {
        // Snapshot so listeners may subscribe/unsubscribe while running
        let (all, typed): (Vec<_>, Vec<_>) = {
            let listeners = lock(&self.listeners);
            listeners
                .entries
                .iter()
                .filter(|entry| entry.filter.is_none_or(|filter| filter == event.event_type))
                .map(|entry| (entry.id, entry.filter.is_none(), Arc::clone(&entry.callback)))
                .partition(|(_, is_all, _)| *is_all)
        };

        for (id, _, callback) in all.into_iter().chain(typed) {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(
                    "Event listener {} panicked while handling {} for {}",
                    id, event.event_type, event.provider_id
                );
            }
        }
    }

    pub fn subscribe(&self, filter: Option<EventType>, callback: EventListener) -> Subscription {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = listeners.next_id;
        listeners.entries.push(ListenerEntry {
            id,
            filter,
            callback,
        });

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).entries.len()
    }

    /// Most recent events, oldest first
    pub fn history(&self, limit: Option<usize>) -> Vec<ProviderEvent> {
        let history = lock(&self.history);
        let skip = limit.map_or(0, |limit| history.len().saturating_sub(limit));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn history_for(&self, provider_id: &str) -> Vec<ProviderEvent> {
        lock(&self.history)
            .iter()
            .filter(|event| event.provider_id == provider_id)
            .cloned()
            .collect()
    }

    pub fn stream(&self) -> impl Stream<Item = ProviderEvent> + Send + 'static {
        BroadcastStream::new(self.broadcast.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(lagged) => {
                warn!("Event stream consumer lagged: {}", lagged);
                None
            }
        })
    }
}

/// Handle returned by `subscribe_to_events`; call [`Subscription::unsubscribe`]
/// to stop delivery
///
/// Dropping the handle does not unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop delivery to this listener
    ///
    /// Returns `false` if it was already removed or the registry is gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut listeners = lock(&listeners);
        let before = listeners.entries.len();
        listeners.entries.retain(|entry| entry.id != self.id);
        before != listeners.entries.len()
    }
}
