//! Typed pub/sub bus shared by every orchestrator subcomponent. Components
//! hold an `Arc<EventBus>` handle; nothing holds a back-reference to the
//! orchestrator itself (see `src/orchestrator/mod.rs`).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::constants::{DEFAULT_EVENT_RETENTION_MS, DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_MAX_EVENTS};

/// Severity carried on every event, independent of its `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    /// Heuristic default for a plain `emit(kind, payload)` call: components
    /// that care about a specific severity use `emit_with_severity`
    /// directly, but most call sites just name the event and this infers a
    /// reasonable default from naming convention.
    fn infer_from_kind(kind: &str) -> Self {
        let lower = kind.to_ascii_lowercase();
        if lower.contains("crash") || lower.contains("denied") || lower.contains("rejected") {
            Severity::Error
        } else if lower.contains("fail") || lower.contains("backpressure") || lower.contains("timeout") {
            Severity::Warn
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub source: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    #[serde(rename = "timestamp")]
    pub emitted_at: DateTime<Utc>,
}

fn string_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl Event {
    pub fn new(kind: impl Into<String>, source: impl Into<String>, severity: Severity, payload: serde_json::Value) -> Self {
        let kind = kind.into();
        let agent_id = string_field(&payload, "agentId");
        let task_id = string_field(&payload, "taskId");
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            source: source.into(),
            payload,
            correlation_id: None,
            session_id: None,
            agent_id,
            task_id,
            emitted_at: Utc::now(),
        }
    }
}

/// A subscriber callback. Handlers are fallible but their errors are only
/// logged, never propagated back to the emitter.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self(event)
    }
}

/// Filter used both by `on_filtered` subscriptions and by `get_events`.
/// Every populated field is ANDed together; an unpopulated field imposes
/// no constraint.
#[derive(Clone, Default)]
pub struct EventFilter {
    pub kinds: Option<HashSet<String>>,
    pub severities: Option<HashSet<Severity>>,
    pub sources: Option<HashSet<String>>,
    pub agent_ids: Option<HashSet<String>>,
    pub task_ids: Option<HashSet<String>>,
    pub custom_predicate: Option<Arc<dyn Fn(&Event) -> bool + Send + Sync>>,
}

impl EventFilter {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kinds: Some(std::iter::once(kind.into()).collect()),
            ..Default::default()
        }
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&event.severity) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.contains(&event.source) {
                return false;
            }
        }
        if let Some(agent_ids) = &self.agent_ids {
            if !event.agent_id.as_ref().is_some_and(|id| agent_ids.contains(id)) {
                return false;
            }
        }
        if let Some(task_ids) = &self.task_ids {
            if !event.task_id.as_ref().is_some_and(|id| task_ids.contains(id)) {
                return false;
            }
        }
        if let Some(predicate) = &self.custom_predicate {
            if !predicate(event) {
                return false;
            }
        }
        true
    }
}

struct Subscription {
    id: String,
    filter: Option<EventFilter>,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventBusStats {
    pub total_emitted: u64,
    pub total_dropped_no_handler: u64,
    pub total_handler_errors: u64,
    pub total_handler_timeouts: u64,
    pub retained: usize,
    pub subscriber_count: usize,
    pub by_kind: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub by_source: HashMap<String, u64>,
}

/// Registration-order dispatch, bounded ring-buffer retention, and a
/// per-handler timeout so one slow subscriber cannot stall emission.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    history: RwLock<Vec<Event>>,
    max_events: usize,
    handler_timeout_ms: u64,
    retention_ms: i64,
    emitted: AtomicU64,
    dropped_no_handler: AtomicU64,
    handler_errors: AtomicU64,
    handler_timeouts: AtomicU64,
    by_kind: RwLock<HashMap<String, u64>>,
    by_severity: RwLock<HashMap<String, u64>>,
    by_source: RwLock<HashMap<String, u64>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_limits(
            DEFAULT_MAX_EVENTS,
            DEFAULT_HANDLER_TIMEOUT_MS,
            DEFAULT_EVENT_RETENTION_MS,
        )
    }

    pub fn with_limits(max_events: usize, handler_timeout_ms: u64, retention_ms: i64) -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_events,
            handler_timeout_ms,
            retention_ms,
            emitted: AtomicU64::new(0),
            dropped_no_handler: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            handler_timeouts: AtomicU64::new(0),
            by_kind: RwLock::new(HashMap::new()),
            by_severity: RwLock::new(HashMap::new()),
            by_source: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to every event, regardless of kind.
    pub async fn on(&self, handler: Arc<dyn EventHandler>) -> String {
        self.subscribe(None, handler).await
    }

    /// Subscribe only to events matching `filter`.
    pub async fn on_filtered(&self, filter: EventFilter, handler: Arc<dyn EventHandler>) -> String {
        self.subscribe(Some(filter), handler).await
    }

    async fn subscribe(&self, filter: Option<EventFilter>, handler: Arc<dyn EventHandler>) -> String {
        let id = Uuid::new_v4().to_string();
        let mut subs = self.subscriptions.write().await;
        subs.push(Subscription {
            id: id.clone(),
            filter,
            handler,
        });
        id
    }

    pub async fn off(&self, subscription_id: &str) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        subs.len() != before
    }

    /// Emit an event with a default source (`"orchestrator"`) and a
    /// severity inferred from the event's name.
    pub async fn emit(&self, kind: impl Into<String>, payload: serde_json::Value) {
        let kind = kind.into();
        let severity = Severity::infer_from_kind(&kind);
        self.emit_with_severity(kind, "orchestrator", severity, payload).await;
    }

    /// Emit with an explicit source and severity, for components that know
    /// more precisely how the event should be classified.
    pub async fn emit_with_severity(
        &self,
        kind: impl Into<String>,
        source: impl Into<String>,
        severity: Severity,
        payload: serde_json::Value,
    ) {
        let event = Event::new(kind, source, severity, payload);
        self.emitted.fetch_add(1, Ordering::Relaxed);
        self.record_counters(&event).await;
        self.retain(event.clone()).await;

        let subs = self.subscriptions.read().await;
        let matching: Vec<Arc<dyn EventHandler>> = subs
            .iter()
            .filter(|s| s.filter.as_ref().map_or(true, |f| f.matches(&event)))
            .map(|s| s.handler.clone())
            .collect();
        drop(subs);

        if matching.is_empty() {
            self.dropped_no_handler.fetch_add(1, Ordering::Relaxed);
            return;
        }

        for handler in matching {
            let deadline = std::time::Duration::from_millis(self.handler_timeout_ms);
            match timeout(deadline, handler.handle(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.handler_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(event = %event.kind, error = %err, "event handler failed");
                }
                Err(_) => {
                    self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(event = %event.kind, timeout_ms = self.handler_timeout_ms, "event handler timed out");
                }
            }
        }
    }

    async fn record_counters(&self, event: &Event) {
        *self.by_kind.write().await.entry(event.kind.clone()).or_insert(0) += 1;
        *self
            .by_severity
            .write()
            .await
            .entry(format!("{:?}", event.severity))
            .or_insert(0) += 1;
        *self.by_source.write().await.entry(event.source.clone()).or_insert(0) += 1;
    }

    async fn retain(&self, event: Event) {
        let mut history = self.history.write().await;
        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.retention_ms);
        history.retain(|e| e.emitted_at > cutoff);
        history.push(event);
        if history.len() > self.max_events {
            let overflow = history.len() - self.max_events;
            history.drain(0..overflow);
        }
    }

    /// Most recent matching events, newest last, capped at `limit`.
    pub async fn get_events(&self, filter: Option<&EventFilter>, limit: usize) -> Vec<Event> {
        let history = self.history.read().await;
        let matched: Vec<Event> = match filter {
            Some(filter) => history.iter().filter(|e| filter.matches(e)).cloned().collect(),
            None => history.clone(),
        };
        if matched.len() > limit {
            matched[matched.len() - limit..].to_vec()
        } else {
            matched
        }
    }

    pub async fn get_stats(&self) -> EventBusStats {
        let retained = self.history.read().await.len();
        let subscriber_count = self.subscriptions.read().await.len();
        EventBusStats {
            total_emitted: self.emitted.load(Ordering::Relaxed),
            total_dropped_no_handler: self.dropped_no_handler.load(Ordering::Relaxed),
            total_handler_errors: self.handler_errors.load(Ordering::Relaxed),
            total_handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            retained,
            subscriber_count,
            by_kind: self.by_kind.read().await.clone(),
            by_severity: self.by_severity.read().await.clone(),
            by_source: self.by_source.read().await.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper used by tests and in-process subscribers that just want to
/// collect emitted events by kind without implementing `EventHandler`.
pub struct RecordingHandler {
    pub received: RwLock<HashMap<String, Vec<Event>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self {
            received: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let mut received = self.received.write().await;
        received.entry(event.kind.clone()).or_default().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OrderTag(&'static str, Arc<RwLock<Vec<&'static str>>>);

    #[async_trait]
    impl EventHandler for OrderTag {
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.1.write().await.push(self.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn emit_dispatches_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));

        bus.on(Arc::new(OrderTag("a", order.clone()))).await;
        bus.on(Arc::new(OrderTag("b", order.clone()))).await;

        bus.emit("task.created", serde_json::json!({})).await;
        assert_eq!(*order.read().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn events_with_no_handlers_are_still_retained() {
        let bus = EventBus::new();
        bus.emit("task.created", serde_json::json!({"id": "t1"})).await;
        let stats = bus.get_stats().await;
        assert_eq!(stats.total_dropped_no_handler, 1);
        let events = bus.get_events(None, 100).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn filtered_subscription_ignores_other_kinds() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingHandler::new());
        bus.on_filtered(EventFilter::kind("task.completed"), recorder.clone()).await;

        bus.emit("task.created", serde_json::json!({})).await;
        bus.emit("task.completed", serde_json::json!({})).await;

        let received = recorder.received.read().await;
        assert!(!received.contains_key("task.created"));
        assert_eq!(received.get("task.completed").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_events_past_capacity() {
        let bus = EventBus::with_limits(2, DEFAULT_HANDLER_TIMEOUT_MS, DEFAULT_EVENT_RETENTION_MS);
        bus.emit("a", serde_json::json!({})).await;
        bus.emit("b", serde_json::json!({})).await;
        bus.emit("c", serde_json::json!({})).await;
        let events = bus.get_events(None, 100).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, "b");
        assert_eq!(events[1].kind, "c");
    }

    #[tokio::test]
    async fn off_unsubscribes_handler() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingHandler::new());
        let sub_id = bus.on(recorder.clone()).await;
        assert!(bus.off(&sub_id).await);

        bus.emit("task.created", serde_json::json!({})).await;
        let received = recorder.received.read().await;
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn filter_by_task_id_matches_events_carrying_that_field() {
        let bus = EventBus::new();
        bus.emit("task:failed", serde_json::json!({"taskId": "t1"})).await;
        bus.emit("task:failed", serde_json::json!({"taskId": "t2"})).await;

        let filter = EventFilter {
            task_ids: Some(std::iter::once("t1".to_string()).collect()),
            ..Default::default()
        };
        let events = bus.get_events(Some(&filter), 100).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn severity_is_inferred_from_event_name() {
        let bus = EventBus::new();
        bus.emit("task:failed", serde_json::json!({})).await;
        bus.emit("task:completed", serde_json::json!({})).await;
        let stats = bus.get_stats().await;
        assert_eq!(*stats.by_severity.get("Warn").unwrap(), 1);
        assert_eq!(*stats.by_severity.get("Info").unwrap(), 1);
    }
}
