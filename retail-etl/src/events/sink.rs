//! Lifecycle event sinks.

use super::PipelineEvent;
use async_trait::async_trait;
use tracing::{debug, info, Level};

/// Receives run lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    async fn emit(&self, event: &PipelineEvent);

    /// Emits an event without waiting. Must not fail.
    fn try_emit(&self, event: &PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}

    fn try_emit(&self, _event: &PipelineEvent) {}
}

/// Writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level` (debug or info).
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let stage = event.stage.map(|s| s.as_str());
        if self.level == Level::DEBUG {
            debug!(
                event_type = event.kind.as_str(),
                run_id = %event.run_id,
                stage,
                attempt = event.attempt,
                data = %event.data,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = event.kind.as_str(),
                run_id = %event.run_id,
                stage,
                attempt = event.attempt,
                data = %event.data,
                "Event: {}", event.kind
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &PipelineEvent) {
        self.log_event(event);
    }
}

/// Stores events in memory for assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every collected event.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the event type names in emission order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.read().iter().map(|e| e.kind.as_str()).collect()
    }

    /// Returns events whose type starts with `prefix` (e.g. `stage.`).
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.as_str().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops every collected event.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;
    use crate::events::EventKind;
    use uuid::Uuid;

    fn event(kind: EventKind) -> PipelineEvent {
        PipelineEvent::new(kind, Uuid::new_v4(), 1)
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_events() {
        let sink = LoggingEventSink::debug();
        sink.emit(&event(EventKind::RunStarted)).await;
        sink.try_emit(&event(EventKind::StageStarted).with_stage(StageName::Load));
    }

    #[tokio::test]
    async fn test_collecting_sink_filters_by_prefix() {
        let sink = CollectingEventSink::new();
        sink.emit(&event(EventKind::RunStarted)).await;
        sink.emit(&event(EventKind::StageStarted)).await;
        sink.try_emit(&event(EventKind::StageCompleted));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.kinds()[0], "run.started");

        sink.clear();
        assert!(sink.is_empty());
    }
}
