//! Observability seam and tracing bootstrap
//!
//! The dispatcher reports each routing decision as a [`SpanRecord`] to an
//! [`ObservabilitySink`]. Exporters (OpenTelemetry and friends) live outside
//! this workspace; [`NoopSink`] and [`TracingSink`] cover the in-process cases.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::TelemetryConfig;

/// One finished unit of work, reported after the fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SpanRecord {
    /// Open a span now; close it with [`SpanRecord::finish`].
    pub fn begin(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            start: now,
            end: now,
            error: None,
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl ToString) {
        self.attributes.insert(key.into(), value.to_string());
    }

    pub fn finish(mut self, error: Option<String>) -> Self {
        self.end = Utc::now();
        self.error = error;
        self
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

/// Receives dispatch spans. Implementations must not block.
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, span: SpanRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn record(&self, _span: SpanRecord) {}
}

/// Emits each span as a `tracing` event on the `agentmesh::span` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservabilitySink for TracingSink {
    fn record(&self, span: SpanRecord) {
        let attrs = serde_json::to_string(&span.attributes).unwrap_or_default();
        match &span.error {
            Some(error) => warn!(
                target: "agentmesh::span",
                "{} failed after {}ms: {} {}",
                span.name,
                span.duration_ms(),
                error,
                attrs
            ),
            None => info!(
                target: "agentmesh::span",
                "{} finished in {}ms {}",
                span.name,
                span.duration_ms(),
                attrs
            ),
        }
    }
}

/// Pick the sink the telemetry flag asks for.
pub fn sink_from_config(config: &TelemetryConfig) -> Arc<dyn ObservabilitySink> {
    if config.enabled {
        Arc::new(TracingSink)
    } else {
        Arc::new(NoopSink)
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Fails if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<SpanRecord>>);

    impl ObservabilitySink for Recording {
        fn record(&self, span: SpanRecord) {
            self.0.lock().unwrap().push(span);
        }
    }

    #[test]
    fn test_span_builder() {
        let span = SpanRecord::begin("a2a.dispatch")
            .attr("route", "quick")
            .attr("timeout_secs", 10)
            .finish(None);
        assert_eq!(span.attributes["route"], "quick");
        assert_eq!(span.attributes["timeout_secs"], "10");
        assert!(span.end >= span.start);
        assert!(span.error.is_none());
    }

    #[test]
    fn test_recording_sink_receives_error() {
        let sink = Recording::default();
        sink.record(SpanRecord::begin("x").finish(Some("boom".into())));
        let spans = sink.0.lock().unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_noop_and_tracing_sinks_accept_spans() {
        NoopSink.record(SpanRecord::begin("x").finish(None));
        TracingSink.record(SpanRecord::begin("x").finish(Some("e".into())));
    }

    #[test]
    fn test_init_tracing_twice_fails_second_time() {
        let _ = init_tracing("debug");
        assert!(init_tracing("debug").is_err());
    }

    #[test]
    fn test_sink_from_config() {
        let enabled = TelemetryConfig {
            enabled: true,
            ..TelemetryConfig::default()
        };
        // Both variants must be usable through the trait object.
        sink_from_config(&enabled).record(SpanRecord::begin("on").finish(None));
        sink_from_config(&TelemetryConfig::default()).record(SpanRecord::begin("off").finish(None));
    }
}
