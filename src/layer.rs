//! `tracing` integration: forwards events to a [`Hook`]

use crate::hook::Hook;
use crate::record::{Level, Record};
use serde_json::{Map, Value};
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::layer::{Context, Layer};

/// Targets whose events are never forwarded, so delivering a batch cannot
/// produce more records to deliver.
const IGNORED_TARGETS: &[&str] = &[
    "kafka_rest_logger",
    "reqwest",
    "hyper",
    "hyper_util",
    "h2",
    "tower",
    "tower_http",
    "want",
    "rustls",
    "tokio_rustls",
];

/// Layer turning `tracing` events into records
#[derive(Debug, Clone)]
pub struct KafkaRestLayer {
    hook: Hook,
    min_level: Level,
}

impl KafkaRestLayer {
    pub fn new(hook: Hook) -> Self {
        Self {
            hook,
            min_level: Level::Trace,
        }
    }

    /// Ignore events less severe than `level`
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    fn accepts(&self, target: &str, level: Level) -> bool {
        level <= self.min_level
            && !IGNORED_TARGETS
                .iter()
                .any(|ignored| target == *ignored || target.starts_with(&format!("{}::", ignored)))
    }
}

impl<S: Subscriber> Layer<S> for KafkaRestLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // Records bridged from `log` carry their real target in `log.*` fields
        let normalized = event.normalized_metadata();
        let metadata = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let level = Level::from(metadata.level());

        if !self.accepts(metadata.target(), level) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = Record::new(level, visitor.message.unwrap_or_default())
            .with_fields(visitor.fields)
            .with_field("target", metadata.target());

        self.hook.submit_detached(record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name().starts_with("log.") {
            return;
        }

        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}
