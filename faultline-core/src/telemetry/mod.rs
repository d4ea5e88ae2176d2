//! Telemetry sink contract and per-activation scopes
//!
//! The sink is injected explicitly wherever it is needed. Each handler
//! activation gets its own [`TelemetryScope`] holding tags, extras and named
//! contexts; capturing an error from a scope snapshots that state into an
//! [`ErrorEvent`] and hands it to the sink.
//!
//! Delivery is a side channel: a sink that fails or panics is logged and
//! otherwise ignored.

pub mod memory;
pub mod otel;

pub use memory::{MemoryTelemetry, TransactionRecord};
pub use otel::{OtelTelemetry, OtelTelemetryFactory};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{deepest_trace, FaultError, FaultResult};
use crate::lifecycle::Resource;

pub const TAG_APPLICATION: &str = "application";
pub const TAG_ENVIRONMENT: &str = "AppEnv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

/// A captured failure, as delivered to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub message: String,
    pub error_type: String,
    pub level: Level,
    pub tags: BTreeMap<String, String>,
    pub extras: BTreeMap<String, Value>,
    pub contexts: BTreeMap<String, Map<String, Value>>,
    pub trace: String,
    pub timestamp: DateTime<Utc>,
}

/// An open unit of work; finished exactly once.
pub trait Transaction: Send {
    fn name(&self) -> &str;

    fn finish(self: Box<Self>);
}

#[async_trait]
pub trait TelemetrySink: Resource {
    /// Deliver one event.
    fn report(&self, event: ErrorEvent) -> FaultResult<()>;

    fn start_transaction(&self, name: &str) -> Box<dyn Transaction>;

    /// Wait up to `timeout` for buffered events to be delivered.
    async fn flush(&self, timeout: Duration) -> bool;
}

/// Application identity stamped on every scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub name: String,
    pub env: String,
}

impl AppIdentity {
    pub fn new(name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
        }
    }

    pub fn apply(&self, scope: &TelemetryScope) {
        scope.set_tag(TAG_APPLICATION, &self.name);
        scope.set_tag(TAG_ENVIRONMENT, &self.env);
    }
}

impl From<&AppConfig> for AppIdentity {
    fn from(config: &AppConfig) -> Self {
        Self::new(&config.name, &config.env)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScopeData {
    pub tags: BTreeMap<String, String>,
    pub extras: BTreeMap<String, Value>,
    pub contexts: BTreeMap<String, Map<String, Value>>,
    pub level: Option<Level>,
}

pub struct TelemetryScope {
    sink: Arc<dyn TelemetrySink>,
    data: Mutex<ScopeData>,
}

impl TelemetryScope {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            data: Mutex::new(ScopeData::default()),
        }
    }

    pub fn sink(&self) -> &Arc<dyn TelemetrySink> {
        &self.sink
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.lock().tags.insert(key.into(), value.into());
    }

    pub fn set_extra(&self, key: impl Into<String>, value: Value) {
        self.data.lock().extras.insert(key.into(), value);
    }

    pub fn set_context(&self, name: impl Into<String>, context: Map<String, Value>) {
        self.data.lock().contexts.insert(name.into(), context);
    }

    pub fn set_level(&self, level: Level) {
        self.data.lock().level = Some(level);
    }

    pub fn snapshot(&self) -> ScopeData {
        self.data.lock().clone()
    }

    pub fn capture_error(&self, err: &FaultError) {
        let event = self.event(err.to_string(), err.kind_name(), deepest_trace(err));
        self.deliver(event);
    }

    /// Capture a recovered panic.
    pub fn capture_panic(&self, message: &str) {
        let mut event = self.event(message.to_string(), "panic", String::new());
        event.level = Level::Fatal;
        self.deliver(event);
    }

    fn event(&self, message: String, error_type: &str, trace: String) -> ErrorEvent {
        let data = self.snapshot();
        ErrorEvent {
            message,
            error_type: error_type.to_string(),
            level: data.level.unwrap_or(Level::Error),
            tags: data.tags,
            extras: data.extras,
            contexts: data.contexts,
            trace,
            timestamp: Utc::now(),
        }
    }

    fn deliver(&self, event: ErrorEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.sink.report(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, sink = self.sink.name(), "Failed to deliver telemetry event");
            }
            Err(_) => {
                tracing::warn!(sink = self.sink.name(), "Telemetry sink panicked while reporting");
            }
        }
    }
}

impl std::fmt::Debug for TelemetryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryScope")
            .field("sink", &self.sink.name())
            .field("data", &*self.data.lock())
            .finish()
    }
}

/// Start a transaction, containing any panic raised by the sink.
pub(crate) fn start_transaction_guarded(
    sink: &Arc<dyn TelemetrySink>,
    name: &str,
) -> Option<Box<dyn Transaction>> {
    match catch_unwind(AssertUnwindSafe(|| sink.start_transaction(name))) {
        Ok(transaction) => Some(transaction),
        Err(_) => {
            tracing::warn!(sink = sink.name(), transaction = name, "Telemetry sink panicked starting a transaction");
            None
        }
    }
}

/// Finish a transaction, containing any panic raised by the sink.
pub(crate) fn finish_guarded(transaction: Option<Box<dyn Transaction>>) {
    if let Some(transaction) = transaction {
        if catch_unwind(AssertUnwindSafe(|| transaction.finish())).is_err() {
            tracing::warn!("Telemetry sink panicked finishing a transaction");
        }
    }
}
