//! Per-call context threaded through every handler invocation
//!
//! A `Context` carries the cancellation token of the call, the transport it
//! arrived on and, once the telemetry wrapper has run, the activation's
//! telemetry scope. Derived contexts share the parent's token.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::telemetry::TelemetryScope;

/// Transport a call arrived on; logged as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Grpc,
    Http,
    Worker,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Grpc => "grpc",
            Transport::Http => "http",
            Transport::Worker => "worker",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct Context {
    cancel: CancellationToken,
    transport: Transport,
    method: Option<Arc<str>>,
    metadata: Arc<HashMap<String, String>>,
    scope: Option<Arc<TelemetryScope>>,
}

impl Context {
    pub fn new(transport: Transport) -> Self {
        Self::with_cancellation(transport, CancellationToken::new())
    }

    pub fn with_cancellation(transport: Transport, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            transport,
            method: None,
            metadata: Arc::new(HashMap::new()),
            scope: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<Arc<str>>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// A context bound to `scope`, sharing this context's cancellation.
    pub fn with_scope(&self, scope: Arc<TelemetryScope>) -> Self {
        Self {
            scope: Some(scope),
            ..self.clone()
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn scope(&self) -> Option<&Arc<TelemetryScope>> {
        self.scope.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport)
            .field("method", &self.method)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("scoped", &self.scope.is_some())
            .finish()
    }
}
