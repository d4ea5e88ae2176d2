//! Core error type definitions
//!
//! `FaultError` is the value every handler, codec and lifecycle step returns.
//! Variants that wrap another error expose it through [`FaultError::cause`],
//! which lets the classifier walk an arbitrarily deep chain with plain
//! pattern matching.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::structured::StructuredError;

/// A captured call-site trace attached to an error node.
#[derive(Clone)]
pub struct Trace(Arc<Backtrace>);

impl Trace {
    /// Capture a trace if `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE` enable it.
    pub fn capture() -> Option<Self> {
        let backtrace = Backtrace::capture();
        match backtrace.status() {
            BacktraceStatus::Captured => Some(Self(Arc::new(backtrace))),
            _ => None,
        }
    }

    /// Capture a trace regardless of environment configuration.
    pub fn force_capture() -> Self {
        Self(Arc::new(Backtrace::force_capture()))
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.0
    }

    /// Whether two handles point at the same captured trace.
    pub fn same_as(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Trace").field(&self.0.status()).finish()
    }
}

#[derive(Error, Debug)]
pub enum FaultError {
    /// A known application error carrying wire-encodable metadata
    #[error(transparent)]
    Structured(Box<StructuredError>),

    #[error("Validation failed: {0}")]
    Validation(validator::ValidationErrors),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<FaultError>,
        trace: Option<Trace>,
    },

    /// A remote call failed with a status that carried no detail record
    #[error("Remote call failed: {0}")]
    Rpc(tonic::Status),

    #[error("Acquiring {resource} timed out after {duration:?}")]
    Timeout { resource: String, duration: Duration },

    #[error("Resource {resource} failed: {message}")]
    Resource { resource: String, message: String },

    #[error("Configuration error for {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Telemetry error: {message}")]
    Telemetry { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{source}")]
    Other {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
        trace: Option<Trace>,
    },
}

pub type FaultResult<T> = std::result::Result<T, FaultError>;

impl FaultError {
    /// The next node in the wrap chain, if any.
    pub fn cause(&self) -> Option<&FaultError> {
        match self {
            FaultError::Structured(err) => err.cause(),
            FaultError::Context { source, .. } => Some(source),
            FaultError::Validation(_)
            | FaultError::Rpc(_)
            | FaultError::Timeout { .. }
            | FaultError::Resource { .. }
            | FaultError::Configuration { .. }
            | FaultError::Database(_)
            | FaultError::Telemetry { .. }
            | FaultError::Io(_)
            | FaultError::Other { .. } => None,
        }
    }

    /// The diagnostic trace attached to this node only.
    pub fn trace(&self) -> Option<&Trace> {
        match self {
            FaultError::Structured(err) => err.trace(),
            FaultError::Context { trace, .. } | FaultError::Other { trace, .. } => trace.as_ref(),
            _ => None,
        }
    }

    /// Iterate over this error and every cause beneath it, outermost first.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    /// Stable, low-cardinality name used as the `type` of telemetry events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FaultError::Structured(_) => "structured",
            FaultError::Validation(_) => "validation",
            FaultError::Context { .. } => "context",
            FaultError::Rpc(_) => "rpc",
            FaultError::Timeout { .. } => "timeout",
            FaultError::Resource { .. } => "resource",
            FaultError::Configuration { .. } => "configuration",
            FaultError::Database(_) => "database",
            FaultError::Telemetry { .. } => "telemetry",
            FaultError::Io(_) => "io",
            FaultError::Other { .. } => "other",
        }
    }
}

/// Iterator returned by [`FaultError::chain`].
pub struct Chain<'a> {
    next: Option<&'a FaultError>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a FaultError;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.cause();
        Some(current)
    }
}
