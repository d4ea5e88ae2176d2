//! Error conversion implementations for FaultError
//!
//! This module provides From trait implementations for converting
//! external error types into FaultError variants.

use super::structured::StructuredError;
use super::taxonomy::{DEADLINE_EXCEEDED, NOT_FOUND};
use super::types::{FaultError, Trace};
use crate::rpc::codec;

impl From<StructuredError> for FaultError {
    fn from(err: StructuredError) -> Self {
        FaultError::Structured(Box::new(err))
    }
}

impl From<validator::ValidationErrors> for FaultError {
    fn from(err: validator::ValidationErrors) -> Self {
        FaultError::Validation(err)
    }
}

// A status carrying a detail record becomes the structured error it encodes
impl From<tonic::Status> for FaultError {
    fn from(status: tonic::Status) -> Self {
        match codec::decode(&status) {
            Some(structured) => structured.into(),
            None => FaultError::Rpc(status),
        }
    }
}

impl From<sqlx::Error> for FaultError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => NOT_FOUND.wrap(FaultError::Database(err)).into(),
            other => FaultError::Database(other),
        }
    }
}

impl From<anyhow::Error> for FaultError {
    fn from(err: anyhow::Error) -> Self {
        FaultError::Other {
            source: err.into(),
            trace: Trace::capture(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for FaultError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        DEADLINE_EXCEEDED.wrap(FaultError::other(err)).into()
    }
}

impl From<tokio::task::JoinError> for FaultError {
    fn from(err: tokio::task::JoinError) -> Self {
        let message = if err.is_panic() {
            "Task panicked".to_string()
        } else if err.is_cancelled() {
            "Task was cancelled".to_string()
        } else {
            format!("Task join failed: {}", err)
        };
        FaultError::Other {
            source: message.into(),
            trace: None,
        }
    }
}

impl FaultError {
    /// Wrap an arbitrary error, capturing a trace when enabled.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FaultError::Other {
            source: Box::new(err),
            trace: Trace::capture(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        FaultError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn resource(resource: impl Into<String>, message: impl Into<String>) -> Self {
        FaultError::Resource {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Wrap `self` with a context message and a fresh trace.
    pub fn context(self, context: impl Into<String>) -> Self {
        FaultError::Context {
            context: context.into(),
            source: Box::new(self),
            trace: Trace::capture(),
        }
    }
}

/// Extension trait adding context to fallible results
pub trait ErrorContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T, FaultError>;

    fn with_context<F, S>(self, f: F) -> Result<T, FaultError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: Into<FaultError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, FaultError> {
        self.map_err(|e| {
            let err: FaultError = e.into();
            err.context(context)
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T, FaultError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| {
            let err: FaultError = e.into();
            err.context(f())
        })
    }
}
