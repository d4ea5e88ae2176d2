//! The structured, wire-encodable application error
//!
//! A `StructuredError` splits what humans read from what machines act on:
//! `Display` yields only the message, while status, code, title and details
//! are reached through accessors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tonic::Code;

use super::taxonomy::ErrorKind;
use super::types::{FaultError, Trace};

/// Field or key name mapped to an explanatory string.
pub type Details = HashMap<String, String>;

#[derive(Clone, Debug)]
pub struct StructuredError {
    status: Code,
    code: i64,
    title: String,
    message: String,
    details: Details,
    timestamp: DateTime<Utc>,
    cause: Option<Arc<FaultError>>,
    trace: Option<Trace>,
}

impl StructuredError {
    pub fn new(
        status: Code,
        code: i64,
        title: impl Into<String>,
        message: impl Into<String>,
        details: Details,
    ) -> Self {
        Self {
            status,
            code,
            title: title.into(),
            message: message.into(),
            details,
            timestamp: Utc::now(),
            cause: None,
            trace: None,
        }
    }

    pub fn status(&self) -> Code {
        self.status
    }

    pub fn code(&self) -> i64 {
        self.code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The wrapped underlying error, if this error was built with one.
    pub fn cause(&self) -> Option<&FaultError> {
        self.cause.as_deref()
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// The registry entry matching this error's code and title.
    pub fn kind(&self) -> Option<&'static ErrorKind> {
        ErrorKind::lookup(self.code, &self.title)
    }

    pub fn set_status(&mut self, status: Code) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_code(&mut self, code: i64) -> &mut Self {
        self.code = code;
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = title.into();
        self
    }

    pub fn set_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = message.into();
        self
    }

    pub fn set_details(&mut self, details: Details) -> &mut Self {
        self.details = details;
        self
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_details(mut self, details: Details) -> Self {
        self.details = details;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach an underlying cause. The cause keeps its own trace; this node
    /// captures one only if it has none yet.
    pub fn with_cause(mut self, cause: FaultError) -> Self {
        self.cause = Some(Arc::new(cause));
        if self.trace.is_none() {
            self.trace = Trace::capture();
        }
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// JSON body used by the HTTP transport.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            status: self.status as i32,
            code: self.code,
            title: self.title.clone(),
            msg: self.message.clone(),
            details: self.details.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Equality covers the wire-visible fields only.
impl PartialEq for StructuredError {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status
            && self.code == other.code
            && self.title == other.title
            && self.message == other.message
            && self.details == other.details
            && self.timestamp == other.timestamp
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StructuredError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: i32,
    pub code: i64,
    pub title: String,
    pub msg: String,
    #[serde(rename = "errorDetail", default, skip_serializing_if = "HashMap::is_empty")]
    pub details: Details,
    pub timestamp: DateTime<Utc>,
}
