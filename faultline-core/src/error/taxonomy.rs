//! Registry of named error kinds
//!
//! Each kind fixes a canonical status, code, title and default message. An
//! occurrence built from a kind keeps the code and title and may replace the
//! message and details.

use tonic::Code;

use super::structured::{Details, StructuredError};
use super::types::FaultError;

#[derive(Debug, PartialEq, Eq)]
pub struct ErrorKind {
    pub status: Code,
    pub code: i64,
    pub title: &'static str,
    pub message: &'static str,
}

pub static BAD_REQUEST: ErrorKind = ErrorKind {
    status: Code::InvalidArgument,
    code: 4000,
    title: "bad_request",
    message: "The request could not be understood",
};

pub static VALIDATION_ERROR: ErrorKind = ErrorKind {
    status: Code::InvalidArgument,
    code: 4001,
    title: "validation_failed",
    message: "One or more fields failed validation",
};

pub static UNAUTHORIZED: ErrorKind = ErrorKind {
    status: Code::Unauthenticated,
    code: 4010,
    title: "unauthorized",
    message: "Authentication is required",
};

pub static FORBIDDEN: ErrorKind = ErrorKind {
    status: Code::PermissionDenied,
    code: 4030,
    title: "forbidden",
    message: "Permission denied",
};

pub static NOT_FOUND: ErrorKind = ErrorKind {
    status: Code::NotFound,
    code: 4040,
    title: "not_found",
    message: "The requested resource was not found",
};

pub static CONFLICT: ErrorKind = ErrorKind {
    status: Code::AlreadyExists,
    code: 4090,
    title: "conflict",
    message: "The resource already exists",
};

pub static INTERNAL_SERVER_ERROR: ErrorKind = ErrorKind {
    status: Code::Internal,
    code: 5000,
    title: "internal_server_error",
    message: "Internal server error",
};

pub static SERVICE_UNAVAILABLE: ErrorKind = ErrorKind {
    status: Code::Unavailable,
    code: 5030,
    title: "service_unavailable",
    message: "The service is temporarily unavailable",
};

pub static DEADLINE_EXCEEDED: ErrorKind = ErrorKind {
    status: Code::DeadlineExceeded,
    code: 5040,
    title: "deadline_exceeded",
    message: "The operation did not complete in time",
};

pub static REGISTRY: &[&ErrorKind] = &[
    &BAD_REQUEST,
    &VALIDATION_ERROR,
    &UNAUTHORIZED,
    &FORBIDDEN,
    &NOT_FOUND,
    &CONFLICT,
    &INTERNAL_SERVER_ERROR,
    &SERVICE_UNAVAILABLE,
    &DEADLINE_EXCEEDED,
];

impl ErrorKind {
    /// Find the registered kind identified by `code` and `title`.
    pub fn lookup(code: i64, title: &str) -> Option<&'static ErrorKind> {
        REGISTRY
            .iter()
            .copied()
            .find(|kind| kind.code == code && kind.title == title)
    }

    /// A new occurrence with the canonical message and no details.
    pub fn error(&'static self) -> StructuredError {
        StructuredError::new(self.status, self.code, self.title, self.message, Details::new())
    }

    pub fn error_with(&'static self, message: impl Into<String>, details: Details) -> StructuredError {
        StructuredError::new(self.status, self.code, self.title, message, details)
    }

    /// A new occurrence wrapping `cause`; the cause's own trace is preserved.
    pub fn wrap(&'static self, cause: FaultError) -> StructuredError {
        self.error().with_cause(cause)
    }

    pub fn wrap_with(
        &'static self,
        cause: FaultError,
        message: impl Into<String>,
        details: Details,
    ) -> StructuredError {
        self.error_with(message, details).with_cause(cause)
    }

    pub fn is(&self, err: &StructuredError) -> bool {
        err.code() == self.code && err.title() == self.title
    }
}
