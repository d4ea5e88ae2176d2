//! Error representation and classification
//!
//! Failures deep in business logic are carried as a [`FaultError`] chain.
//! Known application failures are [`StructuredError`] values built from the
//! [`taxonomy`] registry; they keep a machine-readable status, code, title and
//! detail map next to the human message, and travel over RPC through
//! [`crate::rpc::codec`].
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  FaultError (wrap chain, walked with FaultError::cause)   │
//! ├───────────────────────────────────────────────────────────┤
//! │  Context ──► Structured ──► Context ──► Other             │
//! │     │            │                        │               │
//! │   trace?     status/code/title/         trace?            │
//! │              message/details/timestamp                    │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod classifier;
pub mod conversions;
pub mod structured;
pub mod taxonomy;
pub mod types;

pub use classifier::{
    as_structured, classify, contains_message, deepest_trace, extract_validation_details,
    is_structured,
};
pub use conversions::ErrorContext;
pub use structured::{Details, ErrorBody, StructuredError};
pub use taxonomy::{
    ErrorKind, BAD_REQUEST, CONFLICT, DEADLINE_EXCEEDED, FORBIDDEN, INTERNAL_SERVER_ERROR,
    NOT_FOUND, SERVICE_UNAVAILABLE, UNAUTHORIZED, VALIDATION_ERROR,
};
pub use types::{Chain, FaultError, FaultResult, Trace};
