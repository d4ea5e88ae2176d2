//! Faultline core
//!
//! Failure handling for services that serve the same business handlers over
//! gRPC, HTTP and background workers:
//!
//! - [`error`]: structured errors, the error taxonomy and classification
//! - [`rpc`]: the structured-error status codec and gRPC interceptors
//! - [`wrapper`]: composable handler wrappers (telemetry, enrichment, recovery)
//! - [`transport`]: HTTP and worker adapters
//! - [`lifecycle`]: ordered resource acquisition and reverse teardown
//! - [`telemetry`]: the error-reporting sink abstraction
//! - [`config`] and [`observability`]: configuration and logging setup

pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod telemetry;
pub mod transport;
pub mod wrapper;

pub use config::FaultlineConfig;
pub use context::{Context, Transport};
pub use error::{ErrorKind, FaultError, FaultResult, StructuredError};
pub use lifecycle::{Collaborators, InfraContainer, PartialInit, Teardown};
pub use telemetry::{AppIdentity, TelemetrySink};
pub use wrapper::{Handler, Wrapper, WrapperChain};
