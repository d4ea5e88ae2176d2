//! Non-RPC transports
//!
//! HTTP routes and background workers drive the same wrapped handlers as
//! the gRPC services in [`crate::rpc`].

pub mod http;
pub mod worker;

pub use http::{http_status, log_requests, route};
pub use worker::{consume, message_args, Job, WorkerLogger};
