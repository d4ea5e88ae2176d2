//! Handler decoration
//!
//! Every transport drives business logic through the same [`Handler`] shape.
//! A [`Wrapper`] turns a handler into another handler; a [`WrapperChain`]
//! holds wrappers outermost first and folds them around a handler once, at
//! startup.
//!
//! ```text
//! call ─► telemetry ─► enrichment ─► recovery ─► handler
//!           reports      logs and      contains
//!           once         annotates     panics
//! ```

pub mod enrichment;
pub mod recovery;
pub mod telemetry;

pub use enrichment::EnrichmentWrapper;
pub use recovery::{panic_message, RecoveryMode, RecoveryWrapper};
pub use telemetry::TelemetryWrapper;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::FaultResult;
use crate::telemetry::{AppIdentity, TelemetrySink};

/// Positional handler arguments.
pub type Args = Vec<Value>;

/// Handler result; `Value::Null` is the zero value.
pub type Reply = Value;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: Context, args: Args) -> FaultResult<Reply>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context, Args) -> Fut + Send + Sync,
    Fut: Future<Output = FaultResult<Reply>> + Send,
{
    async fn call(&self, ctx: Context, args: Args) -> FaultResult<Reply> {
        (self.0)(ctx, args).await
    }
}

/// Adapt an async closure into a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Context, Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FaultResult<Reply>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

pub trait Wrapper: Send + Sync {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

impl<F> Wrapper for F
where
    F: Fn(Arc<dyn Handler>) -> Arc<dyn Handler> + Send + Sync,
{
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self(next)
    }
}

/// Ordered wrappers, outermost first.
#[derive(Clone, Default)]
pub struct WrapperChain {
    wrappers: Vec<Arc<dyn Wrapper>>,
}

impl WrapperChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Telemetry, then enrichment, then recovery.
    pub fn standard(sink: Arc<dyn TelemetrySink>, identity: AppIdentity) -> Self {
        Self::new()
            .with(TelemetryWrapper::new(sink, identity))
            .with(EnrichmentWrapper)
            .with(RecoveryWrapper::default())
    }

    /// Append `wrapper` inside the ones already present.
    pub fn with<W: Wrapper + 'static>(mut self, wrapper: W) -> Self {
        self.wrappers.push(Arc::new(wrapper));
        self
    }

    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }

    /// Fold the chain around `handler`.
    pub fn wrap(&self, handler: Arc<dyn Handler>) -> Arc<dyn Handler> {
        self.wrappers
            .iter()
            .rev()
            .fold(handler, |next, wrapper| wrapper.wrap(next))
    }
}

impl std::fmt::Debug for WrapperChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperChain")
            .field("wrappers", &self.wrappers.len())
            .finish()
    }
}
