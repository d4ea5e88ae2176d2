//! Error enrichment
//!
//! Classifies a returned error, logs its structured fields and annotates the
//! activation's telemetry scope with a `systemErr` context. The error itself
//! is forwarded untouched.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{Args, Handler, Reply, Wrapper};
use crate::context::Context;
use crate::error::{classify, FaultError, FaultResult};
use crate::telemetry::Level;

/// Scope context name carrying the classified error.
pub const SYSTEM_ERROR_CONTEXT: &str = "systemErr";

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichmentWrapper;

impl Wrapper for EnrichmentWrapper {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Enrich { next })
    }
}

struct Enrich {
    next: Arc<dyn Handler>,
}

#[async_trait]
impl Handler for Enrich {
    async fn call(&self, ctx: Context, args: Args) -> FaultResult<Reply> {
        let observed = ctx.clone();
        let result = self.next.call(ctx, args).await;
        if let Err(err) = &result {
            if catch_unwind(AssertUnwindSafe(|| annotate(&observed, err))).is_err() {
                tracing::warn!("Error enrichment panicked; error forwarded unchanged");
            }
        }
        result
    }
}

fn annotate(ctx: &Context, err: &FaultError) {
    let classified = classify(err);
    let details = serde_json::to_string(classified.details()).unwrap_or_default();

    tracing::error!(
        "type" = %ctx.transport(),
        method = ctx.method().unwrap_or(""),
        code = classified.code(),
        title = %classified.title(),
        details = %details,
        error = %err,
        "Handler returned error"
    );

    if let Some(scope) = ctx.scope() {
        let mut context = Map::new();
        context.insert("type".into(), json!(ctx.transport().as_str()));
        context.insert("kind".into(), json!(err.kind_name()));
        context.insert("code".into(), json!(classified.code()));
        context.insert("title".into(), json!(classified.title()));
        context.insert("details".into(), json!(classified.details()));
        scope.set_context(SYSTEM_ERROR_CONTEXT, context);
        scope.set_level(Level::Error);
    }
}
