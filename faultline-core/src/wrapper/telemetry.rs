//! Telemetry reporting
//!
//! Outermost wrapper of the standard chain. Binds a telemetry scope to the
//! activation, tags it and reports a returned error exactly once. A panic
//! escaping the inner chain is reported and then resumed, since containing it
//! is the recovery wrapper's job.

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{panic_message, Args, Handler, Reply, Wrapper};
use crate::context::Context;
use crate::error::FaultResult;
use crate::telemetry::{AppIdentity, TelemetryScope, TelemetrySink};

pub struct TelemetryWrapper {
    sink: Arc<dyn TelemetrySink>,
    identity: AppIdentity,
}

impl TelemetryWrapper {
    pub fn new(sink: Arc<dyn TelemetrySink>, identity: AppIdentity) -> Self {
        Self { sink, identity }
    }
}

impl Wrapper for TelemetryWrapper {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Report {
            next,
            sink: self.sink.clone(),
            identity: self.identity.clone(),
        })
    }
}

struct Report {
    next: Arc<dyn Handler>,
    sink: Arc<dyn TelemetrySink>,
    identity: AppIdentity,
}

impl Report {
    /// Reuse the scope an interceptor already bound, or open a fresh one.
    fn scope_for(&self, ctx: &Context, args: &Args) -> Arc<TelemetryScope> {
        let scope = ctx
            .scope()
            .cloned()
            .unwrap_or_else(|| Arc::new(TelemetryScope::new(self.sink.clone())));

        let tagged = catch_unwind(AssertUnwindSafe(|| {
            self.identity.apply(&scope);
            scope.set_tag("type", ctx.transport().as_str());
            if let Some(method) = ctx.method() {
                scope.set_tag("method", method);
            }
            scope.set_extra("args", Value::Array(args.clone()));
        }));
        if tagged.is_err() {
            tracing::warn!("Failed to tag telemetry scope");
        }
        scope
    }
}

#[async_trait]
impl Handler for Report {
    async fn call(&self, ctx: Context, args: Args) -> FaultResult<Reply> {
        let scope = self.scope_for(&ctx, &args);
        let ctx = ctx.with_scope(scope.clone());

        match AssertUnwindSafe(self.next.call(ctx, args)).catch_unwind().await {
            Ok(result) => {
                if let Err(err) = &result {
                    scope.capture_error(err);
                }
                result
            }
            Err(payload) => {
                scope.capture_panic(&panic_message(payload.as_ref()));
                std::panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Transport;
    use crate::error::{FaultError, CONFLICT};
    use crate::telemetry::{Level, MemoryTelemetry, TAG_APPLICATION, TAG_ENVIRONMENT};
    use crate::wrapper::{handler_fn, EnrichmentWrapper, WrapperChain};
    use serde_json::json;

    fn identity() -> AppIdentity {
        AppIdentity::new("billing", "staging")
    }

    #[tokio::test]
    async fn reports_error_once_with_context() {
        let sink = Arc::new(MemoryTelemetry::new());
        let chain = WrapperChain::new()
            .with(TelemetryWrapper::new(sink.clone(), identity()))
            .with(EnrichmentWrapper);
        let handler = chain.wrap(handler_fn(|_ctx, _args| async {
            Err(CONFLICT.error_with("invoice already paid", Default::default()).into())
        }));

        let ctx = Context::new(Transport::Grpc).with_method("/billing.Invoices/Pay");
        let err = handler.call(ctx, vec![json!({"id": 9})]).await.unwrap_err();
        assert_eq!(err.to_string(), "invoice already paid");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.message, "invoice already paid");
        assert_eq!(event.tags[TAG_APPLICATION], "billing");
        assert_eq!(event.tags[TAG_ENVIRONMENT], "staging");
        assert_eq!(event.tags["method"], "/billing.Invoices/Pay");
        assert_eq!(event.extras["args"], json!([{"id": 9}]));
        assert_eq!(event.contexts["systemErr"]["code"], json!(4090));
    }

    #[tokio::test]
    async fn success_reports_nothing() {
        let sink = Arc::new(MemoryTelemetry::new());
        let handler = TelemetryWrapper::new(sink.clone(), identity())
            .wrap(handler_fn(|_ctx, _args| async { Ok(json!("done")) }));
        let reply = handler.call(Context::new(Transport::Http), vec![]).await.unwrap();
        assert_eq!(reply, json!("done"));
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_does_not_mask_the_error() {
        let sink = Arc::new(MemoryTelemetry::new());
        sink.fail_reports(true);
        let handler = TelemetryWrapper::new(sink.clone(), identity()).wrap(handler_fn(|_ctx, _args| async {
            Err(FaultError::resource("ledger", "connection reset"))
        }));
        let err = handler.call(Context::new(Transport::Worker), vec![]).await.unwrap_err();
        assert!(matches!(err, FaultError::Resource { .. }));
    }

    #[tokio::test]
    async fn escaping_panic_is_reported_then_resumed() {
        let sink = Arc::new(MemoryTelemetry::new());
        let handler = TelemetryWrapper::new(sink.clone(), identity()).wrap(handler_fn(|_ctx, _args| async {
            if true {
                panic!("ledger invariant broken");
            }
            Ok(Value::Null)
        }));

        let outcome = AssertUnwindSafe(handler.call(Context::new(Transport::Grpc), vec![]))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::Fatal);
        assert_eq!(events[0].message, "ledger invariant broken");
    }
}
