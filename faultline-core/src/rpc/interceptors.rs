//! gRPC server interceptors
//!
//! tonic services call these helpers from each method body:
//!
//! ```ignore
//! async fn pay(&self, request: Request<PayInvoice>) -> Result<Response<Receipt>, Status> {
//!     self.interceptors
//!         .unary("/billing.Invoices/Pay", request, |req| rpc::invoke(&self.pay, req))
//!         .await
//! }
//! ```
//!
//! The telemetry interceptor runs outermost: it opens a transaction named
//! after the full method, binds a telemetry scope to the request through its
//! extensions, and turns a handler panic into an `Internal` status after
//! reporting it. The logger interceptor records the incoming request.

use chrono::Utc;
use futures::{FutureExt, Stream};
use serde_json::{json, Map};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use tonic::metadata::KeyAndValueRef;
use tonic::{Request, Response, Status};

use super::codec::GENERIC_INTERNAL_MESSAGE;
use crate::context::{Context, Transport};
use crate::telemetry::{
    finish_guarded, start_transaction_guarded, AppIdentity, TelemetryScope, TelemetrySink, Transaction,
};
use crate::wrapper::panic_message;

/// Scope context naming the RPC transaction.
pub const TRANSACTION_CONTEXT: &str = "transaction";

/// Logs every incoming request before dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerInterceptor;

impl LoggerInterceptor {
    pub fn log_request<T: Debug>(&self, method: &str, request: &Request<T>) {
        tracing::info!(
            "type" = Transport::Grpc.as_str(),
            method,
            request = ?request.get_ref(),
            time = %Utc::now().to_rfc3339(),
            "Incoming Request"
        );
    }

    /// Log, then forward. Works for unary and streaming methods alike.
    pub async fn intercept<Req, Resp, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        next: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Debug,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        self.log_request(method, &request);
        next(request).await
    }
}

/// Opens a transaction and a panic barrier around each call.
#[derive(Clone)]
pub struct TelemetryInterceptor {
    sink: Arc<dyn TelemetrySink>,
    identity: AppIdentity,
}

impl TelemetryInterceptor {
    pub fn new(sink: Arc<dyn TelemetrySink>, identity: AppIdentity) -> Self {
        Self { sink, identity }
    }

    fn open<T>(
        &self,
        method: &str,
        request: &mut Request<T>,
    ) -> (Arc<TelemetryScope>, Option<Box<dyn Transaction>>) {
        let transaction = start_transaction_guarded(&self.sink, method);

        let scope = Arc::new(TelemetryScope::new(self.sink.clone()));
        self.identity.apply(&scope);
        scope.set_tag("method", method);
        let mut transaction_context = Map::new();
        transaction_context.insert("name".into(), json!(method));
        scope.set_context(TRANSACTION_CONTEXT, transaction_context);

        let ctx = match request.extensions().get::<Context>() {
            Some(ctx) => ctx.with_scope(scope.clone()),
            None => Context::new(Transport::Grpc)
                .with_method(method)
                .with_metadata(ascii_metadata(request))
                .with_scope(scope.clone()),
        };
        request.extensions_mut().insert(ctx);

        (scope, transaction)
    }

    fn recovered(&self, method: &str, scope: &TelemetryScope, payload: &(dyn std::any::Any + Send)) -> Status {
        let message = panic_message(payload);
        tracing::error!(method, panic = %message, "Recovered from panic in gRPC handler");
        scope.capture_panic(&message);
        Status::internal(GENERIC_INTERNAL_MESSAGE)
    }

    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &str,
        mut request: Request<Req>,
        next: F,
    ) -> Result<Response<Resp>, Status>
    where
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let (scope, transaction) = self.open(method, &mut request);
        let _finish = scopeguard::guard(transaction, finish_guarded);

        match AssertUnwindSafe(async move { next(request).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(self.recovered(method, &scope, payload.as_ref())),
        }
    }

    /// Like [`unary`](Self::unary), but the transaction stays open for the
    /// lifetime of the returned stream.
    pub async fn stream<Req, S, T, F, Fut>(
        &self,
        method: &str,
        mut request: Request<Req>,
        next: F,
    ) -> Result<Response<TelemetryStream<S>>, Status>
    where
        S: Stream<Item = Result<T, Status>>,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<S>, Status>>,
    {
        let (scope, transaction) = self.open(method, &mut request);
        let guard = scopeguard::guard(transaction, finish_guarded);

        match AssertUnwindSafe(async move { next(request).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => {
                let transaction = scopeguard::ScopeGuard::into_inner(guard);
                Ok(response.map(|inner| TelemetryStream::new(inner, method, scope, transaction)))
            }
            Ok(Err(status)) => Err(status),
            Err(payload) => Err(self.recovered(method, &scope, payload.as_ref())),
        }
    }
}

fn ascii_metadata<T>(request: &Request<T>) -> HashMap<String, String> {
    request
        .metadata()
        .iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => value
                .to_str()
                .ok()
                .map(|value| (key.as_str().to_string(), value.to_string())),
            KeyAndValueRef::Binary(..) => None,
        })
        .collect()
}

/// Server stream carrying its call's transaction.
///
/// The transaction finishes when the stream ends or is dropped. A panic while
/// polling is reported, surfaced as a final `Internal` item, and ends the
/// stream.
pub struct TelemetryStream<S> {
    inner: Option<Pin<Box<S>>>,
    method: String,
    scope: Arc<TelemetryScope>,
    transaction: Option<Box<dyn Transaction>>,
}

impl<S> TelemetryStream<S> {
    fn new(inner: S, method: &str, scope: Arc<TelemetryScope>, transaction: Option<Box<dyn Transaction>>) -> Self {
        Self {
            inner: Some(Box::pin(inner)),
            method: method.to_string(),
            scope,
            transaction,
        }
    }

    fn finish(&mut self) {
        finish_guarded(self.transaction.take());
    }
}

impl<S, T> Stream for TelemetryStream<S>
where
    S: Stream<Item = Result<T, Status>>,
{
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll_next(cx))) {
            Ok(Poll::Ready(None)) => {
                this.inner = None;
                this.finish();
                Poll::Ready(None)
            }
            Ok(poll) => poll,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(method = %this.method, panic = %message, "Recovered from panic in gRPC stream");
                this.scope.capture_panic(&message);
                this.inner = None;
                this.finish();
                Poll::Ready(Some(Err(Status::internal(GENERIC_INTERNAL_MESSAGE))))
            }
        }
    }
}

impl<S> Drop for TelemetryStream<S> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Telemetry outermost, logging inside it.
#[derive(Clone)]
pub struct RpcInterceptors {
    telemetry: TelemetryInterceptor,
    logger: LoggerInterceptor,
}

impl RpcInterceptors {
    pub fn new(sink: Arc<dyn TelemetrySink>, identity: AppIdentity) -> Self {
        Self {
            telemetry: TelemetryInterceptor::new(sink, identity),
            logger: LoggerInterceptor,
        }
    }

    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        next: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Debug,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<Resp>, Status>>,
    {
        let logger = self.logger;
        self.telemetry
            .unary(method, request, move |request| async move {
                logger.intercept(method, request, next).await
            })
            .await
    }

    pub async fn stream<Req, S, T, F, Fut>(
        &self,
        method: &str,
        request: Request<Req>,
        next: F,
    ) -> Result<Response<TelemetryStream<S>>, Status>
    where
        Req: Debug,
        S: Stream<Item = Result<T, Status>>,
        F: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Result<Response<S>, Status>>,
    {
        let logger = self.logger;
        self.telemetry
            .stream(method, request, move |request| async move {
                logger.intercept(method, request, next).await
            })
            .await
    }
}
