//! axum adapter
//!
//! [`route`] serves a wrapped [`Handler`] as a POST endpoint taking a JSON
//! array of arguments. Failures become a JSON error body with an HTTP status
//! derived from the error's RPC status code.

use axum::body::Bytes;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, MethodRouter};
use axum::Json;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::Code;

use crate::context::{Context, Transport};
use crate::error::{classify, Details, FaultError, StructuredError, BAD_REQUEST, INTERNAL_SERVER_ERROR};
use crate::wrapper::{Args, Handler};

/// HTTP status for an RPC status code.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for StructuredError {
    fn into_response(self) -> Response {
        (http_status(self.status()), Json(self.body())).into_response()
    }
}

impl IntoResponse for FaultError {
    fn into_response(self) -> Response {
        let known = self
            .chain()
            .any(|node| matches!(node, FaultError::Structured(_) | FaultError::Validation(_)));
        if known {
            classify(&self).into_response()
        } else {
            tracing::error!(error = %self, "Unstructured error reached the HTTP boundary");
            INTERNAL_SERVER_ERROR.error().into_response()
        }
    }
}

fn parse_args(body: &[u8]) -> Result<Args, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(match serde_json::from_slice(body)? {
        Value::Array(items) => items,
        value => vec![value],
    })
}

fn ascii_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

async fn dispatch(handler: Arc<dyn Handler>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let args = match parse_args(&body) {
        Ok(args) => args,
        Err(e) => {
            return BAD_REQUEST
                .error_with(format!("Request body is not valid JSON: {}", e), Details::new())
                .into_response()
        }
    };

    // Cancel the call's context if the client goes away and axum drops us.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let ctx = Context::with_cancellation(Transport::Http, cancel)
        .with_method(uri.path())
        .with_metadata(ascii_headers(&headers));

    match handler.call(ctx, args).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => err.into_response(),
    }
}

/// POST route driving `handler`.
pub fn route<S>(handler: Arc<dyn Handler>) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    post(move |uri: Uri, headers: HeaderMap, body: Bytes| {
        let handler = handler.clone();
        async move { dispatch(handler, uri, headers, body).await }
    })
}

/// Request logging middleware, for `axum::middleware::from_fn`.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    tracing::info!(
        "type" = Transport::Http.as_str(),
        method = %method,
        uri = %uri,
        time = %Utc::now().to_rfc3339(),
        "Incoming Request"
    );

    let response = next.run(request).await;
    tracing::info!(
        "type" = Transport::Http.as_str(),
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        "Request completed"
    );
    response
}
