//! gRPC integration
//!
//! [`codec`] carries structured errors across the status channel;
//! [`interceptors`] wraps tonic methods with logging and telemetry; [`invoke`]
//! drives a wrapped [`Handler`] from a tonic method body.

pub mod codec;
pub mod interceptors;

pub use codec::{
    decode, decode_error, encode, is_structured_error, to_status, ErrorDetail,
    ERROR_DETAIL_TYPE_URL, GENERIC_INTERNAL_MESSAGE,
};
pub use interceptors::{LoggerInterceptor, RpcInterceptors, TelemetryInterceptor, TelemetryStream};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tonic::{Request, Response, Status};

use crate::context::{Context, Transport};
use crate::wrapper::{Args, Handler};

/// Run `handler` for a unary gRPC call.
///
/// The request message becomes the handler's arguments (a JSON array is
/// spread, anything else is a single argument). The context bound by the
/// telemetry interceptor is reused when present. Errors leave through
/// [`to_status`].
pub async fn invoke<Req, Resp>(handler: &Arc<dyn Handler>, request: Request<Req>) -> Result<Response<Resp>, Status>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let ctx = request
        .extensions()
        .get::<Context>()
        .cloned()
        .unwrap_or_else(|| Context::new(Transport::Grpc));

    let args: Args = match serde_json::to_value(request.into_inner()) {
        Ok(Value::Array(items)) => items,
        Ok(value) => vec![value],
        Err(e) => return Err(Status::invalid_argument(format!("Unreadable request: {}", e))),
    };

    let reply = handler.call(ctx, args).await.map_err(|e| to_status(&e))?;
    serde_json::from_value(reply).map(Response::new).map_err(|e| {
        tracing::error!(error = %e, "Handler reply does not match the response message");
        Status::internal(GENERIC_INTERNAL_MESSAGE)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Details, VALIDATION_ERROR};
    use crate::telemetry::{AppIdentity, MemoryTelemetry};
    use crate::wrapper::{handler_fn, WrapperChain};
    use serde::Deserialize;
    use serde_json::json;
    use tonic::Code;

    #[derive(Debug, Serialize)]
    struct Signup {
        email: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Account {
        id: u64,
    }

    fn signup_handler() -> Arc<dyn Handler> {
        handler_fn(|_ctx, args| async move {
            let email = args[0]["email"].as_str().unwrap_or_default().to_string();
            if email.is_empty() {
                let mut details = Details::new();
                details.insert("email".into(), "required".into());
                return Err(VALIDATION_ERROR.error_with("email is required", details).into());
            }
            Ok(json!({ "id": 42 }))
        })
    }

    #[tokio::test]
    async fn invoke_maps_reply_and_structured_errors() {
        let sink = Arc::new(MemoryTelemetry::new());
        let handler = WrapperChain::standard(sink.clone(), AppIdentity::new("accounts", "test")).wrap(signup_handler());
        let interceptors = RpcInterceptors::new(sink.clone(), AppIdentity::new("accounts", "test"));

        let ok: Response<Account> = interceptors
            .unary(
                "/accounts.Accounts/Signup",
                Request::new(Signup {
                    email: "a@example.com".into(),
                }),
                |req| invoke(&handler, req),
            )
            .await
            .unwrap();
        assert_eq!(ok.into_inner(), Account { id: 42 });

        let status = interceptors
            .unary(
                "/accounts.Accounts/Signup",
                Request::new(Signup { email: String::new() }),
                |req| invoke::<_, Account>(&handler, req),
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        let decoded = decode(&status).unwrap();
        assert_eq!(decoded.code(), 4001);
        assert_eq!(decoded.details()["email"], "required");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tags["method"], "/accounts.Accounts/Signup");
    }

    #[tokio::test]
    async fn unstructured_failures_leave_as_bare_internal() {
        let handler = handler_fn(|_ctx, _args| async { Err(crate::error::FaultError::resource("ledger", "timeout talking to ledger")) });
        let status = invoke::<_, Account>(&handler, Request::new(json!([]))).await.unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert!(decode(&status).is_none());
    }
}
