//! Panic barrier around a single handler activation

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{Args, Handler, Reply, Wrapper};
use crate::context::Context;
use crate::error::{FaultError, FaultResult, StructuredError, INTERNAL_SERVER_ERROR};

/// What a recovered panic turns into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Return the zero reply and no error.
    #[default]
    Swallow,
    /// Return the canonical internal server error. The panic text stays in
    /// the log so it never reaches a remote caller.
    Surface,
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<FaultError>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<StructuredError>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<anyhow::Error>() {
        err.to_string()
    } else if let Some(err) = payload.downcast_ref::<std::io::Error>() {
        err.to_string()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryWrapper {
    mode: RecoveryMode,
}

impl RecoveryWrapper {
    pub fn new(mode: RecoveryMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> RecoveryMode {
        self.mode
    }
}

impl Wrapper for RecoveryWrapper {
    fn wrap(&self, next: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(Recover {
            next,
            mode: self.mode,
        })
    }
}

struct Recover {
    next: Arc<dyn Handler>,
    mode: RecoveryMode,
}

#[async_trait]
impl Handler for Recover {
    async fn call(&self, ctx: Context, args: Args) -> FaultResult<Reply> {
        let transport = ctx.transport();
        let method = ctx.method().map(str::to_string);

        match AssertUnwindSafe(self.next.call(ctx, args)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    "type" = %transport,
                    method = method.as_deref().unwrap_or(""),
                    panic = %message,
                    "Recovered from panic in handler"
                );
                match self.mode {
                    RecoveryMode::Swallow => Ok(Value::Null),
                    RecoveryMode::Surface => Err(INTERNAL_SERVER_ERROR.error().into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Transport;
    use crate::error::{as_structured, Details, NOT_FOUND};
    use crate::wrapper::handler_fn;
    use serde_json::json;
    use tracing_test::traced_test;

    fn panicking(payload: fn() -> Box<dyn Any + Send>) -> Arc<dyn Handler> {
        handler_fn(move |_ctx, _args| async move {
            if true {
                std::panic::resume_unwind(payload());
            }
            Ok(Value::Null)
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn string_panic_is_logged_and_swallowed() {
        let handler = RecoveryWrapper::default().wrap(panicking(|| Box::new("index out of range")));
        let reply = handler.call(Context::new(Transport::Grpc), vec![]).await.unwrap();
        assert_eq!(reply, Value::Null);
        assert!(logs_contain("Recovered from panic in handler"));
        assert!(logs_contain("index out of range"));
    }

    #[tokio::test]
    #[traced_test]
    async fn error_panic_logs_the_error_text() {
        let handler = RecoveryWrapper::default().wrap(panicking(|| {
            Box::new(FaultError::from(NOT_FOUND.error_with("user 7 missing", Details::new())))
        }));
        let reply = handler.call(Context::new(Transport::Worker), vec![]).await;
        assert!(matches!(reply, Ok(Value::Null)));
        assert!(logs_contain("user 7 missing"));
    }

    #[tokio::test]
    #[traced_test]
    async fn surface_mode_keeps_panic_text_out_of_the_error() {
        let handler = RecoveryWrapper::new(RecoveryMode::Surface)
            .wrap(panicking(|| Box::new(String::from("bad state in ledger row 12"))));
        let err = handler.call(Context::new(Transport::Http), vec![]).await.unwrap_err();
        let structured = as_structured(&err).unwrap();
        assert!(INTERNAL_SERVER_ERROR.is(structured));
        assert_eq!(structured.message(), INTERNAL_SERVER_ERROR.message);
        assert!(structured.details().is_empty());
        assert!(!crate::rpc::to_status(&err).message().contains("ledger row"));
        assert!(logs_contain("bad state in ledger row 12"));
    }

    #[tokio::test]
    #[traced_test]
    async fn io_and_anyhow_panics_log_the_error_text() {
        let handler = RecoveryWrapper::default().wrap(panicking(|| {
            Box::new(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "spool pipe closed"))
        }));
        handler.call(Context::new(Transport::Worker), vec![]).await.unwrap();
        assert!(logs_contain("spool pipe closed"));

        let handler = RecoveryWrapper::default()
            .wrap(panicking(|| Box::new(anyhow::anyhow!("cursor exhausted"))));
        handler.call(Context::new(Transport::Worker), vec![]).await.unwrap();
        assert!(logs_contain("cursor exhausted"));
    }

    #[tokio::test]
    async fn returned_errors_pass_through() {
        let handler = RecoveryWrapper::default().wrap(handler_fn(|_ctx, _args| async {
            Err(NOT_FOUND.error().into())
        }));
        let err = handler.call(Context::new(Transport::Grpc), vec![json!(1)]).await.unwrap_err();
        assert_eq!(as_structured(&err).map(|s| s.code()), Some(4040));
    }

    #[test]
    fn payload_kinds() {
        assert_eq!(panic_message(&"plain"), "plain");
        let boxed: Box<dyn std::error::Error + Send + Sync> = "io went away".into();
        assert_eq!(panic_message(&boxed), "io went away");
        assert_eq!(panic_message(&anyhow::anyhow!("lease lost")), "lease lost");
        assert_eq!(
            panic_message(&std::io::Error::new(std::io::ErrorKind::Other, "disk full")),
            "disk full"
        );
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }
}
