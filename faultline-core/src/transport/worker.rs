//! Background workers
//!
//! Scheduled jobs and broker consumers drive wrapped handlers the same way
//! the request transports do. Neither has a caller to hand an error back to,
//! so failures end in the log.

use serde_json::{Map, Value};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{Context, Transport};
use crate::error::FaultResult;
use crate::lifecycle::{BrokerMessage, BrokerReader};
use crate::wrapper::{Args, Handler, Reply, WrapperChain};

/// Logger handed to job schedulers: a message plus alternating keys and values.
#[derive(Debug, Clone)]
pub struct WorkerLogger {
    job: String,
}

impl WorkerLogger {
    pub fn new(job: impl Into<String>) -> Self {
        Self { job: job.into() }
    }

    pub fn info(&self, message: &str, keys_and_values: &[(&str, Value)]) {
        tracing::info!(
            "type" = Transport::Worker.as_str(),
            job = %self.job,
            fields = %render(keys_and_values),
            "{}",
            message
        );
    }

    pub fn error(&self, err: &dyn Display, message: &str, keys_and_values: &[(&str, Value)]) {
        tracing::error!(
            "type" = Transport::Worker.as_str(),
            job = %self.job,
            error = %err,
            fields = %render(keys_and_values),
            "{}",
            message
        );
    }
}

fn render(keys_and_values: &[(&str, Value)]) -> Value {
    Value::Object(
        keys_and_values
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect::<Map<String, Value>>(),
    )
}

/// A named handler run outside any request.
pub struct Job {
    name: String,
    handler: Arc<dyn Handler>,
    logger: WorkerLogger,
}

impl Job {
    pub fn new(name: impl Into<String>, chain: &WrapperChain, handler: Arc<dyn Handler>) -> Self {
        let name = name.into();
        Self {
            logger: WorkerLogger::new(&name),
            handler: chain.wrap(handler),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run once. A failure is logged and yields `None`.
    pub async fn run(&self, ctx: Context, args: Args) -> Option<Reply> {
        match self.handler.call(ctx.with_method(self.name.as_str()), args).await {
            Ok(reply) => Some(reply),
            Err(err) => {
                self.logger.error(&err, "Job failed", &[("kind", Value::from(err.kind_name()))]);
                None
            }
        }
    }

    /// Run every `period` until `ctx` is cancelled.
    pub async fn schedule(&self, ctx: Context, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.logger.info("Job scheduled", &[("period_ms", Value::from(period.as_millis() as u64))]);
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    self.run(ctx.clone(), Vec::new()).await;
                }
            }
        }
        self.logger.info("Job stopped", &[]);
    }
}

/// Decode a message payload into handler arguments. JSON arrays are spread,
/// other JSON is a single argument, and anything else is passed as a string.
pub fn message_args(message: &BrokerMessage) -> Args {
    match serde_json::from_slice::<Value>(&message.payload) {
        Ok(Value::Array(items)) => items,
        Ok(value) => vec![value],
        Err(_) => vec![Value::String(String::from_utf8_lossy(&message.payload).into_owned())],
    }
}

/// Feed messages from `reader` to `handler` until `ctx` is cancelled or the
/// reader closes. Messages are committed only after the handler succeeds.
pub async fn consume(reader: Arc<dyn BrokerReader>, handler: Arc<dyn Handler>, ctx: Context) -> FaultResult<()> {
    loop {
        let received = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            received = reader.receive() => received?,
        };
        let Some(message) = received else {
            tracing::info!("type" = Transport::Worker.as_str(), "Broker reader closed");
            return Ok(());
        };

        let call_ctx = ctx
            .clone()
            .with_method(message.topic.as_str())
            .with_metadata(message.headers.clone());
        match handler.call(call_ctx, message_args(&message)).await {
            Ok(_) => reader.commit(&message).await?,
            Err(err) => tracing::error!(
                "type" = Transport::Worker.as_str(),
                topic = %message.topic,
                error = %err,
                "Failed to process message"
            ),
        }
    }
}
