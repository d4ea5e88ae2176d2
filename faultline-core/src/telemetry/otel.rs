//! OpenTelemetry-backed telemetry sink
//!
//! Transactions are spans from the global tracer; reported errors become
//! short error spans carrying the scope's tags, extras and contexts as
//! attributes. When enabled, the factory installs the OTLP batch pipeline
//! and closing the sink shuts the provider down.

use async_trait::async_trait;
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    trace::{Span, Status, Tracer},
    KeyValue,
};
use opentelemetry_sdk::trace::{self, Sampler};
use std::sync::Arc;
use std::time::Duration;

use super::{ErrorEvent, TelemetrySink, Transaction};
use crate::config::FaultlineConfig;
use crate::error::{FaultError, FaultResult};
use crate::lifecycle::{Resource, ResourceFactory};

const TRACER_NAME: &str = "faultline";

pub struct OtelTelemetry {
    tracer: BoxedTracer,
    installed: bool,
    flush_timeout: Duration,
}

impl OtelTelemetry {
    /// A sink on the current global tracer provider.
    pub fn new(flush_timeout: Duration) -> Self {
        Self {
            tracer: global::tracer(TRACER_NAME),
            installed: false,
            flush_timeout,
        }
    }

    /// Install the OTLP pipeline as the global provider and build a sink on it.
    pub fn install(config: &FaultlineConfig) -> FaultResult<Self> {
        use opentelemetry_otlp::WithExportConfig;

        let mut exporter = opentelemetry_otlp::new_exporter().tonic();
        if let Some(endpoint) = &config.telemetry.otlp_endpoint {
            exporter = exporter.with_endpoint(endpoint.clone());
        }

        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                trace::config()
                    .with_sampler(Sampler::TraceIdRatioBased(config.telemetry.sample_rate))
                    .with_resource(opentelemetry_sdk::Resource::new(vec![
                        KeyValue::new("service.name", config.app.name.clone()),
                        KeyValue::new("deployment.environment", config.app.env.clone()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ])),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| FaultError::Telemetry {
                message: format!("Failed to install OTLP pipeline: {}", e),
            })?;

        Ok(Self {
            tracer: global::tracer(TRACER_NAME),
            installed: true,
            flush_timeout: config.telemetry.flush_timeout,
        })
    }
}

struct OtelTransaction {
    name: String,
    span: BoxedSpan,
}

impl Transaction for OtelTransaction {
    fn name(&self) -> &str {
        &self.name
    }

    fn finish(mut self: Box<Self>) {
        self.span.end();
    }
}

#[async_trait]
impl Resource for OtelTelemetry {
    fn name(&self) -> &str {
        "otel-telemetry"
    }

    async fn close(&self) -> FaultResult<()> {
        if !self.flush(self.flush_timeout).await {
            tracing::warn!(timeout = ?self.flush_timeout, "Telemetry flush did not finish in time");
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for OtelTelemetry {
    fn report(&self, event: ErrorEvent) -> FaultResult<()> {
        let mut span = self.tracer.start(format!("error.{}", event.error_type));
        span.set_attribute(KeyValue::new("error.type", event.error_type.clone()));
        span.set_attribute(KeyValue::new("error.level", event.level.as_str()));
        for (key, value) in &event.tags {
            span.set_attribute(KeyValue::new(format!("tag.{}", key), value.clone()));
        }
        for (key, value) in &event.extras {
            span.set_attribute(KeyValue::new(format!("extra.{}", key), value.to_string()));
        }
        for (name, context) in &event.contexts {
            for (key, value) in context {
                span.set_attribute(KeyValue::new(format!("{}.{}", name, key), value.to_string()));
            }
        }
        span.add_event(
            "exception",
            vec![
                KeyValue::new("exception.message", event.message.clone()),
                KeyValue::new("exception.stacktrace", event.trace.clone()),
            ],
        );
        span.set_status(Status::error(event.message));
        span.end();
        Ok(())
    }

    fn start_transaction(&self, name: &str) -> Box<dyn Transaction> {
        Box::new(OtelTransaction {
            name: name.to_string(),
            span: self.tracer.start(name.to_string()),
        })
    }

    async fn flush(&self, timeout: Duration) -> bool {
        if !self.installed {
            return true;
        }
        let shutdown = tokio::task::spawn_blocking(global::shutdown_tracer_provider);
        matches!(tokio::time::timeout(timeout, shutdown).await, Ok(Ok(())))
    }
}

/// Builds the production sink, installing OTLP export when enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelTelemetryFactory;

#[async_trait]
impl ResourceFactory<dyn TelemetrySink> for OtelTelemetryFactory {
    async fn open(&self, config: &FaultlineConfig) -> FaultResult<Arc<dyn TelemetrySink>> {
        let sink = if config.telemetry.enabled {
            OtelTelemetry::install(config)?
        } else {
            OtelTelemetry::new(config.telemetry.flush_timeout)
        };
        Ok(Arc::new(sink))
    }
}
