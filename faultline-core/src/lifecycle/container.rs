//! Infrastructure container
//!
//! Acquires telemetry, database, RPC server, HTTP server, broker writer and
//! broker reader in that order, skipping disabled sections. The telemetry
//! sink is always acquired; the wrapper chain and interceptors handed out by
//! the container are built on it.

use std::fmt;
use std::sync::Arc;

use super::{
    acquire, BrokerReader, BrokerWriter, Database, HttpServer, HttpServerFactory, PostgresFactory,
    ResourceFactory, RpcServer, RpcServerFactory, Teardown,
};
use crate::config::FaultlineConfig;
use crate::error::{FaultError, FaultResult};
use crate::rpc::RpcInterceptors;
use crate::telemetry::{AppIdentity, OtelTelemetryFactory, TelemetrySink};
use crate::wrapper::WrapperChain;

/// The factories the container opens resources through.
pub struct Collaborators {
    pub telemetry: Arc<dyn ResourceFactory<dyn TelemetrySink>>,
    pub database: Arc<dyn ResourceFactory<Database>>,
    pub rpc_server: Arc<dyn ResourceFactory<RpcServer>>,
    pub http_server: Arc<dyn ResourceFactory<HttpServer>>,
    pub broker_writer: Option<Arc<dyn ResourceFactory<dyn BrokerWriter>>>,
    pub broker_reader: Option<Arc<dyn ResourceFactory<dyn BrokerReader>>>,
}

impl Collaborators {
    pub fn with_telemetry(mut self, factory: Arc<dyn ResourceFactory<dyn TelemetrySink>>) -> Self {
        self.telemetry = factory;
        self
    }

    pub fn with_brokers(
        mut self,
        writer: Arc<dyn ResourceFactory<dyn BrokerWriter>>,
        reader: Arc<dyn ResourceFactory<dyn BrokerReader>>,
    ) -> Self {
        self.broker_writer = Some(writer);
        self.broker_reader = Some(reader);
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            telemetry: Arc::new(OtelTelemetryFactory),
            database: Arc::new(PostgresFactory),
            rpc_server: Arc::new(RpcServerFactory),
            http_server: Arc::new(HttpServerFactory),
            broker_writer: None,
            broker_reader: None,
        }
    }
}

/// Construction failed; `teardown` releases whatever was acquired first.
#[derive(Debug, thiserror::Error)]
#[error("Infrastructure initialization failed: {error}")]
pub struct PartialInit {
    #[source]
    pub error: FaultError,
    pub teardown: Teardown,
}

pub struct InfraContainer {
    config: Arc<FaultlineConfig>,
    identity: AppIdentity,
    telemetry: Arc<dyn TelemetrySink>,
    database: Option<Arc<Database>>,
    rpc_server: Option<Arc<RpcServer>>,
    http_server: Option<Arc<HttpServer>>,
    broker_writer: Option<Arc<dyn BrokerWriter>>,
    broker_reader: Option<Arc<dyn BrokerReader>>,
}

impl InfraContainer {
    /// Acquire every enabled resource.
    ///
    /// On success the caller owns the teardown; on failure the teardown in
    /// [`PartialInit`] covers exactly the steps that succeeded.
    pub async fn build(
        config: FaultlineConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, Teardown), PartialInit> {
        let teardown = Teardown::new();
        match Self::acquire_all(config, &collaborators, &teardown).await {
            Ok(container) => {
                tracing::info!(resources = teardown.len(), "Infrastructure ready");
                Ok((container, teardown))
            }
            Err(error) => {
                tracing::error!(error = %error, acquired = ?teardown.pending(), "Infrastructure initialization failed");
                Err(PartialInit { error, teardown })
            }
        }
    }

    async fn acquire_all(
        config: FaultlineConfig,
        collaborators: &Collaborators,
        teardown: &Teardown,
    ) -> FaultResult<Self> {
        let lifecycle = &config.lifecycle;

        let telemetry = acquire(teardown, "telemetry", lifecycle, collaborators.telemetry.open(&config)).await?;

        let database = if config.database.enabled {
            Some(acquire(teardown, "database", lifecycle, collaborators.database.open(&config)).await?)
        } else {
            None
        };

        let rpc_server = if config.rpc.enabled {
            Some(acquire(teardown, "rpc-server", lifecycle, collaborators.rpc_server.open(&config)).await?)
        } else {
            None
        };

        let http_server = if config.http.enabled {
            Some(acquire(teardown, "http-server", lifecycle, collaborators.http_server.open(&config)).await?)
        } else {
            None
        };

        let (broker_writer, broker_reader) = if config.broker.enabled {
            let (writer_factory, reader_factory) =
                match (&collaborators.broker_writer, &collaborators.broker_reader) {
                    (Some(writer), Some(reader)) => (writer, reader),
                    _ => {
                        return Err(FaultError::configuration(
                            "broker",
                            "Broker is enabled but no broker client was supplied",
                        ))
                    }
                };
            let writer = acquire(teardown, "broker-writer", lifecycle, writer_factory.open(&config)).await?;
            let reader = acquire(teardown, "broker-reader", lifecycle, reader_factory.open(&config)).await?;
            (Some(writer), Some(reader))
        } else {
            (None, None)
        };

        let identity = AppIdentity::from(&config.app);
        Ok(Self {
            config: Arc::new(config),
            identity,
            telemetry,
            database,
            rpc_server,
            http_server,
            broker_writer,
            broker_reader,
        })
    }

    pub fn config(&self) -> &FaultlineConfig {
        &self.config
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn telemetry(&self) -> Arc<dyn TelemetrySink> {
        self.telemetry.clone()
    }

    pub fn database(&self) -> Option<Arc<Database>> {
        self.database.clone()
    }

    pub fn rpc_server(&self) -> Option<Arc<RpcServer>> {
        self.rpc_server.clone()
    }

    pub fn http_server(&self) -> Option<Arc<HttpServer>> {
        self.http_server.clone()
    }

    pub fn broker_writer(&self) -> Option<Arc<dyn BrokerWriter>> {
        self.broker_writer.clone()
    }

    pub fn broker_reader(&self) -> Option<Arc<dyn BrokerReader>> {
        self.broker_reader.clone()
    }

    /// The standard telemetry → enrichment → recovery chain on this
    /// container's sink.
    pub fn wrapper_chain(&self) -> WrapperChain {
        WrapperChain::standard(self.telemetry.clone(), self.identity.clone())
    }

    pub fn rpc_interceptors(&self) -> RpcInterceptors {
        RpcInterceptors::new(self.telemetry.clone(), self.identity.clone())
    }
}

impl fmt::Debug for InfraContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraContainer")
            .field("identity", &self.identity)
            .field("telemetry", &self.telemetry.name())
            .field("database", &self.database.is_some())
            .field("rpc_server", &self.rpc_server.as_ref().map(|s| s.local_addr()))
            .field("http_server", &self.http_server.as_ref().map(|s| s.local_addr()))
            .field("broker_writer", &self.broker_writer.is_some())
            .field("broker_reader", &self.broker_reader.is_some())
            .finish()
    }
}
