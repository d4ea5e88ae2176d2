//! PostgreSQL connection pool resource

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::sync::Arc;

use super::{Resource, ResourceFactory};
use crate::config::{DatabaseConfig, FaultlineConfig};
use crate::error::{FaultError, FaultResult};

/// A pinged connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> FaultResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub(crate) fn connect_options(config: &DatabaseConfig) -> FaultResult<PgConnectOptions> {
    let ssl_mode: PgSslMode = config.ssl_mode.parse().map_err(|_| {
        FaultError::configuration("database", format!("Invalid ssl_mode: {}", config.ssl_mode))
    })?;

    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.db_name)
        .ssl_mode(ssl_mode);
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    Ok(options)
}

#[async_trait]
impl Resource for Database {
    fn name(&self) -> &str {
        "database"
    }

    async fn close(&self) -> FaultResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Opens the pool and pings it once before handing it out.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresFactory;

#[async_trait]
impl ResourceFactory<Database> for PostgresFactory {
    async fn open(&self, config: &FaultlineConfig) -> FaultResult<Arc<Database>> {
        let db = &config.database;
        let pool = PgPoolOptions::new()
            .max_connections(db.max_connections)
            .min_connections(db.min_connections)
            .max_lifetime(db.max_lifetime)
            .acquire_timeout(config.lifecycle.acquire_timeout)
            .connect_with(connect_options(db)?)
            .await?;

        let database = Database::from_pool(pool);
        if let Err(e) = database.ping().await {
            database.pool.close().await;
            return Err(e);
        }
        tracing::info!(host = %db.host, port = db.port, db_name = %db.db_name, "Connected to database");
        Ok(Arc::new(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_ssl_mode() {
        let config = DatabaseConfig {
            ssl_mode: "sometimes".into(),
            ..DatabaseConfig::default()
        };
        let err = connect_options(&config).unwrap_err();
        assert!(matches!(err, FaultError::Configuration { .. }));
    }

    #[test]
    fn builds_options_from_config() {
        let config = DatabaseConfig {
            host: "db.internal".into(),
            port: 6432,
            db_name: "billing".into(),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_database(), Some("billing"));
    }
}
