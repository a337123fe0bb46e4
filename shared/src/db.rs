//! Database connection management.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::secrets::{get_database_credentials, DatabaseCredentials};
use crate::{Config, Error, Result};

/// Create a database connection pool.
pub async fn create_pool(config: &Config, credentials: &DatabaseCredentials) -> Result<PgPool> {
    let host = match &credentials.host {
        Some(host) => host.as_str(),
        None => config.require_db_host()?,
    };
    let db_name = credentials.dbname.as_deref().unwrap_or(&config.db_name);
    let port = credentials.port.unwrap_or(5432);

    let database_url = format!(
        "postgres://{}:{}@{}:{}/{}",
        urlencoding::encode(&credentials.username),
        urlencoding::encode(&credentials.password),
        host,
        port,
        db_name
    );

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&database_url)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

/// Fetch credentials from Secrets Manager and connect.
pub async fn connect_from_config(config: &Config) -> Result<PgPool> {
    let secret_arn = config
        .db_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("DATABASE_SECRET_ARN not set".to_string()))?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
    let credentials = get_database_credentials(&secrets_client, secret_arn).await?;

    create_pool(config, &credentials).await
}
