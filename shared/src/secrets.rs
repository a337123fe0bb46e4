//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::{Config, Error, Result};

/// Cached secrets with lazy initialization.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Database credentials from Secrets Manager.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;

    serde_json::from_str(&secret_string)
        .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
}

/// Resolve the Gemini API key, preferring a key set directly in the environment.
pub async fn resolve_gemini_api_key(config: &Config) -> Result<String> {
    if let Some(key) = &config.gemini_api_key {
        return Ok(key.clone());
    }

    let secret_arn = config
        .gemini_api_key_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("No Gemini API key configured".to_string()))?;

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = SecretsClient::new(&aws_config);
    let secret_string = get_secret(&client, secret_arn).await?;

    parse_api_key_secret(&secret_string)
}

/// The key secret is either the raw key or a JSON object carrying it.
fn parse_api_key_secret(secret: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct ApiKeySecret {
        #[serde(alias = "apiKey", alias = "GEMINI_API_KEY")]
        api_key: String,
    }

    let trimmed = secret.trim();
    if trimmed.starts_with('{') {
        let parsed: ApiKeySecret = serde_json::from_str(trimmed)
            .map_err(|e| Error::Aws(format!("Failed to parse API key secret: {}", e)))?;
        return Ok(parsed.api_key);
    }

    if trimmed.is_empty() {
        return Err(Error::Aws("API key secret is empty".to_string()));
    }

    Ok(trimmed.to_string())
}

/// Clear the secrets cache (useful for testing or credential rotation).
pub async fn clear_cache() {
    let mut cache = get_cache().write().await;
    cache.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_credentials() {
        let json = r#"{"username":"admin","password":"secret123","host":"db.example.com","port":5432,"dbname":"mydb"}"#;
        let creds: DatabaseCredentials = serde_json::from_str(json).unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "secret123");
        assert_eq!(creds.host, Some("db.example.com".to_string()));
    }

    #[test]
    fn test_parse_api_key_secret() {
        assert_eq!(parse_api_key_secret("  AIzaRaw \n").unwrap(), "AIzaRaw");
        assert_eq!(parse_api_key_secret(r#"{"apiKey":"AIzaJson"}"#).unwrap(), "AIzaJson");
        assert_eq!(parse_api_key_secret(r#"{"api_key":"AIzaSnake"}"#).unwrap(), "AIzaSnake");
        assert!(parse_api_key_secret("").is_err());
        assert!(parse_api_key_secret(r#"{"other":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn test_direct_key_skips_secrets_manager() {
        let config =
            Config::from_lookup(|k| (k == "GEMINI_API_KEY").then(|| "direct".to_string())).unwrap();
        assert_eq!(resolve_gemini_api_key(&config).await.unwrap(), "direct");
    }

    #[tokio::test]
    async fn test_missing_key_is_a_config_error() {
        let config = Config::from_lookup(|_| None).unwrap();
        let err = resolve_gemini_api_key(&config).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
