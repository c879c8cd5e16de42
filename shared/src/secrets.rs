//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;

use crate::config::AssistantCredentials;
use crate::{Error, Result};

/// Dialog engine credentials stored in Secrets Manager.
#[derive(Debug, Deserialize)]
struct StoredCredentials {
    apikey: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl TryFrom<StoredCredentials> for AssistantCredentials {
    type Error = Error;

    fn try_from(stored: StoredCredentials) -> Result<Self> {
        match stored {
            StoredCredentials { apikey: Some(key), .. } => Ok(AssistantCredentials::ApiKey(key)),
            StoredCredentials {
                username: Some(username),
                password: Some(password),
                ..
            } => Ok(AssistantCredentials::Basic { username, password }),
            _ => Err(Error::Config(
                "Assistant secret needs an apikey or username/password".to_string(),
            )),
        }
    }
}

/// Get a secret value from Secrets Manager.
///
/// Secrets are read once at cold start and held by the clients built from them.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    response
        .secret_string()
        .map(String::from)
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))
}

/// Parse dialog engine credentials from a secret's JSON value.
pub fn parse_assistant_credentials(secret: &str) -> Result<AssistantCredentials> {
    let stored: StoredCredentials = serde_json::from_str(secret)
        .map_err(|e| Error::Aws(format!("Failed to parse assistant credentials: {}", e)))?;
    AssistantCredentials::try_from(stored)
}

/// Resolve credentials, fetching them from Secrets Manager when configured.
pub async fn resolve_assistant_credentials(
    client: &SecretsClient,
    credentials: &AssistantCredentials,
) -> Result<AssistantCredentials> {
    match credentials {
        AssistantCredentials::Secret(arn) => {
            let secret = get_secret(client, arn).await?;
            parse_assistant_credentials(&secret)
        }
        resolved => Ok(resolved.clone()),
    }
}
