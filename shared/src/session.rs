//! Session context persistence.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use crate::assistant::Context;
use crate::config::RedisSettings;
use crate::{Error, Result};

/// Lifetime of a stored context, reset on every write.
pub const SESSION_TTL: Duration = Duration::from_secs(600);

/// Keyed store for dialog context between turns.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Load the context stored for a session, `None` on miss.
    async fn load(&self, session_id: &str) -> Result<Option<Context>>;

    /// Store the context for a session with the given expiration.
    async fn save(&self, session_id: &str, context: &Context, ttl: Duration) -> Result<()>;
}

/// Redis-backed context store.
#[derive(Clone)]
pub struct RedisContextStore {
    connection: ConnectionManager,
}

impl RedisContextStore {
    /// Connect to the store described by the settings.
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let client = match &settings.ca_cert {
            Some(root_cert) => redis::Client::build_with_tls(
                settings.url.as_str(),
                redis::TlsCertificates {
                    client_tls: None,
                    root_cert: Some(root_cert.clone()),
                },
            )?,
            None => redis::Client::open(settings.url.as_str())?,
        };

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Store(format!("Failed to connect to session store: {}", e)))?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl ContextStore for RedisContextStore {
    async fn load(&self, session_id: &str) -> Result<Option<Context>> {
        let mut conn = self.connection.clone();
        let stored: Option<String> = conn.get(session_id).await?;

        stored
            .map(|value| serde_json::from_str(&value).map_err(Error::from))
            .transpose()
    }

    async fn save(&self, session_id: &str, context: &Context, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        let value = serde_json::to_string(context)?;
        let _: () = conn.set_ex(session_id, value, ttl.as_secs()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_ten_minutes() {
        assert_eq!(SESSION_TTL.as_secs(), 600);
    }

    #[test]
    fn test_stored_value_layout() {
        let mut context = Context::new();
        context.insert("conversation_id".to_string(), serde_json::json!("c1"));
        let stored = serde_json::to_string(&context).unwrap();
        assert_eq!(stored, r#"{"conversation_id":"c1"}"#);
        let restored: Context = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, context);
    }
}
