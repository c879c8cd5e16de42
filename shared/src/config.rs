//! Configuration management for the skill Lambda.

use std::env;
use url::Url;

use crate::{Error, Result};

/// Default prefix used to discover the forecast function.
pub const DEFAULT_WEATHER_SERVICE_PREFIX: &str = "weather";

/// Credentials for the dialog engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantCredentials {
    /// IBM Cloud API key (sent as basic auth with the `apikey` user)
    ApiKey(String),
    /// Service username and password
    Basic { username: String, password: String },
    /// Credentials stored in Secrets Manager, resolved at cold start
    Secret(String),
}

/// Session store connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RedisSettings {
    /// Connection string, e.g. `rediss://:password@host:port`
    pub url: String,
    /// PEM root certificate for TLS connections
    pub ca_cert: Option<Vec<u8>>,
}

/// Geocode lookup endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherEndpoint {
    pub host: String,
    pub port: Option<u16>,
}

impl WeatherEndpoint {
    /// Base URL of the geocode lookup service.
    pub fn base_url(&self) -> String {
        let host = if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", self.host.trim_end_matches('/'))
        };
        match self.port {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dialog engine base URL
    pub assistant_url: String,
    /// Dialog engine workspace (skill) id
    pub workspace_id: String,
    /// Dialog engine credentials
    pub credentials: AssistantCredentials,
    /// Session store; `None` carries context in Alexa session attributes
    pub redis: Option<RedisSettings>,
    /// Geocode lookup endpoint; `None` uses the default coordinates
    pub weather: Option<WeatherEndpoint>,
    /// Explicit forecast function name
    pub forecast_function: Option<String>,
    /// Prefix used to discover the forecast function
    pub weather_service_prefix: String,
    /// AWS region
    pub aws_region: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| Error::Config(format!("{} not set", key)));

        let assistant_url = required("ASSISTANT_URL")?;
        let workspace_id = var("SKILL_ID")
            .or_else(|| var("WORKSPACE_ID"))
            .ok_or_else(|| Error::Config("SKILL_ID not set".to_string()))?;

        let credentials = if let Some(arn) = var("ASSISTANT_SECRET_ARN") {
            AssistantCredentials::Secret(arn)
        } else if let Some(key) = var("ASSISTANT_APIKEY") {
            AssistantCredentials::ApiKey(key)
        } else {
            match (var("ASSISTANT_USERNAME"), var("ASSISTANT_PASSWORD")) {
                (Some(username), Some(password)) => AssistantCredentials::Basic { username, password },
                _ => {
                    return Err(Error::Config(
                        "ASSISTANT_APIKEY or ASSISTANT_USERNAME/ASSISTANT_PASSWORD not set".to_string(),
                    ))
                }
            }
        };

        let redis = redis_settings(&var)?;

        let weather = match var("WEATHER_HOST") {
            Some(host) => {
                let port = var("WEATHER_PORT")
                    .map(|p| {
                        p.parse::<u16>()
                            .map_err(|e| Error::Config(format!("Invalid WEATHER_PORT: {}", e)))
                    })
                    .transpose()?;
                Some(WeatherEndpoint { host, port })
            }
            None => None,
        };

        Ok(Self {
            assistant_url,
            workspace_id,
            credentials,
            redis,
            weather,
            forecast_function: var("FORECAST_FUNCTION_NAME"),
            weather_service_prefix: var("WEATHER_SERVICE_PREFIX")
                .unwrap_or_else(|| DEFAULT_WEATHER_SERVICE_PREFIX.to_string()),
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

fn redis_settings<F>(var: &F) -> Result<Option<RedisSettings>>
where
    F: Fn(&str) -> Option<String>,
{
    let ca_cert = match var("REDIS_CA_CERT") {
        Some(encoded) => Some(crate::http::decode_base64(&encoded).ok_or_else(|| {
            Error::Config("REDIS_CA_CERT is not valid base64".to_string())
        })?),
        None => None,
    };

    if let Some(url) = var("REDIS_URL") {
        return Ok(Some(RedisSettings { url, ca_cert }));
    }

    let Some(host) = var("REDIS_HOST") else {
        return Ok(None);
    };
    let port = var("REDIS_PORT")
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| Error::Config(format!("Invalid REDIS_PORT: {}", e)))
        })
        .transpose()?
        .unwrap_or(6379);
    let tls = var("REDIS_TLS")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let scheme = if tls || ca_cert.is_some() { "rediss" } else { "redis" };

    let mut url = Url::parse(&format!("{}://{}:{}", scheme, host, port))
        .map_err(|e| Error::Config(format!("Invalid REDIS_HOST: {}", e)))?;
    // set_password percent-encodes reserved characters.
    if let Some(password) = var("REDIS_PASSWORD") {
        url.set_password(Some(&password))
            .map_err(|_| Error::Config("REDIS_PASSWORD cannot be applied to REDIS_HOST".to_string()))?;
    }

    Ok(Some(RedisSettings {
        url: url.to_string(),
        ca_cert,
    }))
}
