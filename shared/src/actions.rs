//! Follow-up actions requested by the dialog engine.
//!
//! A reply may carry an `action` tag. Recognized tags map to an [`Action`]
//! variant with a dedicated handler; anything else leaves the reply untouched.

use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::assistant::DialogReply;
use crate::config::WeatherEndpoint;

/// Coordinates used when no geocode endpoint is configured (Austin, TX).
pub const DEFAULT_GEOCODE: Geocode = Geocode {
    latitude: 30.2672,
    longitude: -97.7431,
};

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Action requires a location")]
    MissingLocation,
    #[error("Geocode lookup failed: {0}")]
    Geocode(String),
    #[error("No forecast service matches '{0}'")]
    NoForecastService(String),
    #[error("Forecast lookup failed: {0}")]
    Forecast(String),
    #[error("Forecast returned no narrative")]
    EmptyForecast,
}

/// Actions the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    LookupWeather,
}

impl Action {
    /// Parse an action tag from a dialog reply.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "lookupWeather" => Some(Action::LookupWeather),
            _ => None,
        }
    }
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geocode {
    pub latitude: f64,
    pub longitude: f64,
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, location: Option<&str>) -> Result<Geocode, ActionError>;
}

#[async_trait]
pub trait ForecastService: Send + Sync {
    /// First forecast narrative for the given coordinates.
    async fn forecast(&self, geocode: Geocode) -> Result<String, ActionError>;
}

/// Clients the action handlers depend on.
#[derive(Clone)]
pub struct ActionServices {
    pub geocoder: Arc<dyn Geocoder>,
    pub forecast: Arc<dyn ForecastService>,
}

/// Run the action tagged on the reply, if any.
pub async fn dispatch(services: &ActionServices, reply: DialogReply) -> Result<DialogReply, ActionError> {
    let action = match reply.output.action.as_deref().and_then(Action::from_tag) {
        Some(action) => action,
        None => return Ok(reply),
    };

    info!(?action, "Dispatching action");

    match action {
        Action::LookupWeather => lookup_weather(services, reply).await,
    }
}

async fn lookup_weather(services: &ActionServices, mut reply: DialogReply) -> Result<DialogReply, ActionError> {
    let geocode = services.geocoder.geocode(reply.output.location.as_deref()).await?;
    let narrative = services.forecast.forecast(geocode).await?;
    reply.output.text.push(narrative);
    Ok(reply)
}

/// Always resolves to [`DEFAULT_GEOCODE`].
pub struct DefaultGeocoder;

#[async_trait]
impl Geocoder for DefaultGeocoder {
    async fn geocode(&self, _location: Option<&str>) -> Result<Geocode, ActionError> {
        Ok(DEFAULT_GEOCODE)
    }
}

/// Geocoder backed by an HTTP lookup service.
pub struct HttpGeocoder {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpGeocoder {
    pub fn new(http_client: reqwest::Client, endpoint: &WeatherEndpoint) -> Self {
        Self {
            http_client,
            base_url: endpoint.base_url(),
        }
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, location: Option<&str>) -> Result<Geocode, ActionError> {
        let location = location
            .filter(|l| !l.trim().is_empty())
            .ok_or(ActionError::MissingLocation)?;

        let response = self
            .http_client
            .get(format!("{}/geocode", self.base_url))
            .query(&[("address", location)])
            .send()
            .await
            .map_err(|e| ActionError::Geocode(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ActionError::Geocode(format!("lookup returned {}", response.status())));
        }

        response
            .json::<Geocode>()
            .await
            .map_err(|e| ActionError::Geocode(format!("invalid lookup response: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    forecasts: Vec<ForecastPeriod>,
}

#[derive(Debug, Deserialize)]
struct ForecastPeriod {
    narrative: Option<String>,
}

/// First narrative of a forecast payload.
fn first_narrative(payload: &[u8]) -> Result<String, ActionError> {
    let response: ForecastResponse = serde_json::from_slice(payload)
        .map_err(|e| ActionError::Forecast(format!("invalid forecast payload: {}", e)))?;

    response
        .forecasts
        .into_iter()
        .next()
        .and_then(|period| period.narrative)
        .ok_or(ActionError::EmptyForecast)
}

/// Pick the forecast function: first name starting with the prefix.
fn select_forecast_function<'a>(
    names: impl IntoIterator<Item = &'a str>,
    prefix: &str,
) -> Result<String, ActionError> {
    let mut matches = names.into_iter().filter(|name| name.starts_with(prefix));
    let selected = matches
        .next()
        .ok_or_else(|| ActionError::NoForecastService(prefix.to_string()))?;

    if matches.next().is_some() {
        warn!(selected, prefix, "Multiple forecast functions match, using the first");
    }

    Ok(selected.to_string())
}

/// Forecast service running as a Lambda function.
pub struct LambdaForecastService {
    lambda_client: aws_sdk_lambda::Client,
    prefix: String,
    function_name: OnceCell<String>,
}

impl LambdaForecastService {
    /// Create a service that discovers its function by name prefix.
    pub fn discover(lambda_client: aws_sdk_lambda::Client, prefix: impl Into<String>) -> Self {
        Self {
            lambda_client,
            prefix: prefix.into(),
            function_name: OnceCell::new(),
        }
    }

    /// Create a service bound to a known function.
    pub fn with_function(lambda_client: aws_sdk_lambda::Client, function_name: impl Into<String>) -> Self {
        let function_name = function_name.into();
        Self {
            lambda_client,
            prefix: function_name.clone(),
            function_name: OnceCell::new_with(Some(function_name)),
        }
    }

    async fn resolve_function(&self) -> Result<&str, ActionError> {
        let name = self
            .function_name
            .get_or_try_init(|| async {
                let mut names = Vec::new();
                let mut marker: Option<String> = None;

                loop {
                    let page = self
                        .lambda_client
                        .list_functions()
                        .set_marker(marker.take())
                        .send()
                        .await
                        .map_err(|e| ActionError::Forecast(format!("Failed to list functions: {}", e)))?;

                    names.extend(
                        page.functions()
                            .iter()
                            .filter_map(|f| f.function_name().map(String::from)),
                    );

                    match page.next_marker() {
                        Some(next) => marker = Some(next.to_string()),
                        None => break,
                    }
                }

                let selected = select_forecast_function(names.iter().map(String::as_str), &self.prefix)?;
                info!(function = %selected, "Resolved forecast function");
                Ok::<_, ActionError>(selected)
            })
            .await?;

        Ok(name.as_str())
    }
}

#[async_trait]
impl ForecastService for LambdaForecastService {
    async fn forecast(&self, geocode: Geocode) -> Result<String, ActionError> {
        let function_name = self.resolve_function().await?;

        let payload = serde_json::to_vec(&geocode)
            .map_err(|e| ActionError::Forecast(e.to_string()))?;

        let response = self
            .lambda_client
            .invoke()
            .function_name(function_name)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| ActionError::Forecast(format!("Failed to invoke {}: {}", function_name, e)))?;

        if let Some(function_error) = response.function_error() {
            return Err(ActionError::Forecast(format!("{} failed: {}", function_name, function_error)));
        }

        let payload = response
            .payload()
            .ok_or_else(|| ActionError::Forecast("No response payload".to_string()))?;

        first_narrative(payload.as_ref())
    }
}
