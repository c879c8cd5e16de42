//! Alexa Skill Lambda - Bridges Alexa voice interactions to the dialog engine.
//!
//! This Lambda receives Alexa requests through an API Gateway proxy integration,
//! verifies their signature, forwards the utterance to Watson Assistant with the
//! stored conversation context, runs any follow-up action the dialog asks for,
//! and answers with plain-text speech.

use lambda_runtime::{service_fn, Error, LambdaEvent};
use shared::actions::{ActionServices, DefaultGeocoder, Geocoder, HttpGeocoder, LambdaForecastService};
use shared::{
    resolve_assistant_credentials, AlexaVerifier, ApiGatewayRequest, ApiGatewayResponse, Config,
    ContextStore, RedisContextStore, SkillPipeline, WatsonAssistant,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Load the AWS SDK configuration pinned to the configured region.
async fn load_aws_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// Application state
struct AppState {
    pipeline: SkillPipeline,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws_config = load_aws_config(&config.aws_region).await;
        let http_client = reqwest::Client::new();

        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
        let credentials = resolve_assistant_credentials(&secrets_client, &config.credentials).await?;
        let assistant = WatsonAssistant::new(
            http_client.clone(),
            &config.assistant_url,
            &config.workspace_id,
            &credentials,
        )?;
        info!(workspace_id = %assistant.workspace_id(), "Configured Watson Assistant");

        let store: Option<Arc<dyn ContextStore>> = match &config.redis {
            Some(settings) => {
                let store = RedisContextStore::connect(settings).await?;
                info!("Connected to session store");
                Some(Arc::new(store))
            }
            None => {
                info!("No session store configured, carrying context in session attributes");
                None
            }
        };

        let geocoder: Arc<dyn Geocoder> = match &config.weather {
            Some(endpoint) => Arc::new(HttpGeocoder::new(http_client.clone(), endpoint)),
            None => Arc::new(DefaultGeocoder),
        };

        let lambda_client = aws_sdk_lambda::Client::new(&aws_config);
        let forecast = match &config.forecast_function {
            Some(name) => LambdaForecastService::with_function(lambda_client, name),
            None => LambdaForecastService::discover(lambda_client, &config.weather_service_prefix),
        };

        let pipeline = SkillPipeline::new(
            Arc::new(AlexaVerifier::new(http_client)),
            Arc::new(assistant),
            store,
            ActionServices {
                geocoder,
                forecast: Arc::new(forecast),
            },
        );

        Ok(Self { pipeline })
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<ApiGatewayRequest>) -> Result<ApiGatewayResponse, Error> {
    let (request, context) = event.into_parts();
    info!(request_id = %context.request_id, "Begin skill request");

    let outcome = state.pipeline.handle(&request).await;
    if let Err(e) = &outcome {
        error!(error = %e, status = e.status_code(), "Skill request failed");
    }

    Ok(ApiGatewayResponse::from_outcome(&outcome)?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    lambda_runtime::run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
