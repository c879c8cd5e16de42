//! Shared library for the Alexa assistant bridge.
//!
//! This crate provides the skill request pipeline and the clients it talks to:
//! Alexa signature verification, the dialog engine, the session context store,
//! and the follow-up actions.

pub mod actions;
pub mod alexa;
pub mod assistant;
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod secrets;
pub mod session;
pub mod verifier;

pub use actions::{Action, ActionError, ActionServices, DefaultGeocoder, HttpGeocoder, LambdaForecastService};
pub use alexa::{SkillRequest, SkillResponse};
pub use assistant::{Context, DialogEngine, DialogReply, WatsonAssistant};
pub use config::{AssistantCredentials, Config};
pub use error::{Error, Result};
pub use http::{ApiGatewayRequest, ApiGatewayResponse};
pub use pipeline::SkillPipeline;
pub use secrets::{get_secret, resolve_assistant_credentials};
pub use session::{ContextStore, RedisContextStore, SESSION_TTL};
pub use verifier::{AlexaVerifier, SignatureVerifier};
