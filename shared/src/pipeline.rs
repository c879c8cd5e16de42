//! Skill request pipeline.
//!
//! Stages run strictly in order: unwrap the envelope, verify the signature,
//! restore the dialog context, message the dialog engine, dispatch any follow-up
//! action, compose the speech response, then persist the updated context.
//! Any failure before the response is composed ends the request; a failed
//! context save is only logged.

use std::sync::Arc;
use tracing::{info, warn};

use crate::actions::{self, ActionServices};
use crate::alexa::{SkillRequest, SkillResponse};
use crate::assistant::{Context, DialogEngine};
use crate::http::ApiGatewayRequest;
use crate::session::{ContextStore, SESSION_TTL};
use crate::verifier::{SignatureHeaders, SignatureVerifier};
use crate::Result;

/// Clients a skill request flows through. Shared by all invocations.
pub struct SkillPipeline {
    verifier: Arc<dyn SignatureVerifier>,
    engine: Arc<dyn DialogEngine>,
    /// `None` carries the context in Alexa session attributes instead.
    store: Option<Arc<dyn ContextStore>>,
    actions: ActionServices,
}

impl SkillPipeline {
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        engine: Arc<dyn DialogEngine>,
        store: Option<Arc<dyn ContextStore>>,
        actions: ActionServices,
    ) -> Self {
        Self {
            verifier,
            engine,
            store,
            actions,
        }
    }

    /// Handle one skill request end to end.
    pub async fn handle(&self, request: &ApiGatewayRequest) -> Result<SkillResponse> {
        let raw_body = request.raw_body()?;
        let skill_request = SkillRequest::from_slice(&raw_body)?;

        self.verifier
            .verify(&SignatureHeaders::from_request(request), &raw_body)
            .await?;

        let session_id = skill_request.session_id();
        info!(
            session_id = session_id.unwrap_or_default(),
            request_type = skill_request.request.request_type.as_deref().unwrap_or_default(),
            "Handling skill request"
        );

        let context = self.load_context(&skill_request).await?;

        let utterance = skill_request.utterance();
        info!(utterance = %utterance, "Sending utterance to assistant");
        let reply = self.engine.message(&utterance, context).await?;

        let reply = actions::dispatch(&self.actions, reply).await?;

        let response = SkillResponse::speak(&reply);
        info!(text = %response.response.output_speech.text, "Composed response");

        match (&self.store, reply.context) {
            (Some(store), Some(context)) => {
                if let Some(session_id) = session_id {
                    save_context(store.as_ref(), session_id, &context).await;
                }
                Ok(response)
            }
            (None, Some(context)) => Ok(response.with_context(context)),
            (_, None) => Ok(response),
        }
    }

    async fn load_context(&self, request: &SkillRequest) -> Result<Context> {
        let Some(store) = &self.store else {
            return Ok(request.attribute_context().unwrap_or_default());
        };
        let Some(session_id) = request.session_id() else {
            return Ok(Context::new());
        };

        let context = store.load(session_id).await?;
        if context.is_none() {
            info!(session_id, "No stored context, starting fresh");
        }
        Ok(context.unwrap_or_default())
    }
}

/// Persist the context; failures are logged and otherwise ignored.
async fn save_context(store: &dyn ContextStore, session_id: &str, context: &Context) {
    if let Err(e) = store.save(session_id, context, SESSION_TTL).await {
        warn!(session_id, error = %e, "Failed to save session context");
    }
}
