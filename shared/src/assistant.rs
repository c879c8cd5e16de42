//! Dialog engine client for the Watson Assistant V1 message API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::config::AssistantCredentials;
use crate::{Error, Result};

/// API version date sent with every message call.
pub const API_VERSION: &str = "2020-02-02";

/// Opaque conversation state exchanged with the dialog engine.
pub type Context = Map<String, Value>;

/// Reply from the dialog engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogReply {
    pub output: DialogOutput,
    /// Updated context to carry into the next turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Output section of a dialog reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DialogOutput {
    /// Text fragments, spoken in order
    #[serde(default)]
    pub text: Vec<String>,
    /// Follow-up action requested by the dialog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Location for the weather lookup action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Everything else the engine returned
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A conversational engine that turns an utterance plus context into a reply.
#[async_trait]
pub trait DialogEngine: Send + Sync {
    async fn message(&self, utterance: &str, context: Context) -> Result<DialogReply>;
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    input: MessageInput<'a>,
    context: &'a Context,
}

#[derive(Debug, Serialize)]
struct MessageInput<'a> {
    text: &'a str,
}

/// Client for the Watson Assistant message endpoint.
pub struct WatsonAssistant {
    http_client: reqwest::Client,
    base_url: String,
    workspace_id: String,
    username: String,
    password: String,
}

impl WatsonAssistant {
    /// Create a new client.
    ///
    /// Credentials must already be resolved; `AssistantCredentials::Secret` is rejected.
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        workspace_id: impl Into<String>,
        credentials: &AssistantCredentials,
    ) -> Result<Self> {
        let (username, password) = match credentials {
            AssistantCredentials::ApiKey(key) => ("apikey".to_string(), key.clone()),
            AssistantCredentials::Basic { username, password } => (username.clone(), password.clone()),
            AssistantCredentials::Secret(_) => {
                return Err(Error::Config("Assistant credentials secret not resolved".to_string()))
            }
        };

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            workspace_id: workspace_id.into(),
            username,
            password,
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    fn message_url(&self) -> String {
        format!(
            "{}/v1/workspaces/{}/message?version={}",
            self.base_url, self.workspace_id, API_VERSION
        )
    }
}

#[async_trait]
impl DialogEngine for WatsonAssistant {
    async fn message(&self, utterance: &str, context: Context) -> Result<DialogReply> {
        let request = MessageRequest {
            input: MessageInput { text: utterance },
            context: &context,
        };

        let response = self
            .http_client
            .post(self.message_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Dialog(format!("Failed to reach assistant: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(%status, body = %body, "Assistant message failed");
            return Err(Error::Dialog(format!("Assistant returned {}", status)));
        }

        let reply: DialogReply = response
            .json()
            .await
            .map_err(|e| Error::Dialog(format!("Failed to parse assistant reply: {}", e)))?;

        debug!(
            fragments = reply.output.text.len(),
            action = ?reply.output.action,
            "Assistant replied"
        );

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply() {
        let reply: DialogReply = serde_json::from_value(json!({
            "intents": [],
            "output": {
                "action": "lookupWeather",
                "location": "Austin",
                "text": ["Sure,"],
                "nodes_visited": ["node_1"]
            },
            "context": {"conversation_id": "c1"}
        }))
        .unwrap();

        assert_eq!(reply.output.text, vec!["Sure,"]);
        assert_eq!(reply.output.action.as_deref(), Some("lookupWeather"));
        assert_eq!(reply.output.location.as_deref(), Some("Austin"));
        assert_eq!(reply.output.extra["nodes_visited"], json!(["node_1"]));
        assert_eq!(reply.context.unwrap()["conversation_id"], json!("c1"));
    }

    #[test]
    fn test_message_request_shape() {
        let mut context = Context::new();
        context.insert("turn".to_string(), json!(1));
        let request = MessageRequest {
            input: MessageInput { text: "start skill" },
            context: &context,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"input": {"text": "start skill"}, "context": {"turn": 1}})
        );
    }

    #[test]
    fn test_message_url() {
        let assistant = WatsonAssistant::new(
            reqwest::Client::new(),
            "https://api.example.com/assistant/",
            "ws-1",
            &AssistantCredentials::ApiKey("key".to_string()),
        )
        .unwrap();
        assert_eq!(
            assistant.message_url(),
            "https://api.example.com/assistant/v1/workspaces/ws-1/message?version=2020-02-02"
        );
    }

    #[test]
    fn test_unresolved_secret_rejected() {
        let result = WatsonAssistant::new(
            reqwest::Client::new(),
            "https://api.example.com",
            "ws-1",
            &AssistantCredentials::Secret("arn".to_string()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
