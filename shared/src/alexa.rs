//! Alexa request and response envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assistant::{Context, DialogReply};
use crate::error::{Error, GENERIC_ERROR_TEXT};

/// Slot that carries the raw user utterance.
pub const UTTERANCE_SLOT: &str = "EveryThingSlot";

/// Utterance sent to the dialog engine when the skill is launched.
pub const LAUNCH_UTTERANCE: &str = "start skill";

/// Session attribute holding the dialog context in attribute-carried mode.
pub const CONTEXT_ATTRIBUTE: &str = "watsonContext";

/// Decoded Alexa skill request.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillRequest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub request: RequestBody,
}

/// Alexa session.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
}

/// Alexa request payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(rename = "type", default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub intent: Option<Intent>,
}

/// Recognized intent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slots: Map<String, Value>,
}

impl SkillRequest {
    /// Decode a request from the raw body bytes.
    pub fn from_slice(raw_body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(raw_body).map_err(|_| Error::NotFromAlexa)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    /// Text to send to the dialog engine.
    ///
    /// With an intent carrying the utterance slot, its value is used verbatim;
    /// otherwise the launch sentinel.
    pub fn utterance(&self) -> String {
        self.request
            .intent
            .as_ref()
            .and_then(|intent| intent.slots.get(UTTERANCE_SLOT))
            .and_then(|slot| slot.get("value"))
            .and_then(Value::as_str)
            .unwrap_or(LAUNCH_UTTERANCE)
            .to_string()
    }

    /// Context carried in the session attributes, if any.
    pub fn attribute_context(&self) -> Option<Context> {
        self.session
            .as_ref()
            .and_then(|s| s.attributes.as_ref())
            .and_then(|attrs| attrs.get(CONTEXT_ATTRIBUTE))
            .and_then(Value::as_object)
            .cloned()
    }
}

/// Alexa response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SkillResponse {
    pub version: String,
    pub response: ResponseBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_attributes: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub should_end_session: bool,
    pub output_speech: OutputSpeech,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSpeech {
    #[serde(rename = "type")]
    pub speech_type: String,
    pub text: String,
}

impl SkillResponse {
    fn plain_text(text: String, should_end_session: bool) -> Self {
        Self {
            version: "1.0".to_string(),
            response: ResponseBody {
                should_end_session,
                output_speech: OutputSpeech {
                    speech_type: "PlainText".to_string(),
                    text,
                },
            },
            session_attributes: None,
        }
    }

    /// Speak the reply's text fragments and keep the session open.
    pub fn speak(reply: &DialogReply) -> Self {
        Self::plain_text(reply.output.text.join(" "), false)
    }

    /// Terminal response for a failed request.
    pub fn error(err: &Error) -> Self {
        Self::reason(Some(err.spoken_reason()))
    }

    /// Terminal response with an explicit reason or the generic message.
    pub fn reason(reason: Option<&str>) -> Self {
        Self::plain_text(reason.unwrap_or(GENERIC_ERROR_TEXT).to_string(), true)
    }

    /// Carry the dialog context back to Alexa as a session attribute.
    pub fn with_context(mut self, context: Context) -> Self {
        let mut attributes = Map::new();
        attributes.insert(CONTEXT_ATTRIBUTE.to_string(), Value::Object(context));
        self.session_attributes = Some(attributes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::DialogOutput;
    use serde_json::json;

    fn request(value: Value) -> SkillRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_utterance_from_slot() {
        let req = request(json!({
            "session": {"sessionId": "s1"},
            "request": {"intent": {"slots": {"EveryThingSlot": {"value": "what is the weather"}}}}
        }));
        assert_eq!(req.utterance(), "what is the weather");
    }

    #[test]
    fn test_utterance_without_intent() {
        let req = request(json!({"request": {}, "session": {"sessionId": "s1"}}));
        assert_eq!(req.utterance(), LAUNCH_UTTERANCE);
        assert_eq!(req.session_id(), Some("s1"));
    }

    #[test]
    fn test_attribute_context() {
        let req = request(json!({
            "session": {"sessionId": "s1", "attributes": {"watsonContext": {"conversation_id": "c1"}}},
            "request": {}
        }));
        let context = req.attribute_context().unwrap();
        assert_eq!(context.get("conversation_id"), Some(&json!("c1")));

        let bare = request(json!({"session": {"sessionId": "s1"}, "request": {}}));
        assert!(bare.attribute_context().is_none());
    }

    #[test]
    fn test_invalid_body_is_not_from_alexa() {
        assert!(matches!(SkillRequest::from_slice(b"not json"), Err(Error::NotFromAlexa)));
    }

    #[test]
    fn test_speak_envelope() {
        let reply = DialogReply {
            output: DialogOutput {
                text: vec!["Hello".to_string(), "there.".to_string()],
                ..Default::default()
            },
            context: None,
        };
        let value = serde_json::to_value(SkillResponse::speak(&reply)).unwrap();
        assert_eq!(
            value,
            json!({
                "version": "1.0",
                "response": {
                    "shouldEndSession": false,
                    "outputSpeech": {"type": "PlainText", "text": "Hello there."}
                }
            })
        );
    }

    #[test]
    fn test_error_envelope() {
        let response = SkillResponse::error(&Error::NotFromAlexa);
        assert!(response.response.should_end_session);
        assert_eq!(response.response.output_speech.text, "Must be called from Alexa.");

        let generic = SkillResponse::reason(None);
        assert_eq!(generic.response.output_speech.text, GENERIC_ERROR_TEXT);
    }

    #[test]
    fn test_with_context() {
        let mut context = Map::new();
        context.insert("turn".to_string(), json!(2));
        let value = serde_json::to_value(SkillResponse::reason(None).with_context(context)).unwrap();
        assert_eq!(value["sessionAttributes"]["watsonContext"]["turn"], json!(2));
    }
}
