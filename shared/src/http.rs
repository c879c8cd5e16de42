//! API Gateway proxy envelope helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::alexa::SkillResponse;
use crate::{Error, Result};

/// API Gateway proxy request (simplified)
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayRequest {
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: Option<bool>,
}

impl ApiGatewayRequest {
    /// Look up a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()?
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw request body bytes, base64-decoded when flagged.
    ///
    /// A missing, empty, or undecodable body means the call did not come from Alexa.
    pub fn raw_body(&self) -> Result<Vec<u8>> {
        let body = self
            .body
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or(Error::NotFromAlexa)?;

        if self.is_base64_encoded.unwrap_or(false) {
            decode_base64(body).ok_or(Error::NotFromAlexa)
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }
}

/// Decode standard base64, tolerating surrounding whitespace.
pub fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    STANDARD.decode(encoded.trim()).ok()
}

/// API Gateway proxy response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl ApiGatewayResponse {
    pub fn new(status_code: u16, body: String, content_type: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        Self {
            status_code,
            headers,
            body,
            is_base64_encoded: false,
        }
    }

    pub fn json<T: Serialize>(status_code: u16, data: &T) -> Result<Self> {
        let body = serde_json::to_string(data)?;
        Ok(Self::new(status_code, body, "application/json"))
    }

    /// Wrap a pipeline outcome, mapping errors to the terminal envelope.
    pub fn from_outcome(outcome: &Result<SkillResponse>) -> Result<Self> {
        match outcome {
            Ok(response) => Self::json(200, response),
            Err(err) => Self::json(err.status_code(), &SkillResponse::error(err)),
        }
    }
}
