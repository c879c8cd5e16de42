//! Error types for the Alexa skill bridge.

use thiserror::Error;

use crate::actions::ActionError;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Spoken when an error carries no caller-facing reason of its own.
pub const GENERIC_ERROR_TEXT: &str = "An unexpected error occurred. Please try again later.";

/// Errors that can occur while handling a skill request.
#[derive(Error, Debug)]
pub enum Error {
    /// Request body missing or not decodable
    #[error("Must be called from Alexa.")]
    NotFromAlexa,

    /// Signature verification error
    #[error("Alexa verification failed: {0}")]
    Verification(String),

    /// Session store error
    #[error("Session store error: {0}")]
    Store(String),

    /// Dialog engine error
    #[error("Dialog engine error: {0}")]
    Dialog(String),

    /// Action dispatch error
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFromAlexa | Error::Verification(_) => 400,
            _ => 500,
        }
    }

    /// Text spoken back to the user in the error envelope.
    pub fn spoken_reason(&self) -> &'static str {
        match self {
            Error::NotFromAlexa => "Must be called from Alexa.",
            Error::Verification(_) => "Alexa verification failed.",
            Error::Dialog(_) => "Error talking to the assistant.",
            _ => GENERIC_ERROR_TEXT,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::NotFromAlexa.status_code(), 400);
        assert_eq!(Error::Verification("bad".into()).status_code(), 400);
        assert_eq!(Error::Store("down".into()).status_code(), 500);
        assert_eq!(Error::Action(ActionError::NoForecastService("weather".into())).status_code(), 500);
    }

    #[test]
    fn test_spoken_reason_hides_upstream_detail() {
        let err = Error::Store("connection refused (os error 111)".into());
        assert_eq!(err.spoken_reason(), GENERIC_ERROR_TEXT);
        assert_eq!(Error::NotFromAlexa.spoken_reason(), "Must be called from Alexa.");
    }
}
