use kbridge_chatbot::KbError;
use kbridge_core::BridgeError;
use thiserror::Error;

/// Errors raised while routing a single turn. None of them are retried.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The turn carries neither `input` nor `output`.
    #[error("Invalid Request (neither input nor output)")]
    MalformedTurn,

    /// The knowledge-base response matches none of the known shapes.
    #[error("Unknown ChatbotAPI response: {0}")]
    UnrecognizedResponse(String),

    /// A non-bot action produced output where none was allowed.
    #[error("Non-Bot Response is not null: {0}")]
    NonBotActionConflict(String),

    #[error(transparent)]
    KnowledgeBase(#[from] KbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

impl From<ConnectorError> for BridgeError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::MalformedTurn => BridgeError::MalformedRequest(e.to_string()),
            ConnectorError::UnrecognizedResponse(_) => {
                BridgeError::UnrecognizedResponse(e.to_string())
            }
            ConnectorError::NonBotActionConflict(_) => {
                BridgeError::NonBotActionConflict(e.to_string())
            }
            ConnectorError::KnowledgeBase(kb) => kb.into(),
            ConnectorError::Serialization(se) => BridgeError::Serialization(se),
        }
    }
}
