use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Unrecognized knowledge-base response: {0}")]
    UnrecognizedResponse(String),

    #[error("Knowledge-base error: {0}")]
    KnowledgeBase(String),

    #[error("Session storage error: {0}")]
    Session(String),

    #[error("Non-bot action conflict: {0}")]
    NonBotActionConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Short error code string written to logs next to the `{error}` body.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::AuthFailed(_) => "AUTH_FAILED",
            BridgeError::MalformedRequest(_) => "MALFORMED_REQUEST",
            BridgeError::UnrecognizedResponse(_) => "UNRECOGNIZED_RESPONSE",
            BridgeError::KnowledgeBase(_) => "KNOWLEDGE_BASE_ERROR",
            BridgeError::Session(_) => "SESSION_ERROR",
            BridgeError::NonBotActionConflict(_) => "NON_BOT_ACTION_CONFLICT",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
