use async_trait::async_trait;
use kbridge_protocol::KbRequest;
use serde_json::Value;

/// Raw knowledge-base answer plus the conversation it belongs to.
#[derive(Debug, Clone)]
pub struct KbReply {
    /// Conversation token to reuse on the next request from this user.
    pub conversation: String,
    /// Unparsed response body; the digester decides its shape.
    pub body: Value,
}

/// Common interface for knowledge-base chatbot backends.
#[async_trait]
pub trait KnowledgeBaseClient: Send + Sync {
    /// Backend name for logging and error messages.
    fn name(&self) -> &str;

    /// Send one user message. `conversation` is the token returned by a
    /// previous reply, or `None` to open a new conversation.
    async fn send(&self, conversation: Option<&str>, req: &KbRequest) -> Result<KbReply, KbError>;

    /// Hand the conversation over to a live agent at `address`.
    async fn escalate(&self, address: &str) -> Result<Value, KbError>;
}

/// Response body that declines a live-agent handover with `message`.
pub fn decline_payload(message: &str) -> Value {
    serde_json::json!({
        "answers": [{"type": "answer", "message": message}]
    })
}

#[derive(Debug, thiserror::Error)]
pub enum KbError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Knowledge base unavailable: {0}")]
    Unavailable(String),
}

impl From<KbError> for kbridge_core::BridgeError {
    fn from(e: KbError) -> Self {
        kbridge_core::BridgeError::KnowledgeBase(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decline_payload_is_a_single_answer() {
        let payload = decline_payload("No agents available.");
        let answers = payload["answers"].as_array().unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0]["type"], "answer");
        assert_eq!(answers[0]["message"], "No agents available.");
    }
}
