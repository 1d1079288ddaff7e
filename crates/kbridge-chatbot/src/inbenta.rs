//! HTTP knowledge-base client.
//!
//! Auth flow:
//!   1. `POST {auth_url}` with the API key header and `{secret}` returns an
//!      access token, its expiry and the chatbot API base URL.
//!   2. The access token is cached until shortly before it expires.
//!   3. `POST {chatbot}/v1/conversation` opens a conversation per user; its
//!      token travels back to the caller in [`KbReply::conversation`].
//!   4. `POST {chatbot}/v1/conversation/message` sends the user message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kbridge_core::config::ChatbotConfig;
use kbridge_protocol::KbRequest;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::client::{decline_payload, KbError, KbReply, KnowledgeBaseClient};

const API_KEY_HEADER: &str = "x-inbenta-key";
const SESSION_HEADER: &str = "x-inbenta-session";
/// Refresh the access token this many seconds before it expires.
const EXPIRY_MARGIN_SECS: i64 = 120;

/// Cached access token and the API it unlocks.
struct CachedToken {
    token: String,
    chatbot_url: String,
    expires_at: i64,
}

pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    config: ChatbotConfig,
    decline_message: String,
    cached: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    access_token: String,
    expiration: i64,
    apis: AuthApis,
}

#[derive(Deserialize)]
struct AuthApis {
    chatbot: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    session_token: String,
}

impl HttpKnowledgeBase {
    pub fn new(config: ChatbotConfig, decline_message: impl Into<String>) -> Result<Self, KbError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            decline_message: decline_message.into(),
            cached: Arc::new(RwLock::new(None)),
        })
    }

    /// Ensure we have a valid access token. Refresh if expired.
    /// Returns `(access_token, chatbot_url)`.
    async fn ensure_token(&self) -> Result<(String, String), KbError> {
        let now = chrono::Utc::now().timestamp();

        // Fast path
        {
            let cached = self.cached.read().await;
            if let Some(ref c) = *cached {
                if now + EXPIRY_MARGIN_SECS < c.expires_at {
                    return Ok((c.token.clone(), c.chatbot_url.clone()));
                }
            }
        }

        // Slow path: authenticate again
        let mut cached = self.cached.write().await;
        let now = chrono::Utc::now().timestamp();
        if let Some(ref c) = *cached {
            if now + EXPIRY_MARGIN_SECS < c.expires_at {
                return Ok((c.token.clone(), c.chatbot_url.clone()));
            }
        }

        info!("requesting knowledge-base access token");
        let fresh = self.authenticate().await?;
        let result = (fresh.token.clone(), fresh.chatbot_url.clone());
        *cached = Some(fresh);
        Ok(result)
    }

    /// Forget the cached access token so the next call authenticates again.
    async fn invalidate_token(&self) {
        *self.cached.write().await = None;
    }

    async fn authenticate(&self) -> Result<CachedToken, KbError> {
        let resp = self
            .client
            .post(&self.config.auth_url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&serde_json::json!({ "secret": self.config.api_secret }))
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "knowledge-base auth failed");
            return Err(KbError::Api {
                status,
                message: text,
            });
        }

        let auth: AuthResponse = resp
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;

        debug!(expires_at = auth.expiration, "knowledge-base access token obtained");
        Ok(CachedToken {
            token: auth.access_token,
            chatbot_url: auth.apis.chatbot.trim_end_matches('/').to_string(),
            expires_at: auth.expiration,
        })
    }

    async fn open_conversation(&self, token: &str, chatbot_url: &str) -> Result<String, KbError> {
        let resp = self
            .client
            .post(format!("{chatbot_url}/v1/conversation"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .bearer_auth(token)
            .json(&conversation_body(&self.config))
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "could not open knowledge-base conversation");
            return Err(KbError::Api {
                status,
                message: text,
            });
        }

        let conv: ConversationResponse = resp
            .json()
            .await
            .map_err(|e| KbError::Parse(e.to_string()))?;
        debug!("knowledge-base conversation opened");
        Ok(conv.session_token)
    }

    async fn post_message(
        &self,
        token: &str,
        chatbot_url: &str,
        conversation: &str,
        req: &KbRequest,
    ) -> Result<Value, KbError> {
        let resp = self
            .client
            .post(format!("{chatbot_url}/v1/conversation/message"))
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(SESSION_HEADER, format!("Bearer {conversation}"))
            .bearer_auth(token)
            .json(req)
            .send()
            .await
            .map_err(unavailable)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "knowledge-base message failed");
            return Err(KbError::Api {
                status,
                message: text,
            });
        }

        resp.json().await.map_err(|e| KbError::Parse(e.to_string()))
    }
}

#[async_trait]
impl KnowledgeBaseClient for HttpKnowledgeBase {
    fn name(&self) -> &str {
        "inbenta"
    }

    #[instrument(skip(self, conversation, req))]
    async fn send(&self, conversation: Option<&str>, req: &KbRequest) -> Result<KbReply, KbError> {
        let (token, chatbot_url) = self.ensure_token().await?;

        let conversation = match conversation {
            Some(existing) => existing.to_string(),
            None => self.open_conversation(&token, &chatbot_url).await?,
        };

        match self.post_message(&token, &chatbot_url, &conversation, req).await {
            Ok(body) => Ok(KbReply { conversation, body }),
            // Conversations expire server-side; a rejected token gets one fresh conversation.
            Err(KbError::Api { status, .. }) if conversation_expired(status) => {
                info!(status, "knowledge-base conversation expired, opening a new one");
                let (token, chatbot_url) = if status == 401 {
                    self.invalidate_token().await;
                    self.ensure_token().await?
                } else {
                    (token, chatbot_url)
                };
                let fresh = self.open_conversation(&token, &chatbot_url).await?;
                let body = self.post_message(&token, &chatbot_url, &fresh, req).await?;
                Ok(KbReply {
                    conversation: fresh,
                    body,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn escalate(&self, address: &str) -> Result<Value, KbError> {
        // Live handover is not wired up; every request is declined.
        info!(address, "escalation requested, declining");
        Ok(decline_payload(&self.decline_message))
    }
}

/// Conversation-creation body.
fn conversation_body(config: &ChatbotConfig) -> Value {
    serde_json::json!({
        "userType": config.user_type,
        "environment": config.environment,
        "source": config.source,
    })
}

fn conversation_expired(status: u16) -> bool {
    matches!(status, 400 | 401 | 404)
}

/// Surface connection errors as Unavailable, everything else as Http.
fn unavailable(e: reqwest::Error) -> KbError {
    if e.is_connect() || e.is_timeout() {
        KbError::Unavailable(e.to_string())
    } else {
        KbError::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChatbotConfig {
        ChatbotConfig {
            api_key: "key".into(),
            api_secret: "secret".into(),
            auth_url: "http://127.0.0.1:9/v1/auth".into(),
            user_type: 2,
            environment: "production".into(),
            source: "watson".into(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn conversation_body_carries_config() {
        let body = conversation_body(&config());
        assert_eq!(body["userType"], 2);
        assert_eq!(body["environment"], "production");
        assert_eq!(body["source"], "watson");
    }

    #[test]
    fn auth_response_is_decoded() {
        let raw = serde_json::json!({
            "accessToken": "abc",
            "expiration": 1_900_000_000,
            "apis": {"chatbot": "https://api-eu.example.com/prod/chatbot", "search": "x"}
        });
        let auth: AuthResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(auth.access_token, "abc");
        assert_eq!(auth.apis.chatbot, "https://api-eu.example.com/prod/chatbot");
    }

    #[tokio::test]
    async fn escalate_always_declines() {
        let kb = HttpKnowledgeBase::new(config(), "Nobody is around.").unwrap();
        let payload = kb.escalate("chat@example.com").await.unwrap();
        assert_eq!(payload["answers"][0]["message"], "Nobody is around.");
    }

    #[tokio::test]
    async fn invalidated_token_forces_reauthentication() {
        let kb = HttpKnowledgeBase::new(config(), "x").unwrap();
        *kb.cached.write().await = Some(CachedToken {
            token: "old".into(),
            chatbot_url: "http://127.0.0.1:9/chatbot".into(),
            expires_at: chrono::Utc::now().timestamp() + 3600,
        });
        assert_eq!(kb.ensure_token().await.unwrap().0, "old");

        kb.invalidate_token().await;
        assert!(kb.cached.read().await.is_none());
        // The auth endpoint is unreachable, so re-authenticating fails.
        assert!(kb.ensure_token().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_auth_endpoint_is_an_error() {
        let kb = HttpKnowledgeBase::new(config(), "x").unwrap();
        let result = kb.send(None, &KbRequest::new("hi")).await;
        assert!(result.is_err());
    }
}
