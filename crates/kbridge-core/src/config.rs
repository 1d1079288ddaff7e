use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8089;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_AUTH_URL: &str = "https://api.inbenta.io/v1/auth";
pub const DEFAULT_SESSION_LIFETIME_SECS: u64 = 30 * 60;
pub const DEFAULT_KB_TIMEOUT_SECS: u64 = 20;
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Top-level config (kbridge.toml + KBRIDGE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    /// Knowledge-base API credentials. When absent the gateway still serves
    /// turns but every escalation fails with a knowledge-base error.
    #[serde(default)]
    pub chatbot: Option<ChatbotConfig>,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Webhook authentication.
///
/// The assistant platform signs every webhook call with an HS256 JWT using
/// this shared secret. A missing secret rejects every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Intent/entity confidence at or above which the assistant platform is
    /// trusted and the knowledge base is not consulted. Must lie in [0, 1].
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatbotConfig {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// Conversation user type sent when a conversation is opened.
    #[serde(default)]
    pub user_type: u32,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_kb_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Live-chat address handed to the knowledge-base client on escalation.
    /// When unset, escalation requests are declined locally.
    pub chat_address: Option<String>,
    #[serde(default = "default_no_escalation")]
    pub no_escalation_message: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            chat_address: None,
            no_escalation_message: default_no_escalation(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Session values untouched for longer than this are purged on startup.
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}
fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_source() -> String {
    "watson".to_string()
}
fn default_kb_timeout() -> u64 {
    DEFAULT_KB_TIMEOUT_SECS
}
fn default_no_escalation() -> String {
    "Sorry, no agents are available right now.".to_string()
}
fn default_session_lifetime() -> u64 {
    DEFAULT_SESSION_LIFETIME_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kbridge/sessions.db", home)
}

impl BridgeConfig {
    /// Load config from a TOML file with KBRIDGE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `KBRIDGE_ASSISTANT__THRESHOLD=0.7` or `KBRIDGE_CHATBOT__API_KEY=...`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading configuration");

        let config: BridgeConfig = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KBRIDGE_").split("__"))
            .extract()
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the connector cannot operate with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let t = self.assistant.threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(crate::error::BridgeError::Config(format!(
                "assistant.threshold must be within [0, 1], got {t}"
            )));
        }
        if let Some(chatbot) = &self.chatbot {
            if chatbot.api_key.trim().is_empty() || chatbot.api_secret.trim().is_empty() {
                return Err(crate::error::BridgeError::Config(
                    "chatbot.api_key and chatbot.api_secret must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kbridge/kbridge.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BridgeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.assistant.threshold, DEFAULT_THRESHOLD);
        assert!(cfg.chatbot.is_none());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut cfg = BridgeConfig::default();
        cfg.assistant.threshold = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(crate::error::BridgeError::Config(_))
        ));
    }

    #[test]
    fn toml_sections_are_parsed() {
        let toml = r#"
            [assistant]
            threshold = 0.8

            [auth]
            jwt_secret = "s3cret"

            [chatbot]
            api_key = "key"
            api_secret = "secret"
        "#;
        let cfg: BridgeConfig = Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .expect("config should parse");
        assert_eq!(cfg.assistant.threshold, 0.8);
        assert_eq!(cfg.auth.jwt_secret.as_deref(), Some("s3cret"));
        let chatbot = cfg.chatbot.expect("chatbot section");
        assert_eq!(chatbot.auth_url, DEFAULT_AUTH_URL);
        assert_eq!(chatbot.timeout_secs, DEFAULT_KB_TIMEOUT_SECS);
        assert_eq!(cfg.escalation.chat_address, None);
    }
}
