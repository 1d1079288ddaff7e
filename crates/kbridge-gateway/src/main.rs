use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kbridge_chatbot::{decline_payload, HttpKnowledgeBase, KbError, KbReply, KnowledgeBaseClient};
use kbridge_core::BridgeConfig;
use kbridge_protocol::KbRequest;
use kbridge_sessions::{SessionStore, SqliteSessionStore};
use serde_json::Value;
use tracing::{info, warn};

mod app;
mod auth;
mod http;

/// How often idle sessions are swept while running.
const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(name = "kbridge-gateway", version, about = "Assistant webhook to knowledge-base bridge")]
struct Args {
    /// Path to kbridge.toml (falls back to KBRIDGE_CONFIG, then ~/.kbridge/kbridge.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "kbridge_gateway=info,kbridge_connector=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > KBRIDGE_CONFIG env > ~/.kbridge/kbridge.toml
    let args = Args::parse();
    let config_path = args.config.or_else(|| std::env::var("KBRIDGE_CONFIG").ok());
    let config = BridgeConfig::load(config_path.as_deref())?;

    if config.auth.jwt_secret.is_none() {
        warn!("auth.jwt_secret is not set, every webhook call will be rejected");
    }

    // session database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    kbridge_sessions::db::init_db(&db)?;

    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(db));
    let lifetime = Duration::from_secs(config.database.session_lifetime_secs);
    let purged = sessions.purge_idle(lifetime)?;
    info!(purged, "idle sessions purged");

    let kb = build_knowledge_base(&config)?;
    let router = kbridge_connector::TurnRouter::from_config(&config, kb);

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, Arc::clone(&sessions), router));
    let app = app::build_router(state);

    // sweep idle sessions in the background
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.purge_idle(lifetime) {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "idle sessions purged"),
                Err(e) => warn!(error = %e, "session purge failed"),
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("kbridge gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The HTTP knowledge base when `[chatbot]` is configured, otherwise a
/// placeholder that fails every request.
fn build_knowledge_base(config: &BridgeConfig) -> anyhow::Result<Arc<dyn KnowledgeBaseClient>> {
    let decline = config.escalation.no_escalation_message.clone();
    match &config.chatbot {
        Some(chatbot) => {
            info!(auth_url = %chatbot.auth_url, environment = %chatbot.environment, "knowledge base configured");
            Ok(Arc::new(HttpKnowledgeBase::new(chatbot.clone(), decline)?))
        }
        None => {
            warn!("no [chatbot] section configured, escalated turns will fail");
            Ok(Arc::new(NullKnowledgeBase { decline }))
        }
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Placeholder knowledge base when no credentials are available.
struct NullKnowledgeBase {
    decline: String,
}

#[async_trait::async_trait]
impl KnowledgeBaseClient for NullKnowledgeBase {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, _conversation: Option<&str>, _req: &KbRequest) -> Result<KbReply, KbError> {
        Err(KbError::Unavailable(
            "no knowledge base configured. Add a [chatbot] section to kbridge.toml".to_string(),
        ))
    }

    async fn escalate(&self, _address: &str) -> Result<Value, KbError> {
        Ok(decline_payload(&self.decline))
    }
}
