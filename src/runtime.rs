use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use crate::assistant::Assistant;
use crate::config::Config;
use crate::db::Database;
use crate::jwt::JwtKeys;
use crate::web::auth::AuthState;

/// Shared state of the chat service.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub jwt: JwtKeys,
    pub assistant: Assistant,
}

impl AppState {
    pub fn from_config(config: Config, db: Arc<Database>) -> anyhow::Result<Self> {
        let jwt = JwtKeys::from_config(&config)?;
        let llm = crate::llm::create_provider(&config);
        let retriever = crate::retrieval::create_retriever(&config)?;
        let assistant = Assistant::new(llm, retriever, config.retrieval_k);
        Ok(Self {
            config,
            db,
            jwt,
            assistant,
        })
    }
}

/// Run the chat service and the auth service side by side until either
/// stops.
pub async fn run(config: Config, db: Database) -> anyhow::Result<()> {
    config.validate_server()?;
    let db = Arc::new(db);
    let auth_state = AuthState::from_config(&config, db.clone())?;
    let state = Arc::new(AppState::from_config(config, db)?);
    info!("Assistant ready (model={})", state.assistant.model());

    let chat = tokio::spawn(crate::web::start_web_server(state));
    let auth = tokio::spawn(crate::web::start_auth_server(auth_state));
    tokio::select! {
        res = chat => res.map_err(|e| anyhow!("chat server task failed: {e}"))??,
        res = auth => res.map_err(|e| anyhow!("auth server task failed: {e}"))??,
    }
    Ok(())
}

/// Run only the auth service.
pub async fn run_auth(config: Config, db: Database) -> anyhow::Result<()> {
    config.validate_auth()?;
    let auth_state = AuthState::from_config(&config, Arc::new(db))?;
    crate::web::start_auth_server(auth_state).await?;
    Ok(())
}
