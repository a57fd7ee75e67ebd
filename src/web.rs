use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::runtime::AppState;
use praxis_storage::db::call_blocking;

pub mod auth;
mod chats;
mod legacy;
mod middleware;
use middleware::*;

/// Router state of the chat service.
#[derive(Clone)]
pub struct WebState {
    app_state: Arc<AppState>,
    cors: CorsPolicy,
}

impl WebState {
    pub fn new(app_state: Arc<AppState>) -> Self {
        let cors = CorsPolicy::new(&app_state.config.allowed_origin);
        Self { app_state, cors }
    }

    fn user(&self, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
        require_user(&self.app_state.jwt, headers)
    }
}

async fn api_healthz(State(state): State<WebState>) -> Json<Value> {
    let db_ok = call_blocking(state.app_state.db.clone(), |db| Ok(db.ping()))
        .await
        .unwrap_or(false);
    Json(json!({
        "ok": true,
        "db": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn api_me(
    headers: HeaderMap,
    State(state): State<WebState>,
) -> Result<Json<Value>, ApiError> {
    let user = state.user(&headers)?;
    Ok(Json(json!({
        "user_id": user.user_id,
        "username": user.username,
    })))
}

pub fn build_router(web_state: WebState) -> Router {
    let cors_policy = web_state.cors.clone();
    Router::new()
        .route("/healthz", get(api_healthz))
        .route("/history", get(legacy::api_history))
        .route("/chat", post(legacy::api_chat))
        .route("/api/me", get(api_me))
        .route(
            "/api/chats",
            get(chats::api_list_chats).post(chats::api_create_chat),
        )
        .route("/api/chats/:id", axum::routing::delete(chats::api_archive_chat))
        .route(
            "/api/chats/:id/messages",
            get(chats::api_get_messages).post(chats::api_post_message),
        )
        .with_state(web_state)
        .layer(axum::middleware::from_fn_with_state(cors_policy, cors))
}

async fn serve(router: Router, addr: String, label: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {label} at {addr}: {e}"))?;
    info!("{label} listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .map_err(|e| anyhow::anyhow!("{label} error: {e}"))?;
    Ok(())
}

pub async fn start_web_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = state.config.web_addr();
    serve(build_router(WebState::new(state)), addr, "Chat service").await
}

pub async fn start_auth_server(state: auth::AuthState) -> anyhow::Result<()> {
    let addr = state.addr.clone();
    serve(auth::build_auth_router(state), addr, "Auth service").await
}
