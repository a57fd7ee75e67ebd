use super::*;

use crate::config::Config;
use crate::db::Database;
use crate::jwt::JwtKeys;

/// State of the standalone auth service.
#[derive(Clone)]
pub struct AuthState {
    pub(crate) db: Arc<Database>,
    pub(crate) jwt: JwtKeys,
    pub(crate) addr: String,
    cors: CorsPolicy,
}

impl AuthState {
    pub fn from_config(config: &Config, db: Arc<Database>) -> anyhow::Result<Self> {
        Ok(Self {
            db,
            jwt: JwtKeys::from_config(config)?,
            addr: config.auth_addr(),
            cors: CorsPolicy::new(&config.allowed_origin),
        })
    }
}

pub fn build_auth_router(state: AuthState) -> Router {
    let cors_policy = state.cors.clone();
    Router::new()
        .route("/login", post(api_login))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(cors_policy, cors))
}

/// `POST /login`: exchange a username for a session token, registering the
/// username on first use.
async fn api_login(
    State(state): State<AuthState>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, ApiError> {
    let username = body
        .as_ref()
        .and_then(|Json(v)| v.get("username"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    if username.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing username"));
    }

    let name = username.clone();
    let user_id = call_blocking(state.db.clone(), move |db| db.resolve_or_create_user(&name))
        .await
        .map_err(|e| internal_error("login", e))?;
    let token = state
        .jwt
        .create_jwt(&user_id.to_string(), Some(&username))
        .map_err(|e| internal_error("login", e))?;
    info!("[login] issued token for {username} (user_id={user_id})");
    Ok(Json(json!({ "token": token })))
}
