use praxis_core::chat_types::{ErrorBody, LoginRequest, LoginResponse};
use tracing::info;

use crate::error::ClientError;
use crate::token_store::TokenStore;

/// Front door of the client: obtains a session token either directly or by
/// exchanging a username at the auth service, and keeps it in the store.
#[derive(Debug, Clone)]
pub struct SessionGate {
    store: TokenStore,
    auth_base_url: String,
    http: reqwest::Client,
}

impl SessionGate {
    pub fn new(store: TokenStore, auth_base_url: &str) -> Self {
        Self {
            store,
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn current_token(&self) -> Option<String> {
        self.store.load()
    }

    pub fn sign_in_with_token(&self, token: &str) -> Result<String, ClientError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ClientError::InvalidInput("token is empty".into()));
        }
        self.store.save(token)?;
        Ok(token.to_string())
    }

    pub async fn sign_in_with_username(&self, username: &str) -> Result<String, ClientError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::InvalidInput("username is empty".into()));
        }

        let resp = self
            .http
            .post(format!("{}/login", self.auth_base_url))
            .json(&LoginRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let login: LoginResponse = resp.json().await?;
        self.store.save(&login.token)?;
        info!("Signed in as {username}");
        Ok(login.token)
    }

    pub fn sign_out(&self) -> Result<(), ClientError> {
        self.store.clear()
    }
}
