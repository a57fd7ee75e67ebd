use praxis_core::chat_types::{
    ChatSummary, CreateChatRequest, CreateChatResponse, ErrorBody, HealthResponse,
    HistoryResponse, LegacyChatRequest, LegacyChatResponse, MeResponse, MessagesPage,
    PostMessageRequest, PostMessageResponse, Turn,
};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ClientError;

/// Which of the two server API shapes is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// `/api/chats` and `/api/chats/{id}/messages`.
    Threaded,
    /// The single-transcript `/history` + `/chat` pair.
    Legacy,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.set_token(Some(token.into()));
        self
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|t| !t.trim().is_empty());
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut req = self.http.request(method, self.url(path));
        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }

    async fn dispatch(&self, req: RequestBuilder) -> Result<Response, ClientError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .map(|b| b.error);
        debug!("API error {status}: {body}");
        Err(match status {
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized,
            StatusCode::NOT_FOUND => ClientError::NotFound { message },
            _ => ClientError::Status {
                status: status.as_u16(),
                message: message.unwrap_or(body),
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.dispatch(self.request(Method::GET, path)).await?;
        decode(resp).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let resp = self
            .dispatch(self.request(method, path).json(body))
            .await?;
        decode(resp).await
    }

    // --- legacy pair ---

    pub async fn legacy_history(&self) -> Result<HistoryResponse, ClientError> {
        self.get_json("/history").await
    }

    /// Post the whole transcript and return the assistant's reply text.
    pub async fn legacy_chat(&self, history: &[Turn]) -> Result<String, ClientError> {
        let body = LegacyChatRequest {
            history: history.to_vec(),
        };
        let resp: LegacyChatResponse = self.send_json(Method::POST, "/chat", &body).await?;
        Ok(resp.reply)
    }

    // --- per-thread endpoints ---

    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, ClientError> {
        self.get_json("/api/chats").await
    }

    pub async fn create_chat(&self, title: Option<&str>) -> Result<String, ClientError> {
        let body = CreateChatRequest {
            title: title.map(str::to_string),
        };
        let resp: CreateChatResponse = self.send_json(Method::POST, "/api/chats", &body).await?;
        Ok(resp.id)
    }

    pub async fn get_messages(
        &self,
        chat_id: &str,
        limit: Option<usize>,
        before: Option<&str>,
    ) -> Result<MessagesPage, ClientError> {
        let mut path = format!("/api/chats/{}/messages", urlencoding::encode(chat_id));
        let mut query = Vec::new();
        if let Some(limit) = limit {
            query.push(format!("limit={limit}"));
        }
        if let Some(before) = before {
            query.push(format!("before={}", urlencoding::encode(before)));
        }
        if !query.is_empty() {
            path.push('?');
            path.push_str(&query.join("&"));
        }
        self.get_json(&path).await
    }

    pub async fn post_message(
        &self,
        chat_id: &str,
        content: &str,
    ) -> Result<PostMessageResponse, ClientError> {
        let path = format!("/api/chats/{}/messages", urlencoding::encode(chat_id));
        let body = PostMessageRequest {
            content: content.to_string(),
        };
        self.send_json(Method::POST, &path, &body).await
    }

    pub async fn archive_chat(&self, chat_id: &str) -> Result<(), ClientError> {
        let path = format!("/api/chats/{}", urlencoding::encode(chat_id));
        self.dispatch(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    // --- misc ---

    pub async fn me(&self) -> Result<MeResponse, ClientError> {
        self.get_json("/api/me").await
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_json("/healthz").await
    }

    /// Probe `GET /api/chats` to find out which API shape the server speaks.
    pub async fn detect_mode(&self) -> Result<ApiMode, ClientError> {
        match self.dispatch(self.request(Method::GET, "/api/chats")).await {
            Ok(_) => Ok(ApiMode::Threaded),
            Err(e) if e.is_endpoint_missing() => {
                info!("Per-thread API unavailable at {}, using legacy endpoints", self.base_url);
                Ok(ApiMode::Legacy)
            }
            Err(e) => Err(e),
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}
