use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::PraxisError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a text completion from ordered prompt parts.
    async fn generate(&self, parts: Vec<String>) -> Result<String, PraxisError>;

    fn model(&self) -> &str;
}

pub fn create_provider(config: &Config) -> Box<dyn LlmProvider> {
    Box::new(GeminiProvider::new(config))
}

// ---------------------------------------------------------------------------
// Gemini generateContent
// ---------------------------------------------------------------------------

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
    backoff_unit: Duration,
}

impl GeminiProvider {
    pub fn new(config: &Config) -> Self {
        GeminiProvider {
            http: reqwest::Client::new(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(parts: &[String]) -> Value {
        let parts: Vec<Value> = parts.iter().map(|text| json!({ "text": text })).collect();
        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "text/plain",
                "thinkingConfig": { "thinkingBudget": -1 }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct GeminiApiError {
    error: GeminiApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiApiErrorDetail {
    #[serde(default)]
    status: String,
    message: String,
}

impl GenerateResponse {
    /// Concatenated answer text of the first candidate, thought parts skipped.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, parts: Vec<String>) -> Result<String, PraxisError> {
        let body = Self::request_body(&parts);
        let url = self.endpoint();
        let mut retries = 0u32;

        loop {
            let response = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await?;
            let status = response.status();

            if status.is_success() {
                let raw = response.text().await?;
                let parsed: GenerateResponse = serde_json::from_str(&raw).map_err(|e| {
                    PraxisError::LlmApi(format!("Failed to parse response: {e}\nBody: {raw}"))
                })?;
                let text = parsed.text();
                debug!("Gemini returned {} chars", text.len());
                return Ok(text);
            }

            if status.as_u16() == 429 {
                if retries >= self.max_retries {
                    return Err(PraxisError::RateLimited);
                }
                retries += 1;
                let delay = self.backoff_unit * 2u32.pow(retries);
                warn!(
                    "Rate limited, retrying in {:?} (attempt {retries}/{})",
                    delay, self.max_retries
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let raw = response.text().await.unwrap_or_default();
            if let Ok(api_err) = serde_json::from_str::<GeminiApiError>(&raw) {
                return Err(PraxisError::LlmApi(format!(
                    "{}: {}",
                    api_err.error.status, api_err.error.message
                )));
            }
            return Err(PraxisError::LlmApi(format!("HTTP {status}: {raw}")));
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(base: &str) -> GeminiProvider {
        let mut config = Config::test_defaults();
        config.llm_base_url = base.to_string();
        let mut p = GeminiProvider::new(&config);
        p.backoff_unit = Duration::from_millis(1);
        p
    }

    #[test]
    fn test_request_body_shape() {
        let body = GeminiProvider::request_body(&["sys".into(), "User: hi".into()]);
        assert_eq!(body["contents"][0]["parts"][1]["text"], "User: hi");
        assert_eq!(body["generationConfig"]["responseMimeType"], "text/plain");
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            -1
        );
    }

    #[test]
    fn test_response_text_skips_thoughts() {
        let parsed: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [
                {"text": "thinking...", "thought": true},
                {"text": "Hello "},
                {"text": "there"}
            ]}}]
        }))
        .unwrap();
        assert_eq!(parsed.text(), "Hello there");
        let empty: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.text(), "");
    }

    #[tokio::test]
    async fn test_generate_posts_to_model_endpoint() {
        let seen: Arc<Mutex<Option<(String, String, Value)>>> = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/models/:call",
                post(
                    |State(seen): State<Arc<Mutex<Option<(String, String, Value)>>>>,
                     Path(call): Path<String>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let key = headers
                            .get("x-goog-api-key")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        *seen.lock().unwrap() = Some((call, key, body));
                        Json(json!({"candidates":[{"content":{"parts":[{"text":" Hi! "}]}}]}))
                    },
                ),
            )
            .with_state(seen.clone());
        let base = spawn(app).await;

        let reply = provider(&base)
            .generate(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(reply, " Hi! ");

        let (call, key, body) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(call, "gemini-2.5-flash:generateContent");
        assert_eq!(key, "test-key");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a");
    }

    #[tokio::test]
    async fn test_generate_retries_rate_limit() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/models/:call",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        return (StatusCode::TOO_MANY_REQUESTS, Json(json!({})));
                    }
                    (
                        StatusCode::OK,
                        Json(json!({"candidates":[{"content":{"parts":[{"text":"ok"}]}}]})),
                    )
                }),
            )
            .with_state(hits.clone());
        let base = spawn(app).await;

        assert_eq!(provider(&base).generate(vec!["x".into()]).await.unwrap(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_generate_gives_up_after_max_retries() {
        let app = Router::new().route(
            "/models/:call",
            post(|| async { StatusCode::TOO_MANY_REQUESTS }),
        );
        let base = spawn(app).await;
        assert!(matches!(
            provider(&base).generate(vec!["x".into()]).await,
            Err(PraxisError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_generate_surfaces_api_error() {
        let app = Router::new().route(
            "/models/:call",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error":{"code":400,"status":"INVALID_ARGUMENT","message":"bad key"}})),
                )
            }),
        );
        let base = spawn(app).await;
        let err = provider(&base).generate(vec!["x".into()]).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM API error: INVALID_ARGUMENT: bad key");
    }
}
