use crate::error::PraxisError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const SUPPORTED_JWT_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

fn default_data_dir() -> String {
    "./praxis.data".into()
}
fn default_web_host() -> String {
    "127.0.0.1".into()
}
fn default_web_port() -> u16 {
    5000
}
fn default_auth_port() -> u16 {
    5001
}
fn default_allowed_origin() -> String {
    "*".into()
}
fn default_jwt_algorithm() -> String {
    "HS256".into()
}
fn default_jwt_exp_minutes() -> i64 {
    60
}
fn default_llm_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_llm_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_retrieval_k() -> usize {
    3
}
fn default_history_window() -> usize {
    20
}
fn default_max_message_chars() -> usize {
    8000
}
fn default_client_base_url() -> String {
    "http://127.0.0.1:5000".into()
}
fn default_client_auth_url() -> String {
    "http://127.0.0.1:5001".into()
}
fn default_token_path() -> String {
    "./praxis.data/client/token".into()
}
fn default_page_size() -> usize {
    50
}

/// Settings for the terminal chat client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    #[serde(default = "default_client_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            auth_url: default_client_auth_url(),
            token_path: default_token_path(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_web_host")]
    pub web_host: String,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_auth_port")]
    pub auth_port: u16,
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default)]
    pub jwt_secret_key: String,
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,
    #[serde(default = "default_jwt_exp_minutes")]
    pub jwt_exp_minutes: i64,
    #[serde(default)]
    pub llm_api_key: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default)]
    pub docs_dir: Option<String>,
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            web_host: default_web_host(),
            web_port: default_web_port(),
            auth_port: default_auth_port(),
            allowed_origin: default_allowed_origin(),
            jwt_secret_key: String::new(),
            jwt_algorithm: default_jwt_algorithm(),
            jwt_exp_minutes: default_jwt_exp_minutes(),
            llm_api_key: String::new(),
            llm_model: default_llm_model(),
            llm_base_url: default_llm_base_url(),
            docs_dir: None,
            retrieval_k: default_retrieval_k(),
            history_window: default_history_window(),
            max_message_chars: default_max_message_chars(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    pub fn data_root_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Runtime data directory (database, logs).
    pub fn runtime_data_dir(&self) -> String {
        self.data_root_dir()
            .join("runtime")
            .to_string_lossy()
            .to_string()
    }

    pub fn resolve_config_path() -> Result<Option<PathBuf>, PraxisError> {
        if let Ok(custom) = std::env::var("PRAXIS_CONFIG") {
            if std::path::Path::new(&custom).exists() {
                return Ok(Some(PathBuf::from(custom)));
            }
            return Err(PraxisError::Config(format!(
                "PRAXIS_CONFIG points to non-existent file: {custom}"
            )));
        }

        for candidate in ["./praxis.config.yaml", "./praxis.config.yml"] {
            if std::path::Path::new(candidate).exists() {
                return Ok(Some(PathBuf::from(candidate)));
            }
        }
        Ok(None)
    }

    /// Load config from YAML (or defaults when no file exists), then apply
    /// environment overrides.
    pub fn load() -> Result<Self, PraxisError> {
        let mut config = match Self::resolve_config_path()? {
            Some(path) => {
                let path_str = path.to_string_lossy().to_string();
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| PraxisError::Config(format!("Failed to read {path_str}: {e}")))?;
                serde_yaml::from_str::<Config>(&content)
                    .map_err(|e| PraxisError::Config(format!("Failed to parse {path_str}: {e}")))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.post_deserialize()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("GEMINI_API_KEY") {
            self.llm_api_key = v;
        }
        if let Some(v) = get("JWT_SECRET_KEY") {
            self.jwt_secret_key = v;
        }
        if let Some(v) = get("JWT_ALGORITHM") {
            self.jwt_algorithm = v;
        }
        if let Some(v) = get("ALLOWED_ORIGIN") {
            self.allowed_origin = v;
        }
        if let Some(v) = get("DOCS_DIR") {
            self.docs_dir = Some(v);
        }
        if let Some(v) = get("PRAXIS_DATA_DIR") {
            self.data_dir = v;
        }
    }

    /// Normalize values and reject settings that can never work.
    pub fn post_deserialize(&mut self) -> Result<(), PraxisError> {
        self.jwt_algorithm = self.jwt_algorithm.trim().to_ascii_uppercase();
        if !SUPPORTED_JWT_ALGORITHMS.contains(&self.jwt_algorithm.as_str()) {
            return Err(PraxisError::Config(format!(
                "Unsupported jwt_algorithm '{}' (expected one of {})",
                self.jwt_algorithm,
                SUPPORTED_JWT_ALGORITHMS.join(", ")
            )));
        }
        if self.jwt_exp_minutes <= 0 {
            return Err(PraxisError::Config(
                "jwt_exp_minutes must be positive".into(),
            ));
        }
        if self.allowed_origin.trim().is_empty() {
            self.allowed_origin = default_allowed_origin();
        }
        if self.llm_model.trim().is_empty() {
            self.llm_model = default_llm_model();
        }
        self.llm_base_url = self.llm_base_url.trim().trim_end_matches('/').to_string();
        if self.llm_base_url.is_empty() {
            self.llm_base_url = default_llm_base_url();
        }
        self.docs_dir = self
            .docs_dir
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.retrieval_k = self.retrieval_k.max(1);
        self.history_window = self.history_window.max(1);
        if self.max_message_chars == 0 {
            self.max_message_chars = default_max_message_chars();
        }
        self.client.page_size = self.client.page_size.clamp(1, 200);
        Ok(())
    }

    /// Requirements for the auth service.
    pub fn validate_auth(&self) -> Result<(), PraxisError> {
        if self.jwt_secret_key.trim().is_empty() {
            return Err(PraxisError::Config(
                "jwt_secret_key is required (set JWT_SECRET_KEY)".into(),
            ));
        }
        Ok(())
    }

    /// Requirements for the chat service.
    pub fn validate_server(&self) -> Result<(), PraxisError> {
        self.validate_auth()?;
        if self.llm_api_key.trim().is_empty() {
            return Err(PraxisError::Config(
                "llm_api_key is required (set GEMINI_API_KEY)".into(),
            ));
        }
        Ok(())
    }

    pub fn web_addr(&self) -> String {
        format!("{}:{}", self.web_host, self.web_port)
    }

    pub fn auth_addr(&self) -> String {
        format!("{}:{}", self.web_host, self.auth_port)
    }

    pub fn test_defaults() -> Self {
        Self {
            jwt_secret_key: "test-secret".into(),
            llm_api_key: "test-key".into(),
            ..Self::default()
        }
    }
}
