use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Not signed in or session expired")]
    Unauthorized,

    /// The server answered 404. `message` carries the `{"error"}` body when
    /// the server produced one; a bare 404 means the route itself is absent.
    #[error("Not found{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    NotFound { message: Option<String> },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ClientError {
    /// True when the error means the endpoint does not exist on this server,
    /// as opposed to a missing resource behind an existing endpoint.
    pub fn is_endpoint_missing(&self) -> bool {
        match self {
            ClientError::NotFound { message } => message.is_none(),
            ClientError::Status { status, .. } => matches!(status, 405 | 501),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}
