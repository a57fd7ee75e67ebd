use super::*;
use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::jwt::{JwtKeys, TokenRejection};

pub(crate) type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Log the real cause and answer with the generic 500 envelope.
pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    error!("[{context}] {err}");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

pub(crate) fn auth_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?.trim();
    let mut parts = raw.splitn(2, char::is_whitespace);
    let scheme = parts.next()?.trim();
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Identity taken from a verified session token.
#[derive(Clone, Debug)]
pub(crate) struct AuthUser {
    pub(crate) user_id: String,
    pub(crate) username: Option<String>,
}

pub(crate) fn require_user(jwt: &JwtKeys, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let Some(token) = auth_token_from_headers(headers) else {
        warn!("[jwt] Missing/invalid Authorization header");
        return Err(api_error(StatusCode::UNAUTHORIZED, "Missing/invalid token"));
    };
    match jwt.verify_jwt(&token) {
        Ok(claims) => {
            debug!("[jwt] accepted token for sub={}", claims.sub);
            Ok(AuthUser {
                user_id: claims.sub,
                username: claims.username,
            })
        }
        Err(rejection) => {
            match &rejection {
                TokenRejection::Expired => warn!("[jwt] expired token"),
                TokenRejection::Invalid(reason) => warn!("[jwt] invalid token: {reason}"),
            }
            Err(api_error(
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token",
            ))
        }
    }
}

const ALLOW_HEADERS: &str = "Content-Type,Authorization";
const ALLOW_METHODS: &str = "GET,POST,DELETE,OPTIONS";

#[derive(Clone, Debug)]
pub(crate) struct CorsPolicy {
    allowed_origin: HeaderValue,
}

impl CorsPolicy {
    pub(crate) fn new(origin: &str) -> Self {
        let allowed_origin = HeaderValue::from_str(origin.trim()).unwrap_or_else(|_| {
            warn!("allowed_origin '{origin}' is not a valid header value, using '*'");
            HeaderValue::from_static("*")
        });
        Self { allowed_origin }
    }

    fn apply(&self, response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert("access-control-allow-origin", self.allowed_origin.clone());
        headers.insert(
            "access-control-allow-headers",
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static(ALLOW_METHODS),
        );
    }
}

/// Stamp CORS headers on every response and answer preflights directly.
pub(crate) async fn cors(State(policy): State<CorsPolicy>, req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    policy.apply(&mut response);
    response
}
