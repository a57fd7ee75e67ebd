use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::config::Config;
use crate::error::PraxisError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Why a presented token was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    Expired,
    Invalid(String),
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenRejection::Expired => write!(f, "token expired"),
            TokenRejection::Invalid(reason) => write!(f, "invalid token: {reason}"),
        }
    }
}

/// Signing and verification keys for session tokens.
#[derive(Clone)]
pub struct JwtKeys {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    exp_minutes: i64,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("algorithm", &self.algorithm)
            .field("exp_minutes", &self.exp_minutes)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &str, algorithm: &str, exp_minutes: i64) -> Result<Self, PraxisError> {
        if secret.is_empty() {
            return Err(PraxisError::Config("JWT secret is empty".into()));
        }
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| PraxisError::Config(format!("Unknown JWT algorithm: {algorithm}")))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(PraxisError::Config(format!(
                "JWT algorithm {algorithm:?} needs a key pair; only HMAC algorithms are supported"
            )));
        }
        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            exp_minutes,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, PraxisError> {
        Self::new(
            &config.jwt_secret_key,
            &config.jwt_algorithm,
            config.jwt_exp_minutes,
        )
    }

    pub fn create_jwt(&self, user_id: &str, username: Option<&str>) -> Result<String, PraxisError> {
        self.create_jwt_with_ttl(user_id, username, self.exp_minutes)
    }

    pub fn create_jwt_with_ttl(
        &self,
        user_id: &str,
        username: Option<&str>,
        minutes: i64,
    ) -> Result<String, PraxisError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.map(str::to_string),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(minutes)).timestamp(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| PraxisError::Auth(format!("failed to sign token: {e}")))
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims, TokenRejection> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenRejection::Expired,
                _ => TokenRejection::Invalid(e.to_string()),
            }
        })?;
        if data.claims.sub.trim().is_empty() {
            return Err(TokenRejection::Invalid("empty subject".into()));
        }
        Ok(data.claims)
    }
}
