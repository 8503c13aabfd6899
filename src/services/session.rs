//! Session management: JWT access tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    Expired,
}

pub const ACCESS_TOKEN_EXPIRY_HOURS: i64 = 12;

/// Create a JWT access token valid for 12 hours
pub fn create_access_token(user_id: i64, secret: &[u8]) -> Result<String, SessionError> {
    let now = Utc::now();
    let exp = now + Duration::hours(ACCESS_TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: user_id.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| SessionError::InvalidToken)
}

/// Validate a JWT access token and return the user_id
pub fn validate_access_token(token: &str, secret: &[u8]) -> Result<i64, SessionError> {
    // HS256 only, so a token can't pick its own algorithm
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "sub", "iat"]);

    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            log::debug!("JWT decode error: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => SessionError::Expired,
                _ => SessionError::InvalidToken,
            }
        })?;

    token_data
        .claims
        .sub
        .parse::<i64>()
        .map_err(|_| SessionError::InvalidToken)
}
