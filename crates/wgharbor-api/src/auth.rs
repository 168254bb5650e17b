use base64::engine::general_purpose::URL_SAFE as BASE64_URL;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

pub const TOKEN_ISSUER: &str = "vpn-server";

/// Default token lifetime: 24 hours.
pub fn default_lifetime() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub sub: String,
}

#[tracing::instrument(skip(secret))]
pub fn create_token(
    user_id: Uuid,
    username: &str,
    secret: &str,
) -> Result<(String, DateTime<Utc>), ApiError> {
    create_token_with_lifetime(user_id, username, secret, default_lifetime())
}

pub fn create_token_with_lifetime(
    user_id: Uuid,
    username: &str,
    secret: &str,
    lifetime: Duration,
) -> Result<(String, DateTime<Utc>), ApiError> {
    let now = Utc::now();
    let expires_at = now + lifetime;
    let claims = Claims {
        user_id,
        username: username.to_string(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: expires_at.timestamp(),
        iss: TOKEN_ISSUER.to_string(),
        sub: format!("user-{user_id}"),
    };

    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "failed to sign JWT");
        ApiError::Internal
    })?;

    Ok((token, expires_at))
}

#[tracing::instrument(skip(token, secret))]
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_issuer(&[TOKEN_ISSUER]);

    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::InvalidToken)
}

/// Validate and reissue with a fresh lifetime. The old token stays usable
/// until it expires on its own; revocation is out of scope.
pub fn refresh_token(token: &str, secret: &str) -> Result<(String, DateTime<Utc>), ApiError> {
    let claims = validate_token(token, secret)?;
    create_token(claims.user_id, &claims.username, secret)
}

/// 256-bit base64url signing secret for deployments that did not supply
/// one.
pub fn generate_secret() -> String {
    use argon2::password_hash::rand_core::{OsRng, RngCore};
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64_URL.encode(bytes)
}
