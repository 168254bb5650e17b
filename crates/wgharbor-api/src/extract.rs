use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::web::Data;
use actix_web::{FromRequest, HttpRequest};
use uuid::Uuid;

use crate::auth::{validate_token, Claims};
use crate::config::Config;
use crate::error::ApiError;

/// Extracts and validates the bearer token; rejects the request with a
/// distinct 401 for each failure mode.
#[derive(Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub claims: Claims,
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_auth(req))
    }
}

fn extract_auth(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let config = req.app_data::<Data<Config>>().ok_or(ApiError::Internal)?;

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingAuthHeader)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::InvalidAuthScheme)?;
    if token.is_empty() {
        return Err(ApiError::EmptyToken);
    }

    let claims = validate_token(token, &config.jwt_secret)?;

    Ok(AuthUser {
        user_id: claims.user_id,
        username: claims.username.clone(),
        claims,
    })
}

/// Attaches claims when a valid bearer token is present but never rejects
/// the request.
#[derive(Debug)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl FromRequest for MaybeAuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Ok(MaybeAuthUser(extract_auth(req).ok())))
    }
}
