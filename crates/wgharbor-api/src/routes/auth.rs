use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{create_token, refresh_token};
use crate::config::Config;
use crate::db::user::{User, UserStore};
use crate::error::ApiError;
use crate::extract::AuthUser;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for UserInfo {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role.clone(),
            active: u.active,
            created_at: u.created_at,
            last_login: u.last_login,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/register", web::post().to(register))
            .route("/login", web::post().to(login))
            .route("/refresh", web::post().to(refresh))
            .route("/profile", web::get().to(get_profile))
            .route("/profile", web::put().to(update_profile))
            .route("/change-password", web::post().to(change_password))
            .route("/logout", web::post().to(logout)),
    );
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    if req.username.is_empty() || req.username.len() > 50 {
        return Err(ApiError::Validation(
            "username must be between 1 and 50 characters".to_string(),
        ));
    }
    if !req.email.contains('@') {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

#[tracing::instrument(skip(body, store, config))]
async fn register(
    body: web::Json<RegisterRequest>,
    store: web::Data<UserStore>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    validate_registration(&body)?;

    let user = store
        .create(&body.username, &body.email, &body.password)
        .await?;
    let (token, expires_at) = create_token(user.id, &user.username, &config.jwt_secret)?;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        expires_at,
        user: UserInfo::from(&user),
    }))
}

#[tracing::instrument(skip(body, store, config))]
async fn login(
    body: web::Json<LoginRequest>,
    store: web::Data<UserStore>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let user = store.authenticate(&body.username, &body.password).await?;
    let (token, expires_at) = create_token(user.id, &user.username, &config.jwt_secret)?;

    tracing::info!(user_id = %user.id, "login success");

    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        expires_at,
        user: UserInfo::from(&user),
    }))
}

#[tracing::instrument(skip(body, config))]
async fn refresh(
    body: web::Json<RefreshRequest>,
    config: web::Data<Config>,
) -> Result<HttpResponse, ApiError> {
    let (token, expires_at) = refresh_token(&body.token, &config.jwt_secret)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "expires_at": expires_at,
    })))
}

#[tracing::instrument(skip(store))]
async fn get_profile(
    auth: AuthUser,
    store: web::Data<UserStore>,
) -> Result<HttpResponse, ApiError> {
    let user = store
        .get_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::UserNotFound)?;
    Ok(HttpResponse::Ok().json(UserInfo::from(&user)))
}

#[tracing::instrument(skip(body, store))]
async fn update_profile(
    auth: AuthUser,
    body: web::Json<UpdateProfileRequest>,
    store: web::Data<UserStore>,
) -> Result<HttpResponse, ApiError> {
    if !body.email.contains('@') {
        return Err(ApiError::Validation("invalid email address".to_string()));
    }
    let user = store.update_email(auth.user_id, &body.email).await?;
    Ok(HttpResponse::Ok().json(UserInfo::from(&user)))
}

#[tracing::instrument(skip(body, store))]
async fn change_password(
    auth: AuthUser,
    body: web::Json<ChangePasswordRequest>,
    store: web::Data<UserStore>,
) -> Result<HttpResponse, ApiError> {
    if body.new_password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".to_string(),
        ));
    }

    let user = store
        .get_by_id(auth.user_id)
        .await?
        .ok_or(ApiError::UserNotFound)?;
    if !store.verify_password(&user, &body.current_password)? {
        return Err(ApiError::InvalidCredentials);
    }

    store.update_password(user.id, &body.new_password).await?;
    tracing::info!(user_id = %user.id, "password changed");

    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Password changed successfully" })))
}

/// Stateless acknowledgement; discarding the token is the client's job.
#[tracing::instrument(skip_all)]
async fn logout(_auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "message": "Logged out successfully" }))
}
