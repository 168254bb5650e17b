use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use wgharbor_core::{PoolError, QrError, WgError};

use crate::db::user::UserStoreError;
use crate::db::vpn::VpnStoreError;
use crate::monitor::alerts::AlertError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authorization header is required")]
    MissingAuthHeader,

    #[error("Authorization header must start with 'Bearer '")]
    InvalidAuthScheme,

    #[error("JWT token is required")]
    EmptyToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User account is disabled")]
    AccountDisabled,

    #[error("Username already exists")]
    DuplicateUsername,

    #[error("Email already exists")]
    DuplicateEmail,

    #[error("Client name already exists")]
    DuplicateClientName,

    #[error("IP address already allocated")]
    AddressConflict,

    #[error("Client not found")]
    ClientNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("No available IP addresses in pool")]
    PoolExhausted,

    #[error("internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingAuthHeader
            | Self::InvalidAuthScheme
            | Self::EmptyToken
            | Self::InvalidToken
            | Self::InvalidCredentials
            | Self::AccountDisabled => StatusCode::UNAUTHORIZED,
            Self::DuplicateUsername
            | Self::DuplicateEmail
            | Self::DuplicateClientName
            | Self::AddressConflict => StatusCode::CONFLICT,
            Self::ClientNotFound | Self::UserNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::PoolExhausted | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<UserStoreError> for ApiError {
    fn from(err: UserStoreError) -> Self {
        match err {
            UserStoreError::DuplicateUsername => Self::DuplicateUsername,
            UserStoreError::DuplicateEmail => Self::DuplicateEmail,
            UserStoreError::InvalidPassword | UserStoreError::UserNotFound => {
                // Wrong username and wrong password are indistinguishable
                // to the caller.
                Self::InvalidCredentials
            }
            UserStoreError::Inactive => Self::AccountDisabled,
            UserStoreError::PasswordHash | UserStoreError::Database(_) => {
                tracing::error!(error = %err, "user store error");
                Self::Internal
            }
        }
    }
}

impl From<VpnStoreError> for ApiError {
    fn from(err: VpnStoreError) -> Self {
        match err {
            VpnStoreError::DuplicateName => Self::DuplicateClientName,
            VpnStoreError::DuplicatePublicKey | VpnStoreError::DuplicateAddress => {
                Self::AddressConflict
            }
            VpnStoreError::PeerNotFound => Self::ClientNotFound,
            VpnStoreError::ServerConfigMissing => {
                Self::Validation("server is not initialized".to_string())
            }
            VpnStoreError::Database(_) => {
                tracing::error!(error = %err, "vpn store error");
                Self::Internal
            }
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted => Self::PoolExhausted,
            PoolError::AlreadyAllocated(_) => Self::AddressConflict,
            PoolError::InvalidCidr(_)
            | PoolError::Ipv6Unsupported
            | PoolError::NetworkTooSmall
            | PoolError::InvalidAddress(_)
            | PoolError::OutOfRange(_)
            | PoolError::NetworkAddress(_)
            | PoolError::BroadcastAddress(_)
            | PoolError::ServerReserved(_)
            | PoolError::NotAllocated(_) => Self::Validation(err.to_string()),
        }
    }
}

impl From<WgError> for ApiError {
    fn from(err: WgError) -> Self {
        // Tool stderr and file paths stay in the logs.
        tracing::error!(error = %err, "wireguard driver error");
        Self::Internal
    }
}

impl From<QrError> for ApiError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::Empty | QrError::InvalidConfig | QrError::UnsupportedFormat(_) => {
                Self::Validation(err.to_string())
            }
            QrError::Encode(_) | QrError::Png(_) => {
                tracing::error!(error = %err, "qr encoding error");
                Self::Internal
            }
        }
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound(_) => Self::NotFound,
            AlertError::AlreadyResolved(_) => Self::Validation(err.to_string()),
        }
    }
}
