// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("username already taken")]
    DuplicateUsername,

    #[error("email already taken")]
    DuplicateEmail,

    #[error("password hashing failed")]
    PasswordHash,

    #[error("user not found")]
    UserNotFound,

    #[error("invalid password")]
    InvalidPassword,

    #[error("user account is deactivated")]
    Inactive,
}

type Result<T> = std::result::Result<T, UserStoreError>;

#[derive(Debug, Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| UserStoreError::PasswordHash)
}

fn map_unique_violation(e: sqlx::Error) -> UserStoreError {
    if let sqlx::Error::Database(db_err) = &e {
        let message = db_err.message();
        if message.contains("users.username") {
            return UserStoreError::DuplicateUsername;
        }
        if message.contains("users.email") {
            return UserStoreError::DuplicateEmail;
        }
    }
    UserStoreError::Database(e)
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Hash the password and insert the user. The plaintext never reaches
    /// the database.
    #[tracing::instrument(skip(self, password))]
    pub async fn create(&self, username: &str, email: &str, password: &str) -> Result<User> {
        let password_hash = hash_password(password)?;
        let now = Utc::now();

        sqlx::query_as::<_, User>(
            "INSERT INTO users (id, username, email, password_hash, role, active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'user', 1, $5, $5)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(map_unique_violation)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY username")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self, user, password), fields(user_id = %user.id))]
    pub fn verify_password(&self, user: &User, password: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(&user.password_hash).map_err(|_| UserStoreError::PasswordHash)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    /// Load by username, refuse inactive accounts, verify the password,
    /// and stamp `last_login`.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let mut user = self
            .get_by_username(username)
            .await?
            .ok_or(UserStoreError::UserNotFound)?;

        if !user.active {
            return Err(UserStoreError::Inactive);
        }
        if !self.verify_password(&user, password)? {
            return Err(UserStoreError::InvalidPassword);
        }

        let now = Utc::now();
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(now)
            .bind(user.id)
            .execute(&self.pool)
            .await?;
        user.last_login = Some(now);

        Ok(user)
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_email(&self, id: Uuid, email: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET email = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(email)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_unique_violation)?
        .ok_or(UserStoreError::UserNotFound)
    }

    #[tracing::instrument(skip(self, new_password))]
    pub async fn update_password(&self, id: Uuid, new_password: &str) -> Result<()> {
        let password_hash = hash_password(new_password)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = $2 WHERE id = $3")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        sqlx::query("UPDATE users SET active = $1, updated_at = $2 WHERE id = $3")
            .bind(active)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
