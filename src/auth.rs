//! User accounts and bearer-token sessions
//!
//! Passwords are stored as Argon2id PHC strings. Access tokens are opaque
//! random UUIDs kept server-side with an expiry, so logout revokes them.

use crate::store::{Store, UserConflict, UserRecord};
use anyhow::{anyhow, Context};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    InvalidSignup(String),

    #[error("Username already registered")]
    UsernameTaken,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Incorrect username or password")]
    InvalidCredentials,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<UserConflict> for AuthError {
    fn from(conflict: UserConflict) -> Self {
        match conflict {
            UserConflict::Username => AuthError::UsernameTaken,
            UserConflict::Email => AuthError::EmailTaken,
        }
    }
}

/// Signup request body
#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Login request body
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Issued bearer token
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Account and session operations over the service store
#[derive(Clone)]
pub struct AuthService {
    store: Store,
    token_ttl: Duration,
}

impl AuthService {
    pub fn new(store: Store, token_ttl_minutes: i64) -> Self {
        Self {
            store,
            token_ttl: Duration::minutes(token_ttl_minutes.max(1)),
        }
    }

    /// Register a new user
    pub async fn signup(&self, request: SignupRequest) -> Result<UserRecord, AuthError> {
        let email = request.email.trim().to_lowercase();
        let username = request.username.trim().to_string();
        validate_signup(&email, &username, &request.password)?;

        if self.store.find_user_by_username(&username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .context("Password hashing task failed")??;

        // A concurrent signup can still win the unique constraint
        let user = self
            .store
            .create_user(email, username, password_hash)
            .await??;

        info!(user_id = user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a token
    pub async fn login(&self, request: LoginRequest) -> Result<AccessToken, AuthError> {
        let user = self
            .store
            .find_user_by_username(request.username.trim())
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let hash = user.password_hash.clone();
        let password = request.password;
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .context("Password verification task failed")??;
        if !valid {
            debug!(username = %user.username, "Rejected login");
            return Err(AuthError::InvalidCredentials);
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + self.token_ttl;
        self.store.create_session(&token, user.id, expires_at).await?;

        info!(user_id = user.id, "User logged in");
        Ok(AccessToken {
            access_token: token,
            token_type: "bearer",
            expires_at,
        })
    }

    /// Resolve a bearer token to its user
    pub async fn authenticate(&self, token: &str) -> Result<UserRecord, AuthError> {
        self.store
            .find_session_user(token, Utc::now())
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    /// Revoke a token
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        if self.store.delete_session(token).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

fn validate_signup(email: &str, username: &str, password: &str) -> Result<(), AuthError> {
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email {
        return Err(AuthError::InvalidSignup("Invalid email address".to_string()));
    }

    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AuthError::InvalidSignup(format!(
            "Username must be {}-{} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(AuthError::InvalidSignup(
            "Username may only contain letters, digits, '_', '-' and '.'".to_string(),
        ));
    }

    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidSignup(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Hash a password into an Argon2id PHC string
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!("Salt encoding failed: {}", e))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string
pub fn verify_password(password: &str, phc: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| anyhow!("Stored password hash is invalid: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
