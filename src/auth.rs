//! Authentication module.
//!
//! Passwords are stored as Argon2 hashes. Sessions are stateless HS256
//! tokens carrying the user's email, id and admin flag.

use crate::db::{Database, User, now_timestamp};
use crate::error::{AppError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 4;

/// Hash a password using Argon2.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Strip an optional `Bearer ` prefix from an authorization value.
pub fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    value.strip_prefix("Bearer ").unwrap_or(value).trim()
}

/// Token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// User email.
    pub email: String,
    /// User id.
    #[serde(rename = "userKey")]
    pub user_key: String,
    /// Admin flag.
    #[serde(rename = "has")]
    pub admin: bool,
    /// Issuer.
    pub iss: String,
    /// Expiry (seconds since the epoch).
    pub exp: i64,
}

/// Authentication service.
pub struct AuthService {
    db: Database,
    secret: String,
    issuer: String,
    token_minutes: i64,
    refresh_window_minutes: i64,
}

impl AuthService {
    /// Create a new auth service.
    pub fn new(
        db: Database,
        secret: impl Into<String>,
        issuer: impl Into<String>,
        token_minutes: i64,
        refresh_window_minutes: i64,
    ) -> Self {
        Self {
            db,
            secret: secret.into(),
            issuer: issuer.into(),
            token_minutes,
            refresh_window_minutes,
        }
    }

    /// Create a user with their reserved collections.
    pub fn register(&self, email: &str, password: &str, admin: bool) -> Result<User> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || email.len() > 254 || !email.contains('@') {
            return Err(AppError::Validation("A valid email is required".to_string()));
        }
        validate_password(password)?;

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email,
            password_hash: hash_password(password)?,
            admin,
            created_at: now_timestamp(),
        };

        self.db.create_user(&user)?;
        tracing::info!(user_id = %user.id, email = %user.email, admin, "Created user");
        Ok(user)
    }

    /// Check credentials and return the matching user.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

        let user = self.db.get_user_by_email(email)?.ok_or_else(invalid)?;
        if !verify_password(password, &user.password_hash)? {
            return Err(invalid());
        }
        Ok(user)
    }

    /// Check credentials and issue a token.
    pub fn login(&self, email: &str, password: &str) -> Result<String> {
        let user = self.authenticate(email, password)?;
        tracing::debug!(user_id = %user.id, "User logged in");
        self.issue_token(&user)
    }

    /// Issue a token for `user` valid from now.
    pub fn issue_token(&self, user: &User) -> Result<String> {
        self.issue_token_at(&user.email, &user.id, user.admin, now_timestamp())
    }

    /// Issue a token as if signed at `issued_at`.
    pub fn issue_token_at(&self, email: &str, user_key: &str, admin: bool, issued_at: i64) -> Result<String> {
        let claims = Claims {
            email: email.to_string(),
            user_key: user_key.to_string(),
            admin,
            iss: self.issuer.clone(),
            exp: issued_at + self.token_minutes * 60,
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Verify signature, issuer and expiry, returning the claims.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// Reissue a token from an authorization header value.
    pub fn refresh(&self, header_value: &str) -> Result<String> {
        self.refresh_at(strip_bearer(header_value), now_timestamp())
    }

    /// Reissue `token` if it expires within the refresh window of `now`.
    ///
    /// Tokens further from expiry are rejected; the new token expires a full
    /// token lifetime after `now`.
    pub fn refresh_at(&self, token: &str, now: i64) -> Result<String> {
        let claims = self.validate(token)?;

        if claims.exp - now >= self.refresh_window_minutes * 60 {
            return Err(AppError::Unauthorized(
                "token not ready to be refreshed yet".to_string(),
            ));
        }

        self.issue_token_at(&claims.email, &claims.user_key, claims.admin, now)
    }

    /// Change user password.
    pub fn change_password(&self, email: &str, new_password: &str) -> Result<bool> {
        validate_password(new_password)?;

        let password_hash = hash_password(new_password)?;
        self.db.update_user_password(email, &password_hash)
    }

    /// List all users.
    pub fn list_users(&self) -> Result<Vec<User>> {
        self.db.list_users()
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
