use jsonwebtoken::{DecodingKey, EncodingKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::accounts::repo_types::{User, UserRole};

/// Token type used to distinguish Access and Refresh JWTs.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[serde(alias = "Access")]
    Access,
    #[serde(alias = "Refresh")]
    Refresh,
}

/// JWT claims: the account snapshot taken at issuance time plus the
/// standard registered claims. Nothing else is ever embedded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,        // user ID
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub tmdb_key: String, // third-party API key tied to the account
    pub iat: usize,       // issued at
    pub exp: usize,       // expiration time
    pub iss: String,      // issuer
    pub aud: String,      // audience
    pub kind: TokenKind,  // access or refresh
}

/// The signable part of the claims, snapshotted from a user record
/// or carried over from a previously verified token.
#[derive(Debug, Clone)]
pub struct TokenPayload {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub tmdb_key: String,
}

impl From<&User> for TokenPayload {
    fn from(u: &User) -> Self {
        Self {
            sub: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role,
            tmdb_key: u.tmdb_key.clone(),
        }
    }
}

impl From<&Claims> for TokenPayload {
    fn from(c: &Claims) -> Self {
        Self {
            sub: c.sub,
            username: c.username.clone(),
            email: c.email.clone(),
            role: c.role,
            tmdb_key: c.tmdb_key.clone(),
        }
    }
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Request body for account creation.
#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub tmdb_key: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Query for the email-existence check.
#[derive(Debug, Deserialize)]
pub struct EmailCheckQuery {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct EmailCheckResponse {
    pub exists: bool,
}

/// Partial profile update; absent fields are left untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<UserRole>,
    pub tmdb_key: Option<String>,
}

/// Response returned after signup, login, refresh or profile update.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: PublicUser,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub tmdb_key: String,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            role: u.role,
            tmdb_key: u.tmdb_key.clone(),
        }
    }
}
