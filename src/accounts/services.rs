pub(crate) use crate::accounts::dto::{Claims, JwtKeys, TokenKind, TokenPayload};
use crate::accounts::dto::{
    AuthResponse, LoginRequest, PublicUser, RefreshRequest, SignupRequest, UpdateUserRequest,
};
use crate::accounts::repo_types::User;
use crate::config::JwtConfig;
use crate::errors::AppError;
use crate::state::AppState;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use regex::Regex;
use sqlx::PgPool;
use std::time::Duration;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
            refresh_ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            access_ttl: Duration::from_secs((ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((refresh_ttl_minutes as u64) * 60),
        }
    }
}

impl JwtKeys {
    fn sign_with_kind(&self, payload: TokenPayload, kind: TokenKind) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: payload.sub,
            username: payload.username,
            email: payload.email,
            role: payload.role,
            tmdb_key: payload.tmdb_key,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %claims.sub, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn sign_access(&self, payload: TokenPayload) -> anyhow::Result<String> {
        self.sign_with_kind(payload, TokenKind::Access)
    }
    pub fn sign_refresh(&self, payload: TokenPayload) -> anyhow::Result<String> {
        self.sign_with_kind(payload, TokenKind::Refresh)
    }

    /// Sign an access/refresh pair from the same payload snapshot.
    pub fn sign_pair(&self, payload: TokenPayload) -> anyhow::Result<(String, String)> {
        let access = self.sign_access(payload.clone())?;
        let refresh = self.sign_refresh(payload)?;
        Ok((access, refresh))
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<Claims> {
        let claims = self.verify(token)?;
        if claims.kind != TokenKind::Refresh {
            anyhow::bail!("not a refresh token");
        }
        Ok(claims)
    }
}

/// Create an account, hash the password and return a token pair.
///
/// Tokens are signed from the persisted row, so the embedded id is the
/// database-generated one. Uniqueness of username/email is arbitrated
/// solely by the table constraints; a violation surfaces as Conflict.
pub async fn sign_up(
    db: &PgPool,
    keys: &JwtKeys,
    mut req: SignupRequest,
) -> Result<AuthResponse, AppError> {
    req.email = req.email.trim().to_lowercase();
    req.username = req.username.trim().to_string();

    if !is_valid_email(&req.email) {
        warn!(email = %req.email, "invalid email");
        return Err(AppError::BadRequest("invalid email".into()));
    }
    if req.username.is_empty() {
        warn!("empty username");
        return Err(AppError::BadRequest("username must not be empty".into()));
    }
    if req.password.len() < 8 {
        warn!("password too short");
        return Err(AppError::BadRequest("password too short".into()));
    }

    let hash = hash_password(&req.password)?;
    let role = req.role.unwrap_or_default();

    let user = User::create(db, &req.username, &req.email, &hash, role, &req.tmdb_key).await?;

    let (access_token, refresh_token) = keys.sign_pair((&user).into())?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(&user),
    })
}

/// Authenticate by email and password.
///
/// An unknown email and a wrong password both yield the same Unauthorized
/// error so callers cannot enumerate accounts.
pub async fn sign_in(
    db: &PgPool,
    keys: &JwtKeys,
    mut req: LoginRequest,
) -> Result<AuthResponse, AppError> {
    req.email = req.email.trim().to_lowercase();

    let user = match User::find_by_email(db, &req.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %req.email, "login unknown email");
            return Err(AppError::Unauthorized);
        }
    };

    if !verify_password(&req.password, &user.password_hash)? {
        warn!(email = %req.email, user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized);
    }

    let (access_token, refresh_token) = keys.sign_pair((&user).into())?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(&user),
    })
}

/// Re-issue a token pair from a previously issued refresh token.
///
/// Trust boundary: the refresh token's own signature, expiry and kind are
/// the only gate. No persistence lookup and no password re-verification
/// happen here; the new payload is carried over from the presented token.
pub fn refresh(keys: &JwtKeys, req: RefreshRequest) -> Result<AuthResponse, AppError> {
    let claims = keys.verify_refresh(&req.refresh_token).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        AppError::Unauthorized
    })?;

    let (access_token, refresh_token) = keys.sign_pair((&claims).into())?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser {
            id: claims.sub,
            username: claims.username,
            email: claims.email,
            role: claims.role,
            tmdb_key: claims.tmdb_key,
        },
    })
}

/// True iff an account with this email exists. No side effects.
pub async fn check_email(db: &PgPool, email: &str) -> Result<bool, AppError> {
    let email = email.trim().to_lowercase();
    Ok(User::email_exists(db, &email).await?)
}

/// Apply a partial profile update and return a fresh token pair.
///
/// Tokens are signed from the updated row, so they reflect the change
/// just applied.
pub async fn update_user(
    db: &PgPool,
    keys: &JwtKeys,
    user_id: Uuid,
    mut req: UpdateUserRequest,
) -> Result<AuthResponse, AppError> {
    if let Some(email) = &mut req.email {
        *email = email.trim().to_lowercase();
        if !is_valid_email(email) {
            warn!(email = %email, "invalid email");
            return Err(AppError::BadRequest("invalid email".into()));
        }
    }
    if let Some(password) = &req.password {
        if password.len() < 8 {
            warn!("password too short");
            return Err(AppError::BadRequest("password too short".into()));
        }
    }

    let password_hash = match &req.password {
        Some(p) => Some(hash_password(p)?),
        None => None,
    };

    let user = User::update(
        db,
        user_id,
        req.username.as_deref(),
        req.email.as_deref(),
        password_hash.as_deref(),
        req.role,
        req.tmdb_key.as_deref(),
    )
    .await?
    .ok_or_else(|| {
        warn!(user_id = %user_id, "update for missing user");
        AppError::NotFound
    })?;

    let (access_token, refresh_token) = keys.sign_pair((&user).into())?;

    info!(user_id = %user.id, "profile updated");
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: PublicUser::from(&user),
    })
}

/// Fetch the caller's own record.
pub async fn get_me(db: &PgPool, user_id: Uuid) -> Result<PublicUser, AppError> {
    let user = User::find_by_id(db, user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(PublicUser::from(&user))
}

pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((
                StatusCode::UNAUTHORIZED,
                "Missing Authorization header".to_string(),
            ))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header".to_string(),
        ))?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    "Invalid or expired token".to_string(),
                ));
            }
        };

        if claims.kind != TokenKind::Access {
            return Err((
                StatusCode::UNAUTHORIZED,
                "Access token required".to_string(),
            ));
        }

        Ok(AuthUser(claims.sub))
    }
}


#[cfg(test)]
mod email_tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last@sub.example.org"));
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@x.com"));
        assert!(!is_valid_email(""));
    }
}

#[cfg(test)]
mod jwt_tests {
    use super::*;
    use crate::accounts::repo_types::UserRole;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    fn fake_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "a@x.com".into(),
            password_hash: "irrelevant".into(),
            role: UserRole::User,
            tmdb_key: "k1".into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn sign_and_verify_access_token() {
        let keys = make_keys();
        let user = fake_user();
        let token = keys.sign_access((&user).into()).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[tokio::test]
    async fn payload_snapshots_the_account() {
        let keys = make_keys();
        let mut user = fake_user();
        user.role = UserRole::Admin;
        let token = keys.sign_access((&user).into()).expect("sign access");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.tmdb_key, "k1");
    }

    #[tokio::test]
    async fn sign_and_verify_refresh_token_and_verify_refresh() {
        let keys = make_keys();
        let user = fake_user();
        let token = keys.sign_refresh((&user).into()).expect("sign refresh");
        let claims = keys.verify_refresh(&token).expect("verify refresh");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[tokio::test]
    async fn verify_refresh_rejects_access_token() {
        let keys = make_keys();
        let token = keys.sign_access((&fake_user()).into()).expect("sign access");
        let err = keys.verify_refresh(&token).unwrap_err();
        assert!(err.to_string().contains("not a refresh token"));
    }
}

#[cfg(test)]
mod refresh_tests {
    use super::*;
    use crate::accounts::repo_types::UserRole;

    fn make_keys() -> JwtKeys {
        let state = AppState::fake();
        JwtKeys::from_ref(&state)
    }

    #[tokio::test]
    async fn refresh_reissues_from_token_claims_without_lookup() {
        let keys = make_keys();
        let user = User {
            id: Uuid::new_v4(),
            username: "bob".into(),
            email: "b@x.com".into(),
            password_hash: "irrelevant".into(),
            role: UserRole::User,
            tmdb_key: "k9".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let refresh_token = keys.sign_refresh((&user).into()).expect("sign refresh");

        let resp = refresh(
            &keys,
            RefreshRequest {
                refresh_token,
            },
        )
        .expect("refresh should succeed");

        assert_eq!(resp.user.id, user.id);
        assert_eq!(resp.user.username, "bob");
        assert_eq!(resp.user.tmdb_key, "k9");

        let claims = keys.verify(&resp.access_token).expect("new access verifies");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.kind, TokenKind::Access);
        let claims = keys
            .verify_refresh(&resp.refresh_token)
            .expect("new refresh verifies");
        assert_eq!(claims.sub, user.id);
    }

    #[tokio::test]
    async fn refresh_rejects_access_token_with_unauthorized() {
        let keys = make_keys();
        let user = User {
            id: Uuid::new_v4(),
            username: "bob".into(),
            email: "b@x.com".into(),
            password_hash: "irrelevant".into(),
            role: UserRole::User,
            tmdb_key: "k9".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let access_token = keys.sign_access((&user).into()).expect("sign access");

        let err = refresh(
            &keys,
            RefreshRequest {
                refresh_token: access_token,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[tokio::test]
    async fn refresh_rejects_garbage_with_unauthorized() {
        let keys = make_keys();
        let err = refresh(
            &keys,
            RefreshRequest {
                refresh_token: "not.a.token".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));
    }
}
