use axum::{
    extract::{FromRef, Query, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    accounts::{
        dto::{
            AuthResponse, EmailCheckQuery, EmailCheckResponse, LoginRequest, PublicUser,
            RefreshRequest, SignupRequest, UpdateUserRequest,
        },
        services::{self, AuthUser, JwtKeys},
    },
    errors::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(sign_up))
        .route("/auth/login", post(sign_in))
        .route("/auth/refresh", post(refresh))
        .route("/auth/email-check", get(check_email))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).patch(update_me))
}

#[instrument(skip(state, payload))]
async fn sign_up(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let resp = services::sign_up(&state.db, &keys, payload).await?;
    Ok(Json(resp))
}

#[instrument(skip(state, payload))]
async fn sign_in(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let resp = services::sign_in(&state.db, &keys, payload).await?;
    Ok(Json(resp))
}

#[instrument(skip(state, payload))]
async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let resp = services::refresh(&keys, payload)?;
    Ok(Json(resp))
}

#[instrument(skip(state))]
async fn check_email(
    State(state): State<AppState>,
    Query(q): Query<EmailCheckQuery>,
) -> Result<Json<EmailCheckResponse>, AppError> {
    let exists = services::check_email(&state.db, &q.email).await?;
    Ok(Json(EmailCheckResponse { exists }))
}

#[instrument(skip(state))]
async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let user = services::get_me(&state.db, user_id).await?;
    Ok(Json(user))
}

#[instrument(skip(state, payload))]
async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let resp = services::update_user(&state.db, &keys, user_id, payload).await?;
    Ok(Json(resp))
}
