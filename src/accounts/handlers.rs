use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{instrument, warn};

use crate::{
    accounts::{
        dto::{
            ActivateQuery, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
            PublicUser, RegisterRequest, RegisterResponse, ResetPasswordRequest,
        },
        error::AccountError,
        session::AuthUser,
    },
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/activate", get(activate))
        .route("/login", post(login))
        .route("/profile", get(profile))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route("/reset-password/:token", post(reset_password_with_token))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[instrument(skip(state, payload))]
async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Response> {
    payload.email = payload.email.trim().to_lowercase();
    payload.username = payload.username.trim().to_string();

    if payload.username.is_empty() {
        warn!("empty username");
        return Err(reject(StatusCode::BAD_REQUEST, "Username required"));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(reject(StatusCode::BAD_REQUEST, "Invalid email"));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err(reject(StatusCode::BAD_REQUEST, "Password too short"));
    }

    let user = state
        .accounts
        .register(&payload.username, &payload.email, &payload.password)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: PublicUser::from(&user),
        }),
    ))
}

#[instrument(skip(state, query))]
async fn activate(
    State(state): State<AppState>,
    Query(query): Query<ActivateQuery>,
) -> Result<Json<MessageResponse>, AccountError> {
    state.accounts.activate_account(&query.token).await?;
    Ok(Json(MessageResponse {
        message: "Account activated successfully".into(),
    }))
}

#[instrument(skip(state, payload))]
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AccountError> {
    let (user, token) = state
        .accounts
        .login(payload.identifier.trim(), &payload.password)
        .await?;
    Ok(Json(LoginResponse {
        user: PublicUser::from(&user),
        token,
    }))
}

#[instrument(skip(state))]
async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, Response> {
    let user = state.accounts.profile(user_id).await.map_err(|e| {
        warn!(user_id = %user_id, error = %e, "profile lookup failed");
        reject(StatusCode::UNAUTHORIZED, "User not found")
    })?;
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, payload))]
async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, Response> {
    let email = payload.email.trim().to_lowercase();
    let user = state.accounts.forgot_password(&email).await.map_err(|e| {
        // The source reports an unknown address as a 400, not a 404.
        match e {
            AccountError::UserNotFound => {
                reject(StatusCode::BAD_REQUEST, "No user with such email!")
            }
            other => other.into_response(),
        }
    })?;
    Ok(Json(MessageResponse {
        message: format!(
            "An email has been sent to {} with further instructions",
            user.email
        ),
    }))
}

#[instrument(skip(state, payload))]
async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, Response> {
    let token = payload
        .token
        .as_deref()
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Token required"))?;
    reset_with(&state, token, &payload.password).await
}

#[instrument(skip(state, payload))]
async fn reset_password_with_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, Response> {
    reset_with(&state, &token, &payload.password).await
}

async fn reset_with(
    state: &AppState,
    token: &str,
    password: &str,
) -> Result<Json<MessageResponse>, Response> {
    if password.len() < 8 {
        warn!("password too short");
        return Err(reject(StatusCode::BAD_REQUEST, "Password too short"));
    }
    state
        .accounts
        .reset_password(token, password)
        .await
        .map_err(IntoResponse::into_response)?;
    Ok(Json(MessageResponse {
        message: "Password reset successfully".into(),
    }))
}
