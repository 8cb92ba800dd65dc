use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, OauthIdentity, PublicUser, RegisterRequest},
        error::AuthError,
        extractors::AuthUser,
        jwt::JwtKeys,
        service,
    },
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/oauth", post(oauth_sign_in))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = service::register(state.users.as_ref(), &state.hasher, payload).await?;
    let token = JwtKeys::from_ref(&state).sign(&user)?;
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = service::authenticate(
        state.users.as_ref(),
        &state.hasher,
        &payload.email,
        &payload.password,
    )
    .await?;
    let token = JwtKeys::from_ref(&state).sign(&user)?;
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(user),
    }))
}

/// The routing layer calls this after the OAuth collaborator has
/// verified the provider response; any failure here denies the sign-in.
#[instrument(skip(state, payload))]
pub async fn oauth_sign_in(
    State(state): State<AppState>,
    Json(payload): Json<OauthIdentity>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user = service::provision(state.users.as_ref(), payload).await?;
    let token = JwtKeys::from_ref(&state).sign(&user)?;
    Ok(Json(AuthResponse {
        token,
        user: PublicUser::from(user),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        // Valid token but no record, e.g. a database restored from
        // before the user existed. Treat like any other bad credential.
        .ok_or(AuthError::InvalidCredentials)?;
    Ok(Json(PublicUser::from(user)))
}
