// src/handlers/auth.rs

use axum::{Json, extract::State, response::IntoResponse};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AppError,
    models::{response::ApiResponse, user::LoginRequest},
    state::AppState,
    utils::{hash::verify_password, jwt::sign_jwt},
};

/// Authenticates a console user and returns a JWT token.
///
/// Unknown usernames and wrong passwords get the same 401 message.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = state
        .users
        .find_by_username(&payload.username)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid username or password".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        tracing::warn!("Failed login for {}", payload.username);
        return Err(AppError::AuthError(
            "Invalid username or password".to_string(),
        ));
    }

    let token = sign_jwt(
        user.id,
        &user.role,
        &state.config.jwt_secret,
        state.config.jwt_expiration,
    )?;

    tracing::info!("User {} logged in", user.username);
    Ok(Json(ApiResponse::ok(json!({
        "token": token,
        "type": "Bearer",
        "role": user.role,
    }))))
}
