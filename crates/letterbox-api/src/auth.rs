use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::info;

use letterbox_db::Database;
use letterbox_types::api::{LoginRequest, RegisterRequest, TokenResponse};

use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::extract::JsonBody;
use crate::middleware::Claims;

const TOKEN_LIFETIME_DAYS: i64 = 30;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    if !(3..=32).contains(&req.username.chars().count()) {
        return Err(ApiError::BadRequest(
            "Username must be between 3 and 32 characters.".into(),
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters.".into(),
        ));
    }

    let jwt_secret = state.jwt_secret.clone();
    let username = req.username.clone();
    blocking(move || {
        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
            .to_string();

        state.db.create_user(
            &req.username,
            &password_hash,
            &req.first_name,
            &req.last_name,
            &req.phone,
        )?;
        Ok(())
    })
    .await?;

    info!("Registered user '{}'", username);
    let token = create_token(&jwt_secret, &username)?;

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let jwt_secret = state.jwt_secret.clone();
    let username = req.username.clone();
    blocking(move || {
        let user = state
            .db
            .get_user_by_username(&req.username)?
            .ok_or_else(|| ApiError::unauthorized("Invalid username/password"))?;

        // Verify password
        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {}", e)))?;

        Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .map_err(|_| ApiError::unauthorized("Invalid username/password"))?;

        state.db.touch_last_login(&user.username)?;
        Ok(())
    })
    .await?;

    let token = create_token(&jwt_secret, &username)?;
    Ok(Json(TokenResponse { token }))
}

/// Sign a session token for `username`.
pub fn create_token(secret: &str, username: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now();
    let claims = Claims {
        username: username.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
