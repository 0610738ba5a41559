use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use veil_db::Database;
use veil_mail::Mailer;
use veil_types::api::{
    ApiMessage, Claims, SignInRequest, SignInResponse, SignUpRequest, UserSummary, VerifyRequest,
};

use crate::error::{ApiError, blocking};
use crate::suggest::Suggester;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub mailer: Mailer,
    pub suggester: Suggester,
}

/// Verification codes are valid for one hour from issuance.
const VERIFY_WINDOW_MINUTES: i64 = 60;

const USERNAME_RULES: &str = "Username must be 2-20 characters of letters, digits, or underscores";

pub(crate) fn valid_username(username: &str) -> bool {
    (2..=20).contains(&username.len())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn generate_verify_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

pub async fn sign_up(
    State(state): State<AppState>,
    Json(req): Json<SignUpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !valid_username(&req.username) {
        return Err(ApiError::Invalid(USERNAME_RULES.into()));
    }
    if !valid_email(&req.email) {
        return Err(ApiError::Invalid("Invalid email address".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Invalid("Password must be at least 8 characters".into()));
    }

    // Uniqueness is judged against verified accounts; an unverified holder of
    // the same username gets its registration refreshed instead.
    let (existing, email_conflict) = {
        let state = state.clone();
        let username = req.username.clone();
        let email = req.email.clone();
        blocking(move || {
            let existing = state.db.get_user_by_username(&username)?;
            let email_conflict = state.db.email_taken_by_verified(&email, &username)?;
            Ok((existing, email_conflict))
        })
        .await?
    };

    if existing.as_ref().is_some_and(|u| u.verified) {
        return Err(ApiError::Conflict("Username is already taken".into()));
    }
    if email_conflict {
        return Err(ApiError::Conflict("Email is already registered".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let code = generate_verify_code();
    let expires_at = (Utc::now() + Duration::minutes(VERIFY_WINDOW_MINUTES))
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    // A re-register keeps the pending row's id so the row updates in place.
    let user_id = existing
        .map(|u| u.id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    {
        let state = state.clone();
        let (username, email, code, expires_at) = (
            req.username.clone(),
            req.email.clone(),
            code.clone(),
            expires_at.clone(),
        );
        blocking(move || {
            state.db.upsert_pending_user(
                &user_id,
                &username,
                &email,
                &password_hash,
                &code,
                &expires_at,
            )
        })
        .await?;
    }

    state
        .mailer
        .send_verification_code(&req.email, &req.username, &code)
        .await
        .map_err(|e| {
            warn!("Verification email delivery failed for {}: {:#}", req.email, e);
            ApiError::ServiceUnavailable("Could not send the verification email".into())
        })?;

    info!("Registered pending account {} <{}>", req.username, req.email);

    Ok((
        StatusCode::CREATED,
        Json(ApiMessage {
            success: true,
            message: "Account registered. Check your email for the verification code".into(),
        }),
    ))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<ApiMessage>, ApiError> {
    let user = {
        let state = state.clone();
        let username = username.clone();
        blocking(move || state.db.get_user_by_username(&username)).await?
    }
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // A verified account has no live code; that reads as an expired window.
    let expires_at = user
        .verify_expires_at
        .as_deref()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok());
    match expires_at {
        Some(t) if Utc::now() < t => {}
        _ => {
            return Err(ApiError::Expired(
                "Verification code has expired. Sign up again to receive a new one".into(),
            ));
        }
    }

    if user.verify_code.as_deref() != Some(req.code.trim()) {
        return Err(ApiError::Invalid("Incorrect verification code".into()));
    }

    {
        let state = state.clone();
        blocking(move || state.db.mark_verified(&username)).await?;
    }

    info!("Account {} verified", user.username);

    Ok(Json(ApiMessage {
        success: true,
        message: "Account verified successfully".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: String,
}

pub async fn check_username(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<ApiMessage>, ApiError> {
    if !valid_username(&query.username) {
        return Err(ApiError::Invalid(USERNAME_RULES.into()));
    }

    let taken = {
        let state = state.clone();
        let username = query.username.clone();
        blocking(move || state.db.username_taken_by_verified(&username)).await?
    };

    let message = if taken {
        "Username is already taken"
    } else {
        "Username is available"
    };

    Ok(Json(ApiMessage {
        success: !taken,
        message: message.into(),
    }))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(req): Json<SignInRequest>,
) -> Result<Json<SignInResponse>, ApiError> {
    let user = {
        let state = state.clone();
        let identifier = req.identifier.clone();
        blocking(move || state.db.get_user_by_identifier(&identifier)).await?
    }
    .ok_or_else(invalid_credentials)?;

    if !user.verified {
        return Err(invalid_credentials());
    }

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored password hash unreadable: {e}")))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid_credentials())?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{}': {e}", user.id)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username, &user.email)?;

    Ok(Json(SignInResponse {
        success: true,
        token,
        user: UserSummary {
            id: user_id,
            username: user.username,
            email: user.email,
            is_accepting_messages: user.accepting_messages,
        },
    }))
}

/// One undifferentiated message for every sign-in failure mode, so callers
/// cannot probe which accounts exist or are verified.
fn invalid_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid credentials or unverified account".into())
}

fn create_token(secret: &str, user_id: Uuid, username: &str, email: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        email: email.to_string(),
        exp: (Utc::now() + Duration::days(30)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(anyhow::anyhow!("token signing failed: {e}")))
}
