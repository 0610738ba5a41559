use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use veil_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer JWT from the Authorization header. The
/// injected [`Claims`] extension is the only authenticated-principal value
/// handlers ever see.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(not_authenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(not_authenticated)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| not_authenticated())?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

fn not_authenticated() -> ApiError {
    ApiError::Unauthorized("Not authenticated".into())
}
