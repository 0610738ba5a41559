use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use veil_db::models::MessageRow;
use veil_types::api::{
    AcceptMessagesRequest, AcceptMessagesResponse, ApiMessage, Claims, MessageDto,
    MessagesResponse, SendMessageRequest,
};

use crate::auth::AppState;
use crate::error::{ApiError, blocking};

pub async fn get_accept_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AcceptMessagesResponse>, ApiError> {
    let accepting = {
        let state = state.clone();
        let owner_id = claims.sub.to_string();
        blocking(move || state.db.get_accepting_messages(&owner_id)).await?
    }
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    Ok(Json(AcceptMessagesResponse {
        success: true,
        message: None,
        is_accepting_messages: accepting,
    }))
}

pub async fn set_accept_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AcceptMessagesRequest>,
) -> Result<Json<AcceptMessagesResponse>, ApiError> {
    let matched = {
        let state = state.clone();
        let owner_id = claims.sub.to_string();
        blocking(move || state.db.set_accepting_messages(&owner_id, req.accept_message)).await?
    };

    if !matched {
        return Err(ApiError::NotFound("User not found".into()));
    }

    info!("{} set accepting_messages = {}", claims.username, req.accept_message);

    Ok(Json(AcceptMessagesResponse {
        success: true,
        message: Some("Message acceptance status updated".into()),
        is_accepting_messages: req.accept_message,
    }))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let rows = {
        let state = state.clone();
        let owner_id = claims.sub.to_string();
        blocking(move || state.db.get_messages_for_owner(&owner_id)).await?
    };

    // An empty inbox is an empty success list, never a 404.
    let messages = rows.into_iter().map(message_dto).collect();

    Ok(Json(MessagesResponse {
        success: true,
        messages,
    }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiMessage>, ApiError> {
    let deleted = {
        let state = state.clone();
        let owner_id = claims.sub.to_string();
        let message_id = message_id.to_string();
        blocking(move || state.db.delete_message(&owner_id, &message_id)).await?
    };

    // Wrong id and someone else's id are indistinguishable on purpose.
    if !deleted {
        return Err(ApiError::NotFound("Message not found".into()));
    }

    Ok(Json(ApiMessage {
        success: true,
        message: "Message deleted".into(),
    }))
}

/// The sole mutation path open to anonymous callers.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::Invalid("Message content cannot be empty".into()));
    }

    // Unverified accounts are invisible to the public surface.
    let user = {
        let state = state.clone();
        let username = req.username.clone();
        blocking(move || state.db.get_user_by_username(&username)).await?
    }
    .filter(|u| u.verified)
    .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if !user.accepting_messages {
        return Err(ApiError::Forbidden("User is not accepting messages".into()));
    }

    let message_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

    {
        let state = state.clone();
        blocking(move || state.db.insert_message(&message_id, &user.id, &content, &created_at))
            .await?;
    }

    info!("Anonymous message delivered to {}", req.username);

    Ok((
        StatusCode::CREATED,
        Json(ApiMessage {
            success: true,
            message: "Message sent successfully".into(),
        }),
    ))
}

fn message_dto(row: MessageRow) -> MessageDto {
    let id = row.id.parse().unwrap_or_else(|e| {
        warn!("Corrupt message id '{}': {}", row.id, e);
        Uuid::default()
    });
    let created_at = row.created_at.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt created_at on message '{}': {}", row.id, e);
        DateTime::default()
    });

    MessageDto {
        id,
        content: row.content,
        created_at,
    }
}
