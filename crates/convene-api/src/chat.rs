use axum::{
    Json,
    extract::{Path, State},
};
use tracing::debug;

use convene_db::Store;
use convene_db::models::PostedMessage;
use convene_types::api::{ChatSentResponse, SendChatRequest};
use convene_types::models::ChatMessage;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Appends a message and fans out one unread notification to every other
/// participant, atomically.
pub fn send_message(
    store: &dyn Store,
    event_id: i64,
    username: &str,
    message: &str,
) -> ApiResult<PostedMessage> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::invalid("Username is required"));
    }
    if message.trim().is_empty() {
        return Err(ApiError::invalid("Message must not be empty"));
    }
    if store.get_event(event_id)?.is_none() {
        return Err(ApiError::not_found("Event not found"));
    }

    let posted = store.post_message(event_id, username, message)?;
    debug!(
        "chat event={} message={} notified={}",
        event_id, posted.message.id, posted.notified
    );
    Ok(posted)
}

/// Oldest first.
pub fn history(store: &dyn Store, event_id: i64) -> ApiResult<Vec<ChatMessage>> {
    Ok(store
        .messages_for_event(event_id)?
        .into_iter()
        .map(|m| ChatMessage {
            id: m.id,
            username: m.username,
            message: m.message,
            timestamp: m.timestamp,
        })
        .collect())
}

// -- Handlers --

pub async fn post_chat(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Json(req): Json<SendChatRequest>,
) -> ApiResult<Json<ChatSentResponse>> {
    let posted = state
        .run(move |store| send_message(store, event_id, &req.username, &req.message))
        .await?;
    Ok(Json(ChatSentResponse {
        id: posted.message.id,
        message: "Message sent".into(),
        notified: posted.notified,
    }))
}

pub async fn get_chat(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let messages = state.run(move |store| history(store, event_id)).await?;
    Ok(Json(messages))
}
