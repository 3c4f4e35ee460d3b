use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};

use convene_db::Store;
use convene_types::api::{MarkReadRequest, MarkReadResponse};
use convene_types::models::UnreadSummary;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn unread_summary(store: &dyn Store, username: &str) -> ApiResult<UnreadSummary> {
    let mut summary = UnreadSummary::default();
    for (event_id, count) in store.unread_counts(username.trim())? {
        summary.total_unread += count;
        summary.by_event.insert(event_id, count);
    }
    Ok(summary)
}

/// Marks one event's notifications read, or all of them when `event_id`
/// is `None`. Returns the number of rows flipped.
pub fn mark_read(store: &dyn Store, username: &str, event_id: Option<i64>) -> ApiResult<usize> {
    Ok(store.mark_notifications_read(username.trim(), event_id)?)
}

// -- Handlers --

pub async fn get_notifications(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UnreadSummary>> {
    let summary = state
        .run(move |store| unread_summary(store, &username))
        .await?;
    Ok(Json(summary))
}

/// The body is optional; an empty one marks everything read.
pub async fn mark_notifications_read(
    State(state): State<AppState>,
    Path(username): Path<String>,
    body: Bytes,
) -> ApiResult<Json<MarkReadResponse>> {
    let req: MarkReadRequest = if body.iter().all(u8::is_ascii_whitespace) {
        MarkReadRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::invalid(format!("Invalid request body: {}", e)))?
    };

    let marked_read = state
        .run(move |store| mark_read(store, &username, req.event_id))
        .await?;
    Ok(Json(MarkReadResponse { marked_read }))
}
