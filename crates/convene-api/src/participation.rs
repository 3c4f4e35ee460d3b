use axum::{
    Json,
    extract::{Path, State},
};
use tracing::debug;

use convene_db::Store;
use convene_types::api::{MembershipRequest, MessageResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Adds a non-host participant. Joining twice is a no-op; capacity is not
/// checked. Returns whether a row was added.
pub fn join_event(store: &dyn Store, event_id: i64, username: &str) -> ApiResult<bool> {
    let username = required_username(username)?;
    if store.get_event(event_id)?.is_none() {
        return Err(ApiError::not_found("Event not found"));
    }

    let added = store.add_participant(event_id, username, false)?;
    debug!("join event={} user={} added={}", event_id, username, added);
    Ok(added)
}

/// Removes the membership if there is one. A departing host is not
/// replaced; the event is simply left without a host.
pub fn leave_event(store: &dyn Store, event_id: i64, username: &str) -> ApiResult<bool> {
    let username = required_username(username)?;
    let removed = store.remove_participant(event_id, username)?;
    debug!("leave event={} user={} removed={}", event_id, username, removed);
    Ok(removed)
}

fn required_username(username: &str) -> ApiResult<&str> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::invalid("Username is required"));
    }
    Ok(username)
}

// -- Handlers --

pub async fn join(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| join_event(store, event_id, &req.username))
        .await?;
    Ok(Json(MessageResponse::new("Joined event")))
}

pub async fn leave(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Json(req): Json<MembershipRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| leave_event(store, event_id, &req.username))
        .await?;
    Ok(Json(MessageResponse::new("Left event")))
}
