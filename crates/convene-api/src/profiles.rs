use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Map, Value};
use tracing::warn;

use convene_db::Store;
use convene_types::api::MessageResponse;
use convene_types::normalize_username;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Returns the stored profile document with `username` set to the
/// canonical casing. A registered user without a profile gets a bare
/// `{"username": ...}` document.
pub fn load_profile(store: &dyn Store, username: &str) -> ApiResult<Value> {
    let key = normalize_username(username);
    let user = store.find_user(&key)?;
    let profile = store.get_profile(&key)?;

    let canonical = match (&user, &profile) {
        (Some(u), _) => u.username.clone(),
        (None, Some(p)) => p.username.clone(),
        (None, None) => return Err(ApiError::not_found("Profile not found")),
    };

    let mut document = match profile {
        Some(p) => match serde_json::from_str::<Value>(&p.profile_json) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("Stored profile for {} is not a JSON object", canonical);
                Map::new()
            }
        },
        None => Map::new(),
    };
    document.insert("username".into(), Value::String(canonical));
    Ok(Value::Object(document))
}

/// Last write wins. Creates a password-less user row for names that are
/// not registered yet.
pub fn save_profile(store: &dyn Store, username: &str, document: &Value) -> ApiResult<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ApiError::invalid("Username is required"));
    }
    if !document.is_object() {
        return Err(ApiError::invalid("Profile must be a JSON object"));
    }

    store.save_profile(username, &normalize_username(username), &document.to_string())?;
    Ok(())
}

// -- Handlers --

pub async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    let profile = state
        .run(move |store| load_profile(store, &username))
        .await?;
    Ok(Json(profile))
}

pub async fn upsert_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(document): Json<Value>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .run(move |store| save_profile(store, &username, &document))
        .await?;
    Ok(Json(MessageResponse::new("Profile saved")))
}
