use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::state::AppState;
use crate::uploads::MAX_IMAGE_SIZE;
use crate::{
    chat, events, follows, geocode, identity, notifications, participation, profiles,
    search_requests, uploads,
};

/// Every API route. Static mounts, CORS and tracing are layered on by the
/// server binary.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(identity::register))
        .route("/login", post(identity::login))
        .route("/api/register", post(identity::register))
        .route("/api/login", post(identity::login))
        .route("/users", get(identity::list_users))
        .route("/api/users", get(identity::list_users))
        .route(
            "/api/users/{username}/invite-code",
            get(identity::get_invite_code).post(identity::rotate_invite_code),
        )
        .route("/api/invites/validate", get(identity::validate_invite));

    let event_routes = Router::new()
        .route(
            "/api/events",
            get(events::list_events).post(events::create_event),
        )
        .route(
            "/api/events/{id}",
            get(events::get_event)
                .put(events::update_event)
                .delete(events::delete_event),
        )
        .route("/api/events/{id}/join", post(participation::join))
        .route("/api/events/{id}/leave", post(participation::leave))
        .route("/api/events/{id}/archive", post(events::archive_event))
        .route("/api/events/{id}/unarchive", post(events::unarchive_event))
        .route("/api/users/{username}/events", get(events::user_events));

    let social_routes = Router::new()
        .route(
            "/api/users/{username}/profile",
            get(profiles::get_profile).post(profiles::upsert_profile),
        )
        .route(
            "/api/follows",
            get(follows::list_follows)
                .post(follows::add_follow)
                .delete(follows::remove_follow),
        )
        .route("/api/follows/{username}", get(follows::get_following))
        .route("/api/followers/{username}", get(follows::get_followers))
        .route("/api/friends", post(follows::add_follow))
        .route("/api/friends/{username}", get(follows::get_friends))
        .route(
            "/api/chat/{event_id}",
            get(chat::get_chat).post(chat::post_chat),
        )
        .route(
            "/api/notifications/{username}",
            get(notifications::get_notifications),
        )
        .route(
            "/api/notifications/{username}/mark-read",
            post(notifications::mark_notifications_read),
        )
        .route(
            "/search_requests",
            get(search_requests::list).post(search_requests::create),
        )
        .route(
            "/api/search_requests",
            get(search_requests::list).post(search_requests::create),
        );

    let misc_routes = Router::new()
        .route("/api/geocode", get(geocode::geocode))
        .route(
            "/api/upload-image",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE)),
        )
        .route("/health", get(health));

    Router::new()
        .merge(auth_routes)
        .merge(event_routes)
        .merge(social_routes)
        .merge(misc_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
