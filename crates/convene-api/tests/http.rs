use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use convene_api::geocode::Geocoder;
use convene_api::uploads::ImageStore;
use convene_api::{AppStateInner, build_router};
use convene_db::SqliteStore;

struct TestApp {
    router: Router,
    _uploads: tempfile::TempDir,
}

impl TestApp {
    fn new() -> Self {
        let uploads = tempfile::TempDir::new().unwrap();
        let state = Arc::new(AppStateInner {
            store: Arc::new(SqliteStore::open_in_memory().unwrap()),
            geocoder: Geocoder::with_delay("http://127.0.0.1:9", Duration::ZERO).unwrap(),
            images: ImageStore::new(uploads.path(), "http://localhost:8000"),
        });
        Self {
            router: build_router(state),
            _uploads: uploads,
        }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    async fn create_event(&self, body: Value) -> i64 {
        let (status, created) = self.post("/api/events", body).await;
        assert_eq!(status, StatusCode::OK, "{created}");
        created["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn register_login_and_duplicate() {
    let app = TestApp::new();

    let (status, user) = app
        .post(
            "/register",
            json!({"username": "Mitsu", "password": "pw", "email": "m@example.org"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["username"], "Mitsu");

    let (status, body) = app
        .post("/api/register", json!({"username": "MITSU", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, Value::String("Username already exists".into()));

    let (status, login) = app
        .post("/login", json!({"username": "mitsu", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["username"], "Mitsu");
    assert_eq!(login["id"], user["id"]);

    let (status, _) = app
        .post("/login", json!({"username": "mitsu", "password": "nope"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post("/login", json!({"username": "ghost", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bare_paths_match_api_paths() {
    let app = TestApp::new();
    app.post("/register", json!({"username": "Kat", "password": "pw"}))
        .await;

    let (status, users) = app.get("/users").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users, app.get("/api/users").await.1);
    assert!(users.as_array().unwrap().iter().any(|u| u["username"] == "Kat"));

    let (status, created) = app
        .post(
            "/search_requests",
            json!({"userId": "Kat", "date": "2025-06-01", "start": "18:00", "end": "21:00",
                   "budget": 25, "type": "Social", "category": "Music", "language": "English"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert_eq!(created["message"], "Search request created");

    let (status, listed) = app.get("/search_requests").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed, app.get("/api/search_requests").await.1);
    assert_eq!(listed[0]["start"], "18:00");
    assert_eq!(listed[0]["type"], "Social");
}

#[tokio::test]
async fn invite_codes_round_trip() {
    let app = TestApp::new();
    app.post("/register", json!({"username": "Kat", "password": "pw"}))
        .await;

    let (status, issued) = app.get("/api/users/kat/invite-code").await;
    assert_eq!(status, StatusCode::OK);
    let code = issued["invite_code"].as_str().unwrap().to_string();
    assert!(code.starts_with("CITE-"));

    let (_, check) = app.get(&format!("/api/invites/validate?code={code}")).await;
    assert_eq!(check, json!({"valid": true, "inviter": "Kat"}));

    let (_, check) = app.get("/api/invites/validate?code=INVALID-CODE").await;
    assert_eq!(check, json!({"valid": false, "inviter": null}));

    let (status, _) = app.get("/api/invites/validate").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/api/users/ghost/invite-code").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_lifecycle() {
    let app = TestApp::new();
    let id = app
        .create_event(json!({
            "name": "Late show",
            "date": "2025-04-01",
            "time": "22:30",
            "end_time": "02:00",
            "languages": ["fr"],
            "created_by": "Kat"
        }))
        .await;

    let (status, event) = app.get(&format!("/api/events/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["time"], "22:30");
    assert_eq!(event["endTime"], "02:00");
    assert_eq!(event["host"], json!({"name": "Kat"}));

    for _ in 0..2 {
        let (status, _) = app
            .post(&format!("/api/events/{id}/join"), json!({"username": "Zine"}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (_, event) = app.get(&format!("/api/events/{id}")).await;
    assert_eq!(event["participants"], json!(["Zine"]));
    assert_eq!(event["crew"], json!(["Zine"]));

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/events/{id}?username=Zine"),
            Some(json!({"name": "Hijacked", "time": "20:00"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/events/{id}"),
            Some(json!({"name": "Later show", "time": "23:00", "end_time": "01:00", "created_by": "Kat"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(&format!("/api/events/{id}/archive?username=admin"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = app.get("/api/events").await;
    assert_eq!(listed, json!([]));
    let (_, listed) = app.get("/api/events?include_archived=true").await;
    assert_eq!(listed[0]["name"], "Later show");
    assert_eq!(listed[0]["isArchived"], true);

    let (_, mine) = app.get("/api/users/Zine/events").await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (status, _) = app
        .send(Method::DELETE, &format!("/api/events/{id}?username=Kat"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.get(&format!("/api/events/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn equal_times_are_rejected() {
    let app = TestApp::new();
    let (status, _) = app
        .post(
            "/api/events",
            json!({"name": "Blink", "time": "18:00", "end_time": "18:00"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_fans_out_notifications() {
    let app = TestApp::new();
    let id = app
        .create_event(json!({"name": "Picnic", "created_by": "Kat"}))
        .await;
    for user in ["Zine", "Mitsu"] {
        app.post(&format!("/api/events/{id}/join"), json!({"username": user}))
            .await;
    }

    let (status, sent) = app
        .post(
            &format!("/api/chat/{id}"),
            json!({"username": "Zine", "message": "bring snacks"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["notified"], 2);

    let (_, history) = app.get(&format!("/api/chat/{id}")).await;
    assert_eq!(history[0]["message"], "bring snacks");

    let (_, unread) = app.get("/api/notifications/Kat").await;
    assert_eq!(unread["total_unread"], 1);
    assert_eq!(unread["by_event"][id.to_string()], 1);

    let (status, marked) = app
        .post("/api/notifications/Kat/mark-read", json!({"event_id": id}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["marked_read"], 1);

    let (status, marked) = app
        .send(Method::POST, "/api/notifications/Mitsu/mark-read", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(marked["marked_read"], 1);

    let (_, unread) = app.get("/api/notifications/Kat").await;
    assert_eq!(unread, json!({"total_unread": 0, "by_event": {}}));
}

#[tokio::test]
async fn follows_are_directional() {
    let app = TestApp::new();
    app.post("/api/follows", json!({"user1": "Mitsu", "user2": "Zine"}))
        .await;
    app.post("/api/follows", json!({"user1": "Zine", "user2": "Mitsu"}))
        .await;

    let (status, _) = app
        .send(
            Method::DELETE,
            "/api/follows",
            Some(json!({"user1": "Zine", "user2": "Mitsu"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(app.get("/api/follows/Mitsu").await.1, json!(["Zine"]));
    assert_eq!(app.get("/api/follows/Zine").await.1, json!([]));
    assert_eq!(app.get("/api/followers/Zine").await.1, json!(["Mitsu"]));
    assert_eq!(app.get("/api/friends/Zine").await.1, json!(["Mitsu"]));
}

#[tokio::test]
async fn profiles_upsert_and_read() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/users/Zine/profile").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, saved) = app
        .post("/api/users/Zine/profile", json!({"bio": "climber"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["message"], "Profile saved");

    let (_, profile) = app.get("/api/users/zine/profile").await;
    assert_eq!(profile, json!({"bio": "climber", "username": "Zine"}));

    let (status, _) = app
        .post("/register", json!({"username": "zine", "password": "pw"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_checks_content_type() {
    let app = TestApp::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/upload-image")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(vec![1u8, 2, 3]))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("http://localhost:8000/uploads/"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/upload-image")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn geocode_uses_landmark_fallback() {
    let app = TestApp::new();
    let (status, results) = app.get("/api/geocode?q=Maison%20Internationale").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(results.as_array().unwrap().len(), 1);

    let (status, _) = app.get("/api/geocode?q=").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
