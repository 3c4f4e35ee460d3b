use serde::{Deserialize, Serialize};

// -- Auth --

/// Registration payload. Extra profile fields sent by the signup form
/// (email, phone number, ...) are accepted and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub invite_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub id: i64,
    pub username: String,
}

// -- Invites --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteCodeResponse {
    pub username: String,
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteValidationQuery {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteValidation {
    pub valid: bool,
    pub inviter: Option<String>,
}

// -- Events --

/// Body of `POST /api/events` and `PUT /api/events/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRequest {
    pub name: String,
    pub description: String,
    pub location: String,
    pub venue: String,
    pub address: String,
    pub coordinates: Option<serde_json::Value>,
    pub date: String,
    pub time: String,
    pub end_time: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub languages: Vec<String>,
    pub is_public: bool,
    pub event_type: String,
    pub capacity: Option<i64>,
    pub image_url: String,
    pub created_by: Option<String>,
    pub is_featured: bool,
    pub template_event_id: Option<i64>,
    pub target_interests: Option<Vec<String>>,
    pub target_cite_connection: Option<Vec<String>>,
    pub target_reasons: Option<Vec<String>>,
}

impl Default for EventRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            location: String::new(),
            venue: String::new(),
            address: String::new(),
            coordinates: None,
            date: String::new(),
            time: String::new(),
            end_time: None,
            category: String::new(),
            subcategory: None,
            languages: Vec::new(),
            is_public: true,
            event_type: "custom".to_string(),
            capacity: None,
            image_url: String::new(),
            created_by: None,
            is_featured: false,
            template_event_id: None,
            target_interests: None,
            target_cite_connection: None,
            target_reasons: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

/// `?username=` on mutating event endpoints names the acting user.
#[derive(Debug, Default, Deserialize)]
pub struct ActingUserQuery {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MembershipRequest {
    pub username: String,
}

// -- Chat & notifications --

#[derive(Debug, Clone, Deserialize)]
pub struct SendChatRequest {
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSentResponse {
    pub id: i64,
    pub message: String,
    pub notified: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkReadRequest {
    #[serde(default)]
    pub event_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub marked_read: usize,
}

// -- Follows --

/// A directed edge: `user1` follows `user2`.
#[derive(Debug, Clone, Deserialize)]
pub struct FollowRequest {
    pub user1: String,
    pub user2: String,
}

// -- Search requests --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequestBody {
    pub user_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequestView {
    pub id: i64,
    #[serde(flatten)]
    pub body: SearchRequestBody,
}

// -- Geocoding --

#[derive(Debug, Deserialize)]
pub struct GeocodeQuery {
    #[serde(default)]
    pub q: String,
}

// -- Uploads --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}
