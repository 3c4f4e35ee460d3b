//! Database row types. These map directly to table rows and stay distinct
//! from the convene-types API models so the storage layer has no HTTP
//! concerns. JSON-valued columns are carried as raw text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: Option<String>,
    pub invite_code: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRow {
    pub username: String,
    pub profile_json: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub venue: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub end_time: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub languages: Option<String>,
    pub is_public: bool,
    pub event_type: Option<String>,
    pub capacity: Option<i64>,
    pub image_url: Option<String>,
    pub created_by: Option<String>,
    pub is_featured: bool,
    pub is_archived: bool,
    pub template_event_id: Option<i64>,
    pub target_interests: Option<String>,
    pub target_cite_connection: Option<String>,
    pub target_reasons: Option<String>,
    pub created_at: String,
}

/// Column values for a new event. The host participant row is derived
/// from `created_by`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewEvent {
    pub name: String,
    pub description: String,
    pub location: String,
    pub venue: String,
    pub address: String,
    pub coordinates: Option<String>,
    pub date: String,
    pub time: String,
    pub end_time: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub languages: String,
    pub is_public: bool,
    pub event_type: String,
    pub capacity: Option<i64>,
    pub image_url: String,
    pub created_by: Option<String>,
    pub is_featured: bool,
    pub template_event_id: Option<i64>,
    pub target_interests: Option<String>,
    pub target_cite_connection: Option<String>,
    pub target_reasons: Option<String>,
}

/// The mutable subset of an event. Visibility, creator and the featured
/// flag are not part of it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventChanges {
    pub name: String,
    pub description: String,
    pub location: String,
    pub venue: String,
    pub address: String,
    pub coordinates: Option<String>,
    pub date: String,
    pub time: String,
    pub end_time: Option<String>,
    pub category: String,
    pub subcategory: Option<String>,
    pub languages: String,
    pub capacity: Option<i64>,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRow {
    pub event_id: i64,
    pub username: String,
    pub is_host: bool,
    pub joined_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageRow {
    pub id: i64,
    pub event_id: i64,
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// Outcome of appending a chat message: the stored row and how many
/// notification rows were fanned out with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub message: ChatMessageRow,
    pub notified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowRow {
    pub user1: String,
    pub user2: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewSearchRequest {
    pub user_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub budget: Option<i64>,
    pub kind: String,
    pub category: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequestRow {
    pub id: i64,
    pub user_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub budget: Option<i64>,
    pub kind: String,
    pub category: String,
    pub language: String,
}
