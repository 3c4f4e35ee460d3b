use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRef {
    pub name: String,
}

/// Event projection returned by every event read endpoint.
///
/// Field names are camelCase because the web frontend consumes them as-is.
/// `participants` and `crew` always hold the same usernames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: i64,
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
    #[serde(rename = "type")]
    pub event_type: String,
    pub capacity: Option<i64>,
    pub image_url: String,
    pub created_by: Option<String>,
    pub is_featured: bool,
    pub is_archived: bool,
    pub template_event_id: Option<i64>,
    pub target_interests: Option<Vec<String>>,
    pub target_cite_connection: Option<Vec<String>>,
    pub target_reasons: Option<Vec<String>>,
    pub created_at: String,
    pub host: Option<HostRef>,
    pub participants: Vec<String>,
    pub crew: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub username: String,
    pub message: String,
    pub timestamp: String,
}

/// Unread notification counts for one user, keyed by event id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadSummary {
    pub total_unread: i64,
    pub by_event: BTreeMap<i64, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowEdge {
    pub user1: String,
    pub user2: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
}
