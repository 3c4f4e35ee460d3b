pub mod migrations;
pub mod models;
pub mod pg;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::models::{
    ChatMessageRow, EventChanges, EventRow, FollowRow, NewEvent, NewSearchRequest,
    ParticipantRow, PostedMessage, ProfileRow, SearchRequestRow, UserRow,
};

pub use crate::pg::PostgresStore;
pub use crate::sqlite::SqliteStore;

/// Storage interface shared by the SQLite and PostgreSQL adapters.
///
/// Each method is one logical operation. Methods that touch more than one
/// row or table run inside a single transaction, so a failure leaves no
/// partial state behind.
///
/// Usernames passed as `username_key` are expected to be normalized by the
/// caller; plain `username` arguments are stored verbatim.
pub trait Store: Send + Sync {
    // -- Users --

    /// Inserts a user unless the name (or its key) is taken.
    /// Returns the new id, or `None` when the insert was ignored.
    fn create_user(
        &self,
        username: &str,
        username_key: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<i64>>;

    fn find_user(&self, username_key: &str) -> Result<Option<UserRow>>;

    fn find_user_by_invite_code(&self, code: &str) -> Result<Option<UserRow>>;

    fn list_users(&self) -> Result<Vec<UserRow>>;

    /// Returns false when no user matched.
    fn set_password_hash(&self, username_key: &str, password_hash: &str) -> Result<bool>;

    /// Returns false when no user matched.
    fn set_invite_code(&self, username_key: &str, code: &str) -> Result<bool>;

    // -- Profiles --

    fn get_profile(&self, username_key: &str) -> Result<Option<ProfileRow>>;

    /// Upserts the profile document and, in the same transaction, creates a
    /// password-less user stub if the name is not registered yet.
    fn save_profile(&self, username: &str, username_key: &str, profile_json: &str) -> Result<()>;

    // -- Events --

    /// Inserts the event and its host participant row (when `created_by`
    /// is set) atomically.
    fn create_event(&self, event: &NewEvent) -> Result<i64>;

    fn get_event(&self, id: i64) -> Result<Option<EventRow>>;

    /// Public events, oldest first. Archived events only when asked for.
    fn list_public_events(&self, include_archived: bool) -> Result<Vec<EventRow>>;

    /// Every event the user has a participant row for, hosted or joined.
    fn list_events_for_participant(&self, username: &str) -> Result<Vec<EventRow>>;

    /// Returns false when the event does not exist.
    fn update_event(&self, id: i64, changes: &EventChanges) -> Result<bool>;

    /// Removes the event together with its participants, chat messages and
    /// notifications. Returns false when the event does not exist.
    fn delete_event(&self, id: i64) -> Result<bool>;

    /// Returns false when the event does not exist.
    fn set_event_archived(&self, id: i64, archived: bool) -> Result<bool>;

    // -- Participants --

    /// Participant rows for all given events, ordered by event then join
    /// time.
    fn participants_for_events(&self, event_ids: &[i64]) -> Result<Vec<ParticipantRow>>;

    /// Conflict-ignoring insert. Returns true if a row was added.
    fn add_participant(&self, event_id: i64, username: &str, is_host: bool) -> Result<bool>;

    /// Returns true if a row was removed.
    fn remove_participant(&self, event_id: i64, username: &str) -> Result<bool>;

    // -- Chat & notifications --

    /// Appends a chat message and creates one unread notification for every
    /// participant of the event except the sender, atomically.
    fn post_message(&self, event_id: i64, username: &str, message: &str) -> Result<PostedMessage>;

    fn messages_for_event(&self, event_id: i64) -> Result<Vec<ChatMessageRow>>;

    /// `(event_id, unread_count)` pairs for the user, ascending by event.
    fn unread_counts(&self, username: &str) -> Result<Vec<(i64, i64)>>;

    /// Flags unread notifications as read, for one event or all of them.
    /// Returns the number of rows changed.
    fn mark_notifications_read(&self, username: &str, event_id: Option<i64>) -> Result<usize>;

    // -- Follows --

    /// Conflict-ignoring insert of the directed edge `follower -> followed`.
    fn add_follow(&self, follower: &str, followed: &str) -> Result<bool>;

    /// Deletes exactly the directed edge `follower -> followed`.
    fn remove_follow(&self, follower: &str, followed: &str) -> Result<bool>;

    fn following(&self, username: &str) -> Result<Vec<String>>;

    fn followers(&self, username: &str) -> Result<Vec<String>>;

    fn list_follows(&self) -> Result<Vec<FollowRow>>;

    // -- Search requests --

    fn create_search_request(&self, request: &NewSearchRequest) -> Result<i64>;

    fn list_search_requests(&self) -> Result<Vec<SearchRequestRow>>;
}

/// Which backend to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Sqlite(PathBuf),
    Postgres(String),
}

impl DatabaseTarget {
    /// `DATABASE_URL` selects PostgreSQL; otherwise the SQLite file is used.
    pub fn select(database_url: Option<String>, sqlite_path: PathBuf) -> Self {
        match database_url.filter(|url| !url.trim().is_empty()) {
            Some(url) => Self::Postgres(url),
            None => Self::Sqlite(sqlite_path),
        }
    }
}

/// Connection factory. Blocking: call it from a blocking context when the
/// target is PostgreSQL.
pub fn open_store(target: &DatabaseTarget) -> Result<Arc<dyn Store>> {
    match target {
        DatabaseTarget::Sqlite(path) => {
            let store = SqliteStore::open(path)?;
            Ok(Arc::new(store))
        }
        DatabaseTarget::Postgres(url) => {
            let store = PostgresStore::connect(url)?;
            info!("Using PostgreSQL storage");
            Ok(Arc::new(store))
        }
    }
}
