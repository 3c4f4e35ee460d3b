use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tracing::info;

use crate::Store;
use crate::migrations;
use crate::models::{
    ChatMessageRow, EventChanges, EventRow, FollowRow, NewEvent, NewSearchRequest,
    ParticipantRow, PostedMessage, ProfileRow, SearchRequestRow, UserRow,
};

const USER_COLUMNS: &str =
    "id, username, password_hash, invite_code, COALESCE(created_at, '')";

// Legacy rows may carry NULL flags, hence the COALESCEs.
const EVENT_COLUMNS: &str = "id, name, description, location, venue, address, coordinates, \
     date, time, end_time, category, subcategory, languages, COALESCE(is_public, 1), event_type, \
     capacity, image_url, created_by, COALESCE(is_featured, 0), COALESCE(is_archived, 0), \
     template_event_id, target_interests, target_cite_connection, target_reasons, \
     COALESCE(created_at, '')";

const SEARCH_REQUEST_COLUMNS: &str = "id, COALESCE(user_id, ''), COALESCE(date, ''), COALESCE(start_time, ''), \
     COALESCE(end_time, ''), budget, COALESCE(request_type, ''), COALESCE(category, ''), \
     COALESCE(language, '')";

/// SQLite-backed [`Store`]. One connection behind a mutex; every call
/// holds the lock for its whole duration.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_sqlite(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private throwaway database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_sqlite(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Runs `f` inside a transaction. Dropping the transaction on error
    /// rolls it back.
    fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        invite_code: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        location: row.get(3)?,
        venue: row.get(4)?,
        address: row.get(5)?,
        coordinates: row.get(6)?,
        date: row.get(7)?,
        time: row.get(8)?,
        end_time: row.get(9)?,
        category: row.get(10)?,
        subcategory: row.get(11)?,
        languages: row.get(12)?,
        is_public: row.get(13)?,
        event_type: row.get(14)?,
        capacity: row.get(15)?,
        image_url: row.get(16)?,
        created_by: row.get(17)?,
        is_featured: row.get(18)?,
        is_archived: row.get(19)?,
        template_event_id: row.get(20)?,
        target_interests: row.get(21)?,
        target_cite_connection: row.get(22)?,
        target_reasons: row.get(23)?,
        created_at: row.get(24)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessageRow> {
    Ok(ChatMessageRow {
        id: row.get(0)?,
        event_id: row.get(1)?,
        username: row.get(2)?,
        message: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

fn search_request_from_row(row: &Row<'_>) -> rusqlite::Result<SearchRequestRow> {
    Ok(SearchRequestRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        date: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        budget: row.get(5)?,
        kind: row.get(6)?,
        category: row.get(7)?,
        language: row.get(8)?,
    })
}

fn query_events(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<EventRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, event_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn query_names(conn: &Connection, sql: &str, username: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([username], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

/// Inserts a user row unless the key is already taken. Shared by
/// registration and the profile stub path.
fn insert_user_if_absent(
    conn: &Connection,
    username: &str,
    username_key: &str,
    password_hash: Option<&str>,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (username, username_key, password_hash, created_at)
         SELECT ?1, ?2, ?3, datetime('now')
         WHERE NOT EXISTS (SELECT 1 FROM users WHERE username_key = ?2)",
        params![username, username_key, password_hash],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

impl Store for SqliteStore {
    // -- Users --

    fn create_user(
        &self,
        username: &str,
        username_key: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<i64>> {
        self.with_conn(|conn| insert_user_if_absent(conn, username, username_key, password_hash))
    }

    fn find_user(&self, username_key: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username_key = ?1 ORDER BY id LIMIT 1"
            );
            Ok(conn.query_row(&sql, [username_key], user_from_row).optional()?)
        })
    }

    fn find_user_by_invite_code(&self, code: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE invite_code = ?1 LIMIT 1");
            Ok(conn.query_row(&sql, [code], user_from_row).optional()?)
        })
    }

    fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn set_password_hash(&self, username_key: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password_hash = ?2 WHERE username_key = ?1",
                params![username_key, password_hash],
            )?;
            Ok(changed > 0)
        })
    }

    fn set_invite_code(&self, username_key: &str, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET invite_code = ?2 WHERE username_key = ?1",
                params![username_key, code],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Profiles --

    fn get_profile(&self, username_key: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT username, profile_json, updated_at FROM user_profiles
                     WHERE username_key = ?1",
                    [username_key],
                    |row| {
                        Ok(ProfileRow {
                            username: row.get(0)?,
                            profile_json: row.get(1)?,
                            updated_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn save_profile(&self, username: &str, username_key: &str, profile_json: &str) -> Result<()> {
        self.with_tx(|tx| {
            insert_user_if_absent(tx, username, username_key, None)?;
            tx.execute(
                "INSERT INTO user_profiles (username_key, username, profile_json, updated_at)
                 VALUES (?1, ?2, ?3, datetime('now'))
                 ON CONFLICT(username_key) DO UPDATE SET
                     username = excluded.username,
                     profile_json = excluded.profile_json,
                     updated_at = excluded.updated_at",
                params![username_key, username, profile_json],
            )?;
            Ok(())
        })
    }

    // -- Events --

    fn create_event(&self, event: &NewEvent) -> Result<i64> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO events (
                     name, description, location, venue, address, coordinates, date, time,
                     end_time, category, subcategory, languages, is_public, event_type, capacity,
                     image_url, created_by, is_featured, is_archived, template_event_id,
                     target_interests, target_cite_connection, target_reasons, created_at
                 ) VALUES (
                     ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, 0, ?19, ?20, ?21, ?22, datetime('now')
                 )",
                params![
                    event.name,
                    event.description,
                    event.location,
                    event.venue,
                    event.address,
                    event.coordinates,
                    event.date,
                    event.time,
                    event.end_time,
                    event.category,
                    event.subcategory,
                    event.languages,
                    event.is_public,
                    event.event_type,
                    event.capacity,
                    event.image_url,
                    event.created_by,
                    event.is_featured,
                    event.template_event_id,
                    event.target_interests,
                    event.target_cite_connection,
                    event.target_reasons,
                ],
            )?;
            let id = tx.last_insert_rowid();

            if let Some(host) = event.created_by.as_deref().filter(|h| !h.is_empty()) {
                tx.execute(
                    "INSERT OR IGNORE INTO event_participants (event_id, username, is_host, joined_at)
                     VALUES (?1, ?2, 1, datetime('now'))",
                    params![id, host],
                )?;
            }
            Ok(id)
        })
    }

    fn get_event(&self, id: i64) -> Result<Option<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
            Ok(conn.query_row(&sql, [id], event_from_row).optional()?)
        })
    }

    fn list_public_events(&self, include_archived: bool) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE COALESCE(is_public, 1) = 1 AND (?1 OR COALESCE(is_archived, 0) = 0)
                 ORDER BY id"
            );
            query_events(conn, &sql, &[&include_archived as &dyn ToSql])
        })
    }

    fn list_events_for_participant(&self, username: &str) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE id IN (SELECT event_id FROM event_participants WHERE username = ?1)
                 ORDER BY id"
            );
            query_events(conn, &sql, &[&username as &dyn ToSql])
        })
    }

    fn update_event(&self, id: i64, changes: &EventChanges) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET
                     name = ?2, description = ?3, location = ?4, venue = ?5, address = ?6,
                     coordinates = ?7, date = ?8, time = ?9, end_time = ?10, category = ?11,
                     subcategory = ?12, languages = ?13, capacity = ?14, image_url = ?15
                 WHERE id = ?1",
                params![
                    id,
                    changes.name,
                    changes.description,
                    changes.location,
                    changes.venue,
                    changes.address,
                    changes.coordinates,
                    changes.date,
                    changes.time,
                    changes.end_time,
                    changes.category,
                    changes.subcategory,
                    changes.languages,
                    changes.capacity,
                    changes.image_url,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_event(&self, id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM notifications WHERE event_id = ?1", [id])?;
            tx.execute("DELETE FROM chat_messages WHERE event_id = ?1", [id])?;
            tx.execute("DELETE FROM event_participants WHERE event_id = ?1", [id])?;
            let removed = tx.execute("DELETE FROM events WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    fn set_event_archived(&self, id: i64, archived: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET is_archived = ?2 WHERE id = ?1",
                params![id, archived],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Participants --

    fn participants_for_events(&self, event_ids: &[i64]) -> Result<Vec<ParticipantRow>> {
        if event_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=event_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT event_id, username, COALESCE(is_host, 0), COALESCE(joined_at, '')
                 FROM event_participants WHERE event_id IN ({})
                 ORDER BY event_id, joined_at, rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = event_ids.iter().map(|id| id as &dyn ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ParticipantRow {
                        event_id: row.get(0)?,
                        username: row.get(1)?,
                        is_host: row.get(2)?,
                        joined_at: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn add_participant(&self, event_id: i64, username: &str, is_host: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO event_participants (event_id, username, is_host, joined_at)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![event_id, username, is_host],
            )?;
            Ok(inserted > 0)
        })
    }

    fn remove_participant(&self, event_id: i64, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM event_participants WHERE event_id = ?1 AND username = ?2",
                params![event_id, username],
            )?;
            Ok(removed > 0)
        })
    }

    // -- Chat & notifications --

    fn post_message(&self, event_id: i64, username: &str, message: &str) -> Result<PostedMessage> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO chat_messages (event_id, username, message, timestamp)
                 VALUES (?1, ?2, ?3, datetime('now'))",
                params![event_id, username, message],
            )?;
            let message_id = tx.last_insert_rowid();

            let notified = tx.execute(
                "INSERT INTO notifications (username, event_id, message_id, is_read, created_at)
                 SELECT username, ?1, ?2, 0, datetime('now') FROM event_participants
                 WHERE event_id = ?1 AND username <> ?3",
                params![event_id, message_id, username],
            )?;

            let stored = tx.query_row(
                "SELECT id, event_id, username, message, COALESCE(timestamp, '')
                 FROM chat_messages WHERE id = ?1",
                [message_id],
                message_from_row,
            )?;

            Ok(PostedMessage {
                message: stored,
                notified,
            })
        })
    }

    fn messages_for_event(&self, event_id: i64) -> Result<Vec<ChatMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_id, username, message, COALESCE(timestamp, '')
                 FROM chat_messages WHERE event_id = ?1 ORDER BY timestamp, id",
            )?;
            let rows = stmt
                .query_map([event_id], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn unread_counts(&self, username: &str) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, COUNT(*) FROM notifications
                 WHERE username = ?1 AND is_read = 0
                 GROUP BY event_id ORDER BY event_id",
            )?;
            let rows = stmt
                .query_map([username], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    fn mark_notifications_read(&self, username: &str, event_id: Option<i64>) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = match event_id {
                Some(event_id) => conn.execute(
                    "UPDATE notifications SET is_read = 1
                     WHERE username = ?1 AND event_id = ?2 AND is_read = 0",
                    params![username, event_id],
                )?,
                None => conn.execute(
                    "UPDATE notifications SET is_read = 1 WHERE username = ?1 AND is_read = 0",
                    [username],
                )?,
            };
            Ok(changed)
        })
    }

    // -- Follows --

    fn add_follow(&self, follower: &str, followed: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO follows (user1, user2, created_at)
                 VALUES (?1, ?2, datetime('now'))",
                params![follower, followed],
            )?;
            Ok(inserted > 0)
        })
    }

    fn remove_follow(&self, follower: &str, followed: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE user1 = ?1 AND user2 = ?2",
                params![follower, followed],
            )?;
            Ok(removed > 0)
        })
    }

    fn following(&self, username: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_names(
                conn,
                "SELECT user2 FROM follows WHERE user1 = ?1 ORDER BY created_at, user2",
                username,
            )
        })
    }

    fn followers(&self, username: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            query_names(
                conn,
                "SELECT user1 FROM follows WHERE user2 = ?1 ORDER BY created_at, user1",
                username,
            )
        })
    }

    fn list_follows(&self) -> Result<Vec<FollowRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user1, user2, COALESCE(created_at, '') FROM follows
                 ORDER BY created_at, user1, user2",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(FollowRow {
                        user1: row.get(0)?,
                        user2: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    // -- Search requests --

    fn create_search_request(&self, request: &NewSearchRequest) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO search_requests (
                     user_id, date, start_time, end_time, budget, request_type, category,
                     language, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))",
                params![
                    request.user_id,
                    request.date,
                    request.start_time,
                    request.end_time,
                    request.budget,
                    request.kind,
                    request.category,
                    request.language,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn list_search_requests(&self) -> Result<Vec<SearchRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEARCH_REQUEST_COLUMNS} FROM search_requests ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([], search_request_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }
}
