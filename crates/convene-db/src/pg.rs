use std::sync::Mutex;

use anyhow::{Result, anyhow};
use postgres::{Client, NoTls, Row, Transaction};

use crate::Store;
use crate::migrations;
use crate::models::{
    ChatMessageRow, EventChanges, EventRow, FollowRow, NewEvent, NewSearchRequest,
    ParticipantRow, PostedMessage, ProfileRow, SearchRequestRow, UserRow,
};

// Timestamps are rendered the way SQLite's datetime('now') stores them.
const USER_COLUMNS: &str = "id, username, password_hash, invite_code, \
     COALESCE(to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')";

const EVENT_COLUMNS: &str = "id, name, description, location, venue, address, coordinates, \
     date, time, end_time, category, subcategory, languages, COALESCE(is_public, TRUE), \
     event_type, capacity, image_url, created_by, COALESCE(is_featured, FALSE), \
     COALESCE(is_archived, FALSE), template_event_id, target_interests, target_cite_connection, \
     target_reasons, COALESCE(to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')";

const MESSAGE_COLUMNS: &str = "id, event_id, username, message, \
     COALESCE(to_char(timestamp AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')";

const SEARCH_REQUEST_COLUMNS: &str = "id, COALESCE(user_id, ''), COALESCE(date, ''), COALESCE(start_time, ''), \
     COALESCE(end_time, ''), budget, COALESCE(request_type, ''), COALESCE(category, ''), \
     COALESCE(language, '')";

/// PostgreSQL-backed [`Store`] on the synchronous `postgres` client.
///
/// The client drives its own runtime internally, so it must be created,
/// used and dropped off the async executor threads.
pub struct PostgresStore {
    client: Mutex<Client>,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self> {
        let mut client = Client::connect(url, NoTls)?;
        migrations::run_postgres(&mut client)?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    fn with_client<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Client) -> Result<T>,
    {
        let mut client = self
            .client
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))?;
        f(&mut client)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.with_client(|client| {
            let mut tx = client.transaction()?;
            let value = f(&mut tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

fn user_from_row(row: &Row) -> Result<UserRow> {
    Ok(UserRow {
        id: row.try_get(0)?,
        username: row.try_get(1)?,
        password_hash: row.try_get(2)?,
        invite_code: row.try_get(3)?,
        created_at: row.try_get(4)?,
    })
}

fn event_from_row(row: &Row) -> Result<EventRow> {
    Ok(EventRow {
        id: row.try_get(0)?,
        name: row.try_get(1)?,
        description: row.try_get(2)?,
        location: row.try_get(3)?,
        venue: row.try_get(4)?,
        address: row.try_get(5)?,
        coordinates: row.try_get(6)?,
        date: row.try_get(7)?,
        time: row.try_get(8)?,
        end_time: row.try_get(9)?,
        category: row.try_get(10)?,
        subcategory: row.try_get(11)?,
        languages: row.try_get(12)?,
        is_public: row.try_get(13)?,
        event_type: row.try_get(14)?,
        capacity: row.try_get(15)?,
        image_url: row.try_get(16)?,
        created_by: row.try_get(17)?,
        is_featured: row.try_get(18)?,
        is_archived: row.try_get(19)?,
        template_event_id: row.try_get(20)?,
        target_interests: row.try_get(21)?,
        target_cite_connection: row.try_get(22)?,
        target_reasons: row.try_get(23)?,
        created_at: row.try_get(24)?,
    })
}

fn message_from_row(row: &Row) -> Result<ChatMessageRow> {
    Ok(ChatMessageRow {
        id: row.try_get(0)?,
        event_id: row.try_get(1)?,
        username: row.try_get(2)?,
        message: row.try_get(3)?,
        timestamp: row.try_get(4)?,
    })
}

fn search_request_from_row(row: &Row) -> Result<SearchRequestRow> {
    Ok(SearchRequestRow {
        id: row.try_get(0)?,
        user_id: row.try_get(1)?,
        date: row.try_get(2)?,
        start_time: row.try_get(3)?,
        end_time: row.try_get(4)?,
        budget: row.try_get(5)?,
        kind: row.try_get(6)?,
        category: row.try_get(7)?,
        language: row.try_get(8)?,
    })
}

fn collect<T>(rows: Vec<Row>, map: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(map).collect()
}

fn names(rows: Vec<Row>) -> Result<Vec<String>> {
    rows.iter()
        .map(|row| -> Result<String> { Ok(row.try_get(0)?) })
        .collect()
}

/// Shared by registration and the profile stub path.
fn insert_user_if_absent(
    tx: &mut Transaction<'_>,
    username: &str,
    username_key: &str,
    password_hash: Option<&str>,
) -> Result<Option<i64>> {
    let row = tx.query_opt(
        "INSERT INTO users (username, username_key, password_hash)
         SELECT $1::TEXT, $2::TEXT, $3::TEXT
         WHERE NOT EXISTS (SELECT 1 FROM users WHERE username_key = $2::TEXT)
         ON CONFLICT DO NOTHING
         RETURNING id",
        &[&username, &username_key, &password_hash],
    )?;
    row.map(|r| r.try_get::<_, i64>(0)).transpose().map_err(Into::into)
}

impl Store for PostgresStore {
    // -- Users --

    fn create_user(
        &self,
        username: &str,
        username_key: &str,
        password_hash: Option<&str>,
    ) -> Result<Option<i64>> {
        self.with_tx(|tx| insert_user_if_absent(tx, username, username_key, password_hash))
    }

    fn find_user(&self, username_key: &str) -> Result<Option<UserRow>> {
        self.with_client(|client| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username_key = $1 ORDER BY id LIMIT 1"
            );
            client
                .query_opt(sql.as_str(), &[&username_key])?
                .as_ref()
                .map(user_from_row)
                .transpose()
        })
    }

    fn find_user_by_invite_code(&self, code: &str) -> Result<Option<UserRow>> {
        self.with_client(|client| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE invite_code = $1 LIMIT 1");
            client
                .query_opt(sql.as_str(), &[&code])?
                .as_ref()
                .map(user_from_row)
                .transpose()
        })
    }

    fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_client(|client| {
            let rows = client.query(format!("SELECT {USER_COLUMNS} FROM users ORDER BY id").as_str(), &[])?;
            collect(rows, user_from_row)
        })
    }

    fn set_password_hash(&self, username_key: &str, password_hash: &str) -> Result<bool> {
        self.with_client(|client| {
            let changed = client.execute(
                "UPDATE users SET password_hash = $2 WHERE username_key = $1",
                &[&username_key, &password_hash],
            )?;
            Ok(changed > 0)
        })
    }

    fn set_invite_code(&self, username_key: &str, code: &str) -> Result<bool> {
        self.with_client(|client| {
            let changed = client.execute(
                "UPDATE users SET invite_code = $2 WHERE username_key = $1",
                &[&username_key, &code],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Profiles --

    fn get_profile(&self, username_key: &str) -> Result<Option<ProfileRow>> {
        self.with_client(|client| {
            let sql = "SELECT username, profile_json, \
                 COALESCE(to_char(updated_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')
                 FROM user_profiles WHERE username_key = $1";
            let Some(row) = client.query_opt(sql, &[&username_key])? else {
                return Ok(None);
            };
            Ok(Some(ProfileRow {
                username: row.try_get(0)?,
                profile_json: row.try_get(1)?,
                updated_at: row.try_get(2)?,
            }))
        })
    }

    fn save_profile(&self, username: &str, username_key: &str, profile_json: &str) -> Result<()> {
        self.with_tx(|tx| {
            insert_user_if_absent(tx, username, username_key, None)?;
            tx.execute(
                "INSERT INTO user_profiles (username_key, username, profile_json, updated_at)
                 VALUES ($1, $2, $3, now())
                 ON CONFLICT (username_key) DO UPDATE SET
                     username = EXCLUDED.username,
                     profile_json = EXCLUDED.profile_json,
                     updated_at = EXCLUDED.updated_at",
                &[&username_key, &username, &profile_json],
            )?;
            Ok(())
        })
    }

    // -- Events --

    fn create_event(&self, event: &NewEvent) -> Result<i64> {
        self.with_tx(|tx| {
            let row = tx.query_one(
                "INSERT INTO events (
                     name, description, location, venue, address, coordinates, date, time,
                     end_time, category, subcategory, languages, is_public, event_type, capacity,
                     image_url, created_by, is_featured, is_archived, template_event_id,
                     target_interests, target_cite_connection, target_reasons
                 ) VALUES (
                     $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                     $18, FALSE, $19, $20, $21, $22
                 )
                 RETURNING id",
                &[
                    &event.name,
                    &event.description,
                    &event.location,
                    &event.venue,
                    &event.address,
                    &event.coordinates,
                    &event.date,
                    &event.time,
                    &event.end_time,
                    &event.category,
                    &event.subcategory,
                    &event.languages,
                    &event.is_public,
                    &event.event_type,
                    &event.capacity,
                    &event.image_url,
                    &event.created_by,
                    &event.is_featured,
                    &event.template_event_id,
                    &event.target_interests,
                    &event.target_cite_connection,
                    &event.target_reasons,
                ],
            )?;
            let id: i64 = row.try_get(0)?;

            if let Some(host) = event.created_by.as_deref().filter(|h| !h.is_empty()) {
                tx.execute(
                    "INSERT INTO event_participants (event_id, username, is_host)
                     VALUES ($1, $2, TRUE)
                     ON CONFLICT DO NOTHING",
                    &[&id, &host],
                )?;
            }
            Ok(id)
        })
    }

    fn get_event(&self, id: i64) -> Result<Option<EventRow>> {
        self.with_client(|client| {
            let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
            client
                .query_opt(sql.as_str(), &[&id])?
                .as_ref()
                .map(event_from_row)
                .transpose()
        })
    }

    fn list_public_events(&self, include_archived: bool) -> Result<Vec<EventRow>> {
        self.with_client(|client| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE COALESCE(is_public, TRUE) AND ($1 OR NOT COALESCE(is_archived, FALSE))
                 ORDER BY id"
            );
            let rows = client.query(sql.as_str(), &[&include_archived])?;
            collect(rows, event_from_row)
        })
    }

    fn list_events_for_participant(&self, username: &str) -> Result<Vec<EventRow>> {
        self.with_client(|client| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE id IN (SELECT event_id FROM event_participants WHERE username = $1)
                 ORDER BY id"
            );
            let rows = client.query(sql.as_str(), &[&username])?;
            collect(rows, event_from_row)
        })
    }

    fn update_event(&self, id: i64, changes: &EventChanges) -> Result<bool> {
        self.with_client(|client| {
            let changed = client.execute(
                "UPDATE events SET
                     name = $2, description = $3, location = $4, venue = $5, address = $6,
                     coordinates = $7, date = $8, time = $9, end_time = $10, category = $11,
                     subcategory = $12, languages = $13, capacity = $14, image_url = $15
                 WHERE id = $1",
                &[
                    &id,
                    &changes.name,
                    &changes.description,
                    &changes.location,
                    &changes.venue,
                    &changes.address,
                    &changes.coordinates,
                    &changes.date,
                    &changes.time,
                    &changes.end_time,
                    &changes.category,
                    &changes.subcategory,
                    &changes.languages,
                    &changes.capacity,
                    &changes.image_url,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_event(&self, id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            tx.execute("DELETE FROM notifications WHERE event_id = $1", &[&id])?;
            tx.execute("DELETE FROM chat_messages WHERE event_id = $1", &[&id])?;
            tx.execute("DELETE FROM event_participants WHERE event_id = $1", &[&id])?;
            let removed = tx.execute("DELETE FROM events WHERE id = $1", &[&id])?;
            Ok(removed > 0)
        })
    }

    fn set_event_archived(&self, id: i64, archived: bool) -> Result<bool> {
        self.with_client(|client| {
            let changed = client.execute(
                "UPDATE events SET is_archived = $2 WHERE id = $1",
                &[&id, &archived],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Participants --

    fn participants_for_events(&self, event_ids: &[i64]) -> Result<Vec<ParticipantRow>> {
        if event_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_client(|client| {
            let ids = event_ids.to_vec();
            let sql = "SELECT event_id, username, is_host, \
                 COALESCE(to_char(joined_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')
                 FROM event_participants WHERE event_id = ANY($1)
                 ORDER BY event_id, joined_at, username";
            let rows = client.query(sql, &[&ids])?;
            rows.iter()
                .map(|row| -> Result<ParticipantRow> {
                    Ok(ParticipantRow {
                        event_id: row.try_get(0)?,
                        username: row.try_get(1)?,
                        is_host: row.try_get(2)?,
                        joined_at: row.try_get(3)?,
                    })
                })
                .collect()
        })
    }

    fn add_participant(&self, event_id: i64, username: &str, is_host: bool) -> Result<bool> {
        self.with_client(|client| {
            let inserted = client.execute(
                "INSERT INTO event_participants (event_id, username, is_host)
                 VALUES ($1, $2, $3)
                 ON CONFLICT DO NOTHING",
                &[&event_id, &username, &is_host],
            )?;
            Ok(inserted > 0)
        })
    }

    fn remove_participant(&self, event_id: i64, username: &str) -> Result<bool> {
        self.with_client(|client| {
            let removed = client.execute(
                "DELETE FROM event_participants WHERE event_id = $1 AND username = $2",
                &[&event_id, &username],
            )?;
            Ok(removed > 0)
        })
    }

    // -- Chat & notifications --

    fn post_message(&self, event_id: i64, username: &str, message: &str) -> Result<PostedMessage> {
        self.with_tx(|tx| {
            let sql = format!(
                "INSERT INTO chat_messages (event_id, username, message)
                 VALUES ($1, $2, $3)
                 RETURNING {MESSAGE_COLUMNS}"
            );
            let row = tx.query_one(sql.as_str(), &[&event_id, &username, &message])?;
            let stored = message_from_row(&row)?;

            let notified = tx.execute(
                "INSERT INTO notifications (username, event_id, message_id)
                 SELECT username, $1::BIGINT, $2::BIGINT FROM event_participants
                 WHERE event_id = $1::BIGINT AND username <> $3::TEXT",
                &[&event_id, &stored.id, &username],
            )?;

            Ok(PostedMessage {
                message: stored,
                notified: usize::try_from(notified)?,
            })
        })
    }

    fn messages_for_event(&self, event_id: i64) -> Result<Vec<ChatMessageRow>> {
        self.with_client(|client| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM chat_messages
                 WHERE event_id = $1 ORDER BY timestamp, id"
            );
            let rows = client.query(sql.as_str(), &[&event_id])?;
            collect(rows, message_from_row)
        })
    }

    fn unread_counts(&self, username: &str) -> Result<Vec<(i64, i64)>> {
        self.with_client(|client| {
            let rows = client.query(
                "SELECT event_id, COUNT(*) FROM notifications
                 WHERE username = $1 AND NOT is_read
                 GROUP BY event_id ORDER BY event_id",
                &[&username],
            )?;
            rows.iter()
                .map(|row| -> Result<(i64, i64)> { Ok((row.try_get(0)?, row.try_get(1)?)) })
                .collect()
        })
    }

    fn mark_notifications_read(&self, username: &str, event_id: Option<i64>) -> Result<usize> {
        self.with_client(|client| {
            let changed = match event_id {
                Some(event_id) => client.execute(
                    "UPDATE notifications SET is_read = TRUE
                     WHERE username = $1 AND event_id = $2 AND NOT is_read",
                    &[&username, &event_id],
                )?,
                None => client.execute(
                    "UPDATE notifications SET is_read = TRUE WHERE username = $1 AND NOT is_read",
                    &[&username],
                )?,
            };
            Ok(usize::try_from(changed)?)
        })
    }

    // -- Follows --

    fn add_follow(&self, follower: &str, followed: &str) -> Result<bool> {
        self.with_client(|client| {
            let inserted = client.execute(
                "INSERT INTO follows (user1, user2) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&follower, &followed],
            )?;
            Ok(inserted > 0)
        })
    }

    fn remove_follow(&self, follower: &str, followed: &str) -> Result<bool> {
        self.with_client(|client| {
            let removed = client.execute(
                "DELETE FROM follows WHERE user1 = $1 AND user2 = $2",
                &[&follower, &followed],
            )?;
            Ok(removed > 0)
        })
    }

    fn following(&self, username: &str) -> Result<Vec<String>> {
        self.with_client(|client| {
            names(client.query(
                "SELECT user2 FROM follows WHERE user1 = $1 ORDER BY created_at, user2",
                &[&username],
            )?)
        })
    }

    fn followers(&self, username: &str) -> Result<Vec<String>> {
        self.with_client(|client| {
            names(client.query(
                "SELECT user1 FROM follows WHERE user2 = $1 ORDER BY created_at, user1",
                &[&username],
            )?)
        })
    }

    fn list_follows(&self) -> Result<Vec<FollowRow>> {
        self.with_client(|client| {
            let sql = "SELECT user1, user2, \
                 COALESCE(to_char(created_at AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:MI:SS'), '')
                 FROM follows ORDER BY created_at, user1, user2";
            let rows = client.query(sql, &[])?;
            rows.iter()
                .map(|row| -> Result<FollowRow> {
                    Ok(FollowRow {
                        user1: row.try_get(0)?,
                        user2: row.try_get(1)?,
                        created_at: row.try_get(2)?,
                    })
                })
                .collect()
        })
    }

    // -- Search requests --

    fn create_search_request(&self, request: &NewSearchRequest) -> Result<i64> {
        self.with_client(|client| {
            let row = client.query_one(
                "INSERT INTO search_requests (
                     user_id, date, start_time, end_time, budget, request_type, category, language
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING id",
                &[
                    &request.user_id,
                    &request.date,
                    &request.start_time,
                    &request.end_time,
                    &request.budget,
                    &request.kind,
                    &request.category,
                    &request.language,
                ],
            )?;
            Ok(row.try_get(0)?)
        })
    }

    fn list_search_requests(&self) -> Result<Vec<SearchRequestRow>> {
        self.with_client(|client| {
            let rows = client.query(
                format!("SELECT {SEARCH_REQUEST_COLUMNS} FROM search_requests ORDER BY id").as_str(),
                &[],
            )?;
            collect(rows, search_request_from_row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live checks need a scratch database. Each run works in its own schema
    /// and drops it afterwards.
    const TEST_DATABASE_ENV: &str = "CONVENE_TEST_DATABASE_URL";

    fn scoped_url(url: &str, schema: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}options=-c%20search_path%3D{schema}")
    }

    #[test]
    fn first_generation_schema_is_widened_on_connect() {
        let Ok(url) = std::env::var(TEST_DATABASE_ENV) else {
            return;
        };
        let schema = format!(
            "convene_legacy_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_micros()
        );
        let mut admin = Client::connect(&url, NoTls).unwrap();
        admin
            .batch_execute(&format!(
                "
                CREATE SCHEMA {schema};
                SET search_path = {schema};
                CREATE TABLE users (
                    id SERIAL PRIMARY KEY,
                    username TEXT UNIQUE NOT NULL,
                    password_hash TEXT
                );
                CREATE TABLE events (
                    id SERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT,
                    location TEXT,
                    venue TEXT,
                    address TEXT,
                    coordinates TEXT,
                    date TEXT,
                    time TEXT,
                    category TEXT,
                    languages TEXT,
                    is_public BOOLEAN DEFAULT TRUE,
                    event_type TEXT,
                    capacity INTEGER,
                    image_url TEXT,
                    created_by TEXT,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    is_featured INTEGER DEFAULT 0
                );
                CREATE TABLE event_participants (
                    event_id INTEGER,
                    username TEXT,
                    is_host INTEGER DEFAULT 0,
                    joined_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    PRIMARY KEY (event_id, username)
                );
                CREATE TABLE chat_messages (
                    id SERIAL PRIMARY KEY,
                    event_id INTEGER,
                    username TEXT,
                    message TEXT,
                    timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                );
                CREATE TABLE search_requests (
                    id SERIAL PRIMARY KEY,
                    user_id TEXT,
                    date TEXT,
                    start TEXT,
                    \"end\" TEXT,
                    budget INTEGER,
                    type TEXT,
                    category TEXT,
                    language TEXT
                );
                INSERT INTO users (username, password_hash) VALUES ('Mitsu', NULL);
                INSERT INTO events (name, capacity, created_by, is_featured)
                VALUES ('Board games', 6, 'Mitsu', 1);
                INSERT INTO event_participants (event_id, username, is_host) VALUES (1, 'Mitsu', 1);
                INSERT INTO search_requests (user_id, date, start, \"end\", budget, type)
                VALUES ('Mitsu', '2025-06-01', '18:00', '21:00', 30, 'Social');
                "
            ))
            .unwrap();

        let outcome = std::panic::catch_unwind(|| {
            let store = PostgresStore::connect(&scoped_url(&url, &schema)).unwrap();

            let user = store.find_user("mitsu").unwrap().unwrap();
            assert_eq!(user.username, "Mitsu");

            let event = store.get_event(1).unwrap().unwrap();
            assert_eq!(event.capacity, Some(6));
            assert!(event.is_featured);
            assert!(event.is_public);

            assert!(store.add_participant(1, "Zine", false).unwrap());
            let participants = store.participants_for_events(&[1]).unwrap();
            assert_eq!(participants.len(), 2);
            assert!(participants.iter().any(|p| p.username == "Mitsu" && p.is_host));
            assert!(participants.iter().any(|p| p.username == "Zine" && !p.is_host));

            let requests = store.list_search_requests().unwrap();
            assert_eq!(requests[0].start_time, "18:00");
            assert_eq!(requests[0].end_time, "21:00");
            assert_eq!(requests[0].kind, "Social");
            assert_eq!(requests[0].budget, Some(30));
        });

        admin
            .batch_execute(&format!("DROP SCHEMA {schema} CASCADE"))
            .unwrap();
        if let Err(panic) = outcome {
            std::panic::resume_unwind(panic);
        }
    }
}
