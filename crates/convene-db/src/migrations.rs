use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

/// Columns that older deployments may lack. They are added best-effort on
/// startup: a failure is logged and the migration carries on.
const SQLITE_LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("users", "username_key", "TEXT"),
    ("users", "invite_code", "TEXT"),
    ("users", "created_at", "TEXT"),
    ("events", "end_time", "TEXT"),
    ("events", "subcategory", "TEXT"),
    ("events", "is_featured", "INTEGER NOT NULL DEFAULT 0"),
    ("events", "is_archived", "INTEGER NOT NULL DEFAULT 0"),
    ("events", "template_event_id", "INTEGER"),
    ("events", "target_interests", "TEXT"),
    ("events", "target_cite_connection", "TEXT"),
    ("events", "target_reasons", "TEXT"),
    ("search_requests", "start_time", "TEXT"),
    ("search_requests", "end_time", "TEXT"),
    ("search_requests", "request_type", "TEXT"),
    ("search_requests", "created_at", "TEXT"),
];

const POSTGRES_LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("users", "username_key", "TEXT"),
    ("users", "invite_code", "TEXT"),
    ("users", "created_at", "TIMESTAMPTZ NOT NULL DEFAULT now()"),
    ("events", "end_time", "TEXT"),
    ("events", "subcategory", "TEXT"),
    ("events", "is_featured", "BOOLEAN NOT NULL DEFAULT FALSE"),
    ("events", "is_archived", "BOOLEAN NOT NULL DEFAULT FALSE"),
    ("events", "template_event_id", "BIGINT"),
    ("events", "target_interests", "TEXT"),
    ("events", "target_cite_connection", "TEXT"),
    ("events", "target_reasons", "TEXT"),
    ("search_requests", "start_time", "TEXT"),
    ("search_requests", "end_time", "TEXT"),
    ("search_requests", "request_type", "TEXT"),
    ("search_requests", "created_at", "TIMESTAMPTZ NOT NULL DEFAULT now()"),
];

/// The first `search_requests` schema named these columns after SQL
/// keywords: `(legacy, current)`.
const RENAMED_SEARCH_COLUMNS: &[(&str, &str)] = &[
    ("start", "start_time"),
    ("end", "end_time"),
    ("type", "request_type"),
];

/// Target shape for a column an older PostgreSQL deployment declared
/// narrower than the adapter reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Widen {
    BigInt,
    /// Integer flag to BOOLEAN, with the new default.
    Flag(bool),
    /// TIMESTAMP holding UTC wall-clock values to TIMESTAMPTZ.
    Utc,
}

const POSTGRES_TYPE_FIXES: &[(&str, &str, Widen)] = &[
    ("users", "id", Widen::BigInt),
    ("events", "id", Widen::BigInt),
    ("events", "capacity", Widen::BigInt),
    ("events", "template_event_id", Widen::BigInt),
    ("events", "is_public", Widen::Flag(true)),
    ("events", "is_featured", Widen::Flag(false)),
    ("events", "is_archived", Widen::Flag(false)),
    ("events", "created_at", Widen::Utc),
    ("event_participants", "event_id", Widen::BigInt),
    ("event_participants", "is_host", Widen::Flag(false)),
    ("event_participants", "joined_at", Widen::Utc),
    ("chat_messages", "id", Widen::BigInt),
    ("chat_messages", "event_id", Widen::BigInt),
    ("chat_messages", "timestamp", Widen::Utc),
    ("search_requests", "id", Widen::BigInt),
    ("search_requests", "budget", Widen::BigInt),
];

/// Statements that depend on late columns; each one is best-effort.
const FOLLOW_UP_STATEMENTS: &[&str] = &[
    "UPDATE users SET username_key = lower(username) WHERE username_key IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username_key ON users(username_key)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_invite_code ON users(invite_code)",
    "CREATE INDEX IF NOT EXISTS idx_participants_username ON event_participants(username)",
    "CREATE INDEX IF NOT EXISTS idx_chat_messages_event ON chat_messages(event_id, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(username, is_read)",
    "CREATE INDEX IF NOT EXISTS idx_follows_followed ON follows(user2)",
];

pub fn run_sqlite(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            username_key    TEXT,
            password_hash   TEXT,
            invite_code     TEXT,
            created_at      TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS user_profiles (
            username_key    TEXT PRIMARY KEY,
            username        TEXT NOT NULL,
            profile_json    TEXT NOT NULL,
            updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS events (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            name                    TEXT NOT NULL,
            description             TEXT,
            location                TEXT,
            venue                   TEXT,
            address                 TEXT,
            coordinates             TEXT,
            date                    TEXT,
            time                    TEXT,
            end_time                TEXT,
            category                TEXT,
            subcategory             TEXT,
            languages               TEXT,
            is_public               INTEGER DEFAULT 1,
            event_type              TEXT,
            capacity                INTEGER,
            image_url               TEXT,
            created_by              TEXT,
            is_featured             INTEGER NOT NULL DEFAULT 0,
            is_archived             INTEGER NOT NULL DEFAULT 0,
            template_event_id       INTEGER,
            target_interests        TEXT,
            target_cite_connection  TEXT,
            target_reasons          TEXT,
            created_at              TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS event_participants (
            event_id    INTEGER NOT NULL REFERENCES events(id),
            username    TEXT NOT NULL,
            is_host     INTEGER NOT NULL DEFAULT 0,
            joined_at   TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (event_id, username)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id    INTEGER NOT NULL REFERENCES events(id),
            username    TEXT NOT NULL,
            message     TEXT NOT NULL,
            timestamp   TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL,
            event_id    INTEGER NOT NULL REFERENCES events(id),
            message_id  INTEGER NOT NULL REFERENCES chat_messages(id),
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS follows (
            user1       TEXT NOT NULL,
            user2       TEXT NOT NULL,
            created_at  TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (user1, user2)
        );

        CREATE TABLE IF NOT EXISTS search_requests (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         TEXT NOT NULL,
            date            TEXT,
            start_time      TEXT,
            end_time        TEXT,
            budget          INTEGER,
            request_type    TEXT,
            category        TEXT,
            language        TEXT,
            created_at      TEXT DEFAULT (datetime('now'))
        );
        ",
    )?;

    for (table, column, decl) in SQLITE_LATE_COLUMNS {
        add_sqlite_column(conn, table, column, decl);
    }

    for (legacy, current) in RENAMED_SEARCH_COLUMNS {
        match sqlite_column_exists(conn, "search_requests", legacy) {
            Ok(true) => report_backfill(
                legacy,
                current,
                conn.execute(&backfill_sql(legacy, current), []).map(|n| n as u64),
            ),
            Ok(false) => {}
            Err(e) => warn!("Could not inspect table search_requests: {}", e),
        }
    }

    for sql in FOLLOW_UP_STATEMENTS {
        if let Err(e) = conn.execute_batch(sql) {
            warn!("Migration step failed, continuing: {}: {}", sql, e);
        }
    }

    fold_legacy_friends_sqlite(conn);

    info!("Database migrations complete");
    Ok(())
}

fn add_sqlite_column(conn: &Connection, table: &str, column: &str, decl: &str) {
    match sqlite_column_exists(conn, table, column) {
        Ok(true) => {}
        Ok(false) => {
            let sql = format!("ALTER TABLE {table} ADD COLUMN {column} {decl}");
            match conn.execute_batch(&sql) {
                Ok(()) => info!("Added column {}.{}", table, column),
                Err(e) => warn!("Could not add column {}.{}: {}", table, column, e),
            }
        }
        Err(e) => warn!("Could not inspect table {}: {}", table, e),
    }
}

fn sqlite_column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

/// Older deployments kept a separate `friends` table with the same shape as
/// `follows`. Its edges are copied over once; the table itself is left alone.
fn fold_legacy_friends_sqlite(conn: &Connection) {
    let exists = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'friends'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0);

    match exists {
        Ok(true) => {
            match conn.execute(
                "INSERT OR IGNORE INTO follows (user1, user2, created_at)
                 SELECT user1, user2, COALESCE(created_at, datetime('now')) FROM friends
                 WHERE user1 IS NOT NULL AND user2 IS NOT NULL",
                [],
            ) {
                Ok(0) => {}
                Ok(n) => info!("Copied {} legacy friend edges into follows", n),
                Err(e) => warn!("Could not copy legacy friends: {}", e),
            }
        }
        Ok(false) => {}
        Err(e) => warn!("Could not look for legacy friends table: {}", e),
    }
}

pub fn run_postgres(client: &mut postgres::Client) -> Result<()> {
    client.batch_execute(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              BIGSERIAL PRIMARY KEY,
            username        TEXT NOT NULL UNIQUE,
            username_key    TEXT,
            password_hash   TEXT,
            invite_code     TEXT,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS user_profiles (
            username_key    TEXT PRIMARY KEY,
            username        TEXT NOT NULL,
            profile_json    TEXT NOT NULL,
            updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS events (
            id                      BIGSERIAL PRIMARY KEY,
            name                    TEXT NOT NULL,
            description             TEXT,
            location                TEXT,
            venue                   TEXT,
            address                 TEXT,
            coordinates             TEXT,
            date                    TEXT,
            time                    TEXT,
            end_time                TEXT,
            category                TEXT,
            subcategory             TEXT,
            languages               TEXT,
            is_public               BOOLEAN NOT NULL DEFAULT TRUE,
            event_type              TEXT,
            capacity                BIGINT,
            image_url               TEXT,
            created_by              TEXT,
            is_featured             BOOLEAN NOT NULL DEFAULT FALSE,
            is_archived             BOOLEAN NOT NULL DEFAULT FALSE,
            template_event_id       BIGINT,
            target_interests        TEXT,
            target_cite_connection  TEXT,
            target_reasons          TEXT,
            created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS event_participants (
            event_id    BIGINT NOT NULL REFERENCES events(id),
            username    TEXT NOT NULL,
            is_host     BOOLEAN NOT NULL DEFAULT FALSE,
            joined_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (event_id, username)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          BIGSERIAL PRIMARY KEY,
            event_id    BIGINT NOT NULL REFERENCES events(id),
            username    TEXT NOT NULL,
            message     TEXT NOT NULL,
            timestamp   TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id          BIGSERIAL PRIMARY KEY,
            username    TEXT NOT NULL,
            event_id    BIGINT NOT NULL REFERENCES events(id),
            message_id  BIGINT NOT NULL REFERENCES chat_messages(id),
            is_read     BOOLEAN NOT NULL DEFAULT FALSE,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        );

        CREATE TABLE IF NOT EXISTS follows (
            user1       TEXT NOT NULL,
            user2       TEXT NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (user1, user2)
        );

        CREATE TABLE IF NOT EXISTS search_requests (
            id              BIGSERIAL PRIMARY KEY,
            user_id         TEXT NOT NULL,
            date            TEXT,
            start_time      TEXT,
            end_time        TEXT,
            budget          BIGINT,
            request_type    TEXT,
            category        TEXT,
            language        TEXT,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        ",
    )?;

    for (table, column, widen) in POSTGRES_TYPE_FIXES {
        widen_postgres_column(client, table, column, *widen);
    }

    for (table, column, decl) in POSTGRES_LATE_COLUMNS {
        let sql = format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {decl}");
        if let Err(e) = client.batch_execute(&sql) {
            warn!("Could not add column {}.{}: {}", table, column, e);
        }
    }

    for (legacy, current) in RENAMED_SEARCH_COLUMNS {
        match postgres_column_type(client, "search_requests", legacy) {
            Ok(Some(_)) => report_backfill(
                legacy,
                current,
                client.execute(backfill_sql(legacy, current).as_str(), &[]),
            ),
            Ok(None) => {}
            Err(e) => warn!("Could not inspect table search_requests: {}", e),
        }
    }

    for sql in FOLLOW_UP_STATEMENTS {
        if let Err(e) = client.batch_execute(sql) {
            warn!("Migration step failed, continuing: {}: {}", sql, e);
        }
    }

    fold_legacy_friends_postgres(client);

    info!("Database migrations complete");
    Ok(())
}

fn widen_postgres_column(client: &mut postgres::Client, table: &str, column: &str, widen: Widen) {
    let current = match postgres_column_type(client, table, column) {
        Ok(Some(current)) => current,
        Ok(None) => return,
        Err(e) => {
            warn!("Could not inspect column {}.{}: {}", table, column, e);
            return;
        }
    };
    let Some(sql) = widen_sql(table, column, &current, widen) else {
        return;
    };
    match client.batch_execute(&sql) {
        Ok(()) => info!("Converted column {}.{} from {}", table, column, current),
        Err(e) => warn!("Could not convert column {}.{} from {}: {}", table, column, current, e),
    }
}

/// `None` when the column already has the wanted type.
fn widen_sql(table: &str, column: &str, current: &str, widen: Widen) -> Option<String> {
    match (widen, current) {
        (Widen::BigInt, "integer" | "smallint") => Some(format!(
            "ALTER TABLE {table} ALTER COLUMN \"{column}\" TYPE BIGINT"
        )),
        (Widen::Flag(default), "integer" | "smallint" | "bigint") => Some(format!(
            "ALTER TABLE {table} ALTER COLUMN \"{column}\" DROP DEFAULT;
             ALTER TABLE {table} ALTER COLUMN \"{column}\" TYPE BOOLEAN USING \"{column}\" <> 0;
             ALTER TABLE {table} ALTER COLUMN \"{column}\" SET DEFAULT {default}"
        )),
        (Widen::Utc, "timestamp without time zone") => Some(format!(
            "ALTER TABLE {table} ALTER COLUMN \"{column}\" TYPE TIMESTAMPTZ \
             USING \"{column}\" AT TIME ZONE 'UTC'"
        )),
        _ => None,
    }
}

fn postgres_column_type(
    client: &mut postgres::Client,
    table: &str,
    column: &str,
) -> Result<Option<String>> {
    let row = client.query_opt(
        "SELECT data_type FROM information_schema.columns
         WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2",
        &[&table, &column],
    )?;
    Ok(row.map(|r| r.try_get::<_, String>(0)).transpose()?)
}

/// Copies a legacy keyword-named column into its replacement. Rows written
/// since the rename already carry the new column and are left alone.
fn backfill_sql(legacy: &str, current: &str) -> String {
    format!(
        "UPDATE search_requests SET {current} = \"{legacy}\"
         WHERE {current} IS NULL AND \"{legacy}\" IS NOT NULL"
    )
}

fn report_backfill<E: std::fmt::Display>(
    legacy: &str,
    current: &str,
    outcome: std::result::Result<u64, E>,
) {
    match outcome {
        Ok(0) => {}
        Ok(n) => info!("Copied {} search_requests.{} values into {}", n, legacy, current),
        Err(e) => warn!("Could not copy search_requests.{} into {}: {}", legacy, current, e),
    }
}

fn fold_legacy_friends_postgres(client: &mut postgres::Client) {
    let exists = client
        .query_one("SELECT to_regclass('friends') IS NOT NULL", &[])
        .map(|row| row.get::<_, bool>(0));

    match exists {
        Ok(true) => {
            match client.execute(
                "INSERT INTO follows (user1, user2)
                 SELECT user1, user2 FROM friends
                 WHERE user1 IS NOT NULL AND user2 IS NOT NULL
                 ON CONFLICT DO NOTHING",
                &[],
            ) {
                Ok(0) => {}
                Ok(n) => info!("Copied {} legacy friend edges into follows", n),
                Err(e) => warn!("Could not copy legacy friends: {}", e),
            }
        }
        Ok(false) => {}
        Err(e) => warn!("Could not look for legacy friends table: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_sqlite(&conn).unwrap();
        run_sqlite(&conn).unwrap();
        assert!(sqlite_column_exists(&conn, "events", "is_archived").unwrap());
    }

    #[test]
    fn legacy_tables_gain_late_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT
            );
            CREATE TABLE events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
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
                is_public INTEGER DEFAULT 1,
                event_type TEXT,
                capacity INTEGER,
                image_url TEXT,
                created_by TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE search_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT,
                date TEXT,
                start TEXT,
                end TEXT,
                budget INTEGER,
                type TEXT,
                category TEXT,
                language TEXT
            );
            INSERT INTO users (username, password_hash) VALUES ('Mitsu', NULL);
            INSERT INTO search_requests (user_id, date, start, end, budget, type, category, language)
            VALUES ('Mitsu', '2025-06-01', '18:00', '21:00', 30, 'Social', 'Music', 'English');
            ",
        )
        .unwrap();

        run_sqlite(&conn).unwrap();

        for (table, column, _) in SQLITE_LATE_COLUMNS {
            assert!(
                sqlite_column_exists(&conn, table, column).unwrap(),
                "missing {table}.{column}"
            );
        }
        let key: String = conn
            .query_row("SELECT username_key FROM users WHERE username = 'Mitsu'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(key, "mitsu");

        let moved: (String, String, String) = conn
            .query_row(
                "SELECT start_time, end_time, request_type FROM search_requests",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(moved, ("18:00".into(), "21:00".into(), "Social".into()));
    }

    #[test]
    fn renamed_search_columns_are_only_copied_when_present() {
        let conn = Connection::open_in_memory().unwrap();
        run_sqlite(&conn).unwrap();
        conn.execute(
            "INSERT INTO search_requests (user_id, date, start_time, end_time, budget, request_type, category, language, created_at)
             VALUES ('Zine', '2025-06-02', NULL, '22:00', 10, 'Sports', '', '', datetime('now'))",
            [],
        )
        .unwrap();

        run_sqlite(&conn).unwrap();

        // A missing double-quoted identifier would read as the literal "start".
        let start: Option<String> = conn
            .query_row("SELECT start_time FROM search_requests", [], |r| r.get(0))
            .unwrap();
        assert_eq!(start, None);
    }

    #[test]
    fn narrow_postgres_columns_are_widened() {
        let sql = widen_sql("events", "id", "integer", Widen::BigInt).unwrap();
        assert_eq!(sql, "ALTER TABLE events ALTER COLUMN \"id\" TYPE BIGINT");
        assert!(widen_sql("events", "id", "bigint", Widen::BigInt).is_none());

        let sql = widen_sql("event_participants", "is_host", "integer", Widen::Flag(false)).unwrap();
        assert!(sql.contains("DROP DEFAULT"));
        assert!(sql.contains("TYPE BOOLEAN USING \"is_host\" <> 0"));
        assert!(sql.contains("SET DEFAULT false"));
        assert!(widen_sql("events", "is_public", "boolean", Widen::Flag(true)).is_none());

        let sql = widen_sql("chat_messages", "timestamp", "timestamp without time zone", Widen::Utc)
            .unwrap();
        assert!(sql.contains("TYPE TIMESTAMPTZ"));
        assert!(sql.contains("\"timestamp\" AT TIME ZONE 'UTC'"));
        assert!(widen_sql("chat_messages", "timestamp", "timestamp with time zone", Widen::Utc).is_none());
    }

    #[test]
    fn every_flag_column_is_listed_once() {
        let mut seen = std::collections::HashSet::new();
        for (table, column, _) in POSTGRES_TYPE_FIXES {
            assert!(seen.insert((*table, *column)), "{table}.{column} listed twice");
        }
        assert!(seen.contains(&("event_participants", "is_host")));
        assert!(seen.contains(&("search_requests", "budget")));
    }

    #[test]
    fn legacy_friends_are_folded_into_follows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE friends (
                user1 TEXT,
                user2 TEXT,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user1, user2)
            );
            INSERT INTO friends (user1, user2) VALUES ('Mitsu', 'Zine');
            ",
        )
        .unwrap();

        run_sqlite(&conn).unwrap();
        run_sqlite(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM follows WHERE user1 = 'Mitsu' AND user2 = 'Zine'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
