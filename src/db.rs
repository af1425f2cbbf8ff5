use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::migrations::{self, MIGRATIONS};
use crate::models::{
    AnswerEvent, AttemptSummary, LeaderboardEntry, Level, TopicProgress, User,
};

// Schema version 1.0.0. Later columns and indexes arrive through `migrations`.
const BASE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS users (
        user_id INTEGER PRIMARY KEY,
        username TEXT,
        total_tasks INTEGER NOT NULL DEFAULT 0 CHECK (total_tasks >= 0),
        correct_answers INTEGER NOT NULL DEFAULT 0
            CHECK (correct_answers >= 0 AND correct_answers <= total_tasks),
        current_level INTEGER NOT NULL DEFAULT 1 CHECK (current_level BETWEEN 1 AND 5),
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS topic_progress (
        user_id INTEGER NOT NULL,
        topic TEXT NOT NULL,
        tasks_solved INTEGER NOT NULL DEFAULT 0 CHECK (tasks_solved >= 0),
        correct_rate REAL NOT NULL DEFAULT 0 CHECK (correct_rate BETWEEN 0 AND 1),
        last_solved TEXT,
        PRIMARY KEY (user_id, topic),
        FOREIGN KEY (user_id) REFERENCES users(user_id)
    );

    CREATE TABLE IF NOT EXISTS answer_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        task_id TEXT NOT NULL,
        topic TEXT NOT NULL,
        correct INTEGER NOT NULL CHECK (correct IN (0, 1)),
        difficulty INTEGER NOT NULL CHECK (difficulty BETWEEN 1 AND 5),
        timestamp TEXT NOT NULL,
        FOREIGN KEY (user_id) REFERENCES users(user_id)
    );

    CREATE TABLE IF NOT EXISTS view_snapshots (
        view_name TEXT PRIMARY KEY,
        payload TEXT NOT NULL,
        last_refresh TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        checksum TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );

    CREATE TRIGGER IF NOT EXISTS answer_events_no_update
    BEFORE UPDATE ON answer_events
    BEGIN
        SELECT RAISE(ABORT, 'answer_events is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS answer_events_no_delete
    BEFORE DELETE ON answer_events
    BEGIN
        SELECT RAISE(ABORT, 'answer_events is append-only');
    END;

    CREATE INDEX IF NOT EXISTS idx_events_user_time ON answer_events(user_id, timestamp DESC);
"#;

/// Shared handle to the store. Cloning is cheap; every clone talks to the
/// same connection and units of work are serialized by the mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    // None for in-memory stores, which cannot be reopened
    path: Option<PathBuf>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        let on_disk = path != Path::new(":memory:");
        if on_disk {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: on_disk.then(|| path.to_path_buf()),
        })
    }

    /// A handle on its own connection to the same file, so long reads do not
    /// hold this handle's lock. In-memory stores share the existing connection.
    pub fn reopen(&self) -> Result<Self> {
        match &self.path {
            Some(path) => Self::open(path),
            None => Ok(self.clone()),
        }
    }

    pub fn is_file_backed(&self) -> bool {
        self.path.is_some()
    }

    pub fn init(&self) -> Result<()> {
        self.lock().execute_batch(BASE_SCHEMA)?;
        Ok(())
    }

    /// Applies every pending migration. Returns the versions applied by this call.
    pub fn migrate(&self) -> Result<Vec<String>> {
        let mut conn = self.lock();
        migrations::run_migrations(&mut conn, MIGRATIONS)
    }

    pub fn current_version(&self) -> Result<String> {
        Ok(migrations::current_version(&self.lock())?.to_string())
    }

    /// Acquires the connection for one unit of work. A poisoned lock is
    /// recovered: any transaction open during the panic was rolled back on drop.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn user(&self, user_id: i64) -> Result<Option<User>> {
        fetch_user(&self.lock(), user_id)
    }

    pub fn topic_progress(&self, user_id: i64) -> Result<Vec<TopicProgress>> {
        fetch_topic_progress(&self.lock(), user_id)
    }

    pub fn events_for_user(&self, user_id: i64) -> Result<Vec<AnswerEvent>> {
        fetch_events(&self.lock(), user_id)
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::InvalidTimestamp(raw.to_string()))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

// User operations

/// Creates the user with tier 1 if absent. Returns whether a row was inserted.
pub(crate) fn ensure_user(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (user_id, current_level, created_at) VALUES (?1, 1, ?2)",
        params![user_id, format_timestamp(now)],
    )?;
    if inserted > 0 {
        debug!(user_id, "created user on first contact");
    }
    Ok(inserted > 0)
}

pub(crate) fn set_username(conn: &Connection, user_id: i64, username: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET username = ?1 WHERE user_id = ?2",
        params![username, user_id],
    )?;
    Ok(())
}

pub(crate) fn fetch_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let user = conn
        .query_row(
            r#"
            SELECT user_id, username, total_tasks, correct_answers, current_level,
                   last_activity, created_at
            FROM users
            WHERE user_id = ?1
            "#,
            params![user_id],
            |row| {
                Ok(User {
                    user_id: row.get(0)?,
                    username: row.get(1)?,
                    total_tasks: row.get(2)?,
                    correct_answers: row.get(3)?,
                    current_level: Level::from_i32(row.get(4)?),
                    last_activity: optional_timestamp_column(row, 5)?,
                    created_at: timestamp_column(row, 6)?,
                })
            },
        )
        .optional()?;

    Ok(user)
}

pub(crate) fn fetch_level(conn: &Connection, user_id: i64) -> Result<Level> {
    let level: Option<i32> = conn
        .query_row(
            "SELECT current_level FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(level.map(Level::from_i32).unwrap_or(Level::Novice))
}

// Topic progress operations

fn topic_progress_from_row(row: &Row<'_>) -> rusqlite::Result<TopicProgress> {
    Ok(TopicProgress {
        user_id: row.get(0)?,
        topic: row.get(1)?,
        tasks_solved: row.get(2)?,
        correct_rate: row.get(3)?,
        last_solved: optional_timestamp_column(row, 4)?,
    })
}

pub(crate) fn fetch_topic_progress(conn: &Connection, user_id: i64) -> Result<Vec<TopicProgress>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT user_id, topic, tasks_solved, correct_rate, last_solved
        FROM topic_progress
        WHERE user_id = ?1
        ORDER BY topic
        "#,
    )?;

    let rows = stmt.query_map(params![user_id], topic_progress_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub(crate) fn fetch_topic(
    conn: &Connection,
    user_id: i64,
    topic: &str,
) -> Result<Option<TopicProgress>> {
    let progress = conn
        .query_row(
            r#"
            SELECT user_id, topic, tasks_solved, correct_rate, last_solved
            FROM topic_progress
            WHERE user_id = ?1 AND topic = ?2
            "#,
            params![user_id, topic],
            topic_progress_from_row,
        )
        .optional()?;

    Ok(progress)
}

// Event history reads

pub(crate) fn fetch_events(conn: &Connection, user_id: i64) -> Result<Vec<AnswerEvent>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, user_id, task_id, topic, correct, difficulty, time_spent, timestamp
        FROM answer_events
        WHERE user_id = ?1
        ORDER BY timestamp ASC, id ASC
        "#,
    )?;

    let rows = stmt.query_map(params![user_id], |row| {
        Ok(AnswerEvent {
            id: row.get(0)?,
            user_id: row.get(1)?,
            task_id: row.get(2)?,
            topic: row.get(3)?,
            correct: row.get(4)?,
            difficulty: row.get(5)?,
            time_spent_secs: row.get(6)?,
            timestamp: timestamp_column(row, 7)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Attempt count and most recent attempt per task for one user.
pub(crate) fn fetch_attempts(
    conn: &Connection,
    user_id: i64,
) -> Result<HashMap<String, AttemptSummary>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT task_id, COUNT(*), MAX(timestamp)
        FROM answer_events
        WHERE user_id = ?1
        GROUP BY task_id
        "#,
    )?;

    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            AttemptSummary {
                attempts: row.get(1)?,
                last_attempt: timestamp_column(row, 2)?,
            },
        ))
    })?;
    Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
}

pub(crate) fn fetch_recent_results(conn: &Connection, user_id: i64, limit: usize) -> Result<Vec<bool>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT correct
        FROM answer_events
        WHERE user_id = ?1
        ORDER BY timestamp DESC, id DESC
        LIMIT ?2
        "#,
    )?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![user_id, limit], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<bool>>>()?)
}

pub(crate) fn fetch_leaderboard(conn: &Connection, limit: usize) -> Result<Vec<LeaderboardEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT user_id, username, correct_answers, total_tasks, current_level
        FROM users
        WHERE total_tasks > 0
        ORDER BY correct_answers DESC, total_tasks ASC, user_id ASC
        LIMIT ?1
        "#,
    )?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![limit], |row| {
        Ok(LeaderboardEntry {
            user_id: row.get(0)?,
            username: row.get(1)?,
            correct_answers: row.get(2)?,
            total_tasks: row.get(3)?,
            current_level: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
pub(crate) fn test_database() -> Database {
    let db = Database::open(":memory:").expect("Failed to create in-memory database");
    db.init().expect("Failed to initialize database");
    db.migrate().expect("Failed to migrate database");
    db
}
