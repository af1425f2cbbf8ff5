use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info};

use crate::db::{format_timestamp, parse_timestamp};
use crate::error::{EngineError, Result};
use crate::models::MigrationRecord;

const LEDGER_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        checksum TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
"#;

/// A forward-only schema change. Statements run in order inside one transaction.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: &'static str,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "1.1.0",
        description: "Track last activity per user",
        statements: &[
            "ALTER TABLE users ADD COLUMN last_activity TEXT",
            "CREATE INDEX IF NOT EXISTS idx_users_last_activity ON users(last_activity DESC)",
        ],
    },
    Migration {
        version: "1.2.0",
        description: "Record time spent per answer",
        statements: &[
            "ALTER TABLE answer_events ADD COLUMN time_spent INTEGER DEFAULT NULL",
            "CREATE INDEX IF NOT EXISTS idx_events_time_spent ON answer_events(time_spent) WHERE time_spent IS NOT NULL",
        ],
    },
    Migration {
        version: "1.3.0",
        description: "Indexes for selection scoring and analytics scans",
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_events_user_correct_time ON answer_events(user_id, correct, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_events_user_task_time ON answer_events(user_id, task_id, timestamp DESC)",
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp_topic ON answer_events(timestamp, topic)",
        ],
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const ZERO: SchemaVersion = SchemaVersion {
        major: 0,
        minor: 0,
        patch: 0,
    };
}

impl FromStr for SchemaVersion {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || EngineError::InvalidVersion(s.to_string());
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };

        let version = SchemaVersion {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Hex SHA-256 of the statement batch joined by newlines.
pub fn checksum(statements: &[&str]) -> String {
    hex::encode(Sha256::digest(statements.join("\n").as_bytes()))
}

fn ledger_exists(conn: &Connection) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Highest applied version, or 0.0.0 when the ledger is absent or empty.
pub fn current_version(conn: &Connection) -> Result<SchemaVersion> {
    if !ledger_exists(conn)? {
        return Ok(SchemaVersion::ZERO);
    }

    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut current = SchemaVersion::ZERO;
    for raw in versions {
        current = current.max(raw.parse()?);
    }
    Ok(current)
}

fn ensure_not_applied(conn: &Connection, version: &str) -> Result<()> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT version FROM schema_migrations WHERE version = ?1",
            params![version],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(_) => Err(EngineError::MigrationConflict {
            version: version.to_string(),
        }),
        None => Ok(()),
    }
}

/// Runs one migration atomically. Returns `false` if the version is already
/// in the ledger; any failing statement rolls the whole batch back.
pub fn apply_migration(conn: &mut Connection, migration: &Migration) -> Result<bool> {
    conn.execute_batch(LEDGER_SCHEMA)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    match ensure_not_applied(&tx, migration.version) {
        Ok(()) => {}
        Err(EngineError::MigrationConflict { version }) => {
            info!(%version, "migration already applied, skipping");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    for sql in migration.statements {
        tx.execute_batch(sql).map_err(|source| {
            error!(version = migration.version, %source, "migration statement failed");
            EngineError::Migration {
                version: migration.version.to_string(),
                source,
            }
        })?;
    }

    tx.execute(
        "INSERT INTO schema_migrations (version, description, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            migration.version,
            migration.description,
            checksum(migration.statements),
            format_timestamp(Utc::now())
        ],
    )?;
    tx.commit()?;

    info!(version = migration.version, "migration applied");
    Ok(true)
}

/// Applies, in ascending version order, every migration newer than the
/// current version. Stops at the first failure.
pub fn run_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<String>> {
    let current = current_version(conn)?;
    info!(%current, "current schema version");

    let mut pending = migrations
        .iter()
        .map(|m| Ok((m.version.parse::<SchemaVersion>()?, m)))
        .collect::<Result<Vec<_>>>()?;
    pending.retain(|(version, _)| *version > current);
    pending.sort_by_key(|(version, _)| *version);

    let mut applied = Vec::new();
    for (version, migration) in pending {
        info!(%version, description = migration.description, "applying migration");
        if apply_migration(conn, migration)? {
            applied.push(version.to_string());
        }
    }

    Ok(applied)
}

pub fn applied_migrations(conn: &Connection) -> Result<Vec<MigrationRecord>> {
    if !ledger_exists(conn)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT version, description, checksum, applied_at FROM schema_migrations",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut records = rows
        .into_iter()
        .map(|(version, description, checksum, applied_at)| {
            Ok(MigrationRecord {
                version,
                description,
                checksum,
                applied_at: parse_timestamp(&applied_at)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    records.sort_by_key(|r| r.version.parse::<SchemaVersion>().unwrap_or(SchemaVersion::ZERO));

    Ok(records)
}
