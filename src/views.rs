//! Precomputed analytical snapshots with a staleness window. Snapshots are a
//! cache over `answer_events` and `users`; dropping them loses nothing.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{format_timestamp, parse_timestamp, Database};
use crate::error::{EngineError, Result};

const DAILY_WINDOW_DAYS: i64 = 30;
const LEADERBOARD_WINDOW_DAYS: i64 = 7;
const LEADERBOARD_SIZE: i64 = 50;
const TOPIC_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewName {
    UserStatsDaily,
    TopUsersWeekly,
    GlobalTopicStats,
}

impl ViewName {
    pub const ALL: [ViewName; 3] = [
        ViewName::UserStatsDaily,
        ViewName::TopUsersWeekly,
        ViewName::GlobalTopicStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewName::UserStatsDaily => "user_stats_daily",
            ViewName::TopUsersWeekly => "top_users_weekly",
            ViewName::GlobalTopicStats => "global_topic_stats",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user_stats_daily" | "daily" => Some(ViewName::UserStatsDaily),
            "top_users_weekly" | "weekly" | "leaderboard" => Some(ViewName::TopUsersWeekly),
            "global_topic_stats" | "topics" => Some(ViewName::GlobalTopicStats),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub name: String,
    pub payload: Value,
    pub last_refresh: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStat {
    pub user_id: i64,
    pub day: String,
    pub tasks_per_day: i64,
    pub correct_per_day: i64,
    pub daily_accuracy: f64,
    pub avg_time_spent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyLeader {
    pub user_id: i64,
    pub username: Option<String>,
    pub total_tasks: i64,
    pub correct_answers: i64,
    pub current_level: i32,
    pub active_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStat {
    pub topic: String,
    pub total_attempts: i64,
    pub correct_attempts: i64,
    pub global_success_rate: f64,
    pub avg_difficulty: f64,
}

fn daily_stats(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<DailyStat>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT user_id,
               substr(timestamp, 1, 10) AS day,
               COUNT(*),
               SUM(correct),
               AVG(correct * 1.0),
               AVG(time_spent)
        FROM answer_events
        WHERE timestamp >= ?1
        GROUP BY user_id, day
        ORDER BY day DESC, user_id ASC
        "#,
    )?;

    let cutoff = format_timestamp(now - Duration::days(DAILY_WINDOW_DAYS));
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(DailyStat {
            user_id: row.get(0)?,
            day: row.get(1)?,
            tasks_per_day: row.get(2)?,
            correct_per_day: row.get(3)?,
            daily_accuracy: row.get(4)?,
            avg_time_spent: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn weekly_leaders(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<WeeklyLeader>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT u.user_id,
               u.username,
               u.total_tasks,
               u.correct_answers,
               u.current_level,
               COUNT(DISTINCT substr(e.timestamp, 1, 10))
        FROM users u
        JOIN answer_events e ON e.user_id = u.user_id
        WHERE e.timestamp >= ?1
        GROUP BY u.user_id
        ORDER BY u.total_tasks DESC, u.user_id ASC
        LIMIT ?2
        "#,
    )?;

    let cutoff = format_timestamp(now - Duration::days(LEADERBOARD_WINDOW_DAYS));
    let rows = stmt.query_map(params![cutoff, LEADERBOARD_SIZE], |row| {
        Ok(WeeklyLeader {
            user_id: row.get(0)?,
            username: row.get(1)?,
            total_tasks: row.get(2)?,
            correct_answers: row.get(3)?,
            current_level: row.get(4)?,
            active_days: row.get(5)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn topic_stats(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TopicStat>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT topic,
               COUNT(*),
               SUM(correct),
               AVG(correct * 1.0),
               AVG(difficulty * 1.0)
        FROM answer_events
        WHERE timestamp >= ?1
        GROUP BY topic
        ORDER BY topic ASC
        "#,
    )?;

    let cutoff = format_timestamp(now - Duration::days(TOPIC_WINDOW_DAYS));
    let rows = stmt.query_map(params![cutoff], |row| {
        Ok(TopicStat {
            topic: row.get(0)?,
            total_attempts: row.get(1)?,
            correct_attempts: row.get(2)?,
            global_success_rate: row.get(3)?,
            avg_difficulty: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Recomputes all views from source and replaces every snapshot row in one
/// transaction.
pub fn refresh_all(conn: &mut Connection, now: DateTime<Utc>) -> Result<()> {
    // Aggregate under a read snapshot; the write lock is only taken to store.
    let read = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
    let payloads = [
        (ViewName::UserStatsDaily, serde_json::to_string(&daily_stats(&read, now)?)?),
        (ViewName::TopUsersWeekly, serde_json::to_string(&weekly_leaders(&read, now)?)?),
        (ViewName::GlobalTopicStats, serde_json::to_string(&topic_stats(&read, now)?)?),
    ];
    read.commit()?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let stamp = format_timestamp(now);
    for (name, payload) in &payloads {
        tx.execute(
            "INSERT OR REPLACE INTO view_snapshots (view_name, payload, last_refresh) VALUES (?1, ?2, ?3)",
            params![name.as_str(), payload, stamp],
        )?;
    }
    tx.commit()?;

    info!(views = payloads.len(), "materialized views refreshed");
    Ok(())
}

pub fn read_snapshot(conn: &Connection, name: ViewName) -> Result<Option<ViewSnapshot>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT payload, last_refresh FROM view_snapshots WHERE view_name = ?1",
            params![name.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((payload, last_refresh)) => Ok(Some(ViewSnapshot {
            name: name.as_str().to_string(),
            payload: serde_json::from_str(&payload)?,
            last_refresh: parse_timestamp(&last_refresh)?,
        })),
        None => Ok(None),
    }
}

// Clears the in-flight flag when the refresh worker exits, panics included.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ViewCache {
    db: Database,
    staleness_window: Duration,
    refreshing: Arc<AtomicBool>,
}

impl ViewCache {
    pub fn new(db: Database, staleness_window: Duration) -> Self {
        Self {
            db,
            staleness_window,
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get(&self, name: &str) -> Result<ViewSnapshot> {
        self.get_at(name, Utc::now()).map(|(snapshot, _)| snapshot)
    }

    /// Returns the snapshot and, when it was stale, the handle of the
    /// background refresh it started. A miss refreshes synchronously once.
    pub fn get_at(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<(ViewSnapshot, Option<JoinHandle<()>>)> {
        let view = ViewName::from_str(name).ok_or_else(|| EngineError::UnknownView(name.to_string()))?;

        for attempt in 0..2 {
            let snapshot = read_snapshot(&self.db.lock(), view)?;

            if let Some(snapshot) = snapshot {
                let refresh = if now - snapshot.last_refresh > self.staleness_window {
                    debug!(view = view.as_str(), "snapshot stale");
                    self.schedule_refresh()
                } else {
                    None
                };
                return Ok((snapshot, refresh));
            }

            if attempt == 0 {
                info!(view = view.as_str(), "snapshot missing, refreshing");
                if let Err(err) = self.refresh_now(now) {
                    warn!(view = view.as_str(), error = %err, "synchronous view refresh failed");
                }
            }
        }

        Err(EngineError::ViewUnavailable {
            name: view.as_str().to_string(),
        })
    }

    pub fn refresh_now(&self, now: DateTime<Utc>) -> Result<()> {
        refresh_all(&mut self.db.lock(), now)
    }

    /// Starts a refresh on a worker thread unless one is already running.
    pub fn schedule_refresh(&self) -> Option<JoinHandle<()>> {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("view refresh already in flight");
            return None;
        }

        let db = self.db.clone();
        let guard = InFlight(Arc::clone(&self.refreshing));
        let spawned = std::thread::Builder::new()
            .name("view-refresh".to_string())
            .spawn(move || {
                let _guard = guard;
                let result = db.reopen().and_then(|worker| {
                    let mut conn = worker.lock();
                    refresh_all(&mut conn, Utc::now())
                });
                if let Err(err) = result {
                    warn!(error = %err, "background view refresh failed");
                }
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "could not spawn view refresh worker");
                None
            }
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }
}
