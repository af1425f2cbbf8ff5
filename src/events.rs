//! The append-only answer log and the single unit of work that keeps the
//! derived aggregates in lockstep with it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, TransactionBehavior};
use std::time::Duration;
use tracing::info;

use crate::aggregation::{increment_user_totals, upsert_topic_progress};
use crate::db::{ensure_user, format_timestamp};
use crate::error::Result;
use crate::levels::{apply_level_rule, ends_idle_gap, LevelChange};
use crate::models::{AnswerEvent, TopicProgress};

/// An answer to append. Topic and difficulty come from a catalog lookup the
/// caller has already performed.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub user_id: i64,
    pub task_id: String,
    pub topic: String,
    pub correct: bool,
    pub difficulty: u8,
    pub time_spent: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub event: AnswerEvent,
    pub topic: TopicProgress,
    pub level: LevelChange,
}

/// Appends the event and updates every derived aggregate inside `conn`'s
/// current transaction. Callers own begin/commit; see [`record`].
pub fn append_event(conn: &Connection, event: &NewEvent, now: DateTime<Utc>) -> Result<AppendOutcome> {
    ensure_user(conn, event.user_id, now)?;

    let idle = ends_idle_gap(conn, event.user_id, now)?;
    let time_spent_secs = event
        .time_spent
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    let difficulty = event.difficulty.clamp(1, 5);

    conn.execute(
        r#"
        INSERT INTO answer_events (user_id, task_id, topic, correct, difficulty, time_spent, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            event.user_id,
            event.task_id,
            event.topic,
            event.correct,
            difficulty,
            time_spent_secs,
            format_timestamp(now)
        ],
    )?;
    let id = conn.last_insert_rowid();

    increment_user_totals(conn, event.user_id, event.correct, now)?;
    let topic = upsert_topic_progress(conn, event.user_id, &event.topic, event.correct, now)?;
    let level = apply_level_rule(conn, event.user_id, idle)?;

    Ok(AppendOutcome {
        event: AnswerEvent {
            id,
            user_id: event.user_id,
            task_id: event.task_id.clone(),
            topic: event.topic.clone(),
            correct: event.correct,
            difficulty,
            time_spent_secs,
            timestamp: now,
        },
        topic,
        level,
    })
}

/// Runs [`append_event`] as one immediate transaction: all effects commit
/// together or none do.
pub fn record(conn: &mut Connection, event: &NewEvent, now: DateTime<Utc>) -> Result<AppendOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = append_event(&tx, event, now)?;
    tx.commit()?;

    info!(
        user_id = event.user_id,
        task_id = %event.task_id,
        correct = event.correct,
        level = outcome.level.current.as_i32(),
        "answer recorded"
    );
    Ok(outcome)
}
