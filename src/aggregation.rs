//! Derived per-user and per-topic aggregates, updated inside the same
//! transaction that appends the originating event.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::{fetch_topic, format_timestamp};
use crate::error::Result;
use crate::models::TopicProgress;

/// Incremental mean: folds one more outcome into a rate computed over `n` outcomes.
pub fn rolling_mean(rate: f64, n: i64, correct: bool) -> (f64, i64) {
    let c = if correct { 1.0 } else { 0.0 };
    let n_next = n + 1;
    ((rate * n as f64 + c) / n_next as f64, n_next)
}

/// Mean of the outcomes recomputed from scratch.
pub fn batch_mean(outcomes: &[bool]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    outcomes.iter().filter(|c| **c).count() as f64 / outcomes.len() as f64
}

pub(crate) fn increment_user_totals(
    conn: &Connection,
    user_id: i64,
    correct: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        UPDATE users
        SET total_tasks = total_tasks + 1,
            correct_answers = correct_answers + ?1,
            last_activity = ?2
        WHERE user_id = ?3
        "#,
        params![i64::from(correct), format_timestamp(now), user_id],
    )?;
    Ok(())
}

pub(crate) fn upsert_topic_progress(
    conn: &Connection,
    user_id: i64,
    topic: &str,
    correct: bool,
    now: DateTime<Utc>,
) -> Result<TopicProgress> {
    let (correct_rate, tasks_solved) = match fetch_topic(conn, user_id, topic)? {
        Some(prev) => rolling_mean(prev.correct_rate, prev.tasks_solved, correct),
        None => rolling_mean(0.0, 0, correct),
    };

    conn.execute(
        r#"
        INSERT INTO topic_progress (user_id, topic, tasks_solved, correct_rate, last_solved)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id, topic) DO UPDATE SET
            tasks_solved = excluded.tasks_solved,
            correct_rate = excluded.correct_rate,
            last_solved = excluded.last_solved
        "#,
        params![user_id, topic, tasks_solved, correct_rate, format_timestamp(now)],
    )?;

    Ok(TopicProgress {
        user_id,
        topic: topic.to_string(),
        tasks_solved,
        correct_rate,
        last_solved: Some(now),
    })
}
