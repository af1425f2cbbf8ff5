use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use crate::db::{fetch_user, format_timestamp};
use crate::error::Result;
use crate::models::Level;

/// Every fifth task triggers a recomputation.
pub const RECOMPUTE_EVERY: i64 = 5;

/// Quiet period that makes the next answer count as the end of an idle gap.
pub fn idle_gap() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub previous: Level,
    pub current: Level,
    pub recomputed: bool,
}

impl LevelChange {
    pub fn leveled_up(&self) -> bool {
        self.current > self.previous
    }
}

pub fn should_recompute(total_tasks: i64, ends_idle_gap: bool) -> bool {
    (total_tasks > 0 && total_tasks % RECOMPUTE_EVERY == 0) || ends_idle_gap
}

/// True when the user has no events in the hour before `now`. Must run
/// before the new event is inserted.
pub(crate) fn ends_idle_gap(conn: &Connection, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let recent: i64 = conn.query_row(
        r#"
        SELECT COUNT(*)
        FROM answer_events
        WHERE user_id = ?1 AND timestamp > ?2 AND timestamp <= ?3
        "#,
        params![
            user_id,
            format_timestamp(now - idle_gap()),
            format_timestamp(now)
        ],
        |row| row.get(0),
    )?;
    Ok(recent == 0)
}

/// Reclassifies the user's tier from the overall correct ratio when the
/// gating rule allows it. Leaves the stored tier alone otherwise.
pub(crate) fn apply_level_rule(
    conn: &Connection,
    user_id: i64,
    ends_idle_gap: bool,
) -> Result<LevelChange> {
    let Some(user) = fetch_user(conn, user_id)? else {
        return Ok(LevelChange {
            previous: Level::Novice,
            current: Level::Novice,
            recomputed: false,
        });
    };

    let previous = user.current_level;
    if !should_recompute(user.total_tasks, ends_idle_gap) {
        return Ok(LevelChange {
            previous,
            current: previous,
            recomputed: false,
        });
    }

    let current = Level::from_ratio(user.correct_rate());
    if current != previous {
        conn.execute(
            "UPDATE users SET current_level = ?1 WHERE user_id = ?2",
            params![current.as_i32(), user_id],
        )?;
    }
    debug!(
        user_id,
        previous = previous.as_i32(),
        current = current.as_i32(),
        "level recomputed"
    );

    Ok(LevelChange {
        previous,
        current,
        recomputed: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_user, test_database};

    fn set_totals(conn: &Connection, user_id: i64, total: i64, correct: i64) {
        conn.execute(
            "UPDATE users SET total_tasks = ?1, correct_answers = ?2 WHERE user_id = ?3",
            params![total, correct, user_id],
        )
        .unwrap();
    }

    fn insert_event_at(conn: &Connection, user_id: i64, at: DateTime<Utc>) {
        conn.execute(
            "INSERT INTO answer_events (user_id, task_id, topic, correct, difficulty, timestamp)
             VALUES (?1, 't', 'logic', 1, 1, ?2)",
            params![user_id, format_timestamp(at)],
        )
        .unwrap();
    }

    mod gating_tests {
        use super::*;

        #[test]
        fn every_fifth_task() {
            assert!(should_recompute(5, false));
            assert!(should_recompute(10, false));
            assert!(!should_recompute(4, false));
            assert!(!should_recompute(6, false));
        }

        #[test]
        fn idle_gap_forces_recompute() {
            assert!(should_recompute(3, true));
        }

        #[test]
        fn zero_tasks_never_recompute_on_count() {
            assert!(!should_recompute(0, false));
        }

        #[test]
        fn idle_gap_detection() {
            let db = test_database();
            let conn = db.lock();
            let now = Utc::now();
            ensure_user(&conn, 1, now).unwrap();

            assert!(ends_idle_gap(&conn, 1, now).unwrap());

            insert_event_at(&conn, 1, now - Duration::minutes(90));
            assert!(ends_idle_gap(&conn, 1, now).unwrap());

            insert_event_at(&conn, 1, now - Duration::minutes(10));
            assert!(!ends_idle_gap(&conn, 1, now).unwrap());
        }
    }

    mod rule_tests {
        use super::*;

        #[test]
        fn recomputes_on_fifth_task() {
            let db = test_database();
            let conn = db.lock();
            ensure_user(&conn, 1, Utc::now()).unwrap();
            set_totals(&conn, 1, 5, 5);

            let change = apply_level_rule(&conn, 1, false).unwrap();
            assert!(change.recomputed);
            assert_eq!(change.current, Level::Expert);
            assert!(change.leveled_up());
            assert_eq!(fetch_user(&conn, 1).unwrap().unwrap().current_level, Level::Expert);
        }

        #[test]
        fn skips_between_checkpoints() {
            let db = test_database();
            let conn = db.lock();
            ensure_user(&conn, 1, Utc::now()).unwrap();
            set_totals(&conn, 1, 4, 4);

            let change = apply_level_rule(&conn, 1, false).unwrap();
            assert!(!change.recomputed);
            assert_eq!(change.current, Level::Novice);
            assert_eq!(fetch_user(&conn, 1).unwrap().unwrap().current_level, Level::Novice);
        }

        #[test]
        fn level_can_fall() {
            let db = test_database();
            let conn = db.lock();
            ensure_user(&conn, 1, Utc::now()).unwrap();
            set_totals(&conn, 1, 5, 5);
            apply_level_rule(&conn, 1, false).unwrap();

            set_totals(&conn, 1, 10, 5);
            let change = apply_level_rule(&conn, 1, false).unwrap();
            assert_eq!(change.previous, Level::Expert);
            assert_eq!(change.current, Level::Beginner);
            assert!(!change.leveled_up());
        }

        #[test]
        fn idle_gap_recomputes_off_checkpoint() {
            let db = test_database();
            let conn = db.lock();
            ensure_user(&conn, 1, Utc::now()).unwrap();
            set_totals(&conn, 1, 3, 2);

            let change = apply_level_rule(&conn, 1, true).unwrap();
            assert!(change.recomputed);
            assert_eq!(change.current, Level::Intermediate);
        }
    }
}
