//! Multi-factor task scoring. Stateless: everything it needs is read from
//! the aggregates and the event log for each call.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::catalog::Task;
use crate::db::{fetch_attempts, fetch_level, fetch_topic_progress};
use crate::error::Result;
use crate::models::{AttemptSummary, Level};

pub const WEIGHT_LEVEL: f64 = 0.4;
pub const WEIGHT_TOPIC: f64 = 0.3;
pub const WEIGHT_NOVELTY: f64 = 0.2;
pub const WEIGHT_TIME: f64 = 0.1;

const FRESH_AFTER_DAYS: f64 = 30.0;

/// What the scorer knows about one user.
#[derive(Debug, Clone)]
pub struct UserState {
    pub level: Level,
    /// `1 - correct_rate` per attempted topic.
    pub weakness: HashMap<String, f64>,
    pub attempts: HashMap<String, AttemptSummary>,
}

impl UserState {
    pub fn fresh() -> Self {
        Self {
            level: Level::Novice,
            weakness: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    pub(crate) fn load(conn: &Connection, user_id: i64) -> Result<Self> {
        let level = fetch_level(conn, user_id)?;
        let weakness = fetch_topic_progress(conn, user_id)?
            .into_iter()
            .map(|p| {
                let w = p.weakness();
                (p.topic, w)
            })
            .collect();
        let attempts = fetch_attempts(conn, user_id)?;

        Ok(Self {
            level,
            weakness,
            attempts,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub level: f64,
    pub topic: f64,
    pub novelty: f64,
    pub time: f64,
    pub total: f64,
}

pub fn level_score(difficulty: u8, level: Level) -> f64 {
    let diff = (i32::from(difficulty) - level.as_i32()).abs();
    (1.0 - 0.3 * f64::from(diff)).max(0.0)
}

/// Unseen topics score 1.0; attempted ones land in [0.5, 1.0] by weakness.
pub fn topic_score(weakness: Option<f64>) -> f64 {
    match weakness {
        None => 1.0,
        Some(w) => 0.5 + 0.5 * w,
    }
}

pub fn novelty_score(attempts: i64) -> f64 {
    1.0 / (1.0 + 0.5 * attempts as f64)
}

pub fn recency_score(last_attempt: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_attempt {
        None => 1.0,
        Some(last) => {
            let days = now.signed_duration_since(last).num_days().max(0) as f64;
            (days / FRESH_AFTER_DAYS).min(1.0)
        }
    }
}

pub fn score_task(task: &Task, state: &UserState, now: DateTime<Utc>) -> Score {
    let attempt = state.attempts.get(&task.id);

    let level = level_score(task.difficulty, state.level);
    let topic = topic_score(state.weakness.get(&task.topic).copied());
    let novelty = novelty_score(attempt.map_or(0, |a| a.attempts));
    let time = recency_score(attempt.map(|a| a.last_attempt), now);

    Score {
        level,
        topic,
        novelty,
        time,
        total: WEIGHT_LEVEL * level
            + WEIGHT_TOPIC * topic
            + WEIGHT_NOVELTY * novelty
            + WEIGHT_TIME * time,
    }
}

/// Every task with its score, best first. Ties keep catalog order.
pub fn rank_tasks<'a>(
    tasks: &'a [Task],
    state: &UserState,
    now: DateTime<Utc>,
) -> Vec<(Score, &'a Task)> {
    let mut ranked: Vec<(Score, &Task)> = tasks
        .iter()
        .map(|task| (score_task(task, state, now), task))
        .collect();
    ranked.sort_by(|a, b| b.0.total.partial_cmp(&a.0.total).unwrap_or(Ordering::Equal));
    ranked
}

/// Picks uniformly among the `top_k` best-scoring tasks. `None` only for an
/// empty catalog.
pub fn select_task<'a, R: Rng + ?Sized>(
    tasks: &'a [Task],
    state: &UserState,
    now: DateTime<Utc>,
    top_k: usize,
    rng: &mut R,
) -> Option<&'a Task> {
    let mut ranked = rank_tasks(tasks, state, now);
    ranked.truncate(top_k.max(1));
    ranked.choose(rng).map(|(_, task)| *task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::task;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn scenario_catalog() -> Vec<Task> {
        vec![
            task("test_1", "Encoding", 1),
            task("test_2", "Logic", 3),
            task("test_3", "Algorithms", 4),
        ]
    }

    mod component_tests {
        use super::*;

        #[test]
        fn level_score_rewards_proximity() {
            assert_eq!(level_score(1, Level::Novice), 1.0);
            assert!((level_score(3, Level::Novice) - 0.4).abs() < 1e-12);
            assert!((level_score(4, Level::Novice) - 0.1).abs() < 1e-12);
            assert_eq!(level_score(5, Level::Novice), 0.0);
            assert!((level_score(2, Level::Intermediate) - 0.7).abs() < 1e-12);
        }

        #[test]
        fn topic_score_bounds() {
            assert_eq!(topic_score(None), 1.0);
            assert_eq!(topic_score(Some(0.0)), 0.5);
            assert_eq!(topic_score(Some(1.0)), 1.0);
            assert_eq!(topic_score(Some(0.5)), 0.75);
        }

        #[test]
        fn novelty_decreases_but_never_reaches_zero() {
            let mut prev = novelty_score(0);
            assert_eq!(prev, 1.0);
            for n in 1..100 {
                let s = novelty_score(n);
                assert!(s < prev);
                assert!(s > 0.0);
                prev = s;
            }
        }

        #[test]
        fn recency_score_saturates_at_thirty_days() {
            let now = Utc::now();
            assert_eq!(recency_score(None, now), 1.0);
            assert_eq!(recency_score(Some(now), now), 0.0);
            assert!((recency_score(Some(now - Duration::days(15)), now) - 0.5).abs() < 1e-12);
            assert_eq!(recency_score(Some(now - Duration::days(45)), now), 1.0);
        }

        #[test]
        fn composite_weights() {
            let state = UserState::fresh();
            let score = score_task(&task("a", "x", 1), &state, Utc::now());
            assert!((score.total - 1.0).abs() < 1e-12);
        }
    }

    mod ranking_tests {
        use super::*;

        #[test]
        fn fresh_user_prefers_easiest_task() {
            let catalog = scenario_catalog();
            let ranked = rank_tasks(&catalog, &UserState::fresh(), Utc::now());
            assert_eq!(ranked[0].1.id, "test_1");
            assert_eq!(ranked[0].1.difficulty, 1);
            assert!(ranked[0].0.total > ranked[1].0.total);
        }

        #[test]
        fn repeated_task_drops_in_rank() {
            let catalog = vec![task("a", "x", 1), task("b", "x", 1)];
            let now = Utc::now();
            let mut state = UserState::fresh();
            state.attempts.insert(
                "a".to_string(),
                AttemptSummary {
                    attempts: 2,
                    last_attempt: now,
                },
            );

            let ranked = rank_tasks(&catalog, &state, now);
            assert_eq!(ranked[0].1.id, "b");
        }

        #[test]
        fn weak_topic_beats_mastered_topic() {
            let catalog = vec![task("mastered", "graphs", 2), task("weak", "logic", 2)];
            let mut state = UserState::fresh();
            state.weakness.insert("graphs".to_string(), 0.0);
            state.weakness.insert("logic".to_string(), 0.8);

            let ranked = rank_tasks(&catalog, &state, Utc::now());
            assert_eq!(ranked[0].1.id, "weak");
        }

        #[test]
        fn ties_keep_catalog_order() {
            let catalog = vec![task("a", "x", 1), task("b", "y", 1), task("c", "z", 1)];
            let ranked = rank_tasks(&catalog, &UserState::fresh(), Utc::now());
            let ids: Vec<&str> = ranked.iter().map(|(_, t)| t.id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    mod select_tests {
        use super::*;

        #[test]
        fn empty_catalog_returns_none() {
            let mut rng = StdRng::seed_from_u64(1);
            assert!(select_task(&[], &UserState::fresh(), Utc::now(), 3, &mut rng).is_none());
        }

        #[test]
        fn small_catalog_returns_a_member() {
            let catalog = vec![task("only", "x", 5)];
            let mut rng = StdRng::seed_from_u64(1);
            let chosen = select_task(&catalog, &UserState::fresh(), Utc::now(), 3, &mut rng).unwrap();
            assert_eq!(chosen.id, "only");
        }

        #[test]
        fn draws_stay_within_top_three() {
            let catalog: Vec<Task> = (1..=5)
                .flat_map(|d| {
                    vec![
                        task(&format!("d{d}-a"), &format!("topic-{d}"), d),
                        task(&format!("d{d}-b"), &format!("topic-{d}"), d),
                    ]
                })
                .collect();
            let mut state = UserState::fresh();
            state.level = Level::Intermediate;
            let now = Utc::now();

            let top: HashSet<String> = rank_tasks(&catalog, &state, now)
                .into_iter()
                .take(3)
                .map(|(_, t)| t.id.clone())
                .collect();

            let mut rng = StdRng::seed_from_u64(99);
            let mut seen = HashSet::new();
            for _ in 0..200 {
                let chosen = select_task(&catalog, &state, now, 3, &mut rng).unwrap();
                assert!(top.contains(&chosen.id), "{} outside top three", chosen.id);
                seen.insert(chosen.id.clone());
            }
            assert!(seen.len() > 1);
        }
    }
}
