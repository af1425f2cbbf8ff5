use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::answer::check_answer;
use crate::catalog::{Catalog, Task};
use crate::config::EngineConfig;
use crate::db::{self, Database};
use crate::error::{EngineError, Result};
use crate::events::{self, NewEvent};
use crate::levels::LevelChange;
use crate::models::{AnswerEvent, LeaderboardEntry, TopicBreakdown, UserStats};
use crate::selection::{select_task, UserState};
use crate::session::Session;
use crate::views::{ViewCache, ViewSnapshot};

#[derive(Debug, Clone)]
pub struct AnswerRecord {
    pub event: AnswerEvent,
    pub level: LevelChange,
    pub stats: UserStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerOutcome {
    pub task_id: String,
    pub correct: bool,
    pub expected: Value,
    pub previous_level: i32,
    pub stats: UserStats,
}

impl AnswerOutcome {
    pub fn leveled_up(&self) -> bool {
        self.stats.current_level > self.previous_level
    }
}

/// Entry point for the calling layer. Safe to share across threads.
pub struct Engine {
    db: Database,
    catalog: Catalog,
    views: ViewCache,
    config: EngineConfig,
}

impl Engine {
    /// Opens the store, brings the schema up to date and loads the catalog.
    /// A migration failure aborts startup.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        let catalog = Catalog::load_or_empty(&config.catalog_path)?;
        Self::with_catalog(db, catalog, config)
    }

    pub fn with_catalog(db: Database, catalog: Catalog, config: EngineConfig) -> Result<Self> {
        db.init()?;
        db.migrate()?;
        let views = ViewCache::new(db.clone(), config.staleness_window);

        Ok(Self {
            db,
            catalog,
            views,
            config,
        })
    }

    pub fn run_migrations(&self) -> Result<Vec<String>> {
        self.db.migrate()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn register_user(&self, user_id: i64, username: Option<&str>) -> Result<()> {
        let conn = self.db.lock();
        db::ensure_user(&conn, user_id, Utc::now())?;
        if let Some(name) = username {
            db::set_username(&conn, user_id, name)?;
        }
        Ok(())
    }

    pub fn record_answer(
        &self,
        user_id: i64,
        task_id: &str,
        correct: bool,
        time_spent: Option<Duration>,
    ) -> Result<UserStats> {
        self.record_answer_at(user_id, task_id, correct, time_spent, Utc::now())
            .map(|record| record.stats)
    }

    pub fn record_answer_at(
        &self,
        user_id: i64,
        task_id: &str,
        correct: bool,
        time_spent: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<AnswerRecord> {
        let task = self.catalog.get(task_id).ok_or_else(|| {
            warn!(user_id, task_id, "answer for unknown task rejected");
            EngineError::NotFound {
                task_id: task_id.to_string(),
            }
        })?;

        let event = NewEvent {
            user_id,
            task_id: task.id.clone(),
            topic: task.topic.clone(),
            correct,
            difficulty: task.difficulty,
            time_spent,
        };

        let mut conn = self.db.lock();
        let outcome = events::record(&mut conn, &event, now)?;
        let user = db::fetch_user(&conn, user_id)?
            .ok_or(EngineError::Transaction(rusqlite::Error::QueryReturnedNoRows))?;

        Ok(AnswerRecord {
            event: outcome.event,
            level: outcome.level,
            stats: user.stats(),
        })
    }

    /// Stats for the user, creating the user on first contact.
    pub fn get_user_stats(&self, user_id: i64) -> Result<UserStats> {
        let conn = self.db.lock();
        db::ensure_user(&conn, user_id, Utc::now())?;
        let user = db::fetch_user(&conn, user_id)?
            .ok_or(EngineError::Transaction(rusqlite::Error::QueryReturnedNoRows))?;
        Ok(user.stats())
    }

    pub fn topic_breakdown(&self, user_id: i64) -> Result<BTreeMap<String, TopicBreakdown>> {
        let progress = db::fetch_topic_progress(&self.db.lock(), user_id)?;
        Ok(progress
            .into_iter()
            .map(|p| {
                let breakdown = TopicBreakdown {
                    correct_rate: p.correct_rate,
                    tasks_solved: p.tasks_solved,
                    weakness_score: p.weakness(),
                };
                (p.topic, breakdown)
            })
            .collect())
    }

    pub fn select_next_task(&self, user_id: i64) -> Result<Option<Task>> {
        self.select_next_task_with(user_id, Utc::now(), &mut rand::thread_rng())
    }

    pub fn select_next_task_with<R: Rng + ?Sized>(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<Task>> {
        if self.catalog.is_empty() {
            return Ok(None);
        }
        let state = UserState::load(&self.db.lock(), user_id)?;
        Ok(select_task(self.catalog.tasks(), &state, now, self.config.top_k, rng).cloned())
    }

    /// Selects a task and makes it the session's active task.
    pub fn next_task_for(&self, session: &mut Session) -> Result<Option<Task>> {
        let task = self.select_next_task(session.user_id)?;
        if let Some(task) = &task {
            session.present(task.clone());
        }
        Ok(task)
    }

    /// Checks `given` against the session's active task and records the
    /// outcome. The task stays active if recording fails.
    pub fn submit_answer(&self, session: &mut Session, given: &Value) -> Result<AnswerOutcome> {
        self.submit_answer_at(session, given, None, Utc::now())
    }

    pub fn submit_answer_at(
        &self,
        session: &mut Session,
        given: &Value,
        time_spent: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<AnswerOutcome> {
        let task = session.current_task().cloned().ok_or(EngineError::NoActiveTask)?;
        let correct = check_answer(given, &task.correct_answer);

        let record = self.record_answer_at(session.user_id, &task.id, correct, time_spent, now)?;
        session.take_task();

        Ok(AnswerOutcome {
            task_id: task.id,
            correct,
            expected: task.correct_answer,
            previous_level: record.level.previous.as_i32(),
            stats: record.stats,
        })
    }

    pub fn get_view(&self, name: &str) -> Result<ViewSnapshot> {
        self.views.get(name)
    }

    pub fn refresh_views(&self) -> Result<()> {
        self.views.refresh_now(Utc::now())
    }

    pub fn recent_results(&self, user_id: i64, limit: usize) -> Result<Vec<bool>> {
        db::fetch_recent_results(&self.db.lock(), user_id, limit)
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        db::fetch_leaderboard(&self.db.lock(), limit)
    }
}
