//! Adaptive progress tracking for a task-based tutor: an append-only answer
//! log, aggregates kept in step with it, a gated level rule, cached
//! analytical views and an adaptive task selector.

pub mod aggregation;
pub mod answer;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod levels;
pub mod migrations;
pub mod models;
pub mod selection;
pub mod session;
pub mod views;

pub use catalog::{Catalog, Task};
pub use config::EngineConfig;
pub use db::Database;
pub use engine::{AnswerOutcome, AnswerRecord, Engine};
pub use error::{EngineError, Result};
pub use models::{JsonOutput, Level, UserStats};
pub use session::Session;
pub use views::{ViewName, ViewSnapshot};
