use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use adaptive_tutor::models::LeaderboardEntry;
use adaptive_tutor::{Engine, EngineConfig, JsonOutput, Session};

#[derive(Parser)]
#[command(name = "tutor")]
#[command(about = "Adaptive progress tracking and task selection for a task-based tutor")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Database path (overrides TUTOR_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Task catalog path (overrides TUTOR_CATALOG)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,

    /// Record a raw answer outcome
    Answer {
        /// User ID
        user_id: i64,

        /// Task ID
        task_id: String,

        /// Mark the answer as correct (default: wrong)
        #[arg(long, short)]
        correct: bool,

        /// Seconds spent on the task
        #[arg(long, short)]
        time_spent: Option<u64>,
    },

    /// Check a given answer against a task and record the outcome
    Check {
        /// User ID
        user_id: i64,

        /// Task ID
        task_id: String,

        /// The user's answer
        answer: String,
    },

    /// Pick the next task for a user
    Next {
        /// User ID
        user_id: i64,
    },

    /// Show a user's statistics
    Stats {
        /// User ID
        user_id: i64,
    },

    /// Show per-topic progress for a user
    Topics {
        /// User ID
        user_id: i64,
    },

    /// Show a user's most recent outcomes
    Recent {
        /// User ID
        user_id: i64,

        /// Number of outcomes to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Show users ranked by correct answers
    Leaderboard {
        /// Number of users to show
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },

    /// Show a materialized view (user_stats_daily, top_users_weekly, global_topic_stats)
    View {
        /// View name
        name: String,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            if let Ok(out) = serde_json::to_string(&JsonOutput::<()>::err(e.to_string())) {
                println!("{}", out);
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn build_config(db: Option<PathBuf>, catalog: Option<PathBuf>) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(path) = db {
        config.db_path = path;
    }
    if let Some(path) = catalog {
        config.catalog_path = path;
    }
    config
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(cli.db, cli.catalog);
    let engine = Engine::open(config.clone())?;

    match cli.command {
        Commands::Migrate => {
            let applied = engine.run_migrations()?;
            let version = engine.database().current_version()?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "applied": applied,
                        "version": version
                    })))?
                );
            } else {
                println!("Database: {}", config.db_path.display());
                println!("Schema version: {}", version);
            }
        }

        Commands::Answer {
            user_id,
            task_id,
            correct,
            time_spent,
        } => {
            let stats = engine.record_answer(
                user_id,
                &task_id,
                correct,
                time_spent.map(Duration::from_secs),
            )?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!(
                    "Recorded {} answer for user {} on task {}.",
                    if correct { "correct" } else { "wrong" },
                    user_id,
                    task_id
                );
                println!("Level: {} ({})", stats.current_level, stats.level_name);
            }
        }

        Commands::Check {
            user_id,
            task_id,
            answer,
        } => {
            let task = engine
                .catalog()
                .get(&task_id)
                .cloned()
                .ok_or_else(|| format!("Task '{}' not found", task_id))?;

            let mut session = Session::new(user_id);
            session.present(task);
            let outcome = engine.submit_answer(&mut session, &Value::String(answer))?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&outcome))?);
            } else {
                if outcome.correct {
                    println!("Correct!");
                } else {
                    println!("Wrong. Expected: {}", display_answer(&outcome.expected));
                }
                if outcome.leveled_up() {
                    println!(
                        "Level up: {} -> {} ({})",
                        outcome.previous_level,
                        outcome.stats.current_level,
                        outcome.stats.level_name
                    );
                }
            }
        }

        Commands::Next { user_id } => {
            if let Some(task) = engine.select_next_task(user_id)? {
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&task))?);
                } else {
                    println!("=== Next Task ===");
                    println!();
                    println!("Task: {} (topic: {})", task.id, task.topic);
                    println!("Difficulty: {}/5", task.difficulty);
                    println!();
                    println!("{}", task.text);
                    println!();
                    println!("Answer with:");
                    println!("  tutor check {} {} <answer>", user_id, task.id);
                }
            } else if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("No tasks available. Check the task catalog.");
            }
        }

        Commands::Stats { user_id } => {
            let stats = engine.get_user_stats(user_id)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Statistics for user {} ===", user_id);
                println!("Tasks solved: {}", stats.total_tasks);
                println!("Correct answers: {}", stats.correct_answers);
                println!("Accuracy: {:.1}%", stats.correct_rate * 100.0);
                println!("Level: {} ({})", stats.current_level, stats.level_name);
            }
        }

        Commands::Topics { user_id } => {
            let breakdown = engine.topic_breakdown(user_id)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&breakdown))?);
            } else if breakdown.is_empty() {
                println!("No topics attempted yet.");
            } else {
                println!("{:<32} {:>8} {:>9} {:>9}", "TOPIC", "SOLVED", "ACCURACY", "WEAKNESS");
                println!("{}", "-".repeat(61));
                for (topic, b) in &breakdown {
                    println!(
                        "{:<32} {:>8} {:>8.0}% {:>9.2}",
                        truncate(topic, 30),
                        b.tasks_solved,
                        b.correct_rate * 100.0,
                        b.weakness_score
                    );
                }
            }
        }

        Commands::Recent { user_id, limit } => {
            let results = engine.recent_results(user_id, limit)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&results))?);
            } else if results.is_empty() {
                println!("No answers recorded yet.");
            } else {
                println!("Last {} answers (newest first): {}", results.len(), outcome_strip(&results));
            }
        }

        Commands::Leaderboard { limit } => {
            let board = engine.leaderboard(limit)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&board))?);
            } else if board.is_empty() {
                println!("Nobody has answered a task yet.");
            } else {
                println!("{:<5} {:<24} {:>8} {:>7} {:>9} LEVEL", "RANK", "USER", "CORRECT", "TOTAL", "ACCURACY");
                println!("{}", "-".repeat(66));
                for (rank, entry) in board.iter().enumerate() {
                    println!(
                        "{:<5} {:<24} {:>8} {:>7} {:>8.0}% {}",
                        rank + 1,
                        truncate(&display_user(entry), 22),
                        entry.correct_answers,
                        entry.total_tasks,
                        entry.accuracy(),
                        entry.current_level
                    );
                }
            }
        }

        Commands::View { name } => {
            let snapshot = engine.get_view(&name)?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&snapshot))?);
            } else {
                println!("View: {}", snapshot.name);
                println!("Last refresh: {}", snapshot.last_refresh);
                println!("{}", serde_json::to_string_pretty(&snapshot.payload)?);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

fn outcome_strip(results: &[bool]) -> String {
    results.iter().map(|&ok| if ok { '✓' } else { '✗' }).collect()
}

fn display_answer(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn display_user(entry: &LeaderboardEntry) -> String {
    match &entry.username {
        Some(name) => name.clone(),
        None => format!("user {}", entry.user_id),
    }
}
