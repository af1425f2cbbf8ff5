use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Mastery tiers, recomputed from the overall correct ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Novice = 1,
    Beginner = 2,
    Intermediate = 3,
    Advanced = 4,
    Expert = 5,
}

impl Level {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            2 => Level::Beginner,
            3 => Level::Intermediate,
            4 => Level::Advanced,
            5 => Level::Expert,
            _ => Level::Novice,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Level::Novice => "Novice",
            Level::Beginner => "Beginner",
            Level::Intermediate => "Intermediate",
            Level::Advanced => "Advanced",
            Level::Expert => "Expert",
        }
    }

    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.85 {
            Level::Expert
        } else if ratio >= 0.75 {
            Level::Advanced
        } else if ratio >= 0.60 {
            Level::Intermediate
        } else if ratio >= 0.40 {
            Level::Beginner
        } else {
            Level::Novice
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub total_tasks: i64,
    pub correct_answers: i64,
    pub current_level: Level,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn correct_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.correct_answers as f64 / self.total_tasks as f64
        }
    }

    pub fn stats(&self) -> UserStats {
        UserStats {
            total_tasks: self.total_tasks,
            correct_answers: self.correct_answers,
            correct_rate: self.correct_rate(),
            current_level: self.current_level.as_i32(),
            level_name: self.current_level.label().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicProgress {
    pub user_id: i64,
    pub topic: String,
    pub tasks_solved: i64,
    pub correct_rate: f64,
    pub last_solved: Option<DateTime<Utc>>,
}

impl TopicProgress {
    pub fn weakness(&self) -> f64 {
        1.0 - self.correct_rate
    }
}

// One answered task; never updated after insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEvent {
    pub id: i64,
    pub user_id: i64,
    pub task_id: String,
    pub topic: String,
    pub correct: bool,
    pub difficulty: u8,
    pub time_spent_secs: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub attempts: i64,
    pub last_attempt: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_tasks: i64,
    pub correct_answers: i64,
    pub correct_rate: f64,
    pub current_level: i32,
    pub level_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicBreakdown {
    pub correct_rate: f64,
    pub tasks_solved: i64,
    pub weakness_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: Option<String>,
    pub correct_answers: i64,
    pub total_tasks: i64,
    pub current_level: i32,
}

impl LeaderboardEntry {
    pub fn accuracy(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            (self.correct_answers as f64 / self.total_tasks as f64) * 100.0
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod level_tests {
        use super::*;

        #[test]
        fn from_ratio_thresholds() {
            assert_eq!(Level::from_ratio(1.0), Level::Expert);
            assert_eq!(Level::from_ratio(0.85), Level::Expert);
            assert_eq!(Level::from_ratio(0.84), Level::Advanced);
            assert_eq!(Level::from_ratio(0.75), Level::Advanced);
            assert_eq!(Level::from_ratio(0.60), Level::Intermediate);
            assert_eq!(Level::from_ratio(0.59), Level::Beginner);
            assert_eq!(Level::from_ratio(0.40), Level::Beginner);
            assert_eq!(Level::from_ratio(0.39), Level::Novice);
            assert_eq!(Level::from_ratio(0.0), Level::Novice);
        }

        #[test]
        fn from_i32_roundtrips_valid_levels() {
            for v in 1..=5 {
                assert_eq!(Level::from_i32(v).as_i32(), v);
            }
        }

        #[test]
        fn from_i32_out_of_range_is_novice() {
            assert_eq!(Level::from_i32(0), Level::Novice);
            assert_eq!(Level::from_i32(42), Level::Novice);
        }

        #[test]
        fn labels() {
            assert_eq!(Level::Novice.label(), "Novice");
            assert_eq!(Level::Expert.label(), "Expert");
        }
    }

    mod user_tests {
        use super::*;

        fn make_user(total_tasks: i64, correct_answers: i64) -> User {
            User {
                user_id: 1,
                username: None,
                total_tasks,
                correct_answers,
                current_level: Level::Novice,
                last_activity: None,
                created_at: Utc::now(),
            }
        }

        #[test]
        fn correct_rate_zero_tasks() {
            assert_eq!(make_user(0, 0).correct_rate(), 0.0);
        }

        #[test]
        fn correct_rate_partial() {
            assert_eq!(make_user(4, 3).correct_rate(), 0.75);
        }

        #[test]
        fn stats_carries_level_name() {
            let stats = make_user(2, 1).stats();
            assert_eq!(stats.current_level, 1);
            assert_eq!(stats.level_name, "Novice");
            assert_eq!(stats.correct_rate, 0.5);
        }
    }

    mod json_output_tests {
        use super::*;

        #[test]
        fn ok_wraps_data() {
            let out = JsonOutput::ok(5);
            assert!(out.success);
            assert_eq!(out.data, Some(5));
            assert!(out.error.is_none());
        }

        #[test]
        fn err_carries_message() {
            let out = JsonOutput::<()>::err("boom");
            assert!(!out.success);
            assert_eq!(out.error.as_deref(), Some("boom"));
        }
    }
}
