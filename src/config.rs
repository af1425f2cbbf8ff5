use std::path::PathBuf;

use chrono::Duration;

const APP_DIR: &str = "adaptive-tutor";
const DEFAULT_DB_NAME: &str = "tutor.db";
const DEFAULT_CATALOG_NAME: &str = "tasks.json";

pub const DEFAULT_STALENESS_SECS: i64 = 3600;
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub catalog_path: PathBuf,
    /// Maximum age of a view snapshot before a read schedules a refresh.
    pub staleness_window: Duration,
    /// Number of best-scoring tasks the selector draws from.
    pub top_k: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let dir = config_dir();
        Self {
            db_path: dir.join(DEFAULT_DB_NAME),
            catalog_path: dir.join(DEFAULT_CATALOG_NAME),
            staleness_window: Duration::seconds(DEFAULT_STALENESS_SECS),
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `TUTOR_DB`, `TUTOR_CATALOG` and
    /// `TUTOR_VIEW_STALENESS_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TUTOR_DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("TUTOR_CATALOG") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(secs) = std::env::var("TUTOR_VIEW_STALENESS_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.staleness_window = Duration::seconds(secs);
        }

        config
    }

    pub fn in_memory(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: PathBuf::from(":memory:"),
            catalog_path: catalog_path.into(),
            ..Self::default()
        }
    }
}

fn config_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR);

    std::fs::create_dir_all(&dir).ok();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_hour_window_and_top_three() {
        let config = EngineConfig::default();
        assert_eq!(config.staleness_window, Duration::seconds(3600));
        assert_eq!(config.top_k, 3);
        assert!(config.db_path.ends_with("tutor.db"));
        assert!(config.catalog_path.ends_with("tasks.json"));
    }

    #[test]
    fn in_memory_keeps_catalog_path() {
        let config = EngineConfig::in_memory("/tmp/tasks.json");
        assert_eq!(config.db_path, PathBuf::from(":memory:"));
        assert_eq!(config.catalog_path, PathBuf::from("/tmp/tasks.json"));
    }
}
