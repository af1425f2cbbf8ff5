use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub topic: String,
    pub text: String,
    pub correct_answer: Value,
    pub difficulty: u8,
    pub hint: Option<String>,
    pub solution: Option<String>,
    pub image: Option<String>,
}

// Shape of an entry in the catalog file
#[derive(Debug, Deserialize)]
struct RawTask {
    id: Value,
    topic: String,
    #[serde(alias = "task_text")]
    text: String,
    #[serde(default)]
    correct_answer: Value,
    #[serde(default)]
    difficulty: Option<Value>,
    #[serde(default)]
    hint: Option<String>,
    #[serde(default)]
    solution: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

impl RawTask {
    fn into_task<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Task> {
        let id = match self.id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => return Err(EngineError::Catalog(format!("invalid task id {other}"))),
        };

        let difficulty = match self.difficulty.as_ref().and_then(parse_difficulty) {
            Some(d) => d,
            None => {
                let estimated = estimate_difficulty(&self.topic, rng);
                debug!(task_id = %id, estimated, "estimated missing difficulty");
                estimated
            }
        };

        Ok(Task {
            id,
            topic: self.topic,
            text: self.text,
            correct_answer: self.correct_answer,
            difficulty,
            hint: self.hint,
            solution: self.solution,
            image: self.image,
        })
    }
}

fn parse_difficulty(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(raw.round().clamp(1.0, 5.0) as u8)
}

const EASY_KEYWORDS: &[&str] = &["encoding", "decoding", "units of measure"];
const MEDIUM_KEYWORDS: &[&str] = &["logic", "graph", "table"];
const HARD_KEYWORDS: &[&str] = &["programming", "algorithm", "recursion", "dynamic programming"];

/// Difficulty guess from the topic name for tasks the catalog leaves unrated.
/// Randomized within a bucket, so repeated loads may disagree.
pub fn estimate_difficulty<R: Rng + ?Sized>(topic: &str, rng: &mut R) -> u8 {
    let topic = topic.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| topic.contains(k));

    if matches(EASY_KEYWORDS) {
        1
    } else if matches(HARD_KEYWORDS) {
        rng.gen_range(3..=5)
    } else if matches(MEDIUM_KEYWORDS) {
        rng.gen_range(2..=3)
    } else {
        rng.gen_range(1..=2)
    }
}

/// Read-mostly list of task definitions, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(tasks: Vec<Task>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(EngineError::Catalog(format!("duplicate task id '{}'", task.id)));
            }
        }
        Ok(Self { tasks, index })
    }

    pub fn from_json_str<R: Rng + ?Sized>(json: &str, rng: &mut R) -> Result<Self> {
        let raw: Vec<RawTask> = serde_json::from_str(json)?;
        let tasks = raw
            .into_iter()
            .map(|t| t.into_task(&mut *rng))
            .collect::<Result<Vec<_>>>()?;
        Self::new(tasks)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json, &mut rand::thread_rng())
    }

    /// Like [`Catalog::load`], but a missing file yields an empty catalog.
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Result<Self> {
        match Self::load(path.as_ref()) {
            Err(EngineError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.as_ref().display(), "task catalog not found, starting empty");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn task(id: &str, topic: &str, difficulty: u8) -> Task {
    Task {
        id: id.to_string(),
        topic: topic.to_string(),
        text: format!("Solve {id}"),
        correct_answer: Value::String("42".to_string()),
        difficulty,
        hint: Some(format!("Hint for {id}")),
        solution: Some(format!("Solution for {id}")),
        image: None,
    }
}
