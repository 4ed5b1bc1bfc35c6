use crate::models::AnswerSet;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::{fs, path::Path};
use tracing::warn;

// Durable per-test state: one end-time entry and one serialized AnswerSet
// entry per test id. Owned exclusively by the session controller for that
// test id; cleared exactly once on successful submission or detected expiry.
pub trait StateStore: Send + Sync {
    fn load_end_time(&self, test_id: i64) -> Option<DateTime<Utc>>;
    fn save_end_time(&self, test_id: i64, end_time: DateTime<Utc>);
    fn load_answers(&self, test_id: i64) -> Option<AnswerSet>;
    fn save_answers(&self, test_id: i64, answers: &AnswerSet);
    fn clear(&self, test_id: i64);
}

fn end_time_key(test_id: i64) -> String {
    format!("test:{test_id}:end_time")
}

fn answers_key(test_id: i64) -> String {
    format!("test:{test_id}:answers")
}

// Unreadable entries degrade to "no persisted state" rather than failing the
// load; the schedule-based calculation takes over.
fn decode_end_time(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            warn!("discarding unparseable persisted end time: {}", err);
            None
        }
    }
}

fn decode_answers(raw: &str) -> Option<AnswerSet> {
    match serde_json::from_str(raw) {
        Ok(answers) => Some(answers),
        Err(err) => {
            warn!("discarding unparseable persisted answers: {}", err);
            None
        }
    }
}

fn encode_answers(answers: &AnswerSet) -> Option<String> {
    match serde_json::to_string(answers) {
        Ok(raw) => Some(raw),
        Err(err) => {
            warn!("failed to serialize answers: {}", err);
            None
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_end_time(&self, test_id: i64) -> Option<DateTime<Utc>> {
        self.entries
            .get(&end_time_key(test_id))
            .and_then(|raw| decode_end_time(&raw))
    }

    fn save_end_time(&self, test_id: i64, end_time: DateTime<Utc>) {
        self.entries
            .insert(end_time_key(test_id), end_time.to_rfc3339());
    }

    fn load_answers(&self, test_id: i64) -> Option<AnswerSet> {
        self.entries
            .get(&answers_key(test_id))
            .and_then(|raw| decode_answers(&raw))
    }

    fn save_answers(&self, test_id: i64, answers: &AnswerSet) {
        if let Some(raw) = encode_answers(answers) {
            self.entries.insert(answers_key(test_id), raw);
        }
    }

    fn clear(&self, test_id: i64) {
        self.entries.remove(&end_time_key(test_id));
        self.entries.remove(&answers_key(test_id));
    }
}

// Snapshot-file store: the whole key/value map is rewritten on every
// mutation, mirroring how the browser front end leaned on localStorage.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        "failed to read session store {}: {}",
                        path.display(),
                        err
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn write_through(&self, entries: &HashMap<String, String>) {
        let serialized = match serde_json::to_vec_pretty(entries) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!("failed to serialize session store: {}", err);
                return;
            }
        };
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        if let Err(err) = fs::write(&self.path, serialized) {
            warn!(
                "failed to persist session store {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

impl StateStore for JsonFileStore {
    fn load_end_time(&self, test_id: i64) -> Option<DateTime<Utc>> {
        crate::lock(&self.entries)
            .get(&end_time_key(test_id))
            .and_then(|raw| decode_end_time(raw))
    }

    fn save_end_time(&self, test_id: i64, end_time: DateTime<Utc>) {
        let mut entries = crate::lock(&self.entries);
        entries.insert(end_time_key(test_id), end_time.to_rfc3339());
        self.write_through(&entries);
    }

    fn load_answers(&self, test_id: i64) -> Option<AnswerSet> {
        crate::lock(&self.entries)
            .get(&answers_key(test_id))
            .and_then(|raw| decode_answers(raw))
    }

    fn save_answers(&self, test_id: i64, answers: &AnswerSet) {
        let Some(raw) = encode_answers(answers) else {
            return;
        };
        let mut entries = crate::lock(&self.entries);
        entries.insert(answers_key(test_id), raw);
        self.write_through(&entries);
    }

    fn clear(&self, test_id: i64) {
        let mut entries = crate::lock(&self.entries);
        entries.remove(&end_time_key(test_id));
        entries.remove(&answers_key(test_id));
        self.write_through(&entries);
    }
}
