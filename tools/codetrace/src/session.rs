//! Serializable session types shared by the recorder, the replayer and the
//! store.

use crate::errors::CodetraceError;
use crate::evaluation::StoredEvaluation;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Skeleton handed to every candidate before the first edit.
pub const DEFAULT_TEMPLATE: &str =
    "function findLargestNumber(arr) {\n  // Write your solution here\n  \n}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Keystroke,
    Paste,
    Run,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keystroke => "keystroke",
            Self::Paste => "paste",
            Self::Run => "run",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "keystroke" => Some(Self::Keystroke),
            "paste" => Some(Self::Paste),
            "run" => Some(Self::Run),
            _ => None,
        }
    }
}

/// One observed change to the buffer. `buffer_snapshot` is the whole buffer,
/// never a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Milliseconds since recording started.
    pub timestamp: u64,
    pub kind: EventKind,
    pub description: String,
    pub buffer_snapshot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub problem_statement: String,
    pub started_at: u64,
    pub completed_at: u64,
    pub final_code: String,
    pub events: Vec<Event>,
    #[serde(default)]
    pub evaluation: Option<StoredEvaluation>,
}

impl Session {
    pub fn total_duration(&self) -> u64 {
        self.events.iter().map(|e| e.timestamp).max().unwrap_or(0)
    }

    pub fn count_of(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}

/// What the evaluator receives on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub problem_statement: String,
    pub code_solution: String,
    pub key_logs: Vec<Event>,
    pub paste_events: Vec<Event>,
    pub code_runs: Vec<Event>,
    pub time_duration: u64,
    pub total_actions: usize,
}

impl SessionPayload {
    pub fn from_events(
        problem_statement: &str,
        code_solution: &str,
        events: &[Event],
        time_duration: u64,
    ) -> Self {
        let of_kind = |kind: EventKind| {
            events
                .iter()
                .filter(|e| e.kind == kind)
                .cloned()
                .collect::<Vec<_>>()
        };
        Self {
            problem_statement: problem_statement.to_string(),
            code_solution: code_solution.to_string(),
            key_logs: of_kind(EventKind::Keystroke),
            paste_events: of_kind(EventKind::Paste),
            code_runs: of_kind(EventKind::Run),
            time_duration,
            total_actions: events.len(),
        }
    }
}

/// Brief listing row, newest first in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub problem_statement: String,
    pub completed_at: u64,
    pub event_count: usize,
    pub evaluated: bool,
}

pub fn compute_session_id(problem_statement: &str, started_at: u64, final_code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(problem_statement.as_bytes());
    hasher.update([0u8]);
    hasher.update(started_at.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(final_code.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

pub fn write_session_file(
    fs: &dyn FileSystem,
    path: &Path,
    session: &Session,
) -> Result<(), CodetraceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs.create_dir_all(parent)?;
        }
    }
    let body =
        serde_json::to_string_pretty(session).map_err(|e| CodetraceError::Io(e.to_string()))?;
    fs.write_string(path, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: u64, kind: EventKind) -> Event {
        Event {
            timestamp,
            kind,
            description: String::new(),
            buffer_snapshot: String::new(),
            detail: None,
        }
    }

    #[test]
    fn payload_splits_events_by_kind_and_counts_all_actions() {
        let events = vec![
            event(0, EventKind::Keystroke),
            event(5, EventKind::Paste),
            event(6, EventKind::Keystroke),
            event(9, EventKind::Run),
        ];
        let payload = SessionPayload::from_events("Two Sum", "code", &events, 1_200);
        assert_eq!(payload.key_logs.len(), 2);
        assert_eq!(payload.paste_events.len(), 1);
        assert_eq!(payload.code_runs.len(), 1);
        assert_eq!(payload.total_actions, 4);
        assert_eq!(payload.time_duration, 1_200);
    }

    #[test]
    fn event_kind_serializes_lowercase_and_omits_empty_detail() {
        let json = serde_json::to_value(event(3, EventKind::Paste)).expect("serialize");
        assert_eq!(json["kind"], "paste");
        assert!(json.get("detail").is_none());
        assert_eq!(EventKind::from_db("run"), Some(EventKind::Run));
        assert_eq!(EventKind::from_db("scroll"), None);
    }

    #[test]
    fn session_id_is_stable_and_input_sensitive() {
        let a = compute_session_id("Two Sum", 10, "x");
        assert_eq!(a, compute_session_id("Two Sum", 10, "x"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, compute_session_id("Two Sum", 11, "x"));
    }

    #[test]
    fn session_file_is_pretty_json_that_reads_back() {
        let fs = crate::runtime::FakeFileSystem::default();
        let session = Session {
            id: compute_session_id("Two Sum", 10, "x"),
            problem_statement: "Two Sum".to_string(),
            started_at: 10,
            completed_at: 40,
            final_code: "x".to_string(),
            events: vec![event(30, EventKind::Run)],
            evaluation: None,
        };
        let path = Path::new("out/session.json");

        write_session_file(&fs, path, &session).expect("write");

        let body = fs.file(path).expect("written");
        assert!(body.contains("\n  \"problem_statement\": \"Two Sum\""));
        let back: Session = serde_json::from_str(&body).expect("parse");
        assert_eq!(back, session);
    }
}
