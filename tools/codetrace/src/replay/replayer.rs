//! Timeline replay: map a 0–100 scrubber position onto a recorded session.

use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use crate::session::{Event, Session};
use crate::session_store::SessionStore;
use serde_json::json;
use std::path::Path;

pub const DEFAULT_STEP_PERCENT: f64 = 10.0;

// ── ReplaySource ──────────────────────────────────────────────────────────────

/// What the replay screen has to work with. Bad or absent data is a state,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaySource {
    Loaded(Session),
    NoSessionData { reason: String },
}

impl ReplaySource {
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Loaded(session) => Some(session),
            Self::NoSessionData { .. } => None,
        }
    }

    fn missing(reason: String) -> Self {
        append_run_log(
            "warn",
            "replay.source.no_session_data",
            json!({ "reason": reason }),
        );
        Self::NoSessionData { reason }
    }
}

/// Read a session JSON file written by `write_session_file`.
pub fn load_replay_source(fs: &dyn FileSystem, path: &Path) -> ReplaySource {
    if !fs.exists(path) {
        return ReplaySource::missing(format!("no session file at {}", path.display()));
    }
    let raw = match fs.read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return ReplaySource::missing(e.to_string()),
    };
    match serde_json::from_str::<Session>(&raw) {
        Ok(session) => {
            append_run_log(
                "info",
                "replay.source.loaded",
                json!({ "session_id": session.id, "events": session.events.len() }),
            );
            ReplaySource::Loaded(session)
        }
        Err(e) => ReplaySource::missing(format!("malformed session file: {e}")),
    }
}

/// Look a session up in the store; `None` picks the most recent one.
pub fn load_replay_source_from_store(store: &SessionStore, id: Option<&str>) -> ReplaySource {
    let id = match id {
        Some(id) => id.to_string(),
        None => match store.latest_session_id() {
            Ok(Some(id)) => id,
            Ok(None) => return ReplaySource::missing("store holds no sessions".to_string()),
            Err(e) => return ReplaySource::missing(e.to_string()),
        },
    };
    match store.load_session(&id) {
        Ok(Some(session)) => ReplaySource::Loaded(session),
        Ok(None) => ReplaySource::missing(format!("unknown session {id}")),
        Err(e) => ReplaySource::missing(e.to_string()),
    }
}

// ── TimelineReplayer ──────────────────────────────────────────────────────────

/// Read-only view over an event log. Every query is a pure function of the
/// log and the requested progress.
pub struct TimelineReplayer<'a> {
    events: &'a [Event],
    default_template: &'a str,
    ordered: bool,
}

impl<'a> TimelineReplayer<'a> {
    pub fn new(events: &'a [Event], default_template: &'a str) -> Self {
        let ordered = events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp);
        Self {
            events,
            default_template,
            ordered,
        }
    }

    pub fn for_session(session: &'a Session, default_template: &'a str) -> Self {
        Self::new(&session.events, default_template)
    }

    pub fn total_duration(&self) -> u64 {
        self.events.iter().map(|e| e.timestamp).max().unwrap_or(0)
    }

    /// Elapsed recording time that `progress_percent` points at.
    pub fn target_time(&self, progress_percent: f64) -> f64 {
        clamp_progress(progress_percent) / 100.0 * self.total_duration() as f64
    }

    /// The last event at or before the target time.
    pub fn event_at_progress(&self, progress_percent: f64) -> Option<&'a Event> {
        let target = self.target_time(progress_percent);
        if self.ordered {
            let idx = self
                .events
                .partition_point(|e| e.timestamp as f64 <= target);
            return idx.checked_sub(1).map(|i| &self.events[i]);
        }
        // Stored logs can arrive out of order; `max_by_key` keeps the last of
        // equal timestamps.
        self.events
            .iter()
            .filter(|e| e.timestamp as f64 <= target)
            .max_by_key(|e| e.timestamp)
    }

    /// Buffer text at `progress_percent`, or the default template when no
    /// event has happened yet.
    pub fn code_at_progress(&self, progress_percent: f64) -> &'a str {
        match self.event_at_progress(progress_percent) {
            Some(event) => &event.buffer_snapshot,
            None => self.default_template,
        }
    }

    /// Events at or before `progress_percent`, newest last.
    pub fn events_until(&self, progress_percent: f64) -> Vec<&'a Event> {
        let target = self.target_time(progress_percent);
        self.events
            .iter()
            .filter(|e| e.timestamp as f64 <= target)
            .collect()
    }
}

pub fn clamp_progress(progress_percent: f64) -> f64 {
    if progress_percent.is_nan() {
        return 0.0;
    }
    progress_percent.clamp(0.0, 100.0)
}

pub fn step_back(progress_percent: f64, step: f64) -> f64 {
    clamp_progress(clamp_progress(progress_percent) - step)
}

pub fn step_forward(progress_percent: f64, step: f64) -> f64 {
    clamp_progress(clamp_progress(progress_percent) + step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;
    use crate::session::{EventKind, DEFAULT_TEMPLATE};

    fn event(timestamp: u64, kind: EventKind, snapshot: &str) -> Event {
        Event {
            timestamp,
            kind,
            description: String::new(),
            buffer_snapshot: snapshot.to_string(),
            detail: None,
        }
    }

    fn scenario() -> Vec<Event> {
        vec![
            event(0, EventKind::Keystroke, "a"),
            event(1000, EventKind::Paste, "ab"),
            event(2000, EventKind::Run, "ab"),
        ]
    }

    #[test]
    fn three_event_scenario_resolves_each_checkpoint() {
        let events = scenario();
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        assert_eq!(replayer.total_duration(), 2000);
        assert_eq!(replayer.code_at_progress(0.0), "a");
        assert_eq!(replayer.code_at_progress(50.0), "ab");
        assert_eq!(replayer.event_at_progress(50.0).map(|e| e.timestamp), Some(1000));
        assert_eq!(replayer.code_at_progress(100.0), "ab");
        assert_eq!(replayer.event_at_progress(100.0).map(|e| e.timestamp), Some(2000));
    }

    #[test]
    fn empty_log_always_yields_the_template() {
        let replayer = TimelineReplayer::new(&[], DEFAULT_TEMPLATE);
        assert_eq!(replayer.total_duration(), 0);
        for p in [0.0, 33.3, 100.0] {
            assert_eq!(replayer.code_at_progress(p), DEFAULT_TEMPLATE);
        }
    }

    #[test]
    fn template_shows_before_the_first_event() {
        let events = vec![event(500, EventKind::Keystroke, "x"), event(1000, EventKind::Run, "x")];
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        assert_eq!(replayer.code_at_progress(49.0), DEFAULT_TEMPLATE);
        assert_eq!(replayer.code_at_progress(50.0), "x");
    }

    #[test]
    fn out_of_range_and_nan_progress_are_clamped() {
        let events = scenario();
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        assert_eq!(replayer.code_at_progress(-20.0), "a");
        assert_eq!(replayer.code_at_progress(f64::NAN), "a");
        assert_eq!(
            replayer.event_at_progress(250.0).map(|e| e.timestamp),
            Some(2000)
        );
    }

    #[test]
    fn unordered_logs_still_pick_the_latest_eligible_event() {
        let events = vec![
            event(2000, EventKind::Run, "late"),
            event(0, EventKind::Keystroke, "first"),
            event(1000, EventKind::Keystroke, "middle"),
        ];
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        assert_eq!(replayer.code_at_progress(60.0), "middle");
        assert_eq!(replayer.code_at_progress(100.0), "late");
    }

    #[test]
    fn ties_resolve_to_the_last_logged_event() {
        let events = vec![
            event(100, EventKind::Keystroke, "typed"),
            event(100, EventKind::Paste, "pasted"),
        ];
        let replayer = TimelineReplayer::new(&events, DEFAULT_TEMPLATE);
        assert_eq!(replayer.code_at_progress(100.0), "pasted");
    }

    #[test]
    fn steps_clamp_to_the_timeline() {
        assert_eq!(step_back(5.0, DEFAULT_STEP_PERCENT), 0.0);
        assert_eq!(step_forward(95.0, DEFAULT_STEP_PERCENT), 100.0);
        assert_eq!(step_forward(40.0, DEFAULT_STEP_PERCENT), 50.0);
    }

    #[test]
    fn missing_or_malformed_files_degrade_to_no_session_data() {
        let fs = FakeFileSystem::with_file("/bad.json", "{\"id\": 3");
        let missing = load_replay_source(&fs, Path::new("/nope.json"));
        assert!(matches!(missing, ReplaySource::NoSessionData { .. }));
        let malformed = load_replay_source(&fs, Path::new("/bad.json"));
        match malformed {
            ReplaySource::NoSessionData { reason } => assert!(reason.contains("malformed")),
            other => panic!("expected no session data, got {other:?}"),
        }
    }
}
