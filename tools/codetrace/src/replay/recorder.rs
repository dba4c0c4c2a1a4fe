//! `EventRecorder`: turns editor notifications into the session event log.

use crate::evaluation::StoredEvaluation;
use crate::logging::append_run_log;
use crate::runtime::Clock;
use crate::session::{compute_session_id, Event, EventKind, Session, SessionPayload};
use serde_json::json;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PASTE_DESCRIPTION: &str = "Pasted content";
pub const RUN_DESCRIPTION: &str = "Executed code";

pub struct EventRecorder {
    clock: Arc<dyn Clock>,
    started: SystemTime,
    problem_statement: String,
    buffer: String,
    events: Vec<Event>,
    finalized: bool,
}

impl EventRecorder {
    /// Start recording now, with `initial_buffer` as the remembered text.
    pub fn start(
        clock: Arc<dyn Clock>,
        problem_statement: impl Into<String>,
        initial_buffer: impl Into<String>,
    ) -> Self {
        let started = clock.now();
        let problem_statement = problem_statement.into();
        append_run_log(
            "info",
            "recorder.started",
            json!({ "problem_statement": problem_statement }),
        );
        Self {
            clock,
            started,
            problem_statement,
            buffer: initial_buffer.into(),
            events: Vec::new(),
            finalized: false,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn problem_statement(&self) -> &str {
        &self.problem_statement
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn started_at(&self) -> SystemTime {
        self.started
    }

    pub fn started_at_unix_ms(&self) -> u64 {
        unix_ms(self.started)
    }

    /// Milliseconds since `start`. Never lower than the last logged event.
    pub fn elapsed_ms(&self) -> u64 {
        let raw = self
            .clock
            .now()
            .duration_since(self.started)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let floor = self.events.last().map(|e| e.timestamp).unwrap_or(0);
        raw.max(floor)
    }

    /// Classify a full-buffer replacement by its length delta. Equal lengths
    /// (including same-length substitutions) produce no event.
    pub fn on_buffer_replaced(&mut self, new_text: &str) {
        let old_len = self.buffer.chars().count();
        let new_len = new_text.chars().count();

        if new_len < old_len {
            let removed = old_len - new_len;
            self.append_event(
                EventKind::Keystroke,
                format!("Removed {removed} characters"),
                new_text.to_string(),
                None,
            );
        } else if new_len > old_len {
            let added = new_len - old_len;
            let noun = if added > 1 { "characters" } else { "character" };
            self.append_event(
                EventKind::Keystroke,
                format!("Added {added} {noun}"),
                new_text.to_string(),
                None,
            );
        }

        self.buffer = new_text.to_string();
    }

    /// Independent of `on_buffer_replaced`; a paste usually fires both.
    pub fn on_paste_detected(&mut self) {
        let snapshot = self.buffer.clone();
        self.append_event(EventKind::Paste, PASTE_DESCRIPTION.to_string(), snapshot, None);
    }

    pub fn on_run_requested(&mut self) {
        let snapshot = self.buffer.clone();
        self.append_event(EventKind::Run, RUN_DESCRIPTION.to_string(), snapshot, None);
    }

    /// The only place the log grows. Insertion order is log order.
    pub fn append_event(
        &mut self,
        kind: EventKind,
        description: String,
        buffer_snapshot: String,
        detail: Option<String>,
    ) {
        if self.finalized {
            append_run_log(
                "warn",
                "recorder.event.after_finalize",
                json!({ "kind": kind.as_str(), "description": description }),
            );
            return;
        }
        let timestamp = self.elapsed_ms();
        append_run_log(
            "debug",
            "recorder.event.appended",
            json!({
                "seq": self.events.len(),
                "timestamp": timestamp,
                "kind": kind.as_str(),
                "description": description,
                "buffer_len": buffer_snapshot.len(),
            }),
        );
        self.events.push(Event {
            timestamp,
            kind,
            description,
            buffer_snapshot,
            detail,
        });
    }

    /// Submission payload for the current state. Does not touch the log.
    pub fn payload(&self) -> SessionPayload {
        SessionPayload::from_events(
            &self.problem_statement,
            &self.buffer,
            &self.events,
            self.elapsed_ms(),
        )
    }

    /// Session for the current state. The recorder stays open.
    pub fn snapshot_session(&self, evaluation: Option<StoredEvaluation>) -> Session {
        let started_at = self.started_at_unix_ms();
        Session {
            id: compute_session_id(&self.problem_statement, started_at, &self.buffer),
            problem_statement: self.problem_statement.clone(),
            started_at,
            completed_at: self.clock.now_unix_ms(),
            final_code: self.buffer.clone(),
            events: self.events.clone(),
            evaluation,
        }
    }

    /// Close the recorder for `session`. Further input is ignored.
    pub fn mark_finalized(&mut self, session: &Session) {
        self.finalized = true;
        append_run_log(
            "info",
            "recorder.finalized",
            json!({
                "session_id": session.id,
                "events": session.events.len(),
                "evaluated": session.evaluation.is_some(),
            }),
        );
    }

    /// Freeze the final code and completion time and hand out a copy of the
    /// session. The recorder ignores further input afterwards.
    pub fn finalize(&mut self, evaluation: Option<StoredEvaluation>) -> Session {
        let session = self.snapshot_session(evaluation);
        self.mark_finalized(&session);
        session
    }
}

fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeClock;
    use std::time::Duration;

    fn recorder(initial: &str) -> (EventRecorder, FakeClock) {
        let clock = FakeClock::at_unix_ms(50_000);
        let rec = EventRecorder::start(Arc::new(clock.clone()), "Two Sum", initial);
        (rec, clock)
    }

    #[test]
    fn additions_use_singular_and_plural_wording() {
        let (mut rec, _clock) = recorder("");
        rec.on_buffer_replaced("a");
        rec.on_buffer_replaced("abcd");
        let descriptions = rec
            .events()
            .iter()
            .map(|e| e.description.as_str())
            .collect::<Vec<_>>();
        assert_eq!(descriptions, vec!["Added 1 character", "Added 3 characters"]);
    }

    #[test]
    fn single_removal_keeps_plural_wording() {
        let (mut rec, _clock) = recorder("abc");
        rec.on_buffer_replaced("ab");
        assert_eq!(rec.events().len(), 1);
        assert_eq!(rec.events()[0].kind, EventKind::Keystroke);
        assert_eq!(rec.events()[0].description, "Removed 1 characters");
        assert_eq!(rec.events()[0].buffer_snapshot, "ab");
    }

    #[test]
    fn equal_length_edit_is_dropped_but_remembered() {
        let (mut rec, _clock) = recorder("abc");
        rec.on_buffer_replaced("abd");
        assert!(rec.events().is_empty());
        assert_eq!(rec.buffer(), "abd");

        rec.on_paste_detected();
        assert_eq!(rec.events()[0].buffer_snapshot, "abd");
    }

    #[test]
    fn lengths_are_counted_in_characters() {
        let (mut rec, _clock) = recorder("");
        rec.on_buffer_replaced("é");
        assert_eq!(rec.events()[0].description, "Added 1 character");
    }

    #[test]
    fn timestamps_are_relative_and_never_go_backwards() {
        let (mut rec, clock) = recorder("");
        clock.advance(Duration::from_millis(120));
        rec.on_buffer_replaced("a");
        clock.set(UNIX_EPOCH + Duration::from_millis(10_000));
        rec.on_run_requested();
        clock.set(UNIX_EPOCH + Duration::from_millis(50_400));
        rec.on_buffer_replaced("ab");

        let stamps = rec.events().iter().map(|e| e.timestamp).collect::<Vec<_>>();
        assert_eq!(stamps, vec![120, 120, 400]);
    }

    #[test]
    fn finalize_freezes_the_session_and_ignores_later_input() {
        let (mut rec, clock) = recorder("");
        rec.on_buffer_replaced("x");
        clock.advance(Duration::from_millis(900));
        let session = rec.finalize(None);
        assert_eq!(session.final_code, "x");
        assert_eq!(session.completed_at, 50_900);
        assert_eq!(session.started_at, 50_000);
        assert_eq!(session.events.len(), 1);

        rec.on_run_requested();
        assert_eq!(rec.events().len(), 1);
        assert!(rec.is_finalized());
    }

    #[test]
    fn snapshot_leaves_the_recorder_open() {
        let (mut rec, _clock) = recorder("");
        rec.on_buffer_replaced("x");
        let snapshot = rec.snapshot_session(None);
        assert!(!rec.is_finalized());

        rec.on_run_requested();
        assert_eq!(rec.events().len(), 2);
        assert_eq!(snapshot.events.len(), 1);

        rec.mark_finalized(&snapshot);
        assert!(rec.is_finalized());
    }
}
