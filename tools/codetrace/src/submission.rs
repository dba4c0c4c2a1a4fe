//! Submit flow: payload, evaluation, finalize, persist.

use crate::errors::CodetraceError;
use crate::evaluation::{heuristic_evaluation, EvaluationResult, StoredEvaluation};
use crate::evaluator::Evaluator;
use crate::logging::append_run_log;
use crate::replay::recorder::EventRecorder;
use crate::session::Session;
use crate::session_store::SessionStore;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

/// Allows at most one submission in flight.
#[derive(Debug, Default)]
pub struct SubmissionGate {
    in_flight: AtomicBool,
}

/// Held for the duration of one submission; dropping it reopens the gate.
#[derive(Debug)]
pub struct SubmissionGuard<'g> {
    gate: &'g SubmissionGate,
}

impl SubmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Result<SubmissionGuard<'_>, CodetraceError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            append_run_log("warn", "submission.rejected.in_flight", json!({}));
            return Err(CodetraceError::SubmissionInFlight);
        }
        Ok(SubmissionGuard { gate: self })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}

/// Evaluate the recording, store it, and only then close the recorder. Any
/// failure along the way leaves `recorder` untouched so the candidate can
/// retry.
pub fn submit_session(
    gate: &SubmissionGate,
    recorder: &mut EventRecorder,
    evaluator: &dyn Evaluator,
    store: &SessionStore,
    fallback_on_unparseable: bool,
) -> Result<Session, CodetraceError> {
    let _guard = gate.begin()?;
    if recorder.is_finalized() {
        return Err(CodetraceError::Evaluator(
            "session was already submitted".to_string(),
        ));
    }

    let payload = recorder.payload();
    append_run_log(
        "info",
        "submission.started",
        json!({
            "total_actions": payload.total_actions,
            "time_duration": payload.time_duration,
        }),
    );

    let response = evaluator.evaluate(&payload).inspect_err(|e| {
        append_run_log(
            "error",
            "submission.evaluation_failed",
            json!({ "error": e.to_string() }),
        );
    })?;

    let result = match EvaluationResult::from_vendor_response(&response) {
        Ok(result) => result,
        Err(e) if fallback_on_unparseable => {
            append_run_log(
                "warn",
                "submission.evaluation.heuristic_fallback",
                json!({ "error": e.to_string() }),
            );
            heuristic_evaluation(recorder.events())
        }
        Err(e) => {
            append_run_log(
                "error",
                "submission.evaluation_unusable",
                json!({ "error": e.to_string() }),
            );
            return Err(e);
        }
    };

    let session = recorder.snapshot_session(Some(StoredEvaluation::new(result, response)));
    store.save_session(&session).inspect_err(|e| {
        append_run_log(
            "error",
            "submission.persist_failed",
            json!({ "session_id": session.id, "error": e.to_string() }),
        );
    })?;
    recorder.mark_finalized(&session);
    append_run_log(
        "info",
        "submission.completed",
        json!({ "session_id": session.id, "events": session.events.len() }),
    );
    Ok(session)
}
