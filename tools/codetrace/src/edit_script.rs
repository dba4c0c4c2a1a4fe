//! JSONL edit scripts: recorded editor notifications that can be replayed
//! into an [`EventRecorder`] from the command line.
//!
//! ```text
//! {"at_ms":120,"signal":"replace","text":"function f() {}"}
//! {"at_ms":400,"signal":"paste"}
//! {"at_ms":900,"signal":"run"}
//! ```

use crate::errors::CodetraceError;
use crate::logging::append_run_log;
use crate::replay::recorder::EventRecorder;
use crate::runtime::FakeClock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "lowercase")]
pub enum EditorSignal {
    Replace { text: String },
    Paste,
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_ms: u64,
    #[serde(flatten)]
    pub signal: EditorSignal,
}

pub fn parse_edit_script(input: &str) -> Result<Vec<ScriptStep>, CodetraceError> {
    let mut steps: Vec<ScriptStep> = Vec::new();
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let step = serde_json::from_str::<ScriptStep>(line)
            .map_err(|e| CodetraceError::Script(format!("line {line_no}: {e}")))?;
        if let Some(previous) = steps.last() {
            if step.at_ms < previous.at_ms {
                return Err(CodetraceError::Script(format!(
                    "line {line_no}: at_ms {} is earlier than {}",
                    step.at_ms, previous.at_ms
                )));
            }
        }
        steps.push(step);
    }
    Ok(steps)
}

/// Feed `script` into `recorder`, moving `clock` to each step's offset from
/// the recording start first. `clock` must be the one the recorder reads.
pub fn drive_recorder(
    script: &[ScriptStep],
    recorder: &mut EventRecorder,
    clock: &FakeClock,
) -> usize {
    let started = recorder.started_at();
    for step in script {
        clock.set(started + Duration::from_millis(step.at_ms));
        match &step.signal {
            EditorSignal::Replace { text } => recorder.on_buffer_replaced(text),
            EditorSignal::Paste => recorder.on_paste_detected(),
            EditorSignal::Run => recorder.on_run_requested(),
        }
    }
    append_run_log(
        "info",
        "edit_script.applied",
        json!({ "steps": script.len(), "events": recorder.events().len() }),
    );
    script.len()
}
