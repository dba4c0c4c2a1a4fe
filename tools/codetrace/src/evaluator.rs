use crate::errors::CodetraceError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner};
use crate::session::SessionPayload;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Scores a submission. Implementations return the vendor body untouched;
/// normalization happens in [`crate::evaluation`].
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, payload: &SessionPayload) -> Result<Value, CodetraceError>;
}

/// Pipes the payload JSON to an external program and reads JSON back from
/// its stdout.
pub struct CommandEvaluator {
    process_runner: Arc<dyn ProcessRunner>,
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandEvaluator {
    pub fn new(
        process_runner: Arc<dyn ProcessRunner>,
        program: impl Into<String>,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    ) -> Self {
        Self {
            process_runner,
            program: program.into(),
            args,
            cwd,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(&self, payload: &SessionPayload) -> Result<Value, CodetraceError> {
        let body =
            serde_json::to_string(payload).map_err(|e| CodetraceError::Evaluator(e.to_string()))?;
        append_run_log(
            "info",
            "evaluator.request.started",
            json!({
                "program": self.program,
                "total_actions": payload.total_actions,
                "time_duration": payload.time_duration,
            }),
        );

        let handle = self.process_runner.spawn(ProcessRequest {
            program: self.program.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            stdin: Some(body),
        })?;
        let output = self.process_runner.wait(handle)?;

        if output.exit_code != 0 {
            append_run_log(
                "error",
                "evaluator.request.failed",
                json!({
                    "program": self.program,
                    "exit_code": output.exit_code,
                    "stderr": output.stderr,
                }),
            );
            return Err(CodetraceError::Evaluator(format!(
                "{} exited with {}: {}",
                self.program,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let response = serde_json::from_str::<Value>(output.stdout.trim()).map_err(|e| {
            append_run_log(
                "error",
                "evaluator.response.unparseable",
                json!({ "program": self.program, "error": e.to_string() }),
            );
            CodetraceError::Evaluator(format!("unparseable evaluator output: {e}"))
        })?;
        append_run_log(
            "info",
            "evaluator.request.completed",
            json!({ "program": self.program, "stdout_bytes": output.stdout.len() }),
        );
        Ok(response)
    }
}
