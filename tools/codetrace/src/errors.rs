use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodetraceError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("process error: {0}")]
    Process(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("evaluator error: {0}")]
    Evaluator(String),
    #[error("edit script error: {0}")]
    Script(String),
    #[error("a submission is already in flight for this session")]
    SubmissionInFlight,
}
