pub mod config;
pub mod edit_script;
pub mod errors;
pub mod evaluation;
pub mod evaluator;
pub mod hotkeys;
pub mod logging;
pub mod questions;
pub mod replay;
pub mod runtime;
pub mod session;
pub mod session_store;
pub mod submission;
pub mod tui;

use clap::{error::ErrorKind, CommandFactory, Parser};
use config::{load_config, AppConfig, CliOverrides, RuntimeScope};
use edit_script::{drive_recorder, parse_edit_script};
use errors::CodetraceError;
use evaluator::CommandEvaluator;
use hotkeys::apply_keys;
use logging::{append_run_log, init_run_logger, structured_fallback_line, JsonlLogger};
use replay::playback::{Playback, PlaybackDriver, PlaybackState};
use replay::recorder::EventRecorder;
use replay::replayer::{
    load_replay_source, load_replay_source_from_store, ReplaySource, TimelineReplayer,
};
use runtime::{FakeClock, ProductionRuntime};
use questions::pick_question;
use serde_json::json;
use session::write_session_file;
use session_store::SessionStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use submission::{submit_session, SubmissionGate};
use tui::{format_elapsed, render_replay_frame, ReplayFrame};

const FRAME_WIDTH: u16 = 100;
const FRAME_HEIGHT: u16 = 24;

#[derive(Debug, Clone, Parser)]
#[command(name = "codetrace")]
#[command(about = "Record coding sessions as replayable event logs and scrub through them")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    /// JSONL edit script to feed into a new recording.
    #[arg(long, conflicts_with_all = ["replay", "session_id", "list_sessions"])]
    pub record: Option<PathBuf>,
    /// Problem statement. Without it one is drawn from the built-in bank.
    #[arg(long, requires = "record")]
    pub prompt: Option<String>,
    /// Seed for drawing the problem statement from the bank.
    #[arg(long, requires = "record", conflicts_with = "prompt")]
    pub question_seed: Option<u64>,
    /// Also write the finalized session as JSON.
    #[arg(long, requires = "record")]
    pub out: Option<PathBuf>,
    /// Send the recording to the evaluator before finalizing.
    #[arg(long, default_value_t = false, requires = "record")]
    pub submit: bool,
    #[arg(long, conflicts_with = "session_id")]
    pub replay: Option<PathBuf>,
    #[arg(long)]
    pub session_id: Option<String>,
    /// Scrubber position in percent. Alone, prints the code at that point.
    #[arg(long)]
    pub progress: Option<f64>,
    /// Replay hotkeys to apply before drawing a frame, e.g. "ll h".
    #[arg(long)]
    pub keys: Option<String>,
    #[arg(long, default_value_t = false)]
    pub play: bool,
    #[arg(long, default_value_t = false)]
    pub list_sessions: bool,
    #[arg(long)]
    pub evaluator_command: Option<String>,
}

pub fn run() -> Result<i32, CodetraceError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| CodetraceError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, CodetraceError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(CodetraceError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        working_dir: cli.working_dir.clone(),
        evaluator_command: cli.evaluator_command.clone(),
    };
    let (cfg, scope) = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    let log_path = scope.resolve(&cfg.logging.path);
    init_run_logger(JsonlLogger {
        path: log_path,
        max_payload_bytes: cfg.logging.max_payload_bytes,
        budget_bytes: cfg.logging.budget_bytes,
    });
    append_run_log(
        "info",
        "cli.started",
        json!({
            "working_dir": scope.working_dir.display().to_string(),
            "record": cli.record.is_some(),
            "replay": cli.replay.is_some() || cli.session_id.is_some(),
            "list_sessions": cli.list_sessions,
        }),
    );

    if cli.list_sessions {
        return list_sessions(runtime, &cfg, &scope);
    }

    if let Some(script_path) = &cli.record {
        return record(runtime, &cfg, &scope, &cli, script_path);
    }

    let wants_replay = cli.replay.is_some()
        || cli.session_id.is_some()
        || cli.progress.is_some()
        || cli.keys.is_some()
        || cli.play;
    if wants_replay {
        return replay(runtime, &cfg, &scope, &cli);
    }

    let help = Cli::command().render_help().to_string();
    runtime.terminal.write_line(&help)?;
    Ok(0)
}

fn open_store(cfg: &AppConfig, scope: &RuntimeScope) -> Result<SessionStore, CodetraceError> {
    SessionStore::open(scope.resolve(&cfg.storage.db_path))
}

fn report(
    runtime: &ProductionRuntime,
    session_id: &str,
    state: &str,
    message: &str,
) -> Result<(), CodetraceError> {
    if runtime.terminal.stdin_is_tty() {
        runtime.terminal.write_line(message)
    } else {
        runtime
            .terminal
            .write_line(&structured_fallback_line(session_id, state, message))
    }
}

fn list_sessions(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
) -> Result<i32, CodetraceError> {
    let store = open_store(cfg, scope)?;
    let sessions = store.list_sessions()?;
    if sessions.is_empty() {
        runtime.terminal.write_line("no sessions recorded")?;
        return Ok(0);
    }
    for summary in sessions {
        runtime.terminal.write_line(&format!(
            "{}  completed_at={}  events={}  evaluated={}  {}",
            summary.id,
            summary.completed_at,
            summary.event_count,
            if summary.evaluated { "yes" } else { "no" },
            summary.problem_statement,
        ))?;
    }
    Ok(0)
}

fn record(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    cli: &Cli,
    script_path: &Path,
) -> Result<i32, CodetraceError> {
    let script_path = scope.resolve(script_path);
    let raw = runtime.file_system.read_to_string(&script_path)?;
    let steps = parse_edit_script(&raw)?;

    // Script offsets, not wall time, decide event timestamps.
    let script_clock = FakeClock::at_unix_ms(runtime.clock.now_unix_ms());
    let prompt = match &cli.prompt {
        Some(prompt) => prompt.clone(),
        None => {
            let question = pick_question(cli.question_seed);
            append_run_log(
                "info",
                "record.question.drawn",
                json!({ "seed": cli.question_seed, "question": question }),
            );
            question.to_string()
        }
    };
    let mut recorder = EventRecorder::start(
        Arc::new(script_clock.clone()),
        prompt,
        cfg.recording.default_template.clone(),
    );
    drive_recorder(&steps, &mut recorder, &script_clock);

    let store = open_store(cfg, scope)?;
    let session = if cli.submit {
        let program = cfg.evaluator.command.clone().ok_or_else(|| {
            CodetraceError::Cli(
                "--submit needs an evaluator: pass --evaluator-command or set evaluator.command"
                    .to_string(),
            )
        })?;
        let evaluator = CommandEvaluator::new(
            runtime.process_runner.clone(),
            program,
            cfg.evaluator.args.clone(),
            Some(scope.working_dir.clone()),
        );
        append_run_log(
            "info",
            "record.submit.started",
            json!({ "program": evaluator.program() }),
        );
        let gate = SubmissionGate::new();
        submit_session(
            &gate,
            &mut recorder,
            &evaluator,
            &store,
            cfg.evaluator.fallback_on_unparseable,
        )?
    } else {
        let session = recorder.finalize(None);
        store.save_session(&session)?;
        session
    };

    if let Some(out) = &cli.out {
        write_session_file(runtime.file_system.as_ref(), &scope.resolve(out), &session)?;
    }

    let mut message = format!(
        "recorded session {}: {} events over {}",
        session.id,
        session.events.len(),
        format_elapsed(session.total_duration()),
    );
    if let Some(evaluation) = &session.evaluation {
        let scores = evaluation.result.scores;
        message.push_str(&format!(
            " | logic={} debugging={} efficiency={} creativity={}",
            scores.logic, scores.debugging, scores.efficiency, scores.creativity
        ));
    }
    report(runtime, &session.id, "recorded", &message)?;
    Ok(0)
}

fn replay(
    runtime: &ProductionRuntime,
    cfg: &AppConfig,
    scope: &RuntimeScope,
    cli: &Cli,
) -> Result<i32, CodetraceError> {
    let source = match &cli.replay {
        Some(path) => load_replay_source(runtime.file_system.as_ref(), &scope.resolve(path)),
        None => {
            let store = open_store(cfg, scope)?;
            load_replay_source_from_store(&store, cli.session_id.as_deref())
        }
    };
    let template = cfg.recording.default_template.as_str();

    let interactive = cli.keys.is_some() || cli.play;
    if let (Some(progress), false) = (cli.progress, interactive) {
        return match &source {
            ReplaySource::Loaded(session) => {
                let replayer = TimelineReplayer::for_session(session, template);
                runtime
                    .terminal
                    .write_line(replayer.code_at_progress(progress))?;
                Ok(0)
            }
            ReplaySource::NoSessionData { reason } => {
                runtime
                    .terminal
                    .write_line(&format!("No session data: {reason}"))?;
                Ok(1)
            }
        };
    }

    let mut playback = Playback::new(cfg.replay.tick_step);
    playback.seek(cli.progress.unwrap_or(0.0));
    if let Some(keys) = &cli.keys {
        if apply_keys(&mut playback, keys, cfg.replay.step_percent) {
            append_run_log("info", "replay.quit", json!({ "progress": playback.progress() }));
        }
    }

    let draw = |progress: f64, state: PlaybackState| -> Result<(), CodetraceError> {
        let frame = render_replay_frame(
            &ReplayFrame {
                source: &source,
                progress,
                state,
                default_template: template,
            },
            FRAME_WIDTH,
            FRAME_HEIGHT,
        )?;
        runtime.terminal.draw(&frame)
    };

    match (&source, cli.play) {
        (ReplaySource::Loaded(session), true) => {
            let replayer = TimelineReplayer::for_session(session, template);
            let driver = PlaybackDriver::new(runtime.clock.as_ref(), cfg.replay.tick_interval_ms);
            let end = driver.run(
                &mut playback,
                &replayer,
                &mut |progress: f64, _code: &str| -> Result<bool, CodetraceError> {
                    draw(progress, PlaybackState::Playing)?;
                    Ok(true)
                },
            )?;
            draw(playback.progress(), end)?;
            Ok(0)
        }
        (ReplaySource::Loaded(_), false) => {
            draw(playback.progress(), playback.state())?;
            Ok(0)
        }
        (ReplaySource::NoSessionData { .. }, _) => {
            draw(0.0, PlaybackState::Idle)?;
            Ok(1)
        }
    }
}
