use crate::errors::CodetraceError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::replay::playback::{DEFAULT_TICK_INTERVAL_MS, DEFAULT_TICK_STEP};
use crate::replay::replayer::DEFAULT_STEP_PERCENT;
use crate::runtime::FileSystem;
use crate::session::DEFAULT_TEMPLATE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub evaluator_command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeScope {
    pub process_cwd: PathBuf,
    pub working_dir: PathBuf,
}

impl RuntimeScope {
    pub fn resolve(&self, path: &Path) -> PathBuf {
        absolutize_path(&self.working_dir, path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub recording: RecordingConfig,
    pub replay: ReplayConfig,
    pub evaluator: EvaluatorConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordingConfig {
    pub default_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayConfig {
    pub step_percent: f64,
    pub tick_step: f64,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub fallback_on_unparseable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recording: RecordingConfig {
                default_template: DEFAULT_TEMPLATE.to_string(),
            },
            replay: ReplayConfig {
                step_percent: DEFAULT_STEP_PERCENT,
                tick_step: DEFAULT_TICK_STEP,
                tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            },
            evaluator: EvaluatorConfig {
                command: None,
                args: Vec::new(),
                fallback_on_unparseable: true,
            },
            storage: StorageConfig {
                db_path: PathBuf::from(".codetrace/sessions.sqlite"),
            },
            logging: LoggingConfig {
                path: PathBuf::from(".codetrace/logs/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    recording: Option<PartialRecordingConfig>,
    replay: Option<PartialReplayConfig>,
    evaluator: Option<PartialEvaluatorConfig>,
    storage: Option<PartialStorageConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecordingConfig {
    default_template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReplayConfig {
    step_percent: Option<f64>,
    tick_step: Option<f64>,
    tick_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialEvaluatorConfig {
    command: Option<String>,
    args: Option<Vec<String>>,
    fallback_on_unparseable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialStorageConfig {
    db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<(AppConfig, RuntimeScope), CodetraceError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| CodetraceError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    let scope = resolve_scope(process_cwd, overrides);
    validate_config(&cfg)?;
    Ok((cfg, scope))
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(recording) = partial.recording {
        if let Some(value) = recording.default_template {
            cfg.recording.default_template = value;
        }
    }

    if let Some(replay) = partial.replay {
        if let Some(value) = replay.step_percent {
            cfg.replay.step_percent = value;
        }
        if let Some(value) = replay.tick_step {
            cfg.replay.tick_step = value;
        }
        if let Some(value) = replay.tick_interval_ms {
            cfg.replay.tick_interval_ms = value;
        }
    }

    if let Some(evaluator) = partial.evaluator {
        if let Some(value) = evaluator.command {
            cfg.evaluator.command = Some(value);
        }
        if let Some(value) = evaluator.args {
            cfg.evaluator.args = value;
        }
        if let Some(value) = evaluator.fallback_on_unparseable {
            cfg.evaluator.fallback_on_unparseable = value;
        }
    }

    if let Some(storage) = partial.storage {
        if let Some(value) = storage.db_path {
            cfg.storage.db_path = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(command) = &overrides.evaluator_command {
        cfg.evaluator.command = Some(command.clone());
    }
}

pub fn resolve_scope(process_cwd: &Path, overrides: &CliOverrides) -> RuntimeScope {
    let process_cwd = process_cwd.to_path_buf();
    let working_dir = match &overrides.working_dir {
        Some(path) => absolutize_path(&process_cwd, path),
        None => process_cwd.clone(),
    };
    RuntimeScope {
        process_cwd,
        working_dir,
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), CodetraceError> {
    if cfg.recording.default_template.is_empty() {
        return Err(CodetraceError::InvalidConfig(
            "recording.default_template must not be empty".to_string(),
        ));
    }

    if !(cfg.replay.step_percent > 0.0 && cfg.replay.step_percent <= 100.0) {
        return Err(CodetraceError::InvalidConfig(
            "replay.step_percent must be in (0, 100]".to_string(),
        ));
    }

    if !(cfg.replay.tick_step > 0.0 && cfg.replay.tick_step <= 100.0) {
        return Err(CodetraceError::InvalidConfig(
            "replay.tick_step must be in (0, 100]".to_string(),
        ));
    }

    if cfg.replay.tick_interval_ms == 0 {
        return Err(CodetraceError::InvalidConfig(
            "replay.tick_interval_ms must be greater than zero".to_string(),
        ));
    }

    if let Some(command) = &cfg.evaluator.command {
        if command.trim().is_empty() {
            return Err(CodetraceError::InvalidConfig(
                "evaluator.command must not be empty".to_string(),
            ));
        }
    }

    if cfg.storage.db_path.as_os_str().is_empty() {
        return Err(CodetraceError::InvalidConfig(
            "storage.db_path must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    fn load(
        body: &str,
        overrides: CliOverrides,
    ) -> Result<(AppConfig, RuntimeScope), CodetraceError> {
        let fs = FakeFileSystem::with_file("/repo/codetrace.toml", body);
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("codetrace.toml")),
            ..overrides
        };
        load_config(&overrides, Path::new("/repo"), &fs)
    }

    #[test]
    fn defaults_need_no_file() {
        let fs = FakeFileSystem::default();
        let (cfg, scope) =
            load_config(&CliOverrides::default(), Path::new("/repo"), &fs).expect("defaults");
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.replay.tick_interval_ms, 300);
        assert_eq!(scope.working_dir, PathBuf::from("/repo"));
        assert_eq!(
            scope.resolve(&cfg.storage.db_path),
            PathBuf::from("/repo/.codetrace/sessions.sqlite")
        );
    }

    #[test]
    fn file_values_merge_field_by_field() {
        let (cfg, _) = load(
            "[replay]\nstep_percent = 5.0\n\n[evaluator]\ncommand = \"score\"\nargs = [\"--json\"]\n",
            CliOverrides::default(),
        )
        .expect("load");
        assert_eq!(cfg.replay.step_percent, 5.0);
        assert_eq!(cfg.replay.tick_step, DEFAULT_TICK_STEP);
        assert_eq!(cfg.evaluator.command.as_deref(), Some("score"));
        assert_eq!(cfg.evaluator.args, vec!["--json"]);
        assert!(cfg.evaluator.fallback_on_unparseable);
    }

    #[test]
    fn cli_overrides_win_and_working_dir_is_absolutized() {
        let (cfg, scope) = load(
            "[evaluator]\ncommand = \"from-file\"\n",
            CliOverrides {
                evaluator_command: Some("from-cli".to_string()),
                working_dir: Some(PathBuf::from("sub")),
                ..CliOverrides::default()
            },
        )
        .expect("load");
        assert_eq!(cfg.evaluator.command.as_deref(), Some("from-cli"));
        assert_eq!(scope.working_dir, PathBuf::from("/repo/sub"));
        assert_eq!(
            scope.resolve(Path::new("/abs/x.sqlite")),
            PathBuf::from("/abs/x.sqlite")
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        for body in [
            "[replay]\nstep_percent = 0.0\n",
            "[replay]\ntick_step = 150.0\n",
            "[replay]\ntick_interval_ms = 0\n",
            "[recording]\ndefault_template = \"\"\n",
            "[evaluator]\ncommand = \"  \"\n",
        ] {
            let err = load(body, CliOverrides::default()).expect_err(body);
            assert!(matches!(err, CodetraceError::InvalidConfig(_)), "{body}");
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = load("[replay\nstep_percent = 1", CliOverrides::default()).expect_err("parse");
        assert!(matches!(err, CodetraceError::ConfigParse(_)));
        let err = load("[unknown]\nx = 1\n", CliOverrides::default()).expect_err("unknown");
        assert!(matches!(err, CodetraceError::ConfigParse(_)));
    }
}
