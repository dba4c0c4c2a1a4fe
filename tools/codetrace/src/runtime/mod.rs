use crate::errors::CodetraceError;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CodetraceError>;

    fn now_unix_ms(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, CodetraceError>;
    fn wait(&self, handle: u64) -> Result<ProcessOutput, CodetraceError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CodetraceError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, CodetraceError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CodetraceError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), CodetraceError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdin_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), CodetraceError>;
    fn draw(&self, frame: &str) -> Result<(), CodetraceError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CodetraceError> {
        if let Ok(duration) = deadline.duration_since(SystemTime::now()) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CodetraceError> {
        std::fs::read_to_string(path).map_err(|e| CodetraceError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CodetraceError> {
        std::fs::write(path, contents).map_err(|e| CodetraceError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), CodetraceError> {
        std::fs::create_dir_all(path).map_err(|e| CodetraceError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, std::process::Child>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, CodetraceError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(if request.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| CodetraceError::Process(format!("{}: {e}", request.program)))?;
        if let (Some(input), Some(mut pipe)) = (request.stdin.as_ref(), child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .map_err(|e| CodetraceError::Process(e.to_string()))?;
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| CodetraceError::Process("process lock poisoned".to_string()))?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, CodetraceError> {
        let child = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CodetraceError::Process("process lock poisoned".to_string()))?;
            state.children.remove(&handle)
        };
        let child =
            child.ok_or_else(|| CodetraceError::Process(format!("unknown handle {handle}")))?;
        let output = child
            .wait_with_output()
            .map_err(|e| CodetraceError::Process(e.to_string()))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdin_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdin())
    }

    fn write_line(&self, line: &str) -> Result<(), CodetraceError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| CodetraceError::Io(e.to_string()))
    }

    fn draw(&self, frame: &str) -> Result<(), CodetraceError> {
        self.write_line(frame)
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Manually driven clock. `sleep_until` jumps straight to the deadline.
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn at_unix_ms(ms: u64) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_millis(ms))
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: SystemTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        self.now.lock().map(|now| *now).unwrap_or(UNIX_EPOCH)
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), CodetraceError> {
        self.sleeps
            .lock()
            .map_err(|_| CodetraceError::Io("sleep lock poisoned".to_string()))?
            .push(deadline);
        self.set(deadline);
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<CodetraceError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        if let Ok(mut files) = fs.files.lock() {
            files.insert(path.into(), contents.into());
        }
        fs
    }

    pub fn set_fail_next(&self, error: CodetraceError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        self.files.lock().ok().and_then(|files| files.get(path).cloned())
    }

    fn maybe_fail(&self) -> Result<(), CodetraceError> {
        if let Some(err) = self.fail_next.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(err);
        }
        Ok(())
    }

    fn files(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PathBuf, String>>, CodetraceError> {
        self.files
            .lock()
            .map_err(|_| CodetraceError::Io("files lock poisoned".to_string()))
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CodetraceError> {
        self.maybe_fail()?;
        self.files()?
            .get(path)
            .cloned()
            .ok_or_else(|| CodetraceError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CodetraceError> {
        self.maybe_fail()?;
        self.files()?
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), CodetraceError> {
        self.maybe_fail()?;
        self.dirs
            .lock()
            .map_err(|_| CodetraceError::Io("dirs lock poisoned".to_string()))?
            .push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
    draws: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        self.draws.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Terminal for FakeTerminal {
    fn stdin_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), CodetraceError> {
        self.writes
            .lock()
            .map_err(|_| CodetraceError::Io("writes lock poisoned".to_string()))?
            .push(line.to_string());
        Ok(())
    }

    fn draw(&self, frame: &str) -> Result<(), CodetraceError> {
        self.draws
            .lock()
            .map_err(|_| CodetraceError::Io("draw lock poisoned".to_string()))?
            .push(frame.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, CodetraceError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, CodetraceError>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push(output);
        }
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, CodetraceError> {
        self.spawned
            .lock()
            .map_err(|_| CodetraceError::Process("spawned lock poisoned".to_string()))?
            .push(request);
        let mut next = self
            .next_handle
            .lock()
            .map_err(|_| CodetraceError::Process("handle lock poisoned".to_string()))?;
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn wait(&self, _handle: u64) -> Result<ProcessOutput, CodetraceError> {
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| CodetraceError::Process("responses lock poisoned".to_string()))?;
        if responses.is_empty() {
            return Err(CodetraceError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_sleep_jumps_to_deadline() {
        let clock = FakeClock::at_unix_ms(1_000);
        let deadline = UNIX_EPOCH + Duration::from_millis(1_300);
        clock.sleep_until(deadline).expect("sleep");
        assert_eq!(clock.now_unix_ms(), 1_300);
        assert_eq!(clock.sleeps(), vec![deadline]);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now_unix_ms(), 1_305);
    }

    #[test]
    fn fake_process_runner_replays_queued_outputs_in_order() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: "{}".to_string(),
            stderr: String::new(),
        }));
        let out = runner
            .run(ProcessRequest {
                program: "evaluate".to_string(),
                args: vec![],
                cwd: None,
                stdin: Some("payload".to_string()),
            })
            .expect("run");
        assert_eq!(out.stdout, "{}");
        assert_eq!(runner.spawned()[0].stdin.as_deref(), Some("payload"));
        assert!(runner
            .run(ProcessRequest {
                program: "evaluate".to_string(),
                args: vec![],
                cwd: None,
                stdin: None,
            })
            .is_err());
    }

    #[test]
    fn fake_file_system_can_fail_once() {
        let fs = FakeFileSystem::with_file("/a.json", "{}");
        fs.set_fail_next(CodetraceError::Io("boom".to_string()));
        assert!(fs.read_to_string(Path::new("/a.json")).is_err());
        assert_eq!(fs.read_to_string(Path::new("/a.json")).expect("read"), "{}");
    }
}
