//! Backend Process Supervision
//!
//! Owns the out-of-process backend: executable resolution, spawning,
//! liveness queries and process-tree teardown.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use super::config::{app_dir, BackendSettings};
use super::error::ProcessError;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Observed lifecycle state of the backend process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Spawn and teardown parameters
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Used when `start` gets no override
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// How long a fresh child must stay alive to count as started
    pub start_grace: Duration,
    /// Upper bound on waiting for exit after the kill
    pub stop_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        let dir = app_dir();
        Self {
            executable: default_executable(&dir),
            args: Vec::new(),
            working_dir: dir,
            start_grace: Duration::from_millis(250),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl SupervisorOptions {
    pub fn from_settings(settings: &BackendSettings) -> Self {
        let defaults = Self::default();
        Self {
            executable: settings.executable.clone().unwrap_or(defaults.executable),
            args: settings.args.clone(),
            start_grace: Duration::from_millis(settings.start_grace_ms),
            stop_timeout: Duration::from_millis(settings.stop_timeout_ms),
            ..defaults
        }
    }
}

/// Default backend executable: `dist/main` next to the application binary
pub fn default_executable(app_dir: &Path) -> PathBuf {
    let name = if cfg!(target_os = "windows") { "main.exe" } else { "main" };
    app_dir.join("dist").join(name)
}

struct Inner {
    child: Option<Child>,
    state: ProcessState,
    spawn_count: u64,
}

impl Inner {
    /// Recorded state reconciled with the child's actual liveness
    fn observe(&mut self) -> Snapshot {
        let alive = self
            .child
            .as_mut()
            .map(|child| matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false);

        let state = if self.state == ProcessState::Running && !alive {
            ProcessState::Stopped
        } else {
            self.state
        };
        let pid = match &self.child {
            Some(child) if alive => child.id(),
            _ => 0,
        };

        Snapshot {
            state,
            pid,
            spawn_count: self.spawn_count,
        }
    }
}

/// Last published view of the lifecycle, readable while a start or stop
/// holds the lifecycle lock
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    state: ProcessState,
    pid: u32,
    spawn_count: u64,
}

/// Supervisor for at most one backend process.
///
/// All waits are bounded; a hung child can delay `stop` by at most
/// `stop_timeout`. Liveness queries never wait for a start or stop in
/// progress, they report the state it last published.
pub struct ProcessSupervisor {
    inner: Mutex<Inner>,
    published: Mutex<Snapshot>,
    options: SupervisorOptions,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                child: None,
                state: ProcessState::NotStarted,
                spawn_count: 0,
            }),
            published: Mutex::new(Snapshot {
                state: ProcessState::NotStarted,
                pid: 0,
                spawn_count: 0,
            }),
            options,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn published(&self) -> MutexGuard<'_, Snapshot> {
        self.published.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut Inner, state: ProcessState) {
        inner.state = state;
        let snapshot = inner.observe();
        *self.published() = snapshot;
    }

    fn snapshot(&self) -> Snapshot {
        let mut inner = match self.inner.try_lock() {
            Ok(inner) => inner,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return *self.published(),
        };
        // Published under the lifecycle lock so a concurrent transition wins
        let observed = inner.observe();
        *self.published() = observed;
        observed
    }

    /// Start the backend. Returns true if it is running afterwards.
    pub fn start(&self, path_override: Option<&Path>) -> bool {
        match self.try_start(path_override) {
            Ok(pid) => {
                log::info!("[Backend] Running (PID: {})", pid);
                true
            }
            Err(e) => {
                log::error!("[Backend] {}", e);
                false
            }
        }
    }

    /// Start the backend, returning its process id.
    pub fn try_start(&self, path_override: Option<&Path>) -> Result<u32, ProcessError> {
        let mut inner = self.lock();

        if let Some(child) = inner.child.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    log::info!("[Backend] Already running");
                    return Ok(child.id());
                }
                Ok(Some(status)) => {
                    log::warn!("[Backend] Previous process exited ({})", status);
                }
                Err(e) => {
                    log::warn!("[Backend] Could not query previous process: {}", e);
                }
            }
        }
        if let Some(mut previous) = inner.child.take() {
            self.teardown(&mut previous);
        }

        let path = path_override
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.options.executable.clone());

        log::info!("[Backend] Starting backend from {:?}", path);
        log::info!("[Backend] Working directory: {:?}", self.options.working_dir);
        self.transition(&mut inner, ProcessState::Starting);

        let mut child = match spawn_backend(&path, &self.options.args, &self.options.working_dir) {
            Ok(child) => child,
            Err(source) => {
                self.transition(&mut inner, ProcessState::Failed);
                return Err(ProcessError::Spawn { path, source });
            }
        };
        inner.spawn_count += 1;

        forward_output(&mut child);

        if let Some(status) = wait_for_exit(&mut child, self.options.start_grace) {
            self.teardown(&mut child);
            self.transition(&mut inner, ProcessState::Failed);
            return Err(ProcessError::ExitedDuringStart(status.to_string()));
        }

        let pid = child.id();
        inner.child = Some(child);
        self.transition(&mut inner, ProcessState::Running);
        Ok(pid)
    }

    /// Stop the backend and every process it spawned.
    ///
    /// Always releases the handle, even if the process would not exit.
    pub fn stop(&self) {
        let mut inner = self.lock();

        let Some(mut child) = inner.child.take() else {
            if inner.state != ProcessState::NotStarted {
                self.transition(&mut inner, ProcessState::Stopped);
            }
            return;
        };

        self.transition(&mut inner, ProcessState::Stopping);
        log::info!("[Backend] Stopping backend (PID: {})", child.id());

        self.teardown(&mut child);

        self.transition(&mut inner, ProcessState::Stopped);
        log::info!("[Backend] Stopped");
    }

    /// Kill the child's process tree and reap the child.
    ///
    /// On Unix the process group is signalled even when the leader has
    /// already exited, so workers it left behind go down with it.
    fn teardown(&self, child: &mut Child) {
        let pid = child.id();
        let leader_alive = matches!(child.try_wait(), Ok(None));

        if (cfg!(unix) || leader_alive) && !kill_process_tree(pid) && leader_alive {
            log::warn!("[Backend] Tree kill unavailable, killing PID {} directly", pid);
            let _ = child.kill();
        }

        if leader_alive && wait_for_exit(child, self.options.stop_timeout).is_none() {
            log::warn!(
                "[Backend] PID {} still alive after {:?}, releasing handle",
                pid,
                self.options.stop_timeout
            );
            let _ = child.kill();
        }
    }

    /// Stop, then start a fresh process.
    pub fn restart(&self, path_override: Option<&Path>) -> bool {
        self.stop();
        self.start(path_override)
    }

    pub fn is_running(&self) -> bool {
        self.snapshot().state == ProcessState::Running
    }

    /// Process id of the running backend, 0 when not running
    pub fn process_id(&self) -> u32 {
        self.snapshot().pid
    }

    pub fn state(&self) -> ProcessState {
        self.snapshot().state
    }

    /// Number of processes spawned over the supervisor's lifetime
    pub fn spawn_count(&self) -> u64 {
        self.snapshot().spawn_count
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll until the child exits or `timeout` passes.
fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if start.elapsed() < timeout => std::thread::sleep(POLL_INTERVAL),
            Ok(None) => return None,
            Err(e) => {
                log::error!("[Backend] Error checking process status: {}", e);
                return None;
            }
        }
    }
}

/// Spawn the backend executable
fn spawn_backend(path: &Path, args: &[String], cwd: &Path) -> std::io::Result<Child> {
    let mut cmd = Command::new(path);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Unix: own process group so the whole tree can be signalled
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    // Windows-specific: hide console window
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn()
}

/// Pipe child stdout/stderr into the log
fn forward_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        spawn_log_reader(stdout, false);
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_log_reader(stderr, true);
    }
}

fn spawn_log_reader(stream: impl Read + Send + 'static, is_stderr: bool) {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            if line.is_empty() {
                continue;
            }
            if is_stderr && is_error_line(&line) {
                log::error!("[Backend Error] {}", line);
            } else {
                log::info!("[Backend] {}", line);
            }
        }
    });
}

fn is_error_line(line: &str) -> bool {
    line.contains("ERROR") || line.contains("Exception") || line.contains("Traceback")
}

/// Force kill a process and its descendants. False if the kill could not be issued.
#[cfg(unix)]
fn kill_process_tree(pid: u32) -> bool {
    // Negative PID targets the process group created at spawn
    Command::new("kill")
        .args(["-9", "--", &format!("-{}", pid)])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(target_os = "windows")]
fn kill_process_tree(pid: u32) -> bool {
    use std::os::windows::process::CommandExt;

    Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .creation_flags(CREATE_NO_WINDOW)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
