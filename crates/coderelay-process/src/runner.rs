//! Launching files and supervising their execution.

use std::{
    io,
    os::unix::{fs::PermissionsExt, process::ExitStatusExt},
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, OnceLock},
    time::Duration,
};

use coderelay_core::{OutboundMessage, OutboundTx, OutputStream, join_confined};
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use nix::{
    errno::Errno,
    sys::signal::{Signal, killpg},
    unistd::Pid,
};
use thiserror::Error;
use tokio::{process::Command, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    relay::{OutputReader, relay_stream},
    shell::{DEFAULT_SHELL, LaunchShell},
    terminal::{self, OutputMode, TerminalReader},
};

/// How long a cancelled process may take to exit after `SIGTERM`.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long relays may keep reading after the process has exited.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How often a signalled process group is checked for survivors.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Process runner error.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("File does not exist")]
    FileNotFound(PathBuf),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Shell not found: {0}")]
    ShellNotFound(String),
    #[error("Failed to start process: {0}")]
    Spawn(#[source] io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell used to launch files (path or name on `PATH`).
    pub shell: String,
    /// How stdout/stderr are attached.
    pub output_mode: OutputMode,
    /// Time between `SIGTERM` and `SIGKILL` on cancellation.
    pub terminate_grace: Duration,
    /// Time allowed for output to drain after a natural exit.
    pub drain_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            output_mode: OutputMode::default(),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Launches files from one working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    working_dir: PathBuf,
    config: RunnerConfig,
}

impl ProcessRunner {
    /// Create a runner bound to `working_dir`.
    #[must_use]
    pub fn new(working_dir: impl Into<PathBuf>, config: RunnerConfig) -> Self {
        Self {
            working_dir: working_dir.into(),
            config,
        }
    }

    /// Directory children run in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Check that `filename` names a regular file under the working
    /// directory and make it executable.
    ///
    /// # Errors
    /// Returns `InvalidPath` for paths escaping the working directory,
    /// `FileNotFound` if the file is missing, `Io` if permissions cannot be set.
    pub async fn prepare(&self, filename: &str) -> Result<PathBuf, ProcessError> {
        let path = join_confined(&self.working_dir, filename)
            .ok_or_else(|| ProcessError::InvalidPath(filename.to_string()))?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(ProcessError::FileNotFound(path)),
        };

        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o111);
        tokio::fs::set_permissions(&path, permissions).await?;
        tracing::debug!(path = %path.display(), "Marked file executable");

        Ok(path)
    }

    /// Launch a prepared file.
    ///
    /// The child runs in the working directory, in its own process group,
    /// with stdin closed and its output attached per the configured
    /// [`OutputMode`].
    ///
    /// # Errors
    /// Returns `ShellNotFound` or `Spawn` if the process cannot be started.
    pub async fn spawn(&self, script: &Path) -> Result<SpawnedProcess, ProcessError> {
        let shell = LaunchShell::resolve(&self.config.shell).await?;

        let mut command = Command::new(shell.path());
        command
            .args(shell.script_args(script)?)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let readers = match self.open_terminals() {
            Some(((stdout_stdio, stdout_reader), (stderr_stdio, stderr_reader))) => {
                command.stdout(stdout_stdio).stderr(stderr_stdio);
                Some((
                    Box::new(stdout_reader) as OutputReader,
                    Box::new(stderr_reader) as OutputReader,
                ))
            }
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                None
            }
        };

        let mut child = command.group_spawn().map_err(ProcessError::Spawn)?;
        // The command still owns our copies of the terminal slaves; the
        // masters only report EOF once those are closed too.
        drop(command);
        // The leader's pid names the group; `child.id()` is gone once it is reaped.
        let pgid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(Pid::from_raw);

        let (stdout, stderr) = match readers {
            Some(readers) => readers,
            None => {
                let inner = child.inner();
                let stdout = inner.stdout.take().ok_or_else(|| {
                    ProcessError::Spawn(io::Error::other("stdout was not captured"))
                })?;
                let stderr = inner.stderr.take().ok_or_else(|| {
                    ProcessError::Spawn(io::Error::other("stderr was not captured"))
                })?;
                (
                    Box::new(stdout) as OutputReader,
                    Box::new(stderr) as OutputReader,
                )
            }
        };

        tracing::info!(
            script = %script.display(),
            pid = ?child.id(),
            mode = %self.config.output_mode,
            "Spawned process"
        );

        Ok(SpawnedProcess {
            child,
            pgid,
            stdout,
            stderr,
            script: script.to_path_buf(),
            terminate_grace: self.config.terminate_grace,
            drain_timeout: self.config.drain_timeout,
        })
    }

    /// Prepare, launch and supervise `filename`.
    ///
    /// `starting` is sent on `tx` once the process exists and before any of
    /// its output can be relayed.
    ///
    /// # Errors
    /// Returns any error from [`Self::prepare`] or [`Self::spawn`]; nothing
    /// is sent on `tx` in that case.
    pub async fn start(&self, filename: &str, tx: OutboundTx) -> Result<RunHandle, ProcessError> {
        let script = self.prepare(filename).await?;
        let process = self.spawn(&script).await?;
        let _ = tx.send(OutboundMessage::starting());
        Ok(process.supervise(tx))
    }

    fn open_terminals(&self) -> Option<((Stdio, TerminalReader), (Stdio, TerminalReader))> {
        if self.config.output_mode == OutputMode::Pipe {
            return None;
        }
        match (terminal::attach(), terminal::attach()) {
            (Ok(stdout), Ok(stderr)) => Some((stdout, stderr)),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("Pseudo-terminal unavailable, falling back to pipes: {e}");
                None
            }
        }
    }
}

/// A launched child whose output has not been relayed yet.
pub struct SpawnedProcess {
    child: AsyncGroupChild,
    pgid: Option<Pid>,
    stdout: OutputReader,
    stderr: OutputReader,
    script: PathBuf,
    terminate_grace: Duration,
    drain_timeout: Duration,
}

impl SpawnedProcess {
    /// Start relaying output to `tx` and watching for exit.
    #[must_use]
    pub fn supervise(self, tx: OutboundTx) -> RunHandle {
        let id = Uuid::new_v4();
        let pid = self.child.id();
        let cancel = CancellationToken::new();
        let exit_code = Arc::new(OnceLock::new());

        let task = tokio::spawn(self.run(id, tx, cancel.clone(), Arc::clone(&exit_code)));

        RunHandle {
            id,
            pid,
            cancel,
            exit_code,
            task: Some(task),
        }
    }

    async fn run(
        self,
        id: Uuid,
        tx: OutboundTx,
        cancel: CancellationToken,
        exit_code: Arc<OnceLock<i32>>,
    ) {
        let Self {
            mut child,
            pgid,
            stdout,
            stderr,
            script,
            terminate_grace,
            drain_timeout,
        } = self;

        let relay_cancel = cancel.child_token();
        let mut relays = vec![
            tokio::spawn(relay_stream(
                stdout,
                OutputStream::Stdout,
                tx.clone(),
                relay_cancel.clone(),
            )),
            tokio::spawn(relay_stream(
                stderr,
                OutputStream::Stderr,
                tx.clone(),
                relay_cancel.clone(),
            )),
        ];

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };

        match status {
            None => {
                relay_cancel.cancel();
                join_relays(&mut relays).await;
                terminate(&mut child, pgid, terminate_grace).await;
                tracing::info!(run = %id, script = %script.display(), "Run cancelled");
            }
            Some(Err(e)) => {
                tracing::warn!(run = %id, "Failed to wait for process: {e}");
                relay_cancel.cancel();
                join_relays(&mut relays).await;
                terminate(&mut child, pgid, terminate_grace).await;
                let _ = tx.send(OutboundMessage::error(format!("Lost track of process: {e}")));
            }
            Some(Ok(status)) => {
                let code = exit_code_of(status);
                if tokio::time::timeout(drain_timeout, join_relays(&mut relays))
                    .await
                    .is_err()
                {
                    tracing::debug!(run = %id, "Output still open after exit, closing relays");
                    relay_cancel.cancel();
                    join_relays(&mut relays).await;
                }

                if cancel.is_cancelled() {
                    tracing::info!(run = %id, code, "Run cancelled after exit");
                } else {
                    if exit_code.set(code).is_ok() {
                        let _ = tx.send(OutboundMessage::finished(code));
                    }
                    tracing::info!(run = %id, script = %script.display(), code, "Run finished");
                }

                // Background jobs the file left behind go with the run.
                if let Some(pgid) = pgid {
                    let deadline = Instant::now() + terminate_grace;
                    if signal_group(pgid, Signal::SIGTERM) {
                        tracing::debug!(run = %id, "Stopping leftover processes");
                        stop_group(pgid, deadline).await;
                    }
                }
            }
        }
    }
}

/// Await relays, removing each one only after it has completed so the
/// call can be interrupted and resumed.
async fn join_relays(relays: &mut Vec<JoinHandle<u64>>) {
    while let Some(relay) = relays.last_mut() {
        match relay.await {
            Ok(bytes) => tracing::debug!(bytes, "Relay finished"),
            Err(e) => tracing::warn!("Relay task failed: {e}"),
        }
        relays.pop();
    }
}

/// `SIGTERM` the process group, then `SIGKILL` whatever of it outlives
/// `grace`, and reap the leader.
async fn terminate(child: &mut AsyncGroupChild, pgid: Option<Pid>, grace: Duration) {
    let deadline = Instant::now() + grace;
    let Some(pgid) = pgid else {
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill process: {e}");
        }
        return;
    };

    signal_group(pgid, Signal::SIGTERM);
    let reaped = match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!(?status, "Process terminated");
            true
        }
        Ok(Err(e)) => {
            tracing::warn!("Failed to reap process: {e}");
            false
        }
        Err(_) => false,
    };

    stop_group(pgid, deadline).await;
    if !reaped {
        if let Err(e) = child.wait().await {
            tracing::warn!("Failed to reap process: {e}");
        }
    }
}

/// Wait until `deadline` for the group to empty, then `SIGKILL` the rest.
async fn stop_group(pgid: Pid, deadline: Instant) {
    loop {
        // Signal 0 only probes whether any member is left.
        if !probe_group(pgid) {
            return;
        }
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
    tracing::warn!(pgid = pgid.as_raw(), "Process group ignored SIGTERM, killing it");
    signal_group(pgid, Signal::SIGKILL);
}

/// Send `signal` to every process in the group. Returns `false` once the
/// group is gone.
fn signal_group(pgid: Pid, signal: Signal) -> bool {
    group_result(pgid, killpg(pgid, signal))
}

fn probe_group(pgid: Pid) -> bool {
    group_result(pgid, killpg(pgid, None::<Signal>))
}

fn group_result(pgid: Pid, result: nix::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            tracing::warn!(pgid = pgid.as_raw(), "Failed to signal process group: {e}");
            false
        }
    }
}

/// Exit code, using the shell convention `128 + signal` for signalled exits.
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

/// Live handle on one supervised execution.
///
/// Dropping the handle cancels the run; use [`RunHandle::cancel`] to also
/// wait until the process is gone.
pub struct RunHandle {
    id: Uuid,
    pid: Option<u32>,
    cancel: CancellationToken,
    exit_code: Arc<OnceLock<i32>>,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// OS process id, if known at spawn time.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code of a run that ended on its own.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    /// Whether the run is neither finished nor cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.exit_code.get().is_none()
            && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Wait for the run to end and return its exit code (`None` if it was
    /// cancelled).
    pub async fn wait(&mut self) -> Option<i32> {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(run = %self.id, "Run supervisor failed: {e}");
            }
        }
        self.exit_code()
    }

    /// Cancel the run and wait until its relays are stopped and the
    /// process is gone. Safe to call after the process has exited.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(run = %self.id, "Run supervisor failed: {e}");
            }
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code())
            .field("active", &self.is_active())
            .finish()
    }
}
