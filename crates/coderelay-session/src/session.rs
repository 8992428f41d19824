//! Per-connection session state and request dispatch.
//!
//! A session is driven by exactly one transport connection. Requests are
//! handled one at a time in arrival order; handlers that start background
//! work (runs, directory reporting) return as soon as it is scheduled.
//! Only the dispatcher touches the working directory and the active
//! handles.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use coderelay_core::{InboundMessage, OutboundMessage, OutboundTx, RequestKind};
use coderelay_process::{ProcessError, ProcessRunner, RunHandle};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::SessionConfig,
    reporter::{ReporterHandle, spawn_reporter},
    storage::{FileStore, FileStoreError},
};

/// Session error. The display text is what the client receives.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No request was made")]
    NoRequest,
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
    #[error("No working directory set")]
    NoWorkingDirectory,
    #[error("Directory does not exist")]
    DirectoryNotFound(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Store(#[from] FileStoreError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// State of one client connection.
pub struct Session {
    id: Uuid,
    config: Arc<SessionConfig>,
    outbound: OutboundTx,
    working_directory: Option<PathBuf>,
    active_run: Option<RunHandle>,
    active_reporter: Option<ReporterHandle>,
}

impl Session {
    /// Create a session that reports to `outbound`.
    #[must_use]
    pub fn new(config: Arc<SessionConfig>, outbound: OutboundTx) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, "Session created");
        Self {
            id,
            config,
            outbound,
            working_directory: None,
            active_run: None,
            active_reporter: None,
        }
    }

    /// Identifier used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current working directory, once set.
    #[must_use]
    pub fn working_directory(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn has_active_run(&self) -> bool {
        self.active_run.as_ref().is_some_and(RunHandle::is_active)
    }

    /// The current run handle, finished or not.
    #[must_use]
    pub const fn active_run(&self) -> Option<&RunHandle> {
        self.active_run.as_ref()
    }

    /// Directory the reporter is listing, if one is running.
    #[must_use]
    pub fn reported_directory(&self) -> Option<&Path> {
        self.active_reporter.as_ref().map(ReporterHandle::root)
    }

    /// Handle one raw JSON frame.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::warn!(session = %self.id, "Invalid client message: {e}");
                self.reply_error(&SessionError::InvalidMessage(e));
            }
        }
    }

    /// Handle one request. Failures are reported to the client as `error`
    /// responses; the session always stays usable.
    pub async fn handle(&mut self, message: InboundMessage) {
        if let Err(e) = self.dispatch(&message).await {
            tracing::debug!(
                session = %self.id,
                request = message.request.as_deref().unwrap_or_default(),
                "Request failed: {e}"
            );
            self.reply_error(&e);
        }
    }

    async fn dispatch(&mut self, message: &InboundMessage) -> Result<(), SessionError> {
        let Some(tag) = message.request.as_deref() else {
            return Err(SessionError::NoRequest);
        };
        let Some(kind) = message.kind() else {
            tracing::debug!(session = %self.id, request = tag, "Ignoring unknown request");
            return Ok(());
        };
        tracing::debug!(session = %self.id, request = kind.as_str(), "Dispatching request");

        match kind {
            RequestKind::SetWorkingDirectory => {
                let path = message
                    .data_str()
                    .ok_or(SessionError::MissingField("data"))?;
                self.set_working_directory(path).await
            }
            RequestKind::Run => {
                let filename = message
                    .target()
                    .ok_or(SessionError::MissingField("data"))?;
                self.run(filename).await
            }
            RequestKind::Terminate => {
                self.terminate().await;
                Ok(())
            }
            RequestKind::GetFileContents => {
                let filename = message
                    .target()
                    .ok_or(SessionError::MissingField("data"))?;
                let contents = self.store()?.read(filename).await?;
                self.send(OutboundMessage::file_contents(filename, contents));
                Ok(())
            }
            RequestKind::CreateFile => {
                let filename = message
                    .target()
                    .ok_or(SessionError::MissingField("data"))?;
                self.store()?.create(filename).await?;
                self.send(OutboundMessage::file_contents(filename, ""));
                Ok(())
            }
            RequestKind::SaveFile => {
                let filename = message
                    .filename
                    .as_deref()
                    .filter(|name| !name.is_empty())
                    .ok_or(SessionError::MissingField("filename"))?;
                let contents = message
                    .data_str()
                    .ok_or(SessionError::MissingField("data"))?;
                self.store()?.write(filename, contents).await?;
                Ok(())
            }
            RequestKind::DeleteFile => {
                let filename = message
                    .target()
                    .ok_or(SessionError::MissingField("data"))?;
                self.store()?.delete(filename).await?;
                Ok(())
            }
        }
    }

    async fn set_working_directory(&mut self, requested: &str) -> Result<(), SessionError> {
        let requested = requested.trim();
        if requested.is_empty() {
            return Err(SessionError::MissingField("data"));
        }

        let candidate = self.config.root.join(requested);
        let directory = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) => path,
            _ => return Err(SessionError::DirectoryNotFound(requested.to_string())),
        };

        if let Some(reporter) = self.active_reporter.take() {
            reporter.cancel().await;
        }
        self.active_reporter = Some(spawn_reporter(
            directory.clone(),
            self.config.report_interval,
            self.outbound.clone(),
        ));
        tracing::info!(session = %self.id, dir = %directory.display(), "Working directory set");
        self.working_directory = Some(directory);

        self.push_default_file().await;
        Ok(())
    }

    /// Send the configured default file, if the new directory has one.
    async fn push_default_file(&self) {
        let (Some(name), Ok(store)) = (self.config.default_file.as_deref(), self.store()) else {
            return;
        };
        if !store.exists(name).await {
            return;
        }
        match store.read(name).await {
            Ok(contents) => self.send(OutboundMessage::file_contents(name, contents)),
            Err(e) => tracing::warn!(session = %self.id, file = name, "Failed to read default file: {e}"),
        }
    }

    async fn run(&mut self, filename: &str) -> Result<(), SessionError> {
        let directory = self
            .working_directory
            .clone()
            .ok_or(SessionError::NoWorkingDirectory)?;

        self.terminate().await;

        let runner = ProcessRunner::new(directory, self.config.runner.clone());
        let handle = runner.start(filename, self.outbound.clone()).await?;
        tracing::info!(session = %self.id, run = %handle.id(), file = filename, "Run started");
        self.active_run = Some(handle);
        Ok(())
    }

    /// Cancel the active run, if any, and wait until it is torn down.
    async fn terminate(&mut self) {
        if let Some(run) = self.active_run.take() {
            tracing::debug!(session = %self.id, run = %run.id(), "Cancelling run");
            run.cancel().await;
        }
    }

    /// Cancel the active run and reporter. Call when the connection closes.
    pub async fn close(mut self) {
        self.terminate().await;
        if let Some(reporter) = self.active_reporter.take() {
            reporter.cancel().await;
        }
        tracing::debug!(session = %self.id, "Session closed");
    }

    fn store(&self) -> Result<FileStore, SessionError> {
        self.working_directory
            .as_deref()
            .map(FileStore::new)
            .ok_or(SessionError::NoWorkingDirectory)
    }

    fn send(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!(session = %self.id, "Client gone, dropping message");
        }
    }

    fn reply_error(&self, error: &SessionError) {
        self.send(OutboundMessage::error(error.to_string()));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("working_directory", &self.working_directory)
            .field("active_run", &self.active_run)
            .field("active_reporter", &self.active_reporter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coderelay_core::{OutputStream, ResponseKind};
    use coderelay_process::{OutputMode, RunnerConfig};
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    struct Harness {
        dir: TempDir,
        session: Session,
        rx: UnboundedReceiver<OutboundMessage>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_config(tweak: impl FnOnce(&mut SessionConfig)) -> Self {
            let dir = TempDir::new().unwrap();
            let mut config = SessionConfig::new(dir.path());
            config.report_interval = Duration::from_millis(100);
            config.runner = RunnerConfig {
                output_mode: OutputMode::Pipe,
                terminate_grace: Duration::from_millis(300),
                ..RunnerConfig::default()
            };
            tweak(&mut config);
            let (tx, rx) = mpsc::unbounded_channel();
            let session = Session::new(Arc::new(config), tx);
            Self { dir, session, rx }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        async fn request(&mut self, value: serde_json::Value) {
            self.session.handle_text(&value.to_string()).await;
        }

        async fn enter_workdir(&mut self) {
            let dir = self.path().display().to_string();
            self.request(json!({"request": "set-working-directory", "data": dir}))
                .await;
        }

        /// Next message that is not a directory listing.
        async fn next(&mut self) -> Option<OutboundMessage> {
            let deadline = tokio::time::Instant::now() + WAIT;
            loop {
                let msg = tokio::time::timeout_at(deadline, self.rx.recv()).await.ok()??;
                if msg.response != ResponseKind::Files {
                    return Some(msg);
                }
            }
        }

        /// Non-listing messages arriving within `window`.
        async fn quiet_for(&mut self, window: Duration) -> Vec<OutboundMessage> {
            let deadline = tokio::time::Instant::now() + window;
            let mut out = Vec::new();
            while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
                if msg.response != ResponseKind::Files {
                    out.push(msg);
                }
            }
            out
        }

        /// Messages up to and including the next `finished`.
        async fn until_finished(&mut self) -> Vec<OutboundMessage> {
            let mut out = Vec::new();
            while let Some(msg) = self.next().await {
                let done = msg.response == ResponseKind::Finished;
                out.push(msg);
                if done {
                    break;
                }
            }
            out
        }

        fn write(&self, name: &str, body: &str) {
            std::fs::write(self.path().join(name), body).unwrap();
        }
    }

    fn stdout_of(msgs: &[OutboundMessage]) -> String {
        msgs.iter()
            .filter(|m| m.response == ResponseKind::Stdout)
            .filter_map(OutboundMessage::data_str)
            .collect()
    }

    fn count(msgs: &[OutboundMessage], kind: ResponseKind) -> usize {
        msgs.iter().filter(|m| m.response == kind).count()
    }

    #[tokio::test]
    async fn test_missing_request_is_an_error() {
        let mut h = Harness::new();
        h.request(json!({"data": "a.sh"})).await;
        assert_eq!(h.next().await, Some(OutboundMessage::error("No request was made")));

        // The session keeps working afterwards.
        h.enter_workdir().await;
        assert!(h.session.working_directory().is_some());
    }

    #[tokio::test]
    async fn test_malformed_json_is_an_error() {
        let mut h = Harness::new();
        h.session.handle_text("{not json").await;
        let msg = h.next().await.unwrap();
        assert_eq!(msg.response, ResponseKind::Error);
        assert!(msg.description.unwrap().starts_with("Invalid message"));
    }

    #[tokio::test]
    async fn test_unknown_request_is_ignored() {
        let mut h = Harness::new();
        h.request(json!({"request": "reticulate-splines", "data": 1})).await;
        assert!(h.quiet_for(Duration::from_millis(200)).await.is_empty());

        h.enter_workdir().await;
        h.request(json!({"request": "create-file", "data": "x.txt"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::file_contents("x.txt", ""))
        );
    }

    #[tokio::test]
    async fn test_run_without_working_directory_fails() {
        let mut h = Harness::new();
        h.request(json!({"request": "run", "data": "missing.sh"})).await;

        let msgs = h.quiet_for(Duration::from_millis(300)).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].response, ResponseKind::Error);
        assert!(!msgs[0].description.as_deref().unwrap_or_default().is_empty());
        assert!(h.session.active_run().is_none());
    }

    #[tokio::test]
    async fn test_file_requests_need_working_directory() {
        let mut h = Harness::new();
        h.request(json!({"request": "get-file-contents", "data": "a.sh"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("No working directory set"))
        );
    }

    #[tokio::test]
    async fn test_set_working_directory_requires_existing_directory() {
        let mut h = Harness::new();
        h.request(json!({"request": "set-working-directory", "data": "/nonexistent/dir"}))
            .await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("Directory does not exist"))
        );
        assert!(h.session.working_directory().is_none());

        h.write("file.txt", "");
        h.request(json!({"request": "set-working-directory", "data": "file.txt"}))
            .await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("Directory does not exist"))
        );
    }

    #[tokio::test]
    async fn test_relative_working_directory_resolves_against_root() {
        let mut h = Harness::new();
        std::fs::create_dir(h.path().join("code")).unwrap();

        h.request(json!({"request": "workingdir", "data": "code"})).await;

        let expected = h.path().join("code").canonicalize().unwrap();
        assert_eq!(h.session.working_directory(), Some(expected.as_path()));
    }

    #[tokio::test]
    async fn test_listing_arrives_after_setting_directory() {
        let mut h = Harness::new();
        h.write("existing.txt", "");
        h.enter_workdir().await;

        let msg = tokio::time::timeout(WAIT, h.rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg, OutboundMessage::files(vec!["existing.txt".into()]));
    }

    #[tokio::test]
    async fn test_changing_directory_replaces_reporter() {
        let mut h = Harness::new();
        std::fs::create_dir(h.path().join("first")).unwrap();
        std::fs::create_dir(h.path().join("second")).unwrap();
        h.write("first/only_here.txt", "");

        h.request(json!({"request": "set-working-directory", "data": "first"}))
            .await;
        let listing = tokio::time::timeout(WAIT, h.rx.recv()).await.unwrap().unwrap();
        assert_eq!(listing, OutboundMessage::files(vec!["only_here.txt".into()]));
        let first = h.session.reported_directory().unwrap().to_path_buf();

        h.request(json!({"request": "set-working-directory", "data": "second"}))
            .await;
        let second = h.session.reported_directory().unwrap();
        assert_ne!(first, second);
        assert_eq!(second, h.session.working_directory().unwrap());

        // The old reporter was awaited, so anything it sent is already queued.
        while h.rx.try_recv().is_ok() {}

        let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
        let mut listings = 0;
        while let Ok(Some(msg)) = tokio::time::timeout_at(deadline, h.rx.recv()).await {
            assert_eq!(msg, OutboundMessage::files(vec![]));
            listings += 1;
        }
        assert!(listings >= 2);
    }

    #[tokio::test]
    async fn test_edit_and_run_scenario() {
        let mut h = Harness::new();
        h.enter_workdir().await;

        let listing = tokio::time::timeout(WAIT, h.rx.recv()).await.unwrap().unwrap();
        assert_eq!(listing, OutboundMessage::files(vec![]));

        h.request(json!({"request": "create-file", "data": "a.sh"})).await;
        assert_eq!(h.next().await, Some(OutboundMessage::file_contents("a.sh", "")));

        h.request(json!({
            "request": "save-file",
            "filename": "a.sh",
            "data": "#!/bin/sh\necho hi\n"
        }))
        .await;

        h.request(json!({"request": "run", "data": "a.sh"})).await;
        let msgs = h.until_finished().await;

        assert_eq!(msgs.first(), Some(&OutboundMessage::starting()));
        assert_eq!(stdout_of(&msgs), "hi\n");
        assert_eq!(msgs.last(), Some(&OutboundMessage::finished(0)));
        assert_eq!(h.session.active_run().and_then(RunHandle::exit_code), Some(0));
        assert!(!h.session.has_active_run());
    }

    #[tokio::test]
    async fn test_run_missing_file_yields_one_error_and_no_handle() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.request(json!({"request": "run", "data": "missing.sh"})).await;

        let msgs = h.quiet_for(Duration::from_millis(300)).await;
        assert_eq!(msgs, vec![OutboundMessage::error("File does not exist")]);
        assert!(h.session.active_run().is_none());
    }

    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("fail.sh", "echo nope >&2\nexit 3\n");

        h.request(json!({"request": "run", "data": "fail.sh"})).await;
        let msgs = h.until_finished().await;

        assert_eq!(
            msgs.iter()
                .find(|m| m.response == ResponseKind::Stderr)
                .cloned(),
            Some(OutboundMessage::output(OutputStream::Stderr, "nope\n"))
        );
        assert_eq!(msgs.last(), Some(&OutboundMessage::finished(3)));
    }

    #[tokio::test]
    async fn test_new_run_cancels_previous_run() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("slow.sh", "echo first\nsleep 1\necho late\n");
        h.write("fast.sh", "echo second\n");

        h.request(json!({"request": "run", "data": "slow.sh"})).await;
        assert_eq!(h.next().await, Some(OutboundMessage::starting()));
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::output(OutputStream::Stdout, "first\n"))
        );

        h.request(json!({"request": "run", "data": "fast.sh"})).await;
        let mut msgs = h.until_finished().await;
        msgs.extend(h.quiet_for(Duration::from_millis(1500)).await);

        assert_eq!(count(&msgs, ResponseKind::Starting), 1);
        assert_eq!(count(&msgs, ResponseKind::Finished), 1);
        assert_eq!(stdout_of(&msgs), "second\n");
        assert!(msgs.contains(&OutboundMessage::finished(0)));
    }

    #[tokio::test]
    async fn test_terminate_cancels_without_finished() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("loop.sh", "while true; do echo tick; sleep 0.1; done\n");

        h.request(json!({"request": "run", "data": "loop.sh"})).await;
        assert_eq!(h.next().await, Some(OutboundMessage::starting()));
        assert!(h.next().await.is_some());
        assert!(h.session.has_active_run());

        h.request(json!({"request": "terminate"})).await;
        assert!(!h.session.has_active_run());

        // Output relayed before the relays stopped may still be queued.
        while let Ok(msg) = h.rx.try_recv() {
            assert_ne!(msg.response, ResponseKind::Finished);
        }
        let after = h.quiet_for(Duration::from_millis(500)).await;
        assert_eq!(count(&after, ResponseKind::Finished), 0);
        assert_eq!(count(&after, ResponseKind::Stdout), 0);
    }

    #[tokio::test]
    async fn test_terminate_without_run_is_a_no_op() {
        let mut h = Harness::new();
        h.request(json!({"request": "terminate"})).await;
        assert!(h.quiet_for(Duration::from_millis(200)).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_existing_file_is_rejected_without_truncation() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("a.sh", "echo keep\n");

        h.request(json!({"request": "create-file", "data": "a.sh"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("File already exists"))
        );

        h.request(json!({"request": "get-file-contents", "data": "a.sh"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::file_contents("a.sh", "echo keep\n"))
        );
    }

    #[tokio::test]
    async fn test_create_file_in_new_subdirectory() {
        let mut h = Harness::new();
        h.enter_workdir().await;

        h.request(json!({"request": "create-file", "data": "pkg/mod/x.py"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::file_contents("pkg/mod/x.py", ""))
        );
        assert!(h.path().join("pkg/mod/x.py").is_file());
    }

    #[tokio::test]
    async fn test_delete_then_get_reports_missing() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("gone.txt", "bye");

        h.request(json!({"request": "delete-file", "data": "gone.txt"})).await;
        h.request(json!({"request": "get-file-contents", "data": "gone.txt"}))
            .await;

        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("File does not exist"))
        );
    }

    #[tokio::test]
    async fn test_legacy_save_and_filecontents_requests() {
        let mut h = Harness::new();
        h.enter_workdir().await;

        h.request(json!({"request": "save", "filename": "main.py", "data": "print(1)\n"}))
            .await;
        h.request(json!({"request": "filecontents", "data": "main.py"})).await;

        assert_eq!(
            h.next().await,
            Some(OutboundMessage::file_contents("main.py", "print(1)\n"))
        );
    }

    #[tokio::test]
    async fn test_save_requires_filename_and_text() {
        let mut h = Harness::new();
        h.enter_workdir().await;

        h.request(json!({"request": "save-file", "data": "x"})).await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("Missing field: filename"))
        );

        h.request(json!({"request": "save-file", "filename": "a.txt", "data": 5}))
            .await;
        assert_eq!(
            h.next().await,
            Some(OutboundMessage::error("Missing field: data"))
        );
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_working_directory() {
        let mut h = Harness::new();
        h.enter_workdir().await;

        h.request(json!({"request": "get-file-contents", "data": "../../etc/passwd"}))
            .await;
        let msg = h.next().await.unwrap();
        assert_eq!(msg.response, ResponseKind::Error);
        assert!(msg.description.unwrap().starts_with("Invalid path"));
    }

    #[tokio::test]
    async fn test_default_file_is_pushed_with_working_directory() {
        let mut h = Harness::with_config(|c| c.default_file = Some("main.sh".into()));
        h.write("main.sh", "echo default\n");

        h.enter_workdir().await;

        assert_eq!(
            h.next().await,
            Some(OutboundMessage::file_contents("main.sh", "echo default\n"))
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let mut h = Harness::with_config(|c| c.runner.shell = "/nonexistent/sh".into());
        h.enter_workdir().await;
        h.write("a.sh", "echo hi\n");

        h.request(json!({"request": "run", "data": "a.sh"})).await;

        let msgs = h.quiet_for(Duration::from_millis(300)).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].response, ResponseKind::Error);
        assert!(h.session.active_run().is_none());
    }

    #[tokio::test]
    async fn test_close_stops_run_and_reporter() {
        let mut h = Harness::new();
        h.enter_workdir().await;
        h.write("late.sh", "echo ready\nsleep 1\ntouch marker\n");

        h.request(json!({"request": "run", "data": "late.sh"})).await;
        assert_eq!(h.next().await, Some(OutboundMessage::starting()));
        assert!(h.next().await.is_some());

        let Harness { dir, session, mut rx } = h;
        session.close().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!dir.path().join("marker").exists());
        while let Ok(msg) = rx.try_recv() {
            assert_ne!(msg.response, ResponseKind::Finished);
        }
        // Session, run and reporter held the only senders.
        assert!(rx.recv().await.is_none());
    }
}
