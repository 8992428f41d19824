//! Periodic directory listing.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use coderelay_core::{OutboundMessage, OutboundTx};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// List every regular file under `root`, relative to it, `/`-separated
/// and sorted.
///
/// Entries that vanish or cannot be read mid-scan are skipped. Symlinks
/// are not followed.
#[must_use]
pub fn list_files(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect()
}

/// Start reporting the files under `root` to `tx`: once immediately, then
/// every `interval` until cancelled or the subscriber is gone.
#[must_use]
pub fn spawn_reporter(root: PathBuf, interval: Duration, tx: OutboundTx) -> ReporterHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(report_loop(root.clone(), interval, tx, cancel.clone()));
    ReporterHandle {
        root,
        cancel,
        task: Some(task),
    }
}

async fn report_loop(root: PathBuf, interval: Duration, tx: OutboundTx, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let scan_root = root.clone();
        let files = match tokio::task::spawn_blocking(move || list_files(&scan_root)).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(root = %root.display(), "Directory scan failed: {e}");
                continue;
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        if tx.send(OutboundMessage::files(files)).is_err() {
            tracing::debug!(root = %root.display(), "Subscriber gone, stopping reporter");
            return;
        }
    }
    tracing::debug!(root = %root.display(), "Directory reporter stopped");
}

/// Handle on a running directory reporter. Dropping it stops the reporter.
#[derive(Debug)]
pub struct ReporterHandle {
    root: PathBuf,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReporterHandle {
    /// Directory being reported.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the reporter is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the reporter and wait for it to exit.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(root = %self.root.display(), "Reporter task failed: {e}");
            }
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
