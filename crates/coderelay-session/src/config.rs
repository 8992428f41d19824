//! Session settings.

use std::{path::PathBuf, time::Duration};

use coderelay_process::RunnerConfig;

/// Default interval between directory listings.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(3);

/// Settings shared by every session of a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base for relative working directories.
    pub root: PathBuf,
    /// Time between directory listings.
    pub report_interval: Duration,
    /// File pushed to the client whenever a working directory containing it is selected.
    pub default_file: Option<String>,
    /// Process launching settings.
    pub runner: RunnerConfig,
}

impl SessionConfig {
    /// Settings rooted at `root`, everything else default.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            default_file: None,
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
