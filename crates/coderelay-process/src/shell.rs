//! Launch shell utilities.
//!
//! Files are not executed directly: they are handed to a POSIX shell as
//! `sh -c '<path>'`. The shell execs files that carry a shebang or are
//! binaries, and interprets shebang-less text files itself instead of
//! failing with `ENOEXEC`.

use std::path::{Path, PathBuf};

use crate::runner::ProcessError;

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute or containing a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    let executable = executable.trim();
    if executable.is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// A resolved shell able to launch a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchShell {
    path: PathBuf,
}

impl LaunchShell {
    /// Resolve the shell named `name` (a path or a program on `PATH`).
    ///
    /// # Errors
    /// Returns `ShellNotFound` if nothing executable matches.
    pub async fn resolve(name: &str) -> Result<Self, ProcessError> {
        resolve_executable_path(name)
            .await
            .map(|path| Self { path })
            .ok_or_else(|| ProcessError::ShellNotFound(name.to_string()))
    }

    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arguments that make the shell run `script`.
    ///
    /// # Errors
    /// Returns `InvalidPath` if the path is not UTF-8 or cannot be quoted.
    pub fn script_args(&self, script: &Path) -> Result<[String; 2], ProcessError> {
        let raw = script
            .to_str()
            .ok_or_else(|| ProcessError::InvalidPath(script.display().to_string()))?;
        let quoted = shlex::try_quote(raw)
            .map_err(|e| ProcessError::InvalidPath(format!("{raw}: {e}")))?;
        Ok(["-c".to_string(), quoted.into_owned()])
    }
}
