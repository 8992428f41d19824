//! Path confinement.

use std::path::{Component, Path, PathBuf};

/// Join `requested` onto `base`, refusing anything that would leave `base`.
///
/// Relative paths may only contain normal components (and `.`). Absolute
/// paths are accepted when they already lie under `base`. Returns `None`
/// for empty names, `..` components, and absolute paths outside `base`.
#[must_use]
pub fn join_confined(base: &Path, requested: &str) -> Option<PathBuf> {
    let requested = Path::new(requested.trim());
    if requested.as_os_str().is_empty() {
        return None;
    }

    if requested.is_absolute() {
        let lexical = requested
            .components()
            .all(|c| !matches!(c, Component::ParentDir));
        return (lexical && requested.starts_with(base) && requested != base)
            .then(|| requested.to_path_buf());
    }

    let mut joined = base.to_path_buf();
    let mut depth = 0usize;
    for component in requested.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(joined)
}
