//! File watcher for hot reload of the config file.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Watches a single file and calls `on_change` whenever it is written or
/// replaced.
///
/// The parent directory is watched rather than the file itself, so editors
/// that save by renaming a new file over the old one keep triggering reloads.
/// Dropping the returned watcher stops it.
pub fn watch_file<F>(path: &Path, on_change: F) -> Result<RecommendedWatcher, notify::Error>
where
    F: Fn() + Send + 'static,
{
    let file_name = path.file_name().map(OsStr::to_os_string);
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, file_name.as_ref()) {
                    tracing::debug!(paths = ?event.paths, "config file change detected");
                    on_change();
                }
            }
            Err(e) => tracing::error!(error = %e, "config watch error"),
        },
        notify::Config::default(),
    )?;

    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!(path = %path.display(), "config watcher started");

    Ok(watcher)
}

fn is_relevant(event: &Event, file_name: Option<&OsString>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };

    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
