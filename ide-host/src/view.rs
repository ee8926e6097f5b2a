//! Applying watcher refreshes to the host's view of the file system.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};
use trb_directory_watcher::RefreshRequest;
use walkdir::WalkDir;

/// What a refresh found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub path: PathBuf,

    /// Files visible after the refresh.
    pub files: usize,

    /// Files that appeared since the previous refresh of this path.
    pub added: usize,

    /// Files that disappeared since the previous refresh of this path.
    pub removed: usize,
}

/// The host's cached view of directories on disk.
pub trait ProjectView {
    /// Mark `path` dirty and bring the cached view up to date.
    ///
    /// With `reload_children` unset the cached children are only discarded,
    /// to be reloaded on next access.
    fn refresh(&mut self, path: &Path, recursive: bool, reload_children: bool) -> RefreshStats;
}

/// In-memory view that caches the file listing of each refreshed directory.
#[derive(Debug, Default)]
pub struct TreeView {
    listings: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl TreeView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached files under `path`, if it has been loaded.
    pub fn files(&self, path: &Path) -> Option<&BTreeSet<PathBuf>> {
        self.listings.get(path)
    }
}

impl ProjectView for TreeView {
    fn refresh(&mut self, path: &Path, recursive: bool, reload_children: bool) -> RefreshStats {
        let previous = self.listings.remove(path).unwrap_or_default();
        if !reload_children {
            return RefreshStats {
                path: path.to_path_buf(),
                files: 0,
                added: 0,
                removed: previous.len(),
            };
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let current: BTreeSet<PathBuf> = WalkDir::new(path)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect();

        let stats = RefreshStats {
            path: path.to_path_buf(),
            files: current.len(),
            added: current.difference(&previous).count(),
            removed: previous.difference(&current).count(),
        };
        self.listings.insert(path.to_path_buf(), current);
        stats
    }
}

/// Apply refresh requests to `view` until the channel closes.
///
/// Each refresh runs on the blocking pool so the async context that drives
/// this loop never waits on file system I/O. Requests are applied one at a
/// time in arrival order. Returns the view once all senders are gone.
pub async fn dispatch_refreshes<V, F>(
    mut requests: mpsc::UnboundedReceiver<RefreshRequest>,
    mut view: V,
    mut on_refresh: F,
) -> Result<V>
where
    V: ProjectView + Send + 'static,
    F: FnMut(&RefreshStats),
{
    while let Some(request) = requests.recv().await {
        debug!(
            "Refreshing {} (requested at {})",
            request.path.display(),
            request.requested_at
        );

        let (returned, stats) = tokio::task::spawn_blocking(move || {
            let stats = view.refresh(&request.path, request.recursive, true);
            (view, stats)
        })
        .await?;
        view = returned;

        info!(
            "Refreshed {}: {} files (+{} -{})",
            stats.path.display(),
            stats.files,
            stats.added,
            stats.removed
        );
        on_refresh(&stats);
    }

    Ok(view)
}
