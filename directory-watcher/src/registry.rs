//! Bookkeeping for directories subscribed to OS notifications.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};
use tracing::debug;
use walkdir::WalkDir;

/// Upper bound on walks over a freshly registered tree. Each extra pass picks
/// up directories created while the previous pass was subscribing.
const MAX_REGISTRATION_PASSES: usize = 4;

/// Set of directories currently subscribed (non-recursively) to a watch handle.
///
/// Parent relationships are implicit in the paths; only membership is tracked.
#[derive(Debug, Default)]
pub struct DirectoryRegistry {
    dirs: BTreeSet<PathBuf>,
}

impl DirectoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `dir` and every directory below it that is not yet registered.
    ///
    /// After a pass that registered anything the tree is walked again, since a
    /// directory can gain children between being listed and being subscribed.
    /// Directories that disappear mid-walk are skipped. Returns how many
    /// directories were newly registered.
    pub fn register_tree<W: Watcher>(
        &mut self,
        watcher: &mut W,
        dir: &Path,
    ) -> notify::Result<usize> {
        let mut added = 0;

        for _ in 0..MAX_REGISTRATION_PASSES {
            let pass = self.register_pass(watcher, dir)?;
            added += pass;
            if pass == 0 {
                break;
            }
        }

        Ok(added)
    }

    fn register_pass<W: Watcher>(&mut self, watcher: &mut W, dir: &Path) -> notify::Result<usize> {
        let mut added = 0;

        let walker = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_type().is_dir());

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {e}", dir.display());
                    continue;
                }
            };

            if self.dirs.contains(entry.path()) {
                continue;
            }

            match watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!("Registered directory: {}", entry.path().display());
                    self.dirs.insert(entry.into_path());
                    added += 1;
                }
                Err(e) if is_vanished(&e) => {
                    debug!("Directory vanished before registration: {}", entry.path().display());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(added)
    }

    /// Drop `path` and everything registered below it. Returns how many
    /// registrations were removed.
    pub fn forget_tree<W: Watcher>(&mut self, watcher: &mut W, path: &Path) -> usize {
        let doomed: Vec<PathBuf> = self
            .dirs
            .range(path.to_path_buf()..)
            .take_while(|p| p.starts_with(path))
            .cloned()
            .collect();

        for dir in &doomed {
            // The OS usually drops the watch itself when a directory goes away.
            let _ = watcher.unwatch(dir);
            self.dirs.remove(dir);
            debug!("Forgot directory: {}", dir.display());
        }

        doomed.len()
    }

    /// Whether `path` is registered.
    pub fn contains(&self, path: &Path) -> bool {
        self.dirs.contains(path)
    }

    /// Number of registered directories.
    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Registered directories in sorted order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.dirs.iter().cloned().collect()
    }

    /// Forget everything without touching the watch handle. Used when the
    /// handle itself is being closed.
    pub fn clear(&mut self) {
        self.dirs.clear();
    }
}

/// Whether a watch error only means the path no longer exists.
pub(crate) fn is_vanished(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io_err) => io_err.kind() == io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Whether a watch error means the OS refused any further subscriptions.
pub(crate) fn is_exhausted(err: &notify::Error) -> bool {
    matches!(err.kind, notify::ErrorKind::MaxFilesWatch)
}
