//! The refresh collaborator: how a watcher tells the host a directory changed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;

/// Invalidates the host's cached view of a directory.
///
/// Called from the watcher's background thread. Implementations must return
/// quickly; hosts with a UI thread should schedule the real work there (see
/// [`ChannelRefresh`]). Stopping or restarting the calling watcher from here is
/// allowed.
/// Calls are idempotent from the watcher's point of view.
pub trait Refresh: Send + Sync {
    fn refresh(&self, path: &Path, recursive: bool);
}

impl<F> Refresh for F
where
    F: Fn(&Path, bool) + Send + Sync,
{
    fn refresh(&self, path: &Path, recursive: bool) {
        self(path, recursive)
    }
}

/// A refresh handed over to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Directory whose view is stale.
    pub path: PathBuf,

    /// Whether the whole subtree should be reloaded.
    pub recursive: bool,

    /// When the watcher issued the request.
    pub requested_at: DateTime<Utc>,
}

/// Forwards refreshes over a channel so the host can apply them on its own
/// execution context.
#[derive(Debug, Clone)]
pub struct ChannelRefresh {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl ChannelRefresh {
    /// Create the sender side together with the receiver the host drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Refresh for ChannelRefresh {
    fn refresh(&self, path: &Path, recursive: bool) {
        let request = RefreshRequest {
            path: path.to_path_buf(),
            recursive,
            requested_at: Utc::now(),
        };

        if self.tx.send(request).is_err() {
            debug!("Refresh receiver closed, dropping refresh for {}", path.display());
        }
    }
}
