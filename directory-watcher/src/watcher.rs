//! Directory watcher implementation.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use notify::RecommendedWatcher;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::error::{Result, WatcherError};
use crate::event::PendingEventBatch;
use crate::refresh::Refresh;
use crate::registry::{DirectoryRegistry, is_exhausted};

/// Lifecycle of a [`DirectoryWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// No OS handle and no background loop.
    Idle,
    /// Handle being opened and the tree registered.
    Starting,
    /// Background loop live.
    Running,
    /// Handle closed, loop winding down.
    Stopping,
}

/// Watches one root directory and all of its present and future
/// subdirectories, issuing at most one refresh per burst of changes.
///
/// Exactly one root is active at a time. `restart` fully tears down the
/// previous session before opening a new one.
pub struct DirectoryWatcher {
    /// Loop tuning.
    config: WatcherConfig,

    /// Where refreshes go.
    refresh: Arc<dyn Refresh>,

    /// Lifecycle state shared with the background loop.
    control: Arc<Mutex<Control>>,
}

struct Control {
    state: WatcherState,

    /// Last root handed to `start`, kept for `restart`.
    requested_root: Option<PathBuf>,

    session: Option<Session>,

    next_session_id: u64,
}

/// One start..stop span: the live root plus the handles needed to end it.
struct Session {
    id: u64,
    root: Arc<WatchRoot>,
    /// Dropping the sender wakes the loop wherever it is blocked.
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// The directory a session is responsible for.
///
/// The OS handle and the registry live behind the same lock as the liveness
/// flag, so the loop can never subscribe through a handle `stop` has closed.
struct WatchRoot {
    path: PathBuf,
    inner: Mutex<RootInner>,
}

struct RootInner {
    alive: bool,
    handle: Option<RecommendedWatcher>,
    registry: DirectoryRegistry,
}

impl WatchRoot {
    fn is_alive(&self) -> bool {
        self.inner.lock().alive
    }

    /// Invalidate the root and release the OS handle.
    fn close(&self) {
        let mut inner = self.inner.lock();
        inner.alive = false;
        inner.registry.clear();
        // Dropping the handle also drops the notify event sender, which
        // disconnects the loop's event channel.
        inner.handle = None;
    }
}

impl DirectoryWatcher {
    /// Create an idle watcher.
    pub fn new(config: WatcherConfig, refresh: Arc<dyn Refresh>) -> Self {
        Self {
            config,
            refresh,
            control: Arc::new(Mutex::new(Control {
                state: WatcherState::Idle,
                requested_root: None,
                session: None,
                next_session_id: 0,
            })),
        }
    }

    /// Start watching `root`, logging instead of returning any failure.
    ///
    /// The watcher stays idle if the directory cannot be created or the OS
    /// handle cannot be opened; check [`is_running`](Self::is_running).
    pub fn start(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        match self.try_start(&root) {
            Ok(()) => {}
            Err(WatcherError::AlreadyWatching(current)) => {
                info!("Directory watcher already running for {current}");
            }
            Err(e) => {
                error!("Failed to start watching {}: {e}", root.display());
            }
        }
    }

    /// Start watching `root`.
    ///
    /// Creates the directory if it is missing, subscribes it and every
    /// directory below it, then spawns the background loop.
    pub fn try_start(&self, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        let mut control = self.control.lock();

        if control.state != WatcherState::Idle {
            let current = control
                .session
                .as_ref()
                .map(|s| s.root.path.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            return Err(WatcherError::AlreadyWatching(current));
        }

        control.state = WatcherState::Starting;
        control.requested_root = Some(root.clone());
        let id = control.next_session_id;
        control.next_session_id += 1;

        match self.open_session(&root, id) {
            Ok(session) => {
                info!("Started watching: {}", session.root.path.display());
                control.session = Some(session);
                control.state = WatcherState::Running;
                Ok(())
            }
            Err(e) => {
                control.state = WatcherState::Idle;
                Err(e)
            }
        }
    }

    fn open_session(&self, root: &Path, id: u64) -> Result<Session> {
        if !root.exists() {
            fs::create_dir_all(root).map_err(|source| WatcherError::CreateDirectory {
                path: root.to_path_buf(),
                source,
            })?;
            debug!("Created watch root: {}", root.display());
        }

        if !root.is_dir() {
            return Err(WatcherError::NotADirectory(root.display().to_string()));
        }

        let path = dunce::canonicalize(root)?;

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let mut handle = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| {
                let _ = event_tx.send(res);
            },
        )?;

        let mut registry = DirectoryRegistry::new();
        let registered = registry.register_tree(&mut handle, &path)?;
        if !registry.contains(&path) {
            return Err(WatcherError::NotADirectory(path.display().to_string()));
        }
        debug!("Registered {registered} directories under {}", path.display());

        let watch_root = Arc::new(WatchRoot {
            path,
            inner: Mutex::new(RootInner {
                alive: true,
                handle: Some(handle),
                registry,
            }),
        });

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let event_loop = EventLoop {
            session_id: id,
            root: watch_root.clone(),
            events: event_rx,
            shutdown: shutdown_rx,
            refresh: self.refresh.clone(),
            config: self.config.clone(),
            control: Arc::downgrade(&self.control),
        };

        let thread = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || event_loop.run());

        match thread {
            Ok(thread) => Ok(Session {
                id,
                root: watch_root,
                shutdown_tx,
                thread: Some(thread),
            }),
            Err(e) => {
                watch_root.close();
                Err(WatcherError::Io(e))
            }
        }
    }

    /// Stop watching. Safe to call when idle.
    ///
    /// No refresh is issued once this returns, although one already handed to
    /// the [`Refresh`] collaborator may still be in flight on the host side.
    pub fn stop(&self) {
        let session = {
            let mut control = self.control.lock();
            match control.state {
                WatcherState::Running => {}
                WatcherState::Idle => {
                    debug!("Directory watcher already stopped");
                    return;
                }
                WatcherState::Starting | WatcherState::Stopping => {
                    debug!("Directory watcher is {:?}, ignoring stop", control.state);
                    return;
                }
            }

            control.state = WatcherState::Stopping;
            let session = control.session.take();
            if let Some(session) = &session {
                session.root.close();
            }
            session
        };

        if let Some(mut session) = session {
            drop(session.shutdown_tx);
            if let Some(thread) = session.thread.take() {
                if thread.thread().id() == thread::current().id() {
                    debug!("Stop requested from the watch loop, not joining");
                } else if thread.join().is_err() {
                    warn!("Watch loop for {} panicked", session.root.path.display());
                }
            }
            info!("Stopped watching: {}", session.root.path.display());
        }

        self.control.lock().state = WatcherState::Idle;
    }

    /// Stop, then start again on the last requested root.
    pub fn restart(&self) {
        let root = self.control.lock().requested_root.clone();
        self.stop();
        match root {
            Some(root) => self.start(root),
            None => warn!("Cannot restart directory watcher: {}", WatcherError::NoRoot),
        }
    }

    /// Stop, then start on a different root.
    pub fn restart_with(&self, root: impl Into<PathBuf>) {
        self.stop();
        self.start(root);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WatcherState {
        self.control.lock().state
    }

    /// Whether a watch loop is live.
    pub fn is_running(&self) -> bool {
        self.state() == WatcherState::Running
    }

    /// The canonical root while running, otherwise the last requested root.
    pub fn root(&self) -> Option<PathBuf> {
        let control = self.control.lock();
        control
            .session
            .as_ref()
            .map(|s| s.root.path.clone())
            .or_else(|| control.requested_root.clone())
    }

    /// Directories currently subscribed, sorted.
    pub fn registered_directories(&self) -> Vec<PathBuf> {
        let root = self.control.lock().session.as_ref().map(|s| s.root.clone());
        root.map(|r| r.inner.lock().registry.paths())
            .unwrap_or_default()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("root", &self.root())
            .finish()
    }
}

/// Why the loop ended.
enum LoopExit {
    /// `stop` was requested.
    Stopped,
    /// The subscription became unusable; the session is over.
    Lost(String),
}

struct EventLoop {
    session_id: u64,
    root: Arc<WatchRoot>,
    events: Receiver<notify::Result<notify::Event>>,
    shutdown: Receiver<()>,
    refresh: Arc<dyn Refresh>,
    config: WatcherConfig,
    control: Weak<Mutex<Control>>,
}

impl EventLoop {
    fn run(self) {
        debug!("Watch loop started for {}", self.root.path.display());

        match self.watch() {
            LoopExit::Stopped => {
                debug!("Watch loop exiting for {}", self.root.path.display());
            }
            LoopExit::Lost(reason) => {
                error!(
                    "Lost watch on {}: {reason}; restart required",
                    self.root.path.display()
                );
                self.retire();
            }
        }
    }

    fn watch(&self) -> LoopExit {
        loop {
            let first = select! {
                recv(self.shutdown) -> _ => return LoopExit::Stopped,
                recv(self.events) -> msg => match msg {
                    Ok(res) => res,
                    Err(_) if self.root.is_alive() => {
                        return LoopExit::Lost("OS watch handle closed".to_string());
                    }
                    Err(_) => return LoopExit::Stopped,
                },
                default(self.config.poll_timeout()) => {
                    if !self.root.is_alive() {
                        return LoopExit::Stopped;
                    }
                    continue;
                }
            };

            // Let the rest of the burst arrive.
            match self.shutdown.recv_timeout(self.config.quiet_period()) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return LoopExit::Stopped,
            }

            let mut batch = PendingEventBatch::new();
            batch.absorb(first);
            for res in self.events.try_iter() {
                batch.absorb(res);
            }

            if let Err(exit) = self.flush(batch) {
                return exit;
            }
        }
    }

    /// Apply a drained batch: register new directories, forget removed ones,
    /// then refresh the root once.
    fn flush(&self, batch: PendingEventBatch) -> std::result::Result<(), LoopExit> {
        let mut guard = self.root.inner.lock();
        if !guard.alive {
            return Err(LoopExit::Stopped);
        }
        let RootInner {
            handle, registry, ..
        } = &mut *guard;
        let Some(handle) = handle.as_mut() else {
            return Err(LoopExit::Stopped);
        };

        for err in batch.errors() {
            if is_exhausted(err) {
                return Err(LoopExit::Lost(format!("watch limit reached: {err}")));
            }
            warn!("Watch error under {}: {err}", self.root.path.display());
        }

        for event in batch.events() {
            debug!("File event: {:?} - {}", event.kind, event.path.display());

            if event.may_remove_directory() {
                if event.path == self.root.path {
                    return Err(LoopExit::Lost("watch root removed".to_string()));
                }
                registry.forget_tree(handle, &event.path);
            } else if event.may_add_directory() && event.path.is_dir() {
                self.register(handle, registry, &event.path)?;
            }
        }

        if batch.needs_rescan() {
            debug!("Event queue overflowed, rescanning {}", self.root.path.display());
            self.register(handle, registry, &self.root.path)?;
        }

        if !self.root.path.is_dir() {
            return Err(LoopExit::Lost("watch root removed".to_string()));
        }

        // A concurrent stop() closes the root and then joins this thread, so
        // the refresh can run without the lock and may itself stop the watcher.
        drop(guard);

        if batch.requires_refresh() {
            self.refresh.refresh(&self.root.path, true);
            debug!(
                "Refresh dispatched for {} ({} events)",
                self.root.path.display(),
                batch.len()
            );
        }

        Ok(())
    }

    fn register(
        &self,
        handle: &mut RecommendedWatcher,
        registry: &mut DirectoryRegistry,
        dir: &Path,
    ) -> std::result::Result<(), LoopExit> {
        match registry.register_tree(handle, dir) {
            Ok(added) => {
                if added > 0 {
                    debug!("Registered {added} new directories under {}", dir.display());
                }
                Ok(())
            }
            Err(e) if is_exhausted(&e) => Err(LoopExit::Lost(format!("watch limit reached: {e}"))),
            Err(e) => {
                warn!("Failed to register {}: {e}", dir.display());
                Ok(())
            }
        }
    }

    /// Close this session and return the watcher to idle, unless `stop` or a
    /// restart already moved on from it.
    fn retire(&self) {
        self.root.close();

        let Some(control) = self.control.upgrade() else {
            return;
        };
        let mut control = control.lock();
        let current = control
            .session
            .as_ref()
            .is_some_and(|s| s.id == self.session_id);
        if current && control.state == WatcherState::Running {
            // Dropping our own JoinHandle detaches this thread.
            control.session = None;
            control.state = WatcherState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn idle_watcher() -> DirectoryWatcher {
        DirectoryWatcher::new(WatcherConfig::default(), Arc::new(|_: &Path, _: bool| {}))
    }

    /// A loop over `root` with no thread behind it, for flushing batches by hand.
    fn detached_loop(root: &Path, refresh: Arc<dyn Refresh>) -> (EventLoop, Sender<()>) {
        let path = dunce::canonicalize(root).unwrap();
        let (event_tx, events) = crossbeam_channel::unbounded();
        let mut handle = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = event_tx.send(res);
        })
        .unwrap();
        let mut registry = DirectoryRegistry::new();
        registry.register_tree(&mut handle, &path).unwrap();

        let (shutdown_tx, shutdown) = crossbeam_channel::bounded(0);
        let event_loop = EventLoop {
            session_id: 0,
            root: Arc::new(WatchRoot {
                path,
                inner: Mutex::new(RootInner {
                    alive: true,
                    handle: Some(handle),
                    registry,
                }),
            }),
            events,
            shutdown,
            refresh,
            config: WatcherConfig::default(),
            control: Weak::new(),
        };
        (event_loop, shutdown_tx)
    }

    #[test]
    fn test_watcher_creation() {
        let watcher = idle_watcher();
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert!(watcher.root().is_none());
        assert!(watcher.registered_directories().is_empty());
    }

    #[test]
    fn test_start_creates_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("build");
        let watcher = idle_watcher();

        watcher.try_start(&root).unwrap();

        assert!(root.is_dir());
        assert!(watcher.is_running());
        assert_eq!(watcher.root(), Some(dunce::canonicalize(&root).unwrap()));
        watcher.stop();
    }

    #[test]
    fn test_second_start_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher();

        watcher.try_start(temp_dir.path()).unwrap();
        let registered = watcher.registered_directories();

        let result = watcher.try_start(temp_dir.path());
        assert!(matches!(result, Err(WatcherError::AlreadyWatching(_))));
        assert_eq!(watcher.registered_directories(), registered);
        watcher.stop();
    }

    #[test]
    fn test_start_on_file_stays_idle() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("build");
        fs::write(&file, "not a dir").unwrap();
        let watcher = idle_watcher();

        let result = watcher.try_start(&file);
        assert!(matches!(result, Err(WatcherError::NotADirectory(_))));
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher();

        watcher.stop();
        watcher.try_start(temp_dir.path()).unwrap();
        watcher.stop();
        watcher.stop();

        assert_eq!(watcher.state(), WatcherState::Idle);
        assert!(watcher.registered_directories().is_empty());
    }

    #[test]
    fn test_restart_without_root_stays_idle() {
        let watcher = idle_watcher();
        watcher.restart();
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[test]
    fn test_restart_reuses_root() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = idle_watcher();
        watcher.try_start(temp_dir.path()).unwrap();

        watcher.restart();

        assert!(watcher.is_running());
        assert_eq!(
            watcher.root(),
            Some(dunce::canonicalize(temp_dir.path()).unwrap())
        );
        watcher.stop();
    }

    #[test]
    fn test_rescan_registers_missed_directories() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let refresh: Arc<dyn Refresh> = Arc::new(move |path: &Path, _: bool| {
            recorded.lock().push(path.to_path_buf());
        });
        let (event_loop, _shutdown) = detached_loop(temp_dir.path(), refresh);
        let root = event_loop.root.path.clone();

        // Created while the queue was overflowing: no event of its own.
        fs::create_dir_all(root.join("app/models")).unwrap();
        let mut batch = PendingEventBatch::new();
        batch.absorb(Ok(
            notify::Event::new(notify::EventKind::Other).set_flag(notify::event::Flag::Rescan)
        ));
        assert!(event_loop.flush(batch).is_ok());

        assert_eq!(
            event_loop.root.inner.lock().registry.paths(),
            vec![root.clone(), root.join("app"), root.join("app/models")]
        );
        assert_eq!(*calls.lock(), vec![root]);
    }

    #[test]
    fn test_flush_after_close_is_discarded() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Arc::new(Mutex::new(0usize));
        let counted = calls.clone();
        let refresh: Arc<dyn Refresh> = Arc::new(move |_: &Path, _: bool| {
            *counted.lock() += 1;
        });
        let (event_loop, _shutdown) = detached_loop(temp_dir.path(), refresh);

        event_loop.root.close();
        let mut batch = PendingEventBatch::new();
        batch.push(crate::event::FileEvent::new(
            crate::event::FileEventKind::Created,
            event_loop.root.path.join("a.rb"),
        ));

        assert!(matches!(event_loop.flush(batch), Err(LoopExit::Stopped)));
        assert_eq!(*calls.lock(), 0);
    }
}
