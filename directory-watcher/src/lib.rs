//! # Directory Watcher
//!
//! Keeps an IDE's view of a compiler output directory in sync with the files
//! an external compiler emits while running in watch mode.
//!
//! ## Features
//!
//! - **Recursive Registration**: Every directory under the root is subscribed,
//!   including directories created after the watch started
//! - **Debounced Refresh**: Bursts of events collapse into a single refresh
//! - **Clean Lifecycle**: `start`/`stop`/`restart` without leaked threads or
//!   OS watch handles
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify ──► event loop ──► PendingEventBatch ──► Refresh        │
//! │                │                                                │
//! │                ▼                                                │
//! │        DirectoryRegistry (new subdirectories)                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod refresh;
pub mod registry;
pub mod watcher;

pub use config::WatcherConfig;
pub use error::{Result, WatcherError};
pub use event::{FileEvent, FileEventKind, PendingEventBatch};
pub use refresh::{ChannelRefresh, Refresh, RefreshRequest};
pub use registry::DirectoryRegistry;
pub use watcher::{DirectoryWatcher, WatcherState};
