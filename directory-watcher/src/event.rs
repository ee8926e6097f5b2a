//! File events from directory watching.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single file system change observed under a watch root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,

    /// When the event was received.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this event may introduce a directory that needs registering.
    pub fn may_add_directory(&self) -> bool {
        matches!(
            self.kind,
            FileEventKind::Created | FileEventKind::RenamedTo
        )
    }

    /// Whether this event may take a directory away from the tree.
    pub fn may_remove_directory(&self) -> bool {
        matches!(
            self.kind,
            FileEventKind::Deleted | FileEventKind::RenamedFrom
        )
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    /// File was created.
    Created,

    /// File was modified.
    Modified,

    /// File was deleted.
    Deleted,

    /// File was renamed (old path).
    RenamedFrom,

    /// File was renamed (new path).
    RenamedTo,

    /// File metadata changed.
    MetadataChanged,

    /// File was opened, read or closed.
    Accessed,

    /// Unknown event type.
    Unknown,
}

impl FileEventKind {
    /// Whether the event can change what the IDE shows for the directory.
    pub fn is_change(self) -> bool {
        !matches!(self, Self::Accessed | Self::Unknown)
    }
}

impl From<notify::EventKind> for FileEventKind {
    fn from(kind: notify::EventKind) -> Self {
        match kind {
            notify::EventKind::Create(_) => Self::Created,
            notify::EventKind::Modify(modify_kind) => match modify_kind {
                notify::event::ModifyKind::Name(rename) => match rename {
                    notify::event::RenameMode::From => Self::RenamedFrom,
                    notify::event::RenameMode::To => Self::RenamedTo,
                    _ => Self::Modified,
                },
                notify::event::ModifyKind::Metadata(_) => Self::MetadataChanged,
                _ => Self::Modified,
            },
            notify::EventKind::Remove(_) => Self::Deleted,
            notify::EventKind::Access(_) => Self::Accessed,
            _ => Self::Unknown,
        }
    }
}

/// Events accumulated between the end of a quiet period and the next refresh.
///
/// Events keep their arrival order and are never deduplicated; the batch as a
/// whole produces at most one refresh.
#[derive(Debug, Default)]
pub struct PendingEventBatch {
    events: Vec<FileEvent>,
    rescan: bool,
    errors: Vec<notify::Error>,
}

impl PendingEventBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one raw notification from the OS watch handle.
    ///
    /// A rename reported with both paths in one notification is split into a
    /// `RenamedFrom` for the first path and a `RenamedTo` for the second.
    pub fn absorb(&mut self, res: notify::Result<notify::Event>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                self.errors.push(err);
                return;
            }
        };

        if event.need_rescan() {
            self.rescan = true;
        }

        if let notify::EventKind::Modify(notify::event::ModifyKind::Name(
            notify::event::RenameMode::Both,
        )) = event.kind
        {
            let mut paths = event.paths.into_iter();
            if let Some(from) = paths.next() {
                self.push(FileEvent::new(FileEventKind::RenamedFrom, from));
            }
            for to in paths {
                self.push(FileEvent::new(FileEventKind::RenamedTo, to));
            }
            return;
        }

        let kind = FileEventKind::from(event.kind);
        for path in event.paths {
            self.push(FileEvent::new(kind, path));
        }
    }

    /// Add an already classified event.
    pub fn push(&mut self, event: FileEvent) {
        self.events.push(event);
    }

    /// Events in arrival order.
    pub fn events(&self) -> &[FileEvent] {
        &self.events
    }

    /// Backend errors reported alongside the events.
    pub fn errors(&self) -> &[notify::Error] {
        &self.errors
    }

    /// Whether the OS reported that events were dropped.
    pub fn needs_rescan(&self) -> bool {
        self.rescan
    }

    /// Whether flushing this batch should refresh the watch root.
    pub fn requires_refresh(&self) -> bool {
        self.rescan || self.events.iter().any(|e| e.kind.is_change())
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.errors.is_empty() && !self.rescan
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.events.len()
    }
}
