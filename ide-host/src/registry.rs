//! Project lifecycle: which projects are open and which watchers they own.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use trb_directory_watcher::{DirectoryWatcher, Refresh, WatcherConfig};
use trb_project_config::{CONFIG_FILE_NAME, ConfigSource, OutputConfig};

/// Identity of an open project: its canonical root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectId(PathBuf);

impl ProjectId {
    /// Identify the project rooted at `root`. Fails if the root does not exist.
    pub fn for_root(root: &Path) -> std::io::Result<Self> {
        dunce::canonicalize(root).map(Self)
    }

    pub fn root(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Watchers owned by one open project.
struct OpenProject {
    config: OutputConfig,
    output_root: PathBuf,
    output: DirectoryWatcher,
    secondary: Option<(PathBuf, DirectoryWatcher)>,
}

impl OpenProject {
    fn stop(&self) {
        self.output.stop();
        if let Some((_, watcher)) = &self.secondary {
            watcher.stop();
        }
    }
}

/// Registry of open projects and their output watchers.
///
/// Created and owned by whatever drives the project lifecycle; there is no
/// global instance. Dropping the registry closes every project.
pub struct ProjectRegistry {
    /// Where output directories come from.
    source: Arc<dyn ConfigSource>,

    /// Shared by every watcher the registry creates.
    refresh: Arc<dyn Refresh>,

    /// Tuning applied to new watchers.
    watcher_config: WatcherConfig,

    projects: Mutex<HashMap<ProjectId, OpenProject>>,
}

impl ProjectRegistry {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        refresh: Arc<dyn Refresh>,
        watcher_config: WatcherConfig,
    ) -> Self {
        Self {
            source,
            refresh,
            watcher_config,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Handle a project being opened.
    ///
    /// Projects without a T-Ruby configuration are ignored and yield `None`.
    /// Opening an already open project is a no-op returning its id.
    pub fn open(&self, project_root: &Path) -> Option<ProjectId> {
        let id = match ProjectId::for_root(project_root) {
            Ok(id) => id,
            Err(e) => {
                warn!("Cannot open project {}: {e}", project_root.display());
                return None;
            }
        };

        let mut projects = self.projects.lock();
        if projects.contains_key(&id) {
            debug!("Project already open: {id}");
            return Some(id);
        }

        if !self.source.recognizes(id.root()) {
            debug!("No {CONFIG_FILE_NAME} found in {id}, skipping output watcher");
            return None;
        }

        info!("T-Ruby project detected, starting output watcher for {id}");
        let config = self.source.load(id.root());
        let (output_root, secondary) = watch_targets(&config, id.root());
        let output = self.new_watcher();
        output.start(&output_root);

        let secondary = secondary.map(|root| {
            let watcher = self.new_watcher();
            watcher.start(&root);
            (root, watcher)
        });

        projects.insert(
            id.clone(),
            OpenProject {
                config,
                output_root,
                output,
                secondary,
            },
        );
        Some(id)
    }

    /// Handle a project being closed. Returns whether it was open.
    pub fn close(&self, id: &ProjectId) -> bool {
        let project = self.projects.lock().remove(id);
        match project {
            Some(project) => {
                project.stop();
                info!("Closed project: {id}");
                true
            }
            None => false,
        }
    }

    /// Re-read a project's configuration and move its watchers accordingly.
    ///
    /// Watchers whose root did not change are restarted in place. Returns
    /// whether the project was open.
    pub fn reload(&self, id: &ProjectId) -> bool {
        let mut projects = self.projects.lock();
        let Some(project) = projects.get_mut(id) else {
            return false;
        };

        let config = self.source.load(id.root());
        let (output_root, target) = watch_targets(&config, id.root());
        if output_root == project.output_root {
            project.output.restart();
        } else {
            info!(
                "Output directory for {id} moved to {}",
                output_root.display()
            );
            project.output.restart_with(&output_root);
        }

        project.secondary = match (project.secondary.take(), target) {
            (Some((old, watcher)), Some(new)) => {
                if old == new {
                    watcher.restart();
                } else {
                    watcher.restart_with(&new);
                }
                Some((new, watcher))
            }
            (None, Some(new)) => {
                let watcher = self.new_watcher();
                watcher.start(&new);
                Some((new, watcher))
            }
            (Some((_, watcher)), None) => {
                watcher.stop();
                None
            }
            (None, None) => None,
        };

        project.config = config;
        project.output_root = output_root;
        true
    }

    /// Close every open project.
    pub fn close_all(&self) {
        let projects: Vec<_> = self.projects.lock().drain().collect();
        for (id, project) in projects {
            project.stop();
            debug!("Closed project: {id}");
        }
    }

    pub fn is_open(&self, id: &ProjectId) -> bool {
        self.projects.lock().contains_key(id)
    }

    /// Ids of all open projects, sorted.
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self.projects.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Configuration last loaded for a project.
    pub fn config(&self, id: &ProjectId) -> Option<OutputConfig> {
        self.projects.lock().get(id).map(|p| p.config.clone())
    }

    /// Roots currently being watched for a project.
    pub fn watched_roots(&self, id: &ProjectId) -> Vec<PathBuf> {
        let projects = self.projects.lock();
        let Some(project) = projects.get(id) else {
            return Vec::new();
        };

        std::iter::once(&project.output)
            .chain(project.secondary.as_ref().map(|(_, w)| w))
            .filter(|w| w.is_running())
            .filter_map(DirectoryWatcher::root)
            .collect()
    }

    fn new_watcher(&self) -> DirectoryWatcher {
        DirectoryWatcher::new(self.watcher_config.clone(), self.refresh.clone())
    }
}

impl Drop for ProjectRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Roots for the output watcher and the optional secondary watcher.
///
/// Nested directories are never watched twice: a secondary directory inside
/// the output directory is dropped, and when the output directory lies inside
/// the secondary one a single watcher on the secondary directory covers both.
fn watch_targets(config: &OutputConfig, project_root: &Path) -> (PathBuf, Option<PathBuf>) {
    let output_root = config.output_root(project_root);
    let Some(secondary) = config.secondary_root(project_root) else {
        return (output_root, None);
    };

    if secondary.starts_with(&output_root) {
        debug!(
            "Secondary directory {} is inside the output directory",
            secondary.display()
        );
        (output_root, None)
    } else if output_root.starts_with(&secondary) {
        debug!(
            "Output directory {} is inside the secondary directory, watching {}",
            output_root.display(),
            secondary.display()
        );
        (secondary, None)
    } else {
        (output_root, Some(secondary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_secondary_inside_output_is_skipped() {
        let root = Path::new("/proj");
        let config = OutputConfig::new("build").with_secondary_dir("build/sig");
        assert_eq!(watch_targets(&config, root), (root.join("build"), None));

        let config = OutputConfig::new("build").with_secondary_dir("build");
        assert_eq!(watch_targets(&config, root), (root.join("build"), None));

        let config = OutputConfig::new("build").with_secondary_dir("sig");
        assert_eq!(
            watch_targets(&config, root),
            (root.join("build"), Some(root.join("sig")))
        );
    }

    #[test]
    fn test_output_inside_secondary_watches_outer_root_once() {
        let root = Path::new("/proj");
        let config = OutputConfig::new("sig/ruby").with_secondary_dir("sig");
        assert_eq!(watch_targets(&config, root), (root.join("sig"), None));

        let config = OutputConfig::new("sig/ruby");
        assert_eq!(watch_targets(&config, root), (root.join("sig/ruby"), None));
    }

    #[test]
    fn test_project_id_is_canonical() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("proj")).unwrap();

        let direct = ProjectId::for_root(&temp_dir.path().join("proj")).unwrap();
        let dotted = ProjectId::for_root(&temp_dir.path().join("proj/.")).unwrap();
        assert_eq!(direct, dotted);
        assert!(ProjectId::for_root(&temp_dir.path().join("missing")).is_err());
    }
}
