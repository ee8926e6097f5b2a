//! Project open/reload/close driving real output watchers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use trb_directory_watcher::{Refresh, WatcherConfig};
use trb_ide_host::{ProjectId, ProjectRegistry};
use trb_project_config::{CONFIG_FILE_NAME, ConfigSource, OutputConfig, TrbConfigFile};

const SETTLE: Duration = Duration::from_millis(1200);

#[derive(Default)]
struct RecordingRefresh {
    calls: Mutex<Vec<PathBuf>>,
}

impl RecordingRefresh {
    fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    fn wait_for(&self, n: usize) -> usize {
        let start = Instant::now();
        while self.calls.lock().len() < n && start.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(20));
        }
        self.calls.lock().len()
    }
}

impl Refresh for RecordingRefresh {
    fn refresh(&self, path: &Path, _recursive: bool) {
        self.calls.lock().push(path.to_path_buf());
    }
}

/// Treats every project as a T-Ruby project, reading config when present.
struct AlwaysRecognized;

impl ConfigSource for AlwaysRecognized {
    fn load(&self, project_root: &Path) -> OutputConfig {
        TrbConfigFile::new().load(project_root)
    }

    fn recognizes(&self, _project_root: &Path) -> bool {
        true
    }
}

fn registry_with(
    source: Arc<dyn ConfigSource>,
    refresh: &Arc<RecordingRefresh>,
) -> ProjectRegistry {
    let config = WatcherConfig::new()
        .with_quiet_period(Duration::from_millis(200))
        .with_poll_timeout(Duration::from_millis(100));
    ProjectRegistry::new(source, refresh.clone(), config)
}

fn write_config(project: &Path, content: &str) {
    fs::write(project.join(CONFIG_FILE_NAME), content).unwrap();
}

#[test]
fn test_project_without_config_is_skipped() {
    let project = TempDir::new().unwrap();
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);

    assert_eq!(registry.open(project.path()), None);
    assert!(registry.projects().is_empty());
    assert!(!project.path().join("build").exists());
}

#[test]
fn test_absent_config_watches_default_build_dir() {
    let project = TempDir::new().unwrap();
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(AlwaysRecognized), &refresh);

    let id = registry.open(project.path()).unwrap();
    let build = id.root().join("build");
    assert_eq!(registry.watched_roots(&id), vec![build.clone()]);
    assert_eq!(registry.config(&id), Some(OutputConfig::default()));

    fs::write(build.join("a.rb"), "puts 1").unwrap();
    assert_eq!(refresh.wait_for(1), 1);
    assert_eq!(refresh.calls(), vec![build]);
}

#[test]
fn test_open_is_idempotent() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "ruby_dir: out\n");
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);

    let first = registry.open(project.path()).unwrap();
    let second = registry.open(&project.path().join(".")).unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.projects(), vec![first.clone()]);

    fs::write(first.root().join("out/a.rb"), "a").unwrap();
    refresh.wait_for(1);
    thread::sleep(SETTLE);
    assert_eq!(refresh.calls().len(), 1);
}

#[test]
fn test_secondary_directory_gets_its_own_watcher() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "ruby_dir: build\nrbs_dir: sig\n");
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);

    let id = registry.open(project.path()).unwrap();
    let sig = id.root().join("sig");
    assert_eq!(
        registry.watched_roots(&id),
        vec![id.root().join("build"), sig.clone()]
    );

    fs::write(sig.join("user.rbs"), "class User end").unwrap();
    assert_eq!(refresh.wait_for(1), 1);
    assert_eq!(refresh.calls(), vec![sig]);
}

#[test]
fn test_reload_moves_watch_to_new_output_dir() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "ruby_dir: old\n");
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);
    let id = registry.open(project.path()).unwrap();

    write_config(project.path(), "ruby_dir: new\nrbs_dir: sig\n");
    assert!(registry.reload(&id));
    assert_eq!(
        registry.watched_roots(&id),
        vec![id.root().join("new"), id.root().join("sig")]
    );

    fs::write(id.root().join("old/stale.rb"), "old").unwrap();
    thread::sleep(SETTLE);
    assert!(refresh.calls().is_empty());

    fs::write(id.root().join("new/fresh.rb"), "new").unwrap();
    assert_eq!(refresh.wait_for(1), 1);
    assert_eq!(refresh.calls(), vec![id.root().join("new")]);

    write_config(project.path(), "ruby_dir: new\n");
    assert!(registry.reload(&id));
    assert_eq!(registry.watched_roots(&id), vec![id.root().join("new")]);
}

#[test]
fn test_close_stops_refreshes() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "ruby_dir: build\n");
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);
    let id = registry.open(project.path()).unwrap();

    assert!(registry.close(&id));
    assert!(!registry.close(&id));
    assert!(!registry.is_open(&id));
    assert!(!registry.reload(&id));

    fs::write(id.root().join("build/late.rb"), "late").unwrap();
    thread::sleep(SETTLE);
    assert!(refresh.calls().is_empty());
}

#[test]
fn test_unknown_project_root_is_rejected() {
    let project = TempDir::new().unwrap();
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(AlwaysRecognized), &refresh);

    assert_eq!(registry.open(&project.path().join("missing")), None);
    assert!(ProjectId::for_root(&project.path().join("missing")).is_err());
}

#[test]
fn test_output_nested_in_secondary_refreshes_once() {
    let project = TempDir::new().unwrap();
    write_config(project.path(), "ruby_dir: sig/ruby\nrbs_dir: sig\n");
    let refresh = Arc::new(RecordingRefresh::default());
    let registry = registry_with(Arc::new(TrbConfigFile::new()), &refresh);

    let id = registry.open(project.path()).unwrap();
    let sig = id.root().join("sig");
    assert_eq!(registry.watched_roots(&id), vec![sig.clone()]);

    fs::create_dir_all(sig.join("ruby")).unwrap();
    thread::sleep(SETTLE);
    let before = refresh.calls().len();

    fs::write(sig.join("ruby/a.rb"), "a").unwrap();
    assert_eq!(refresh.wait_for(before + 1), before + 1);
    thread::sleep(SETTLE);
    assert_eq!(refresh.calls()[before..].to_vec(), vec![sig]);
}
