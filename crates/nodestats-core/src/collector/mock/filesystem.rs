//! In-memory mock filesystem for testing probes without a real `/proc`.
//!
//! `MockFs` simulates a filesystem in memory, allowing tests to run on macOS
//! and in CI environments without Linux. Files can be replaced between reads
//! to simulate counters moving from one tick to the next.

use crate::collector::traits::{FileSystem, FsSpace};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct MockState {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Capacity answers for `space()`, keyed by mount path.
    spaces: HashMap<PathBuf, FsSpace>,
}

impl MockState {
    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

/// In-memory filesystem for testing.
///
/// Clones share the same backing state, so a test can keep a handle and
/// rewrite `/proc` files after handing a clone to a probe.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    state: Arc<RwLock<MockState>>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.add_parents(&path);
        state.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.add_parents(&path);
        state.directories.insert(path);
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.files.retain(|p, _| !p.starts_with(path));
        state.directories.retain(|p| !p.starts_with(path));
    }

    /// Registers a mounted filesystem with the given capacity figures.
    pub fn set_space(&self, path: impl AsRef<Path>, space: FsSpace) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.add_parents(&path);
        state.directories.insert(path.clone());
        state.spaces.insert(path, space);
    }

    /// Adds a process with its `/proc/[pid]/stat` and `/proc/[pid]/comm` files.
    pub fn add_process(&self, pid: u32, stat: &str, comm: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("comm"), comm);
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.files.contains_key(path) || state.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        for file_path in state.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &state.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn space(&self, path: &Path) -> io::Result<FsSpace> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.spaces.get(path).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no filesystem mounted at {:?}", path),
            )
        })
    }
}
