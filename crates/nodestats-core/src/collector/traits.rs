//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait allows the probes to work with both the real `/proc`
//! filesystem on Linux and in-memory mock implementations in tests and CI.

use std::io;
use std::path::{Path, PathBuf};

/// Capacity figures of a mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsSpace {
    pub total: u64,
    pub free: u64,
    pub available: u64,
}

impl FsSpace {
    /// Bytes in use (total minus free blocks).
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.free)
    }
}

/// Abstraction for filesystem operations.
///
/// This trait allows collectors to read from the real filesystem or from
/// a mock implementation for testing purposes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Returns capacity information for the filesystem mounted at `path`.
    fn space(&self, path: &Path) -> io::Result<FsSpace>;
}

/// Real filesystem implementation that delegates to `std::fs`.
///
/// Use this in production to read from the actual `/proc` filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    #[cfg(unix)]
    fn space(&self, path: &Path) -> io::Result<FsSpace> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;
        Ok(FsSpace {
            total: stat.blocks() as u64 * fragment,
            free: stat.blocks_free() as u64 * fragment,
            available: stat.blocks_available() as u64 * fragment,
        })
    }

    #[cfg(not(unix))]
    fn space(&self, path: &Path) -> io::Result<FsSpace> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("filesystem capacity is not available for {:?}", path),
        ))
    }
}
