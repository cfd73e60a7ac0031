//! Filesystem-backed shared-memory regions.
//!
//! Payloads cross the gateway/watchdog process boundary through named,
//! memory-mapped files under a configured directory. The producer
//! creates a region of exact size, the consumer opens it read-only,
//! and both unlink on close. The directory is wiped on startup so a
//! crashed predecessor never leaks stale regions into a new run.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result alias for shared-memory operations.
pub type ShmResult<T> = Result<T, ShmError>;

/// Errors from region management. Callers treat all of these as fatal
/// for the operation at hand.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shared memory I/O failure on {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl ShmError {
    fn io(name: &str, source: std::io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            source,
        }
    }
}

#[derive(Default)]
struct ShmStats {
    live_regions: AtomicUsize,
    mapped_bytes: AtomicUsize,
}

/// Manager for one shared-memory directory.
pub struct SharedMemory {
    root: PathBuf,
    stats: Arc<ShmStats>,
}

impl SharedMemory {
    /// Open the manager rooted at `root`, deleting any previous
    /// contents. A leftover file or directory from a crashed run is
    /// removed before the directory is recreated.
    pub fn new(root: impl Into<PathBuf>) -> ShmResult<Self> {
        let root = root.into();
        let name = root.display().to_string();
        match std::fs::metadata(&root) {
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(&root).map_err(|e| ShmError::io(&name, e))?;
            }
            Ok(_) => {
                std::fs::remove_file(&root).map_err(|e| ShmError::io(&name, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ShmError::io(&name, e)),
        }
        std::fs::create_dir_all(&root).map_err(|e| ShmError::io(&name, e))?;
        info!(path = %root.display(), "shared memory directory ready");
        Ok(Self {
            root,
            stats: Arc::new(ShmStats::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new region of exactly `size` bytes, mapped read/write.
    pub fn create(&self, name: &str, size: usize) -> ShmResult<Region> {
        let path = self.root.join(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ShmError::io(name, e))?;
        file.set_len(size as u64).map_err(|e| ShmError::io(name, e))?;
        let mapping = Self::map_mut(name, &file, size)?;
        self.stats.live_regions.fetch_add(1, Ordering::Relaxed);
        self.stats.mapped_bytes.fetch_add(size, Ordering::Relaxed);
        debug!(name, size, "created shared memory region");
        Ok(Region {
            name: name.to_string(),
            path,
            size,
            mapping,
            stats: Arc::clone(&self.stats),
        })
    }

    /// Map an existing region read-only.
    pub fn open_read_only(&self, name: &str) -> ShmResult<Region> {
        let path = self.root.join(name);
        let file = File::open(&path).map_err(|e| ShmError::io(name, e))?;
        let size = file
            .metadata()
            .map_err(|e| ShmError::io(name, e))?
            .len() as usize;
        let mapping = if size == 0 {
            Mapping::Empty
        } else {
            // Safety: the mapping is private to this process handle and
            // the producer has finished writing before signalling.
            let map = unsafe { Mmap::map(&file) }.map_err(|e| ShmError::io(name, e))?;
            Mapping::ReadOnly(map)
        };
        self.stats.live_regions.fetch_add(1, Ordering::Relaxed);
        self.stats.mapped_bytes.fetch_add(size, Ordering::Relaxed);
        debug!(name, size, "opened shared memory region read-only");
        Ok(Region {
            name: name.to_string(),
            path,
            size,
            mapping,
            stats: Arc::clone(&self.stats),
        })
    }

    fn map_mut(name: &str, file: &File, size: usize) -> ShmResult<Mapping> {
        if size == 0 {
            return Ok(Mapping::Empty);
        }
        // Safety: exclusive create-new file, sized above; no other
        // mapping exists yet.
        let map = unsafe { MmapMut::map_mut(file) }.map_err(|e| ShmError::io(name, e))?;
        Ok(Mapping::ReadWrite(map))
    }

    /// Regions currently mapped through this manager.
    pub fn live_regions(&self) -> usize {
        self.stats.live_regions.load(Ordering::Relaxed)
    }

    /// Total bytes currently mapped through this manager.
    pub fn mapped_bytes(&self) -> usize {
        self.stats.mapped_bytes.load(Ordering::Relaxed)
    }
}

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
    Empty,
}

/// One named, memory-mapped byte region.
pub struct Region {
    name: String,
    path: PathBuf,
    size: usize,
    mapping: Mapping,
    stats: Arc<ShmStats>,
}

impl Region {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            Mapping::ReadWrite(map) => map,
            Mapping::ReadOnly(map) => map,
            Mapping::Empty => &[],
        }
    }

    /// Writable view; `None` for read-only or empty mappings.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.mapping {
            Mapping::ReadWrite(map) => Some(map),
            _ => None,
        }
    }

    /// Unmap, and unlink the backing file when `remove_file` is set.
    /// Both sides of the contract unlink on close, so a vanished file
    /// only rates a debug line.
    pub fn close(self, remove_file: bool) {
        self.stats.live_regions.fetch_sub(1, Ordering::Relaxed);
        self.stats.mapped_bytes.fetch_sub(self.size, Ordering::Relaxed);
        if remove_file {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(name = %self.name, "region file already unlinked");
                }
                Err(e) => {
                    warn!(name = %self.name, error = %e, "failed to unlink region file");
                }
            }
        }
    }
}
