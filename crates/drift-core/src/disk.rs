//! Free disk space probes for admission control.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sysinfo::Disks;
use tracing::warn;

/// Reports free space on the filesystem holding the scratch directory.
pub trait DiskSpace: Send + Sync + std::fmt::Debug {
    /// Free bytes, or `None` when it cannot be determined (writes are then admitted).
    fn available_bytes(&self) -> Option<u64>;
}

/// Probe backed by `sysinfo`, refreshed at most once per `ttl`.
#[derive(Debug)]
pub struct SysinfoDiskSpace {
    path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Option<u64>)>>,
}

impl SysinfoDiskSpace {
    pub fn for_path(path: &Path) -> Self {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            path,
            ttl: Duration::from_secs(1),
            cache: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn probe(&self) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| self.path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len());

        match disk {
            Some(disk) => Some(disk.available_space()),
            None => {
                warn!(path = %self.path.display(), "No disk found for scratch directory");
                None
            }
        }
    }
}

impl DiskSpace for SysinfoDiskSpace {
    fn available_bytes(&self) -> Option<u64> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((at, value)) = *cache {
            if at.elapsed() < self.ttl {
                return value;
            }
        }
        let value = self.probe();
        *cache = Some((Instant::now(), value));
        value
    }
}

/// A fixed, adjustable amount of free space.
#[derive(Debug)]
pub struct StaticDiskSpace {
    available: AtomicU64,
}

impl StaticDiskSpace {
    pub fn new(available: u64) -> Self {
        Self {
            available: AtomicU64::new(available),
        }
    }

    /// Effectively unlimited space.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    pub fn set(&self, available: u64) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl DiskSpace for StaticDiskSpace {
    fn available_bytes(&self) -> Option<u64> {
        Some(self.available.load(Ordering::Relaxed))
    }
}
