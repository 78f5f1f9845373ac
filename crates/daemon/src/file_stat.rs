//! File statistics module for ManageHD
//!
//! Size and timestamp lookups for individual files, plus the volume queries
//! (same-volume test, free space) the archive step depends on.

use crate::platform::{TimestampStrategy, VolumeStrategy};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Bytes in one megabyte (binary)
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Size and timestamp of a file at the moment it was inspected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Creation time as defined by the host's [`TimestampStrategy`]
    pub timestamp: SystemTime,
}

impl FileStat {
    /// Read size and creation time for `path`
    pub fn read(path: &Path, strategy: TimestampStrategy) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let timestamp = creation_time(&metadata, strategy)?;
        Ok(Self {
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            timestamp,
        })
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.size_bytes)
    }
}

/// The file time `strategy` treats as creation time
///
/// Modification time is never used: a copy that keeps its old mtime must
/// still count as new.
pub fn creation_time(
    metadata: &fs::Metadata,
    strategy: TimestampStrategy,
) -> io::Result<SystemTime> {
    match strategy {
        TimestampStrategy::ChangeTime => change_time(metadata),
        TimestampStrategy::CreationTime => metadata.created(),
    }
}

#[cfg(unix)]
fn change_time(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    use std::os::unix::fs::MetadataExt;
    use std::time::Duration;

    let secs = metadata.ctime();
    let nanos = metadata.ctime_nsec().clamp(0, 999_999_999) as u32;
    let time = if secs >= 0 {
        SystemTime::UNIX_EPOCH.checked_add(Duration::new(secs as u64, nanos))
    } else {
        SystemTime::UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .and_then(|t| t.checked_add(Duration::from_nanos(u64::from(nanos))))
    };
    time.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "change time out of range"))
}

#[cfg(not(unix))]
fn change_time(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    metadata.created()
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Size of a file in megabytes, or 0 when it cannot be read
pub fn size_in_megabytes(path: &Path) -> f64 {
    fs::metadata(path)
        .map(|m| bytes_to_mb(m.len()))
        .unwrap_or(0.0)
}

/// Volume queries used when archiving across drives
pub trait VolumeProbe: Send + Sync {
    /// Whether both paths live on the same volume
    fn same_volume(&self, a: &Path, b: &Path) -> io::Result<bool>;

    /// Free bytes available to the current user on the volume holding `path`
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// Volume queries backed by the real filesystem
#[derive(Debug, Clone, Copy)]
pub struct SystemVolumes {
    strategy: VolumeStrategy,
}

impl SystemVolumes {
    pub fn new(strategy: VolumeStrategy) -> Self {
        Self { strategy }
    }
}

impl VolumeProbe for SystemVolumes {
    fn same_volume(&self, a: &Path, b: &Path) -> io::Result<bool> {
        match self.strategy {
            VolumeStrategy::DeviceId => Ok(device_id(a)? == device_id(b)?),
            VolumeStrategy::DriveLetter => Ok(drive_letter(a) == drive_letter(b)),
        }
    }

    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        use sysinfo::Disks;

        let canonical = fs::canonicalize(path)?;
        let disks = Disks::new_with_refreshed_list();

        // Deepest mount point containing the path wins
        let mut best_match = None;
        let mut best_len = 0usize;
        for disk in disks.iter() {
            let mount = disk.mount_point();
            if canonical.starts_with(mount) {
                let depth = mount.components().count();
                if depth >= best_len {
                    best_len = depth;
                    best_match = Some(disk.available_space());
                }
            }
        }

        best_match.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no volume information available for {}", path.display()),
            )
        })
    }
}

#[cfg(unix)]
fn device_id(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.dev())
}

#[cfg(not(unix))]
fn device_id(path: &Path) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("device ids are not available for {}", path.display()),
    ))
}

/// Leading drive letter of a path, upper-cased
pub fn drive_letter(path: &Path) -> Option<char> {
    path.to_string_lossy()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Volume probe with fixed answers that counts how often it was asked
    #[derive(Debug, Default)]
    pub struct FixedVolumes {
        pub same: bool,
        pub available: u64,
        pub calls: AtomicUsize,
    }

    impl FixedVolumes {
        pub fn same_volume() -> Self {
            Self {
                same: true,
                available: 0,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn other_volume(available: u64) -> Self {
            Self {
                same: false,
                available,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl VolumeProbe for FixedVolumes {
        fn same_volume(&self, _a: &Path, _b: &Path) -> io::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.same)
        }

        fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.available)
        }
    }
}
