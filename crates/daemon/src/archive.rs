//! Archive module for ManageHD
//!
//! Moves source videos that were superseded by a converted output into the
//! archive directory. Only files whose output exists and is at least as new as
//! the source are moved, and a cross-volume move is refused up front when the
//! archive volume cannot hold all of them.

use crate::config::Preset;
use crate::encode::destination_path;
use crate::file_stat::{FileStat, VolumeProbe};
use crate::platform::TimestampStrategy;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;

/// Errors that stop archival before any file is moved.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The archive directory could not be created.
    #[error("Failed to create archive directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    /// The archive and source volumes could not be compared.
    #[error("Failed to compare volumes of {archive} and {source_dir}: {source}")]
    VolumeCheck {
        archive: PathBuf,
        source_dir: PathBuf,
        source: io::Error,
    },

    /// Free space on the archive volume could not be read.
    #[error("Failed to read free space for {path}: {source}")]
    FreeSpace { path: PathBuf, source: io::Error },
}

/// A source file paired with its converted output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveCandidate {
    pub source: PathBuf,
    pub source_time: SystemTime,
    pub source_size: u64,
    pub destination: PathBuf,
    pub destination_time: SystemTime,
    pub destination_size: u64,
}

/// A source file that qualified for archival but could not be moved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveFailure {
    pub file: PathBuf,
    pub reason: String,
}

/// Result of one archival pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Candidates were moved; `archived` holds their new locations
    Completed {
        archived: Vec<PathBuf>,
        failures: Vec<MoveFailure>,
    },
    /// The archive volume is too small for the candidates; nothing was moved
    InsufficientSpace {
        required_bytes: u64,
        available_bytes: u64,
    },
    /// No archive directory is configured
    Skipped,
}

/// An output supersedes its source when it was created no earlier than the source.
pub fn is_superseded(source_time: SystemTime, destination_time: SystemTime) -> bool {
    destination_time >= source_time
}

/// Decides which converted sources to archive and moves them.
pub struct ArchiveReconciler {
    volumes: Arc<dyn VolumeProbe>,
    preset: Preset,
    timestamps: TimestampStrategy,
}

impl ArchiveReconciler {
    pub fn new(
        volumes: Arc<dyn VolumeProbe>,
        preset: Preset,
        timestamps: TimestampStrategy,
    ) -> Self {
        Self {
            volumes,
            preset,
            timestamps,
        }
    }

    /// Pair every source with its output in `destination_dir`, keeping only
    /// sources the output supersedes.
    ///
    /// Sources or outputs that cannot be read are left out.
    pub fn candidates(&self, destination_dir: &Path, sources: &[PathBuf]) -> Vec<ArchiveCandidate> {
        sources
            .iter()
            .filter_map(|source| {
                let source_stat = match FileStat::read(source, self.timestamps) {
                    Ok(stat) => stat,
                    Err(e) => {
                        debug!("skipping {}: {}", source.display(), e);
                        return None;
                    }
                };

                let destination = destination_path(source, destination_dir, self.preset);
                let destination_stat = FileStat::read(&destination, self.timestamps).ok()?;

                if !is_superseded(source_stat.timestamp, destination_stat.timestamp) {
                    debug!(
                        "keeping {}: {} is older than its source",
                        source.display(),
                        destination.display()
                    );
                    return None;
                }

                Some(ArchiveCandidate {
                    source: source_stat.path,
                    source_time: source_stat.timestamp,
                    source_size: source_stat.size_bytes,
                    destination: destination_stat.path,
                    destination_time: destination_stat.timestamp,
                    destination_size: destination_stat.size_bytes,
                })
            })
            .collect()
    }

    /// Move every superseded source into `archive_dir`
    ///
    /// Returns [`ArchiveOutcome::Skipped`] without touching the filesystem
    /// when `archive_dir` is unset or empty. When the archive lives on another
    /// volume than `source_dir` and its free space is below the total size of
    /// the candidates, nothing is moved.
    pub fn archive(
        &self,
        archive_dir: Option<&Path>,
        source_dir: &Path,
        destination_dir: &Path,
        sources: &[PathBuf],
    ) -> Result<ArchiveOutcome, ArchiveError> {
        let archive_dir = match archive_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => return Ok(ArchiveOutcome::Skipped),
        };

        let candidates = self.candidates(destination_dir, sources);
        if candidates.is_empty() {
            info!("no converted sources to archive");
            return Ok(ArchiveOutcome::Completed {
                archived: Vec::new(),
                failures: Vec::new(),
            });
        }

        // The archive directory may not exist yet; its volume is the one of
        // its closest existing ancestor.
        let existing = existing_ancestor(archive_dir);

        let same_volume = self
            .volumes
            .same_volume(existing, source_dir)
            .map_err(|source| ArchiveError::VolumeCheck {
                archive: archive_dir.to_path_buf(),
                source_dir: source_dir.to_path_buf(),
                source,
            })?;

        if !same_volume {
            let required_bytes: u64 = candidates.iter().map(|c| c.source_size).sum();
            let available_bytes = self.volumes.available_bytes(existing).map_err(|source| {
                ArchiveError::FreeSpace {
                    path: archive_dir.to_path_buf(),
                    source,
                }
            })?;

            if available_bytes < required_bytes {
                warn!(
                    "archive volume has {} bytes free, {} needed; nothing archived",
                    available_bytes, required_bytes
                );
                return Ok(ArchiveOutcome::InsufficientSpace {
                    required_bytes,
                    available_bytes,
                });
            }
        }

        fs::create_dir_all(archive_dir).map_err(|source| ArchiveError::CreateDir {
            path: archive_dir.to_path_buf(),
            source,
        })?;

        let mut archived = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for candidate in candidates {
            match relocate(&candidate.source, archive_dir) {
                Ok(target) => {
                    debug!("archived {} to {}", candidate.source.display(), target.display());
                    archived.push(target);
                }
                Err(e) => {
                    warn!("failed to archive {}: {}", candidate.source.display(), e);
                    failures.push(MoveFailure {
                        file: candidate.source,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "archived {} source files ({} failed)",
            archived.len(),
            failures.len()
        );
        Ok(ArchiveOutcome::Completed { archived, failures })
    }
}

/// `path` itself when it exists, otherwise its nearest existing ancestor
fn existing_ancestor(path: &Path) -> &Path {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| if path.is_relative() { Path::new(".") } else { path })
}

/// Move `file` into `dir`, keeping its name
///
/// Tries a rename first and falls back to copy then remove across volumes.
/// An existing file of the same name in `dir` is never overwritten.
pub fn relocate(file: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;
    let target = dir.join(name);

    if target.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", target.display()),
        ));
    }

    if fs::rename(file, &target).is_ok() {
        return Ok(target);
    }

    if let Err(e) = fs::copy(file, &target) {
        let _ = fs::remove_file(&target);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(file) {
        // Keep exactly one copy
        let _ = fs::remove_file(&target);
        return Err(e);
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_stat::fakes::FixedVolumes;
    use crate::platform::Platform;
    use std::fs::File;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Layout {
        _root: TempDir,
        source_dir: PathBuf,
        destination_dir: PathBuf,
        archive_dir: PathBuf,
    }

    fn layout() -> Layout {
        let root = TempDir::new().unwrap();
        let source_dir = root.path().join("source");
        let destination_dir = root.path().join("new");
        let archive_dir = root.path().join("archive");
        fs::create_dir_all(&source_dir).unwrap();
        fs::create_dir_all(&destination_dir).unwrap();
        Layout {
            _root: root,
            source_dir,
            destination_dir,
            archive_dir,
        }
    }

    fn write_file(path: &Path, len: usize) {
        let mut file = File::create(path).unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
    }

    /// Wait long enough for the next file to get a strictly later creation
    /// time, even on filesystems with one-second resolution.
    fn tick() {
        thread::sleep(Duration::from_millis(1_100));
    }

    fn reconciler(volumes: FixedVolumes) -> (ArchiveReconciler, Arc<FixedVolumes>) {
        let volumes = Arc::new(volumes);
        (
            ArchiveReconciler::new(
                volumes.clone(),
                Preset::Standard,
                Platform::detect().timestamp_strategy,
            ),
            volumes,
        )
    }

    #[test]
    fn test_superseded_includes_equal_times() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        assert!(is_superseded(t0, t0));
        assert!(is_superseded(t0, t0 + Duration::from_secs(1)));
        assert!(!is_superseded(t0 + Duration::from_nanos(1), t0));
    }

    #[test]
    fn test_newer_output_is_candidate() {
        let l = layout();
        let source = l.source_dir.join("A.avi");
        write_file(&source, 64);
        write_file(&l.destination_dir.join("A.mkv"), 32);

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        let candidates = reconciler.candidates(&l.destination_dir, &[source.clone()]);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, source);
        assert_eq!(candidates[0].source_size, 64);
        assert_eq!(candidates[0].destination_size, 32);
        assert!(candidates[0].destination_time >= candidates[0].source_time);
    }

    #[test]
    fn test_older_output_is_excluded() {
        let l = layout();
        let source = l.source_dir.join("A.mkv");
        write_file(&l.destination_dir.join("A.mkv"), 8);
        tick();
        write_file(&source, 8);

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        assert!(reconciler.candidates(&l.destination_dir, &[source]).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_copied_source_with_old_mtime_is_excluded() {
        use filetime::{set_file_mtime, FileTime};

        // A leftover output from an earlier run, then a source copied in
        // with its original modification time kept
        let l = layout();
        let source = l.source_dir.join("A.mkv");
        write_file(&l.destination_dir.join("A.mkv"), 8);
        tick();
        write_file(&source, 8);
        set_file_mtime(&source, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        assert!(reconciler.candidates(&l.destination_dir, &[source]).is_empty());
    }

    #[test]
    fn test_missing_output_is_excluded() {
        let l = layout();
        let source = l.source_dir.join("A.mkv");
        write_file(&source, 8);

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        assert!(reconciler.candidates(&l.destination_dir, &[source]).is_empty());
    }

    #[test]
    fn test_skipped_without_archive_dir() {
        let l = layout();
        let (reconciler, volumes) = reconciler(FixedVolumes::same_volume());
        let sources = vec![l.source_dir.join("A.mkv")];

        let outcome = reconciler
            .archive(Some(Path::new("")), &l.source_dir, &l.destination_dir, &sources)
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::Skipped);

        let outcome = reconciler
            .archive(None, &l.source_dir, &l.destination_dir, &sources)
            .unwrap();
        assert_eq!(outcome, ArchiveOutcome::Skipped);
        assert_eq!(volumes.calls(), 0);
        assert!(!l.archive_dir.exists());
    }

    #[test]
    fn test_archive_moves_only_superseded_sources() {
        let l = layout();
        let done = l.source_dir.join("done.avi");
        let stale = l.source_dir.join("stale.mkv");
        write_file(&l.destination_dir.join("stale.mkv"), 16);
        tick();
        write_file(&done, 16);
        write_file(&stale, 16);
        write_file(&l.destination_dir.join("done.mkv"), 16);

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        let outcome = reconciler
            .archive(
                Some(l.archive_dir.as_path()),
                &l.source_dir,
                &l.destination_dir,
                &[done.clone(), stale.clone()],
            )
            .unwrap();

        assert_eq!(
            outcome,
            ArchiveOutcome::Completed {
                archived: vec![l.archive_dir.join("done.avi")],
                failures: Vec::new(),
            }
        );
        assert!(!done.exists());
        assert!(stale.exists());
        assert!(l.archive_dir.join("done.avi").exists());
    }

    #[test]
    fn test_insufficient_space_moves_nothing() {
        let l = layout();
        let a = l.source_dir.join("a.mkv");
        let b = l.source_dir.join("b.mkv");
        write_file(&a, 600);
        write_file(&b, 500);
        write_file(&l.destination_dir.join("a.mkv"), 10);
        write_file(&l.destination_dir.join("b.mkv"), 10);

        let (reconciler, _) = reconciler(FixedVolumes::other_volume(1_000));
        let outcome = reconciler
            .archive(
                Some(l.archive_dir.as_path()),
                &l.source_dir,
                &l.destination_dir,
                &[a.clone(), b.clone()],
            )
            .unwrap();

        assert_eq!(
            outcome,
            ArchiveOutcome::InsufficientSpace {
                required_bytes: 1_100,
                available_bytes: 1_000,
            }
        );
        assert!(a.exists());
        assert!(b.exists());
        assert!(l.destination_dir.join("a.mkv").exists());
        assert!(!l.archive_dir.exists());
    }

    #[test]
    fn test_cross_volume_with_room_archives() {
        let l = layout();
        let a = l.source_dir.join("a.mkv");
        write_file(&a, 600);
        write_file(&l.destination_dir.join("a.mkv"), 10);

        let (reconciler, volumes) = reconciler(FixedVolumes::other_volume(600));
        let outcome = reconciler
            .archive(Some(l.archive_dir.as_path()), &l.source_dir, &l.destination_dir, &[a])
            .unwrap();

        assert!(matches!(outcome, ArchiveOutcome::Completed { ref archived, .. } if archived.len() == 1));
        // same-volume check plus free-space query
        assert_eq!(volumes.calls(), 2);
        assert!(l.archive_dir.join("a.mkv").exists());
    }

    #[test]
    fn test_same_volume_skips_space_check() {
        let l = layout();
        let a = l.source_dir.join("a.mkv");
        write_file(&a, 600);
        write_file(&l.destination_dir.join("a.mkv"), 10);

        let (reconciler, volumes) = reconciler(FixedVolumes::same_volume());
        reconciler
            .archive(Some(l.archive_dir.as_path()), &l.source_dir, &l.destination_dir, &[a])
            .unwrap();
        assert_eq!(volumes.calls(), 1);
    }

    #[test]
    fn test_existing_ancestor_of_missing_archive() {
        let l = layout();
        let nested = l.archive_dir.join("2026").join("october");
        assert_eq!(existing_ancestor(&nested), l.archive_dir.parent().unwrap());
        assert_eq!(existing_ancestor(&l.source_dir), l.source_dir.as_path());
        assert_eq!(existing_ancestor(Path::new("no-such-archive-dir")), Path::new("."));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_volumes_accept_missing_archive_dir() {
        use crate::file_stat::SystemVolumes;
        use crate::platform::VolumeStrategy;

        let l = layout();
        let a = l.source_dir.join("a.mkv");
        write_file(&a, 10);
        write_file(&l.destination_dir.join("a.mkv"), 10);

        let reconciler = ArchiveReconciler::new(
            Arc::new(SystemVolumes::new(VolumeStrategy::DeviceId)),
            Preset::Standard,
            TimestampStrategy::ChangeTime,
        );
        let archive_dir = l.archive_dir.join("nested");
        let outcome = reconciler
            .archive(Some(archive_dir.as_path()), &l.source_dir, &l.destination_dir, &[a])
            .unwrap();

        assert!(matches!(outcome, ArchiveOutcome::Completed { ref archived, .. } if archived.len() == 1));
        assert!(archive_dir.join("a.mkv").exists());
    }

    #[test]
    fn test_move_failure_is_collected() {
        let l = layout();
        let a = l.source_dir.join("a.mkv");
        let b = l.source_dir.join("b.mkv");
        for source in [&a, &b] {
            write_file(source, 10);
        }
        write_file(&l.destination_dir.join("a.mkv"), 10);
        write_file(&l.destination_dir.join("b.mkv"), 10);

        // An archived copy of `a` is already there
        fs::create_dir_all(&l.archive_dir).unwrap();
        write_file(&l.archive_dir.join("a.mkv"), 1);

        let (reconciler, _) = reconciler(FixedVolumes::same_volume());
        let outcome = reconciler
            .archive(
                Some(l.archive_dir.as_path()),
                &l.source_dir,
                &l.destination_dir,
                &[a.clone(), b.clone()],
            )
            .unwrap();

        match outcome {
            ArchiveOutcome::Completed { archived, failures } => {
                assert_eq!(archived, vec![l.archive_dir.join("b.mkv")]);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].file, a);
                assert!(failures[0].reason.contains("already exists"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(a.exists());
        assert!(!b.exists());
    }

    #[test]
    fn test_relocate_missing_file_fails() {
        let l = layout();
        let result = relocate(&l.source_dir.join("gone.mkv"), &l.source_dir.join("x"));
        assert!(result.is_err());
    }
}
