//! Platform capability module for ManageHD
//!
//! Resolves the platform-dependent choices once at startup: transcoder binary,
//! default worker count, which file time counts as creation time and how two
//! directories are judged to share a volume.

use crate::config::{Config, HostPlatform};

/// How archive and source directories are compared for volume identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStrategy {
    /// Compare filesystem device ids (Unix `st_dev`)
    DeviceId,
    /// Compare the leading drive letter of the path (Windows)
    DriveLetter,
}

/// Which file time the archive step treats as a file's creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStrategy {
    /// Inode change time (Unix `st_ctime`)
    ChangeTime,
    /// Birth time reported by the filesystem (Windows)
    CreationTime,
}

/// Capabilities of the host the batch runs on
#[derive(Debug, Clone, PartialEq)]
pub struct Platform {
    /// Host key used for persisted settings
    pub host: HostPlatform,
    /// Transcoder binary used when the configuration does not name one
    pub transcoder_binary: &'static str,
    /// Worker count used when the configuration leaves it at 0
    pub default_workers: u32,
    /// Volume comparison used by the archive space check
    pub volume_strategy: VolumeStrategy,
    /// File time compared when pairing sources with outputs
    pub timestamp_strategy: TimestampStrategy,
}

impl Platform {
    /// Capabilities of the running host
    pub fn detect() -> Self {
        Self::for_host(HostPlatform::current())
    }

    /// Capabilities of a specific host
    ///
    /// Windows runs a single worker; the other hosts run four.
    pub fn for_host(host: HostPlatform) -> Self {
        match host {
            HostPlatform::Windows => Self {
                host,
                transcoder_binary: "HandBrakeCLI",
                default_workers: 1,
                volume_strategy: VolumeStrategy::DriveLetter,
                timestamp_strategy: TimestampStrategy::CreationTime,
            },
            HostPlatform::Unix | HostPlatform::Mac => Self {
                host,
                transcoder_binary: "/usr/bin/HandBrakeCLI",
                default_workers: 4,
                volume_strategy: VolumeStrategy::DeviceId,
                timestamp_strategy: TimestampStrategy::ChangeTime,
            },
        }
    }

    /// Number of pool workers for the given configured value (0 = platform default)
    pub fn worker_count(&self, configured: u32) -> usize {
        if configured > 0 {
            configured as usize
        } else {
            self.default_workers as usize
        }
    }

    /// Transcoder binary from configuration, falling back to the platform default
    pub fn transcoder_binary(&self, cfg: &Config) -> String {
        cfg.transcoder
            .binary
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(self.transcoder_binary)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_windows_runs_single_worker_with_drive_letters() {
        let platform = Platform::for_host(HostPlatform::Windows);
        assert_eq!(platform.default_workers, 1);
        assert_eq!(platform.volume_strategy, VolumeStrategy::DriveLetter);
        assert_eq!(platform.timestamp_strategy, TimestampStrategy::CreationTime);
        assert_eq!(platform.transcoder_binary, "HandBrakeCLI");
    }

    #[test]
    fn test_unix_runs_four_workers_with_device_ids() {
        let platform = Platform::for_host(HostPlatform::Unix);
        assert_eq!(platform.default_workers, 4);
        assert_eq!(platform.volume_strategy, VolumeStrategy::DeviceId);
        assert_eq!(platform.timestamp_strategy, TimestampStrategy::ChangeTime);

        let mac = Platform::for_host(HostPlatform::Mac);
        assert_eq!(mac.timestamp_strategy, TimestampStrategy::ChangeTime);
        assert_eq!(platform.transcoder_binary, "/usr/bin/HandBrakeCLI");
    }

    #[test]
    fn test_transcoder_binary_prefers_config() {
        let platform = Platform::for_host(HostPlatform::Unix);
        let mut cfg = Config::default();
        assert_eq!(platform.transcoder_binary(&cfg), "/usr/bin/HandBrakeCLI");

        cfg.transcoder.binary = Some("  ".to_string());
        assert_eq!(platform.transcoder_binary(&cfg), "/usr/bin/HandBrakeCLI");

        cfg.transcoder.binary = Some("/opt/hb/HandBrakeCLI".to_string());
        assert_eq!(platform.transcoder_binary(&cfg), "/opt/hb/HandBrakeCLI");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_explicit_worker_count_is_preserved(
            configured in 1u32..64,
            windows in proptest::bool::ANY,
        ) {
            let host = if windows { HostPlatform::Windows } else { HostPlatform::Unix };
            let platform = Platform::for_host(host);
            prop_assert_eq!(platform.worker_count(configured), configured as usize);
            prop_assert_eq!(platform.worker_count(0), platform.default_workers as usize);
        }
    }
}
