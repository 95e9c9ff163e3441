use crate::archive::DEFAULT_SUFFIX;
use crate::conntrack::DEFAULT_LOCAL_ADDRESS;
use crate::netlink::ByteOrder;
use chrono::TimeDelta;
use std::path::PathBuf;

/// Which capture sources are decoded. Entries of a disabled source are
/// skipped without being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceToggles {
    pub debugfs: bool,
    pub netlink: bool,
    pub conntrack: bool,
}

impl Default for SourceToggles {
    fn default() -> Self {
        Self {
            debugfs: true,
            netlink: true,
            conntrack: true,
        }
    }
}

/// Import run settings.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub archive_dir: PathBuf,
    /// File name suffix an archive must carry.
    pub suffix: String,
    /// Archives that ended before `now - window` are skipped. Default: 365 days.
    pub window: TimeDelta,
    /// Keep only the newest N archives after the window is applied.
    pub last_n: Option<usize>,
    pub sources: SourceToggles,
    /// Byte order of captured netlink dumps.
    pub byte_order: ByteOrder,
    /// Addresses treated as local when telling conntrack directions apart.
    pub local_addresses: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            archive_dir: PathBuf::from("."),
            suffix: DEFAULT_SUFFIX.to_string(),
            window: TimeDelta::days(365),
            last_n: None,
            sources: SourceToggles::default(),
            byte_order: ByteOrder::default(),
            local_addresses: vec![DEFAULT_LOCAL_ADDRESS.to_string()],
        }
    }
}

impl ImportConfig {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ImportConfig::new("/var/snapshots");
        assert_eq!(config.archive_dir, PathBuf::from("/var/snapshots"));
        assert_eq!(config.window, TimeDelta::days(365));
        assert_eq!(config.suffix, ".tar.gz");
        assert!(config.last_n.is_none());
        assert_eq!(config.sources, SourceToggles::default());
        assert_eq!(config.byte_order, ByteOrder::Big);
        assert_eq!(config.local_addresses, vec!["135.23.201.114".to_string()]);
    }
}
