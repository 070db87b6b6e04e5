//! WAL configuration.

use std::path::PathBuf;

use crate::constants::{DEFAULT_SEGMENT_SIZE, PAGE_SIZE};
use crate::error::{WalError, WalResult};

/// Configuration for the write-ahead log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory where segments are stored.
    pub dir: PathBuf,

    /// Size of each segment file in bytes.
    ///
    /// Must be a positive multiple of the page size.
    pub segment_size: usize,

    /// Whether records are Snappy-compressed before framing.
    pub compress: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            segment_size: DEFAULT_SEGMENT_SIZE,
            compress: false,
        }
    }
}

impl WalConfig {
    /// Creates a new configuration with the specified directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the segment size.
    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Enables or disables record compression.
    #[must_use]
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> WalResult<()> {
        if self.segment_size == 0 || self.segment_size % PAGE_SIZE != 0 {
            return Err(WalError::InvalidSegmentSize {
                size: self.segment_size,
            });
        }
        Ok(())
    }

    /// Number of pages each segment holds.
    pub fn pages_per_segment(&self) -> usize {
        self.segment_size / PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WalConfig::default();
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
        assert!(!config.compress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = WalConfig::new("/tmp/wal")
            .with_segment_size(4 * PAGE_SIZE)
            .with_compression(true);

        assert_eq!(config.dir, PathBuf::from("/tmp/wal"));
        assert_eq!(config.segment_size, 4 * PAGE_SIZE);
        assert!(config.compress);
        assert_eq!(config.pages_per_segment(), 4);
    }

    #[test]
    fn test_validate_rejects_unaligned_size() {
        let config = WalConfig::new("/tmp/wal").with_segment_size(PAGE_SIZE + 1);
        assert!(matches!(
            config.validate(),
            Err(WalError::InvalidSegmentSize { .. })
        ));

        let config = WalConfig::new("/tmp/wal").with_segment_size(0);
        assert!(matches!(
            config.validate(),
            Err(WalError::InvalidSegmentSize { size: 0 })
        ));
    }
}
