//! Configuration for opening a [`Log`](crate::Log).
//!
//! The log recognizes exactly three options, all of them about segments:
//! how large a segment's store may grow, how large its index may grow, and
//! which absolute offset the very first segment of an empty log starts at.

/// Top-level configuration for a log instance.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Segment sizing and initial-offset options.
    pub segment: SegmentConfig,
}

/// Controls when the active segment rolls over and where offsets start.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentConfig {
    /// Roll the active segment once its store file reaches this many bytes.
    pub max_store_bytes: u64,

    /// Roll the active segment once its index cannot fit another entry.
    ///
    /// This is also the pre-allocated size of every index file's memory
    /// mapping, so it bounds a segment's index footprint up front.
    pub max_index_bytes: u64,

    /// Absolute offset assigned to the first record of an empty log.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: 1024,
            max_index_bytes: 1024,
            initial_offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_config_defaults() {
        let config = SegmentConfig::default();
        assert_eq!(config.max_store_bytes, 1024);
        assert_eq!(config.max_index_bytes, 1024);
        assert_eq!(config.initial_offset, 0);
    }

    #[test]
    fn config_default_uses_segment_defaults() {
        let config = Config::default();
        assert_eq!(config.segment.max_store_bytes, 1024);
        assert_eq!(config.segment.max_index_bytes, 1024);
        assert_eq!(config.segment.initial_offset, 0);
    }
}
