//! Engine tuning knobs

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// Files at or above this size are fetched with parallel ranges (4 MiB)
pub const MULTI_THREAD_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Number of concurrent range requests per file
pub const THREAD_COUNT: usize = 4;

/// Smallest range handed to a single worker (1 MiB)
pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;

/// Per-range write buffer (256 KB) - bounds how long the file lock is held
pub const WRITE_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeDownloadConfig {
    pub multi_thread_threshold: u64,
    pub thread_count: usize,
    pub min_chunk_size: u64,
    pub write_buffer_size: usize,
    /// Suffix of the in-progress file written by a sequential download
    pub temp_suffix: String,
    /// Suffix of the pre-sized file shared by parallel range workers
    pub multi_temp_suffix: String,
}

impl Default for RangeDownloadConfig {
    fn default() -> Self {
        Self {
            multi_thread_threshold: MULTI_THREAD_THRESHOLD,
            thread_count: THREAD_COUNT,
            min_chunk_size: MIN_CHUNK_SIZE,
            write_buffer_size: WRITE_BUFFER_SIZE,
            temp_suffix: ".tmp".to_string(),
            multi_temp_suffix: ".multi.tmp".to_string(),
        }
    }
}

impl RangeDownloadConfig {
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.thread_count == 0 {
            return Err(DownloadError::Config("thread_count must be at least 1".into()));
        }
        if self.min_chunk_size == 0 {
            return Err(DownloadError::Config("min_chunk_size must be at least 1".into()));
        }
        if self.write_buffer_size == 0 {
            return Err(DownloadError::Config("write_buffer_size must be at least 1".into()));
        }
        if self.temp_suffix.is_empty()
            || self.multi_temp_suffix.is_empty()
            || self.temp_suffix == self.multi_temp_suffix
        {
            return Err(DownloadError::Config(
                "temp suffixes must be non-empty and distinct".into(),
            ));
        }
        Ok(())
    }

    /// Whether a file of `declared_size` qualifies for parallel ranges
    pub fn wants_parallel(&self, declared_size: Option<u64>) -> bool {
        match declared_size {
            Some(size) => size > 0 && size >= self.multi_thread_threshold,
            None => false,
        }
    }
}
