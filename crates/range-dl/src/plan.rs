//! Splitting a file into contiguous byte ranges

use serde::Serialize;

/// One inclusive byte range `start..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes in the range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Disjoint, gap-free ranges covering `[0, total_bytes)`.
///
/// Ranges are computed once and never reassigned, so each worker has
/// exclusive write authority over its own span of the output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangePlan {
    total_bytes: u64,
    ranges: Vec<ByteRange>,
}

impl RangePlan {
    /// Chunk size is `max(min_chunk, total / threads)`; the last range
    /// absorbs the remainder.
    pub fn new(total_bytes: u64, thread_count: usize, min_chunk: u64) -> Self {
        if total_bytes == 0 {
            return Self {
                total_bytes,
                ranges: Vec::new(),
            };
        }

        let threads = thread_count.max(1) as u64;
        let chunk = std::cmp::max(min_chunk.max(1), total_bytes / threads);
        let count = (total_bytes / chunk).clamp(1, threads);

        let ranges = (0..count)
            .map(|i| {
                let start = i * chunk;
                let end = if i == count - 1 {
                    total_bytes - 1
                } else {
                    start + chunk - 1
                };
                ByteRange {
                    index: i as usize,
                    start,
                    end,
                }
            })
            .collect();

        Self {
            total_bytes,
            ranges,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
