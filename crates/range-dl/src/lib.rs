//! Multi-threaded HTTP download engine with Range-based parallel chunk acceleration
//!
//! - Files at or above a size threshold are split into contiguous byte
//!   ranges, fetched concurrently with `Range` requests and written at their
//!   offsets into one pre-sized `.multi.tmp` file
//! - Unknown or small sizes, and any failed parallel attempt, use a single
//!   sequential GET into a `.tmp` file
//! - Temp files are renamed to the destination only after every byte landed
//! - Cancellation is cooperative through a `CancellationToken`

mod config;
mod engine;
mod error;
mod parallel;
mod plan;
mod progress;
mod sequential;
mod types;

pub use config::{
    RangeDownloadConfig, MIN_CHUNK_SIZE, MULTI_THREAD_THRESHOLD, THREAD_COUNT, WRITE_BUFFER_SIZE,
};
pub use engine::{temp_path, RangeDownloader};
pub use error::DownloadError;
pub use plan::{ByteRange, RangePlan};
pub use progress::ProgressFn;
pub use types::{BasicAuth, CompletedDownload, DownloadOutcome, DownloadRequest, Strategy};

pub use tokio_util::sync::CancellationToken;
