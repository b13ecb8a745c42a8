//! Error types for range-dl

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} failed: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("range {index} (bytes {start}-{end}) rejected: HTTP {status}, expected 206")]
    RangeRejected {
        index: usize,
        start: u64,
        end: u64,
        status: u16,
    },

    #[error("range {index} returned {received} bytes, expected {expected}")]
    RangeLength {
        index: usize,
        expected: u64,
        received: u64,
    },

    #[error("download of {url} ended after {received} bytes, expected {expected}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("failed to read response body ({context}): {source}")]
    Body {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context} ({}): {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parallel download wrote {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },

    #[error("range worker {index} did not finish: {message}")]
    Worker { index: usize, message: String },

    #[error("parallel download failed ({parallel}); sequential retry failed: {source}")]
    FallbackFailed {
        parallel: String,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        DownloadError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// Why an attempt stopped before producing a file
#[derive(Debug)]
pub(crate) enum Interrupt {
    Canceled,
    Failed(DownloadError),
}

impl From<DownloadError> for Interrupt {
    fn from(e: DownloadError) -> Self {
        Interrupt::Failed(e)
    }
}

pub(crate) type AttemptResult<T> = Result<T, Interrupt>;
