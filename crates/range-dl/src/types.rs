//! Request and outcome types

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Username/password sent as an `Authorization: Basic` header
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One remote object to fetch into `destination`
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub auth: Option<BasicAuth>,
    pub destination: PathBuf,
    /// Size advertised by the listing; `None` (or 0) forces a sequential download
    pub declared_size: Option<u64>,
    /// Label used in log lines
    pub label: String,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let url = url.into();
        Self {
            label: url.clone(),
            url,
            auth: None,
            destination: destination.into(),
            declared_size: None,
        }
    }

    pub fn with_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = if size > 0 { Some(size) } else { None };
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub(crate) fn known_size(&self) -> Option<u64> {
        self.declared_size.filter(|size| *size > 0)
    }
}

/// Which path produced the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    Parallel { ranges: usize },
    Sequential,
    /// Parallel attempt failed with `reason`; the sequential retry succeeded
    FallbackToSequential { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    pub path: PathBuf,
    pub bytes: u64,
    pub strategy: Strategy,
}

/// Result of a download that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed(CompletedDownload),
    /// Stopped by the cancellation token; `partial_path` is left for the caller to delete
    Canceled { partial_path: Option<PathBuf> },
}

impl DownloadOutcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, DownloadOutcome::Canceled { .. })
    }
}
