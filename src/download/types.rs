//! Download task types and snapshots

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use range_dl::Strategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::webdav::RemoteEntry;

/// Task lifecycle: Pending -> Downloading -> Completed | Failed | Canceled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        TaskId(format!("dl-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A remote object on a mount, as chosen for download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileRef {
    pub mount_id: i64,
    /// Path relative to the mount root
    pub path: String,
    /// `None` when the listing did not report a usable size
    pub declared_size: Option<u64>,
    pub display_name: String,
}

impl RemoteFileRef {
    /// `declared_size <= 0` is treated as unknown
    pub fn new(mount_id: i64, path: impl Into<String>, declared_size: i64) -> Self {
        let path = path.into();
        let display_name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            mount_id,
            path,
            declared_size: u64::try_from(declared_size).ok().filter(|size| *size > 0),
            display_name,
        }
    }

    pub fn from_entry(mount_id: i64, entry: &RemoteEntry) -> Self {
        Self {
            mount_id,
            path: entry.path.clone(),
            declared_size: Some(entry.size).filter(|size| *size > 0),
            display_name: entry.name.clone(),
        }
    }
}

/// What observers see of one task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub mount_id: i64,
    pub path: String,
    pub status: TaskStatus,
    pub downloaded_bytes: u64,
    /// 0 while unknown
    pub total_bytes: u64,
    pub percent: u32,
    /// Bytes per second since the task started downloading
    pub speed: f64,
    /// Set only once completed
    pub local_path: Option<PathBuf>,
    /// Set only once failed
    pub error_message: Option<String>,
    pub strategy: Option<Strategy>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn percent_of(downloaded: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    std::cmp::min(((downloaded as f64 / total as f64) * 100.0) as u32, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Downloading).unwrap(),
            "\"downloading\""
        );
        assert_eq!(TaskStatus::Canceled.to_string(), "canceled");
    }

    #[test]
    fn file_ref_size_and_name() {
        let file = RemoteFileRef::new(1, "docs/report.pdf", 2048);
        assert_eq!(file.declared_size, Some(2048));
        assert_eq!(file.display_name, "report.pdf");
        assert_eq!(RemoteFileRef::new(1, "a.bin", 0).declared_size, None);
        assert_eq!(RemoteFileRef::new(1, "a.bin", -1).declared_size, None);
    }

    #[test]
    fn file_ref_from_listing_entry() {
        let entry = RemoteEntry {
            name: "clip one.mp4".into(),
            path: "videos/clip one.mp4".into(),
            is_directory: false,
            size: 6 * 1024 * 1024,
            last_modified: None,
        };
        let file = RemoteFileRef::from_entry(9, &entry);
        assert_eq!(file.mount_id, 9);
        assert_eq!(file.path, "videos/clip one.mp4");
        assert_eq!(file.display_name, "clip one.mp4");
        assert_eq!(file.declared_size, Some(6 * 1024 * 1024));

        let empty = RemoteEntry { size: 0, ..entry };
        assert_eq!(RemoteFileRef::from_entry(9, &empty).declared_size, None);
    }

    #[test]
    fn task_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("dl-"));
        assert_eq!(a.as_str().len(), 19);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(percent_of(0, 0), 0);
        assert_eq!(percent_of(50, 200), 25);
        assert_eq!(percent_of(300, 200), 100);
    }
}
