//! Mount file downloads with progress tracking and cancellation
//!
//! - `TransferRegistry` holds every task and publishes snapshots to observers
//! - `DownloadManager` registers a task and spawns a worker for it
//! - The worker drives `range_dl` (parallel ranges with sequential fallback)
//!   and reports each progress tick and the terminal state into the registry

mod manager;
mod naming;
mod registry;
mod types;
mod worker;

pub use manager::DownloadManager;
pub use naming::sanitize_file_name;
pub use registry::TransferRegistry;
pub use types::{RemoteFileRef, TaskId, TaskSnapshot, TaskStatus};
