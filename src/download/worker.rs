//! Download worker: runs one registered task through the range engine

use log::{debug, info, warn};
use range_dl::{
    BasicAuth, CancellationToken, DownloadOutcome, DownloadRequest, ProgressFn, RangeDownloader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::naming::Reservations;
use super::registry::TransferRegistry;
use super::types::{RemoteFileRef, TaskId};

/// Everything a spawned download needs
pub(crate) struct DownloadJob {
    pub registry: TransferRegistry,
    pub downloader: RangeDownloader,
    pub reservations: Reservations,
    pub downloads_dir: PathBuf,
    pub task_id: TaskId,
    pub file: RemoteFileRef,
    pub url: String,
    pub auth: BasicAuth,
    pub mount_name: String,
}

impl DownloadJob {
    /// Prefix errors with the mount and remote path before they reach the registry
    fn context(&self, error: impl std::fmt::Display) -> String {
        format!("{} ({}): {}", self.mount_name, self.file.path, error)
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("download_cleanup_failed: {} error={}", path.display(), e);
        }
    }
}

/// Run the task to a terminal state. Every outcome is reported into the registry.
pub(crate) async fn run(job: DownloadJob) {
    let cancel: CancellationToken = match job.registry.cancel_token(&job.task_id) {
        Some(token) => token,
        None => return,
    };
    if !job.registry.start(&job.task_id) {
        debug!("download_skipped: {} no longer pending", job.task_id);
        return;
    }

    if let Err(e) = tokio::fs::create_dir_all(&job.downloads_dir).await {
        job.registry.fail(
            &job.task_id,
            job.context(format!(
                "failed to create {}: {}",
                job.downloads_dir.display(),
                e
            )),
        );
        return;
    }

    let destination = job
        .reservations
        .reserve(&job.downloads_dir, &job.file.display_name);
    info!(
        "download_start: {} url={} destination={} declared_size={:?}",
        job.task_id,
        job.url,
        destination.display(),
        job.file.declared_size
    );

    let mut request = DownloadRequest::new(&job.url, &destination)
        .with_auth(job.auth.clone())
        .with_label(format!("{}:{}", job.task_id, job.file.display_name));
    if let Some(size) = job.file.declared_size {
        request = request.with_declared_size(size);
    }

    let on_progress: ProgressFn = {
        let registry = job.registry.clone();
        let task_id = job.task_id.clone();
        Arc::new(move |downloaded, total| {
            registry.report_progress(&task_id, downloaded, total);
        })
    };

    let result = job.downloader.download(&request, on_progress, &cancel).await;

    match result {
        Ok(DownloadOutcome::Completed(done)) => {
            let path = done.path.clone();
            if !job
                .registry
                .complete(&job.task_id, done.path, done.bytes, done.strategy)
            {
                // canceled while the last bytes landed
                info!("download_discarded: {} canceled before completion", job.task_id);
                remove_quietly(&path).await;
            }
        }
        Ok(DownloadOutcome::Canceled { partial_path }) => {
            if let Some(partial) = partial_path {
                remove_quietly(&partial).await;
            }
            job.registry.cancel(&job.task_id);
        }
        Err(e) => {
            job.registry.fail(&job.task_id, job.context(e));
        }
    }

    job.reservations.release(&destination);
}
