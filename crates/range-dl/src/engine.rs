//! Download entry point: parallel ranges first, sequential as the fallback

use log::{info, warn};
use reqwest::{Client, RequestBuilder};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::config::RangeDownloadConfig;
use crate::error::{DownloadError, Interrupt};
use crate::plan::RangePlan;
use crate::progress::{ProgressFn, ProgressTracker};
use crate::types::{CompletedDownload, DownloadOutcome, DownloadRequest, Strategy};
use crate::{parallel, sequential};

/// `<destination><suffix>`, e.g. `movie.mkv.multi.tmp`
pub fn temp_path(destination: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = destination.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn authorized_get(client: &Client, request: &DownloadRequest) -> RequestBuilder {
    let builder = client.get(&request.url);
    match &request.auth {
        Some(auth) => builder.basic_auth(&auth.username, Some(&auth.password)),
        None => builder,
    }
}

pub(crate) async fn remove_if_exists(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("range_dl_cleanup_failed: {} error={}", path.display(), e);
        }
    }
}

/// Downloads one object, splitting it into concurrent ranged GETs when the
/// declared size allows it.
#[derive(Debug, Clone)]
pub struct RangeDownloader {
    client: Client,
    config: RangeDownloadConfig,
}

impl RangeDownloader {
    pub fn new(client: Client, config: RangeDownloadConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RangeDownloadConfig {
        &self.config
    }

    /// Fetch `request.url` into `request.destination`.
    ///
    /// Returns `Ok(DownloadOutcome::Canceled)` when `cancel` fires; partial
    /// temp files are left in place. A failed parallel attempt is discarded
    /// and retried once sequentially before an error is returned. Temp files
    /// of failed attempts are removed.
    pub async fn download(
        &self,
        request: &DownloadRequest,
        on_progress: ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, DownloadError> {
        if cancel.is_cancelled() {
            return Ok(DownloadOutcome::Canceled { partial_path: None });
        }

        if let Some(parent) = request.destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::io("failed to create directory", parent, e))?;
            }
        }

        let tracker = ProgressTracker::new(request.known_size().unwrap_or(0), on_progress);

        let total_bytes = match request.known_size() {
            Some(size) if self.config.wants_parallel(Some(size)) => size,
            size => {
                info!(
                    "range_dl_start: {} mode=sequential declared_size={:?}",
                    request.label, size
                );
                return self
                    .run_sequential(request, &tracker, cancel, Strategy::Sequential)
                    .await;
            }
        };

        let plan = RangePlan::new(
            total_bytes,
            self.config.thread_count,
            self.config.min_chunk_size,
        );
        info!(
            "range_dl_start: {} mode=parallel total_bytes={} ranges={}",
            request.label,
            total_bytes,
            plan.len()
        );

        let multi_temp = temp_path(&request.destination, &self.config.multi_temp_suffix);
        match parallel::download(&self.client, &self.config, request, &plan, &tracker, cancel)
            .await
        {
            Ok(bytes) => {
                info!("range_dl_done: {} mode=parallel bytes={}", request.label, bytes);
                Ok(DownloadOutcome::Completed(CompletedDownload {
                    path: request.destination.clone(),
                    bytes,
                    strategy: Strategy::Parallel { ranges: plan.len() },
                }))
            }
            Err(Interrupt::Canceled) => {
                info!("range_dl_canceled: {} mode=parallel", request.label);
                Ok(DownloadOutcome::Canceled {
                    partial_path: Some(multi_temp),
                })
            }
            Err(Interrupt::Failed(err)) => {
                warn!(
                    "range_dl_fallback: {} parallel attempt failed, retrying sequentially: {}",
                    request.label, err
                );
                remove_if_exists(&multi_temp).await;
                tracker.reset_attempt();
                let reason = err.to_string();
                self.run_sequential(
                    request,
                    &tracker,
                    cancel,
                    Strategy::FallbackToSequential {
                        reason: reason.clone(),
                    },
                )
                .await
                .map_err(|source| DownloadError::FallbackFailed {
                    parallel: reason,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn run_sequential(
        &self,
        request: &DownloadRequest,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
        strategy: Strategy,
    ) -> Result<DownloadOutcome, DownloadError> {
        match sequential::download(&self.client, &self.config, request, tracker, cancel).await {
            Ok(bytes) => {
                info!(
                    "range_dl_done: {} mode=sequential bytes={}",
                    request.label, bytes
                );
                Ok(DownloadOutcome::Completed(CompletedDownload {
                    path: request.destination.clone(),
                    bytes,
                    strategy,
                }))
            }
            Err(Interrupt::Canceled) => {
                info!("range_dl_canceled: {} mode=sequential", request.label);
                Ok(DownloadOutcome::Canceled {
                    partial_path: Some(temp_path(
                        &request.destination,
                        &self.config.temp_suffix,
                    )),
                })
            }
            Err(Interrupt::Failed(err)) => {
                remove_if_exists(&temp_path(&request.destination, &self.config.temp_suffix)).await;
                Err(err)
            }
        }
    }
}
