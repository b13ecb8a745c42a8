//! Concurrent ranged GETs written into one pre-sized temp file

use futures_util::{future::join_all, StreamExt};
use log::{debug, info};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::RangeDownloadConfig;
use crate::engine::{authorized_get, temp_path};
use crate::error::{AttemptResult, DownloadError, Interrupt};
use crate::plan::{ByteRange, RangePlan};
use crate::progress::ProgressTracker;
use crate::types::DownloadRequest;

/// Everything a range worker needs, shared by `Arc`
struct RangeJob {
    client: Client,
    request: DownloadRequest,
    temp_path: PathBuf,
    file: Mutex<File>,
    tracker: Arc<ProgressTracker>,
    write_buffer_size: usize,
}

pub(crate) async fn download(
    client: &Client,
    config: &RangeDownloadConfig,
    request: &DownloadRequest,
    plan: &RangePlan,
    tracker: &Arc<ProgressTracker>,
    cancel: &CancellationToken,
) -> AttemptResult<u64> {
    let temp_path = temp_path(&request.destination, &config.multi_temp_suffix);
    let file = File::create(&temp_path)
        .await
        .map_err(|e| DownloadError::io("failed to create temp file", &temp_path, e))?;
    file.set_len(plan.total_bytes())
        .await
        .map_err(|e| DownloadError::io("failed to pre-size temp file", &temp_path, e))?;

    let job = Arc::new(RangeJob {
        client: client.clone(),
        request: request.clone(),
        temp_path: temp_path.clone(),
        file: Mutex::new(file),
        tracker: tracker.clone(),
        write_buffer_size: config.write_buffer_size,
    });

    // Fires on user cancel, or when any range fails so siblings stop early
    let abort = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(config.thread_count));
    let mut handles = Vec::with_capacity(plan.len());

    for range in plan.ranges().iter().copied() {
        if abort.is_cancelled() {
            break;
        }
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DownloadError::Worker {
                index: range.index,
                message: e.to_string(),
            })?;
        let job = job.clone();
        let abort = abort.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let result = fetch_range(&job, range, &abort).await;
            if let Err(Interrupt::Failed(e)) = &result {
                debug!(
                    "range_part_failed: {} part={} error={}",
                    job.request.label, range.index, e
                );
                abort.cancel();
            }
            result
        }));
    }

    // join-all barrier: nothing is renamed until every worker has stopped
    let results = join_all(handles).await;

    if cancel.is_cancelled() {
        return Err(Interrupt::Canceled);
    }

    let mut written = 0u64;
    let mut first_error: Option<DownloadError> = None;
    for (index, joined) in results.into_iter().enumerate() {
        match joined {
            Ok(Ok(bytes)) => written += bytes,
            // stopped because a sibling failed
            Ok(Err(Interrupt::Canceled)) => {}
            Ok(Err(Interrupt::Failed(e))) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(DownloadError::Worker {
                    index,
                    message: e.to_string(),
                });
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e.into());
    }
    if written != plan.total_bytes() {
        return Err(DownloadError::Incomplete {
            expected: plan.total_bytes(),
            received: written,
        }
        .into());
    }

    {
        let mut file = job.file.lock().await;
        file.flush()
            .await
            .map_err(|e| DownloadError::io("failed to flush temp file", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::io("failed to sync temp file", &temp_path, e))?;
    }
    drop(job);

    tokio::fs::rename(&temp_path, &request.destination)
        .await
        .map_err(|e| DownloadError::io("failed to rename temp file", &temp_path, e))?;

    Ok(written)
}

async fn fetch_range(
    job: &RangeJob,
    range: ByteRange,
    abort: &CancellationToken,
) -> AttemptResult<u64> {
    if abort.is_cancelled() {
        return Err(Interrupt::Canceled);
    }

    let timer = Instant::now();
    debug!(
        "range_part_start: {} part={} range={}..={}",
        job.request.label, range.index, range.start, range.end
    );

    let builder = authorized_get(&job.client, &job.request).header(RANGE, range.header_value());
    let response = tokio::select! {
        biased;
        _ = abort.cancelled() => return Err(Interrupt::Canceled),
        sent = builder.send() => sent.map_err(|source| DownloadError::Request {
            url: job.request.url.clone(),
            source,
        })?,
    };

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(DownloadError::RangeRejected {
            index: range.index,
            start: range.start,
            end: range.end,
            status: status.as_u16(),
        }
        .into());
    }

    let expected = range.size();
    let mut received = 0u64;
    let mut offset = range.start;
    let capacity = std::cmp::min(job.write_buffer_size as u64, expected) as usize;
    let mut buffer = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    loop {
        let next = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(Interrupt::Canceled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|source| DownloadError::Body {
            context: format!("range {} of {}", range.index, job.request.url),
            source,
        })?;

        received += chunk.len() as u64;
        if received > expected {
            return Err(DownloadError::RangeLength {
                index: range.index,
                expected,
                received,
            }
            .into());
        }

        buffer.extend_from_slice(&chunk);
        job.tracker.add(chunk.len() as u64);

        if buffer.len() >= job.write_buffer_size {
            write_at(&job.file, offset, &buffer, &job.temp_path).await?;
            offset += buffer.len() as u64;
            buffer.clear();
        }
    }

    if !buffer.is_empty() {
        write_at(&job.file, offset, &buffer, &job.temp_path).await?;
    }

    if received != expected {
        return Err(DownloadError::RangeLength {
            index: range.index,
            expected,
            received,
        }
        .into());
    }

    info!(
        "range_part_done: {} part={} bytes={} elapsed_ms={}",
        job.request.label,
        range.index,
        received,
        timer.elapsed().as_millis()
    );
    Ok(received)
}

/// Seek and write as one unit; the tokio file handle carries a cursor
async fn write_at(
    file: &Mutex<File>,
    offset: u64,
    data: &[u8],
    path: &Path,
) -> Result<(), DownloadError> {
    let mut file = file.lock().await;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| DownloadError::io("failed to seek temp file", path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| DownloadError::io("failed to write temp file", path, e))?;
    Ok(())
}
