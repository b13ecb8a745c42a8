//! Single-stream download into `<destination>.tmp`

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::RangeDownloadConfig;
use crate::engine::{authorized_get, temp_path};
use crate::error::{AttemptResult, DownloadError, Interrupt};
use crate::progress::ProgressTracker;
use crate::types::DownloadRequest;

pub(crate) async fn download(
    client: &Client,
    config: &RangeDownloadConfig,
    request: &DownloadRequest,
    tracker: &ProgressTracker,
    cancel: &CancellationToken,
) -> AttemptResult<u64> {
    if cancel.is_cancelled() {
        return Err(Interrupt::Canceled);
    }

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Interrupt::Canceled),
        sent = authorized_get(client, request).send() => sent.map_err(|source| DownloadError::Request {
            url: request.url.clone(),
            source,
        })?,
    };

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url: request.url.clone(),
            status: response.status().as_u16(),
        }
        .into());
    }

    // Content-Length wins over a possibly stale listing size
    let expected = response.content_length().or_else(|| request.known_size());
    if let Some(length) = response.content_length() {
        tracker.set_total(length);
    }

    let temp_path = temp_path(&request.destination, &config.temp_suffix);
    let mut file = File::create(&temp_path)
        .await
        .map_err(|e| DownloadError::io("failed to create temp file", &temp_path, e))?;

    let mut stream = response.bytes_stream();
    let mut write_buffer = Vec::with_capacity(config.write_buffer_size);
    let mut written = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(Interrupt::Canceled);
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Canceled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|source| DownloadError::Body {
            context: request.url.clone(),
            source,
        })?;

        write_buffer.extend_from_slice(&chunk);
        written += chunk.len() as u64;
        tracker.add(chunk.len() as u64);

        if write_buffer.len() >= config.write_buffer_size {
            file.write_all(&write_buffer)
                .await
                .map_err(|e| DownloadError::io("failed to write temp file", &temp_path, e))?;
            write_buffer.clear();
        }
    }

    if !write_buffer.is_empty() {
        file.write_all(&write_buffer)
            .await
            .map_err(|e| DownloadError::io("failed to write temp file", &temp_path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| DownloadError::io("failed to flush temp file", &temp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| DownloadError::io("failed to sync temp file", &temp_path, e))?;
    drop(file);

    if let Some(expected) = expected {
        if written != expected {
            return Err(DownloadError::Truncated {
                url: request.url.clone(),
                expected,
                received: written,
            }
            .into());
        }
    }

    tokio::fs::rename(&temp_path, &request.destination)
        .await
        .map_err(|e| DownloadError::io("failed to rename temp file", &temp_path, e))?;

    Ok(written)
}
