//! Resumable upload and retrying download loops.
//!
//! Uploads send every chunk once, then call complete and resend whatever the
//! server reports missing until nothing is missing. Downloads fetch chunks in
//! order and retry each one; chunk reads are idempotent on the server.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use protocol::{split_chunks, ErrorKind};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::StorageClient;
use crate::error::{ClientError, Result};

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tuning for transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Size of uploaded chunks.
    pub chunk_size: usize,
    /// How many complete/resend rounds an upload may take.
    pub max_complete_rounds: usize,
    /// How many times one download chunk is attempted.
    pub max_chunk_retries: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_complete_rounds: 16,
            max_chunk_retries: 5,
        }
    }
}

/// Uploads `local_path` as `file_name` into the remote `location`.
///
/// `progress` is called with `(chunks_sent, total)` after every accepted
/// chunk. Returns the server's completion message.
pub async fn upload_file(
    client: &StorageClient,
    local_path: &Path,
    location: &str,
    file_name: &str,
    options: &TransferOptions,
    mut progress: impl FnMut(usize, usize),
) -> Result<String> {
    let data = Bytes::from(fs::read(local_path).await?);
    let chunks = split_chunks(&data, options.chunk_size);
    let total = chunks.len();

    client.start_upload(location, file_name, total).await?;
    info!(file = %file_name, chunks = total, "Upload started");

    let mut sent = 0;
    for (index, chunk) in chunks.iter().enumerate() {
        if send_chunk(client, index, chunk).await? {
            sent += 1;
        }
        progress(sent, total);
    }

    for round in 1..=options.max_complete_rounds {
        let response = client.complete_upload().await?;
        if response.is_complete() {
            progress(total, total);
            info!(file = %file_name, rounds = round, "Upload completed");
            return Ok(response.message);
        }

        debug!(round, missing = ?response.missed_chunks, "Resending missing chunks");
        for &index in &response.missed_chunks {
            let chunk = chunks.get(index).ok_or_else(|| {
                ClientError::Api(protocol::StorageError::bad_request(format!(
                    "server asked for chunk {index} of {total}"
                )))
            })?;
            if send_chunk(client, index, chunk).await? {
                sent = (sent + 1).min(total);
            }
            progress(sent, total);
        }
    }

    let missing = client.complete_upload().await?.missed_chunks;
    if missing.is_empty() {
        return Ok(protocol::UPLOAD_COMPLETED.to_string());
    }
    Err(ClientError::UploadIncomplete {
        rounds: options.max_complete_rounds,
        missing,
    })
}

/// Sends one chunk. Transient failures are left for the completion round.
async fn send_chunk(client: &StorageClient, index: usize, chunk: &Bytes) -> Result<bool> {
    match client.upload_chunk(index, chunk.clone()).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == Some(ErrorKind::WrongCredentials) => Err(e),
        Err(e) => {
            warn!(chunk = index, "Chunk upload failed: {}", e);
            Ok(false)
        }
    }
}

/// Downloads remote `location/file_name` into the local directory
/// `dest_dir` and returns the written path.
pub async fn download_file(
    client: &StorageClient,
    location: &str,
    file_name: &str,
    dest_dir: &Path,
    options: &TransferOptions,
    mut progress: impl FnMut(usize, usize),
) -> Result<PathBuf> {
    let total = client.start_download(location, file_name).await?.chunks_num;
    let dest = dest_dir.join(file_name);
    let mut file = fs::File::create(&dest).await?;
    info!(file = %file_name, chunks = total, "Download started");

    for index in 0..total {
        let chunk = fetch_chunk(client, index, options.max_chunk_retries).await?;
        file.write_all(&chunk).await?;
        progress(index + 1, total);
    }
    file.flush().await?;

    if total == 0 {
        progress(0, 0);
    }
    Ok(dest)
}

async fn fetch_chunk(client: &StorageClient, index: usize, max_attempts: usize) -> Result<Bytes> {
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        match client.download_chunk(index).await {
            Ok(chunk) => return Ok(chunk),
            Err(e) if e.is_transient() => {
                warn!(chunk = index, attempt, "Chunk download failed: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(ClientError::ChunkFailed { index, attempts })
}
