//! Chunking shared by both ends of a transfer.

use bytes::Bytes;

/// Splits `data` into `chunk_size` pieces; only the last may be shorter.
///
/// The pieces share `data`'s buffer. Empty input gives no chunks.
pub fn split_chunks(data: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    (0..data.len())
        .step_by(chunk_size)
        .map(|start| data.slice(start..(start + chunk_size).min(data.len())))
        .collect()
}
