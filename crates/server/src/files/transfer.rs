//! Chunked, resumable uploads and chunked downloads.
//!
//! An upload collects chunks as `<index>.bin` files inside a temporary
//! directory next to the destination. Chunks may arrive in any order, more
//! than once and concurrently; completion either reports which indices are
//! still missing or assembles the file in ascending index order and removes
//! the temporary directory.
//!
//! A download reads the whole source file once and serves immutable slices
//! of it, so repeated reads of one index always return the same bytes.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use protocol::{split_chunks, Result, StorageError, UPLOAD_COMPLETED};
use tracing::{debug, info, warn};

use super::tenant::TenantFilesystem;

/// Suffix appended to the destination name to form the chunk directory.
pub const TEMP_DIR_SUFFIX: &str = "___temp___";

/// Extension of stored chunk files.
const CHUNK_EXTENSION: &str = "bin";

/// Name of the file chunks are assembled into before the final rename.
const ASSEMBLY_FILE: &str = "assembled.part";

/// Limits applied when starting transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub chunk_size: usize,
    pub max_chunk_count: usize,
    pub max_download_size: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_chunk_count: 1_000_000,
            max_download_size: 1024 * 1024 * 1024,
        }
    }
}

/// Where an upload currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    /// Accepting chunks.
    Collecting,
    /// A completion is assembling the file.
    Completing,
    /// The file has been assembled and the chunks removed.
    Done,
}

/// Result of [`UploadSession::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// These indices (sorted) have not been received yet.
    Missing(Vec<usize>),
    /// The file was assembled at this wire path.
    Completed(String),
}

impl UploadOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            UploadOutcome::Missing(_) => "some chunks are missing",
            UploadOutcome::Completed(_) => UPLOAD_COMPLETED,
        }
    }
}

/// State of one in-flight upload.
#[derive(Debug)]
pub struct UploadSession {
    temp_dir: PathBuf,
    destination: PathBuf,
    destination_wire: String,
    received: Vec<AtomicBool>,
    phase: Mutex<UploadPhase>,
}

impl UploadSession {
    /// Starts an upload of `file_name` into `location` with `chunk_count`
    /// chunks.
    pub fn start(
        fs: &TenantFilesystem,
        location: &str,
        file_name: &str,
        chunk_count: usize,
        limits: &TransferLimits,
    ) -> Result<Self> {
        if chunk_count > limits.max_chunk_count {
            return Err(StorageError::bad_request(format!(
                "chunk count {chunk_count} exceeds the limit of {}",
                limits.max_chunk_count
            )));
        }
        let (dir, destination) = fs.resolve_target(location, file_name)?;
        if destination.is_dir() {
            return Err(StorageError::bad_request(format!(
                "{file_name} is a directory"
            )));
        }

        let temp_dir = dir.path.join(format!("{file_name}{TEMP_DIR_SUFFIX}"));
        fs::create_dir_all(&temp_dir).map_err(|e| {
            StorageError::unknown(format!("cannot create upload directory: {e}"))
        })?;

        info!(
            destination = ?destination,
            chunks = chunk_count,
            "Upload started"
        );

        Ok(Self {
            temp_dir,
            destination,
            destination_wire: dir.child_wire_path(file_name, false),
            received: (0..chunk_count).map(|_| AtomicBool::new(false)).collect(),
            phase: Mutex::new(UploadPhase::Collecting),
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.received.len()
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase.lock().map(|p| *p).unwrap_or(UploadPhase::Collecting)
    }

    fn set_phase(&self, phase: UploadPhase) -> Result<()> {
        let mut guard = self
            .phase
            .lock()
            .map_err(|_| StorageError::unknown("upload state lock poisoned"))?;
        *guard = phase;
        Ok(())
    }

    fn chunk_path(&self, index: usize) -> PathBuf {
        self.temp_dir.join(format!("{index}.{CHUNK_EXTENSION}"))
    }

    /// Stores chunk `index`. Re-sending an index overwrites it.
    pub fn put_chunk(&self, index: usize, data: &[u8]) -> Result<()> {
        let flag = self.received.get(index).ok_or_else(|| {
            StorageError::bad_request(format!(
                "chunk index {index} out of range 0..{}",
                self.received.len()
            ))
        })?;
        if self.phase() != UploadPhase::Collecting {
            return Err(StorageError::bad_request("upload is not accepting chunks"));
        }

        // Each writer gets its own staging file; the rename makes the last
        // writer win without ever exposing a torn chunk.
        let staging = self
            .temp_dir
            .join(format!("{index}.{CHUNK_EXTENSION}.{}", uuid::Uuid::new_v4()));
        let written = write_synced(&staging, data)
            .and_then(|()| fs::rename(&staging, self.chunk_path(index)));
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(StorageError::from_io(&e, format!("cannot store chunk {index}")));
        }

        flag.store(true, Ordering::Release);
        debug!(index, bytes = data.len(), "Chunk stored");
        Ok(())
    }

    /// Indices not received yet, ascending.
    pub fn missing(&self) -> Vec<usize> {
        self.received
            .iter()
            .enumerate()
            .filter(|(_, flag)| !flag.load(Ordering::Acquire))
            .map(|(i, _)| i)
            .collect()
    }

    /// Completes the upload if every chunk is present.
    ///
    /// Missing chunks leave the session collecting. An I/O failure during
    /// assembly also leaves it collecting with the chunks intact, so the
    /// call can simply be repeated.
    pub fn complete(&self) -> Result<UploadOutcome> {
        {
            let mut phase = self
                .phase
                .lock()
                .map_err(|_| StorageError::unknown("upload state lock poisoned"))?;
            match *phase {
                UploadPhase::Collecting => {}
                UploadPhase::Completing => {
                    return Err(StorageError::bad_request("upload is already completing"))
                }
                UploadPhase::Done => {
                    return Ok(UploadOutcome::Completed(self.destination_wire.clone()))
                }
            }
            let missing = self.missing();
            if !missing.is_empty() {
                debug!(missing = missing.len(), "Upload incomplete");
                return Ok(UploadOutcome::Missing(missing));
            }
            *phase = UploadPhase::Completing;
        }

        if let Err(e) = self.assemble() {
            warn!(error = %e, destination = ?self.destination, "Upload assembly failed");
            self.set_phase(UploadPhase::Collecting)?;
            return Err(StorageError::unknown(format!("cannot assemble upload: {e}")));
        }
        self.set_phase(UploadPhase::Done)?;

        if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
            warn!(error = %e, dir = ?self.temp_dir, "Failed to remove upload directory");
        }
        info!(destination = ?self.destination, "Upload completed");
        Ok(UploadOutcome::Completed(self.destination_wire.clone()))
    }

    fn assemble(&self) -> io::Result<()> {
        let part = self.temp_dir.join(ASSEMBLY_FILE);
        {
            let mut out = BufWriter::new(File::create(&part)?);
            // numeric order, not the lexical order of the file names
            for index in 0..self.received.len() {
                let mut chunk = File::open(self.chunk_path(index))?;
                io::copy(&mut chunk, &mut out)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&part, &self.destination)
    }

    /// Removes the temporary directory of an unfinished upload.
    pub fn discard(&self) {
        if self.phase() == UploadPhase::Done {
            return;
        }
        match fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => debug!(dir = ?self.temp_dir, "Discarded upload directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, dir = ?self.temp_dir, "Failed to discard upload directory"),
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

/// A file materialized in memory and split into chunks.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    source: PathBuf,
    chunks: Vec<Bytes>,
}

impl DownloadSession {
    /// Reads `file_name` from `location` and splits it.
    pub fn start(
        fs: &TenantFilesystem,
        location: &str,
        file_name: &str,
        limits: &TransferLimits,
    ) -> Result<Self> {
        let entry = fs.resolve_entry(location, file_name)?;
        if entry.is_dir() {
            return Err(StorageError::bad_request(format!(
                "{file_name} is a directory"
            )));
        }
        if !entry.metadata.is_file() {
            return Err(StorageError::bad_request(format!(
                "{file_name} is not a regular file"
            )));
        }
        if entry.metadata.len() > limits.max_download_size {
            return Err(StorageError::bad_request(format!(
                "{file_name} is {} bytes, larger than the download limit of {} bytes",
                entry.metadata.len(),
                limits.max_download_size
            )));
        }

        let data = fs::read(&entry.path)
            .map_err(|e| StorageError::from_io(&e, format!("cannot read {file_name}")))?;
        let chunks = split_chunks(&Bytes::from(data), limits.chunk_size);
        info!(source = ?entry.path, chunks = chunks.len(), "Download started");

        Ok(Self {
            source: entry.path,
            chunks,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Bytes of chunk `index`.
    pub fn get_chunk(&self, index: usize) -> Result<Bytes> {
        self.chunks.get(index).cloned().ok_or_else(|| {
            StorageError::bad_request(format!(
                "chunk index {index} out of range 0..{}",
                self.chunks.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ErrorKind;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TenantFilesystem) {
        let temp = TempDir::new().unwrap();
        let fs = TenantFilesystem::open(temp.path().join("tenant")).unwrap();
        fs.mkdir("/", "docs").unwrap();
        (temp, fs)
    }

    fn limits() -> TransferLimits {
        TransferLimits {
            chunk_size: 4,
            ..TransferLimits::default()
        }
    }

    #[test]
    fn test_start_creates_temp_dir() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 3, &limits()).unwrap();

        assert_eq!(upload.chunk_count(), 3);
        assert!(fs.root().join("docs/a.txt___temp___").is_dir());
        assert_eq!(upload.missing(), vec![0, 1, 2]);
        assert_eq!(upload.phase(), UploadPhase::Collecting);
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let (_temp, fs) = setup();
        let small = TransferLimits {
            max_chunk_count: 2,
            ..limits()
        };
        let err = UploadSession::start(&fs, "/docs/", "a.txt", 3, &small).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = UploadSession::start(&fs, "/docs/", "../a.txt", 1, &limits()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = UploadSession::start(&fs, "/missing/", "a.txt", 1, &limits()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resumable_completion() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 3, &limits()).unwrap();

        upload.put_chunk(0, b"aaaa").unwrap();
        upload.put_chunk(2, b"cc").unwrap();
        assert_eq!(upload.complete().unwrap(), UploadOutcome::Missing(vec![1]));
        assert_eq!(upload.phase(), UploadPhase::Collecting);

        upload.put_chunk(1, b"bbbb").unwrap();
        let outcome = upload.complete().unwrap();
        assert_eq!(outcome, UploadOutcome::Completed("/docs/a.txt".to_string()));
        assert_eq!(outcome.message(), "upload completed successfully");

        let data = std::fs::read(fs.root().join("docs/a.txt")).unwrap();
        assert_eq!(data, b"aaaabbbbcc");
        assert!(!upload.temp_dir().exists());
        assert_eq!(upload.phase(), UploadPhase::Done);
    }

    #[test]
    fn test_assembly_uses_numeric_order() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "big.bin", 12, &limits()).unwrap();
        // lexical order would put 10 and 11 before 2
        for i in (0..12).rev() {
            upload.put_chunk(i, &[i as u8]).unwrap();
        }
        assert!(matches!(upload.complete().unwrap(), UploadOutcome::Completed(_)));

        let data = std::fs::read(fs.root().join("docs/big.bin")).unwrap();
        assert_eq!(data, (0u8..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_put_chunk_is_idempotent() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 2, &limits()).unwrap();

        upload.put_chunk(1, b"xy").unwrap();
        upload.put_chunk(1, b"xy").unwrap();
        upload.put_chunk(1, b"xy").unwrap();

        assert_eq!(upload.missing(), vec![0]);
        assert_eq!(std::fs::read(upload.chunk_path(1)).unwrap(), b"xy");
        let leftovers = std::fs::read_dir(upload.temp_dir()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_put_chunk_out_of_range() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 2, &limits()).unwrap();
        let err = upload.put_chunk(2, b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_zero_chunk_upload_creates_empty_file() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "empty.txt", 0, &limits()).unwrap();
        assert!(matches!(upload.complete().unwrap(), UploadOutcome::Completed(_)));
        assert_eq!(std::fs::read(fs.root().join("docs/empty.txt")).unwrap().len(), 0);
    }

    #[test]
    fn test_failed_assembly_keeps_chunks() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 2, &limits()).unwrap();
        upload.put_chunk(0, b"aa").unwrap();
        upload.put_chunk(1, b"bb").unwrap();

        // a directory in the way makes the final rename fail
        std::fs::create_dir(fs.root().join("docs/a.txt")).unwrap();
        std::fs::write(fs.root().join("docs/a.txt/blocker"), "x").unwrap();
        let err = upload.complete().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(upload.phase(), UploadPhase::Collecting);
        assert!(upload.chunk_path(0).exists());

        std::fs::remove_dir_all(fs.root().join("docs/a.txt")).unwrap();
        assert!(matches!(upload.complete().unwrap(), UploadOutcome::Completed(_)));
        assert_eq!(std::fs::read(fs.root().join("docs/a.txt")).unwrap(), b"aabb");
    }

    #[test]
    fn test_chunks_rejected_after_completion() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 1, &limits()).unwrap();
        upload.put_chunk(0, b"a").unwrap();
        upload.complete().unwrap();
        assert_eq!(
            upload.put_chunk(0, b"b").unwrap_err().kind(),
            ErrorKind::BadRequest
        );
    }

    #[test]
    fn test_concurrent_chunk_writers() {
        let (_temp, fs) = setup();
        let upload = Arc::new(UploadSession::start(&fs, "/docs/", "c.bin", 16, &limits()).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let upload = Arc::clone(&upload);
                std::thread::spawn(move || upload.put_chunk(i, &[i as u8; 4]).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(upload.missing().is_empty());
        upload.complete().unwrap();
        let data = std::fs::read(fs.root().join("docs/c.bin")).unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(&data[60..], &[15u8; 4]);
    }

    #[test]
    fn test_discard_removes_temp_dir() {
        let (_temp, fs) = setup();
        let upload = UploadSession::start(&fs, "/docs/", "a.txt", 2, &limits()).unwrap();
        upload.put_chunk(0, b"a").unwrap();
        upload.discard();
        assert!(!upload.temp_dir().exists());
    }

    #[test]
    fn test_download_roundtrip() {
        let (_temp, fs) = setup();
        let original: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(fs.root().join("docs/data.bin"), &original).unwrap();

        let limits = TransferLimits {
            chunk_size: 64,
            ..TransferLimits::default()
        };
        let download = DownloadSession::start(&fs, "/docs/", "data.bin", &limits).unwrap();
        assert_eq!(download.chunk_count(), 16);

        let mut rebuilt = Vec::new();
        for i in 0..download.chunk_count() {
            rebuilt.extend_from_slice(&download.get_chunk(i).unwrap());
        }
        assert_eq!(rebuilt, original);
        assert_eq!(download.get_chunk(15).unwrap().len(), 1000 % 64);
        assert_eq!(download.get_chunk(3).unwrap(), download.get_chunk(3).unwrap());
    }

    #[test]
    fn test_download_errors() {
        let (_temp, fs) = setup();
        let err = DownloadSession::start(&fs, "/docs/", "missing", &limits()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = DownloadSession::start(&fs, "/", "docs", &limits()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        std::fs::write(fs.root().join("docs/big"), vec![0u8; 32]).unwrap();
        let tiny = TransferLimits {
            max_download_size: 16,
            ..limits()
        };
        let err = DownloadSession::start(&fs, "/docs/", "big", &tiny).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        std::fs::write(fs.root().join("docs/small"), b"abc").unwrap();
        let download = DownloadSession::start(&fs, "/docs/", "small", &limits()).unwrap();
        assert_eq!(
            download.get_chunk(1).unwrap_err().kind(),
            ErrorKind::BadRequest
        );
    }
}
