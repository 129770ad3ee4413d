//! The storage capability set and its decorators.
//!
//! [`StorageService`] is the single surface every transport calls into.
//! [`FileService`] implements it on top of the client session, and
//! [`LoggingService`] wraps any implementation to log each call.
//!
//! Methods are blocking; the HTTP gateway runs them on the blocking pool.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use protocol::{path as wire_path, FileEntry, ParentAtRoot, Result};
use tracing::{info, warn};

use crate::files::{DownloadSession, TransferLimits, UploadOutcome, UploadSession};
use crate::session::ClientSession;

/// Per-request context: who is calling and the session they own.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: String,
    pub session: Arc<ClientSession>,
}

impl RequestContext {
    pub fn new(session: Arc<ClientSession>) -> Self {
        Self {
            identity: session.identity().to_string(),
            session,
        }
    }
}

/// Every filesystem and transfer operation available to a client.
///
/// Directory arguments are wire paths. Paths starting with the separator are
/// taken from the tenant root, others from the session's current directory.
pub trait StorageService: Send + Sync {
    /// Full tree of the tenant root.
    fn state(&self, ctx: &RequestContext) -> Result<FileEntry>;

    /// Children of `dir_path`.
    fn list(&self, ctx: &RequestContext, dir_path: &str) -> Result<Vec<FileEntry>>;

    /// Applies a navigation token and returns the new current directory.
    fn change_dir(&self, ctx: &RequestContext, path: &str) -> Result<String>;

    fn mkdir(&self, ctx: &RequestContext, path: &str, name: &str) -> Result<String>;

    fn rename(
        &self,
        ctx: &RequestContext,
        dir_path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<String>;

    fn move_entry(
        &self,
        ctx: &RequestContext,
        src_dir: &str,
        name: &str,
        dest_dir: &str,
    ) -> Result<String>;

    fn copy(&self, ctx: &RequestContext, src_dir: &str, name: &str, dest_dir: &str)
        -> Result<String>;

    fn delete(&self, ctx: &RequestContext, dir_path: &str, name: &str) -> Result<String>;

    fn start_upload(
        &self,
        ctx: &RequestContext,
        location: &str,
        file_name: &str,
        chunk_count: usize,
    ) -> Result<()>;

    fn upload_chunk(&self, ctx: &RequestContext, index: usize, data: &[u8]) -> Result<()>;

    fn complete_upload(&self, ctx: &RequestContext) -> Result<UploadOutcome>;

    /// Returns the number of chunks.
    fn start_download(&self, ctx: &RequestContext, location: &str, file_name: &str)
        -> Result<usize>;

    fn download_chunk(&self, ctx: &RequestContext, index: usize) -> Result<Bytes>;
}

/// [`StorageService`] backed by the session's tenant filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileService {
    limits: TransferLimits,
    parent_at_root: ParentAtRoot,
}

impl FileService {
    pub fn new(limits: TransferLimits, parent_at_root: ParentAtRoot) -> Self {
        Self {
            limits,
            parent_at_root,
        }
    }

    /// Rewrites `path` as a path from the tenant root.
    fn absolute(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        let segments = ctx.session.navigation()?.resolve(path)?;
        Ok(wire_path::join(&segments))
    }
}

impl StorageService for FileService {
    fn state(&self, ctx: &RequestContext) -> Result<FileEntry> {
        ctx.session.filesystem().traverse("/")
    }

    fn list(&self, ctx: &RequestContext, dir_path: &str) -> Result<Vec<FileEntry>> {
        let dir = self.absolute(ctx, dir_path)?;
        ctx.session.filesystem().list(&dir)
    }

    fn change_dir(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        let mut navigation = ctx.session.navigation()?;
        navigation.navigate(path, ctx.session.filesystem().as_ref(), self.parent_at_root)
    }

    fn mkdir(&self, ctx: &RequestContext, path: &str, name: &str) -> Result<String> {
        let dir = self.absolute(ctx, path)?;
        ctx.session.filesystem().mkdir(&dir, name)
    }

    fn rename(
        &self,
        ctx: &RequestContext,
        dir_path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<String> {
        let dir = self.absolute(ctx, dir_path)?;
        ctx.session.filesystem().rename(&dir, old_name, new_name)
    }

    fn move_entry(
        &self,
        ctx: &RequestContext,
        src_dir: &str,
        name: &str,
        dest_dir: &str,
    ) -> Result<String> {
        let src = self.absolute(ctx, src_dir)?;
        let dest = self.absolute(ctx, dest_dir)?;
        ctx.session.filesystem().move_entry(&src, name, &dest)
    }

    fn copy(
        &self,
        ctx: &RequestContext,
        src_dir: &str,
        name: &str,
        dest_dir: &str,
    ) -> Result<String> {
        let src = self.absolute(ctx, src_dir)?;
        let dest = self.absolute(ctx, dest_dir)?;
        ctx.session.filesystem().copy(&src, name, &dest)
    }

    fn delete(&self, ctx: &RequestContext, dir_path: &str, name: &str) -> Result<String> {
        let dir = self.absolute(ctx, dir_path)?;
        ctx.session.filesystem().delete(&dir, name)
    }

    fn start_upload(
        &self,
        ctx: &RequestContext,
        location: &str,
        file_name: &str,
        chunk_count: usize,
    ) -> Result<()> {
        let location = self.absolute(ctx, location)?;
        let upload = UploadSession::start(
            ctx.session.filesystem(),
            &location,
            file_name,
            chunk_count,
            &self.limits,
        )?;
        ctx.session.replace_upload(upload)?;
        Ok(())
    }

    fn upload_chunk(&self, ctx: &RequestContext, index: usize, data: &[u8]) -> Result<()> {
        ctx.session.require_upload()?.put_chunk(index, data)
    }

    fn complete_upload(&self, ctx: &RequestContext) -> Result<UploadOutcome> {
        let upload = ctx.session.require_upload()?;
        let outcome = upload.complete()?;
        if let UploadOutcome::Completed(_) = outcome {
            ctx.session.finish_upload(&upload);
        }
        Ok(outcome)
    }

    fn start_download(
        &self,
        ctx: &RequestContext,
        location: &str,
        file_name: &str,
    ) -> Result<usize> {
        let location = self.absolute(ctx, location)?;
        let download =
            DownloadSession::start(ctx.session.filesystem(), &location, file_name, &self.limits)?;
        Ok(ctx.session.replace_download(download)?.chunk_count())
    }

    fn download_chunk(&self, ctx: &RequestContext, index: usize) -> Result<Bytes> {
        ctx.session.require_download()?.get_chunk(index)
    }
}

/// Decorator that logs every call with its outcome and duration.
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
}

impl<S> LoggingService<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

fn record<T>(
    ctx: &RequestContext,
    operation: &'static str,
    args: fmt::Arguments<'_>,
    started: Instant,
    result: &Result<T>,
) {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => info!(
            identity = %ctx.identity,
            operation,
            elapsed_ms,
            "{}", args
        ),
        Err(e) => warn!(
            identity = %ctx.identity,
            operation,
            elapsed_ms,
            kind = %e.kind(),
            error = %e,
            "{}", args
        ),
    }
}

impl<S: StorageService> StorageService for LoggingService<S> {
    fn state(&self, ctx: &RequestContext) -> Result<FileEntry> {
        let started = Instant::now();
        let result = self.inner.state(ctx);
        record(ctx, "state", format_args!("tree requested"), started, &result);
        result
    }

    fn list(&self, ctx: &RequestContext, dir_path: &str) -> Result<Vec<FileEntry>> {
        let started = Instant::now();
        let result = self.inner.list(ctx, dir_path);
        record(ctx, "ls", format_args!("dir_path={dir_path}"), started, &result);
        result
    }

    fn change_dir(&self, ctx: &RequestContext, path: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.change_dir(ctx, path);
        record(ctx, "cd", format_args!("path={path}"), started, &result);
        result
    }

    fn mkdir(&self, ctx: &RequestContext, path: &str, name: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.mkdir(ctx, path, name);
        record(ctx, "mkdir", format_args!("path={path} name={name}"), started, &result);
        result
    }

    fn rename(
        &self,
        ctx: &RequestContext,
        dir_path: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.rename(ctx, dir_path, old_name, new_name);
        record(
            ctx,
            "rename",
            format_args!("dir_path={dir_path} old_name={old_name} new_name={new_name}"),
            started,
            &result,
        );
        result
    }

    fn move_entry(
        &self,
        ctx: &RequestContext,
        src_dir: &str,
        name: &str,
        dest_dir: &str,
    ) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.move_entry(ctx, src_dir, name, dest_dir);
        record(
            ctx,
            "move",
            format_args!("src={src_dir} name={name} dest={dest_dir}"),
            started,
            &result,
        );
        result
    }

    fn copy(
        &self,
        ctx: &RequestContext,
        src_dir: &str,
        name: &str,
        dest_dir: &str,
    ) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.copy(ctx, src_dir, name, dest_dir);
        record(
            ctx,
            "copy",
            format_args!("src={src_dir} name={name} dest={dest_dir}"),
            started,
            &result,
        );
        result
    }

    fn delete(&self, ctx: &RequestContext, dir_path: &str, name: &str) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.delete(ctx, dir_path, name);
        record(ctx, "delete", format_args!("dir_path={dir_path} name={name}"), started, &result);
        result
    }

    fn start_upload(
        &self,
        ctx: &RequestContext,
        location: &str,
        file_name: &str,
        chunk_count: usize,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.start_upload(ctx, location, file_name, chunk_count);
        record(
            ctx,
            "start_upload",
            format_args!("location={location} file_name={file_name} chunks={chunk_count}"),
            started,
            &result,
        );
        result
    }

    fn upload_chunk(&self, ctx: &RequestContext, index: usize, data: &[u8]) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.upload_chunk(ctx, index, data);
        record(
            ctx,
            "upload_chunk",
            format_args!("index={index} bytes={}", data.len()),
            started,
            &result,
        );
        result
    }

    fn complete_upload(&self, ctx: &RequestContext) -> Result<UploadOutcome> {
        let started = Instant::now();
        let result = self.inner.complete_upload(ctx);
        let missing = match &result {
            Ok(UploadOutcome::Missing(missing)) => missing.len(),
            _ => 0,
        };
        record(
            ctx,
            "complete_upload",
            format_args!("missing={missing}"),
            started,
            &result,
        );
        result
    }

    fn start_download(
        &self,
        ctx: &RequestContext,
        location: &str,
        file_name: &str,
    ) -> Result<usize> {
        let started = Instant::now();
        let result = self.inner.start_download(ctx, location, file_name);
        record(
            ctx,
            "start_download",
            format_args!("location={location} file_name={file_name}"),
            started,
            &result,
        );
        result
    }

    fn download_chunk(&self, ctx: &RequestContext, index: usize) -> Result<Bytes> {
        let started = Instant::now();
        let result = self.inner.download_chunk(ctx, index);
        record(ctx, "download_chunk", format_args!("index={index}"), started, &result);
        result
    }
}
