//! Tenant-scoped filesystem.
//!
//! Every path a client sends is relative to its tenant root. Paths are
//! resolved lexically first (`..` may not climb above the root), then
//! canonicalized and checked against the canonical root so a symlink inside
//! the tree cannot lead outside of it either.

use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use protocol::path::{self as wire_path, validate_name};
use protocol::{DirectoryLookup, FileEntry, Result, StorageError};
use tracing::{debug, warn};

/// Filesystem view confined to one tenant root.
#[derive(Debug, Clone)]
pub struct TenantFilesystem {
    root: PathBuf,
}

/// A directory inside the tenant tree.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedDir {
    pub segments: Vec<String>,
    pub path: PathBuf,
}

impl ResolvedDir {
    /// Wire path of `name` inside this directory.
    pub fn child_wire_path(&self, name: &str, is_dir: bool) -> String {
        let mut path = wire_path::join(&self.segments);
        path.push_str(name);
        if is_dir {
            path.push(wire_path::SEPARATOR);
        }
        path
    }
}

/// An existing entry inside the tenant tree.
#[derive(Debug)]
pub(crate) struct ResolvedEntry {
    pub dir: ResolvedDir,
    pub name: String,
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl ResolvedEntry {
    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    pub fn wire_path(&self) -> String {
        self.dir.child_wire_path(&self.name, self.is_dir())
    }
}

impl TenantFilesystem {
    /// Opens (and creates if needed) a tenant root.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .map_err(|e| StorageError::from_io(&e, format!("cannot create {}", root.display())))?;
        let root = fs::canonicalize(root)
            .map_err(|e| StorageError::from_io(&e, format!("cannot open {}", root.display())))?;
        Ok(Self { root })
    }

    /// Canonical tenant root on the host.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a wire directory path to an existing directory.
    pub(crate) fn resolve_dir(&self, dir_path: &str) -> Result<ResolvedDir> {
        let segments = wire_path::normalize(dir_path)?;
        let lexical = segments.iter().fold(self.root.clone(), |p, s| p.join(s));

        let canonical = fs::canonicalize(&lexical).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::not_found(format!("directory {dir_path} not found"))
            }
            _ => StorageError::from_io(&e, format!("cannot resolve {dir_path}")),
        })?;
        if !canonical.starts_with(&self.root) {
            warn!(path = %dir_path, "Path resolves outside the tenant root");
            return Err(StorageError::bad_request(format!(
                "path {dir_path} is outside the root directory"
            )));
        }
        if !canonical.is_dir() {
            return Err(StorageError::not_found(format!(
                "directory {dir_path} not found"
            )));
        }

        Ok(ResolvedDir {
            segments,
            path: canonical,
        })
    }

    /// Resolves `name` inside `dir_path` without requiring it to exist.
    pub(crate) fn resolve_target(&self, dir_path: &str, name: &str) -> Result<(ResolvedDir, PathBuf)> {
        validate_name(name)?;
        let dir = self.resolve_dir(dir_path)?;
        let path = dir.path.join(name);
        Ok((dir, path))
    }

    /// Resolves an existing entry. Symlinks are not followed.
    pub(crate) fn resolve_entry(&self, dir_path: &str, name: &str) -> Result<ResolvedEntry> {
        let (dir, path) = self.resolve_target(dir_path, name)?;
        let metadata = fs::symlink_metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                StorageError::not_found(format!("{name} not found in {dir_path}"))
            }
            _ => StorageError::from_io(&e, format!("cannot stat {name}")),
        })?;
        Ok(ResolvedEntry {
            dir,
            name: name.to_string(),
            path,
            metadata,
        })
    }

    fn ensure_absent(path: &Path, name: &str) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(_) => Err(StorageError::already_exists(format!("{name} already exists"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(&e, format!("cannot stat {name}"))),
        }
    }

    /// Creates directory `name` inside `parent_path` and returns its path.
    pub fn mkdir(&self, parent_path: &str, name: &str) -> Result<String> {
        let (dir, target) = self.resolve_target(parent_path, name)?;
        Self::ensure_absent(&target, name)?;
        fs::create_dir(&target)
            .map_err(|e| StorageError::from_io(&e, format!("cannot create directory {name}")))?;
        debug!(path = ?target, "Directory created");
        Ok(dir.child_wire_path(name, true))
    }

    /// Renames an entry within one directory and returns the new path.
    pub fn rename(&self, dir_path: &str, old_name: &str, new_name: &str) -> Result<String> {
        let entry = self.resolve_entry(dir_path, old_name)?;
        validate_name(new_name)?;
        let target = entry.dir.path.join(new_name);
        Self::ensure_absent(&target, new_name)?;
        fs::rename(&entry.path, &target)
            .map_err(|e| StorageError::from_io(&e, format!("cannot rename {old_name}")))?;
        Ok(entry.dir.child_wire_path(new_name, entry.is_dir()))
    }

    /// Moves an entry into another directory and returns its new path.
    pub fn move_entry(&self, src_dir: &str, name: &str, dest_dir: &str) -> Result<String> {
        let entry = self.resolve_entry(src_dir, name)?;
        let dest = self.resolve_dir(dest_dir)?;
        if entry.is_dir() && dest.path.starts_with(&entry.path) {
            return Err(StorageError::bad_request(format!(
                "cannot move {name} into itself"
            )));
        }
        let target = dest.path.join(name);
        Self::ensure_absent(&target, name)?;
        fs::rename(&entry.path, &target)
            .map_err(|e| StorageError::from_io(&e, format!("cannot move {name}")))?;
        Ok(dest.child_wire_path(name, entry.is_dir()))
    }

    /// Copies an entry (recursively for directories) and returns the copy's
    /// path.
    ///
    /// A failure halfway through a directory copy leaves the partial copy in
    /// place.
    pub fn copy(&self, src_dir: &str, name: &str, dest_dir: &str) -> Result<String> {
        let entry = self.resolve_entry(src_dir, name)?;
        let dest = self.resolve_dir(dest_dir)?;
        if entry.metadata.file_type().is_symlink() {
            return Err(StorageError::bad_request(format!(
                "{name} is a symbolic link"
            )));
        }
        if entry.is_dir() && dest.path.starts_with(&entry.path) {
            return Err(StorageError::bad_request(format!(
                "cannot copy {name} into itself"
            )));
        }
        let target = dest.path.join(name);
        Self::ensure_absent(&target, name)?;
        copy_recursive(&entry.path, &target)
            .map_err(|e| StorageError::from_io(&e, format!("cannot copy {name}")))?;
        Ok(dest.child_wire_path(name, entry.is_dir()))
    }

    /// Deletes a file or a whole directory and returns the removed path.
    pub fn delete(&self, dir_path: &str, name: &str) -> Result<String> {
        let entry = self.resolve_entry(dir_path, name)?;
        let removed = if entry.is_dir() {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        removed.map_err(|e| StorageError::from_io(&e, format!("cannot delete {name}")))?;
        Ok(entry.wire_path())
    }

    /// Immediate children of a directory, in enumeration order.
    pub fn list(&self, dir_path: &str) -> Result<Vec<FileEntry>> {
        let dir = self.resolve_dir(dir_path)?;
        read_children(&dir.path, false)
    }

    /// Full tree below a directory. Walks storage on every call.
    pub fn traverse(&self, dir_path: &str) -> Result<FileEntry> {
        let dir = self.resolve_dir(dir_path)?;
        let metadata = fs::metadata(&dir.path)
            .map_err(|e| StorageError::from_io(&e, format!("cannot stat {dir_path}")))?;
        let name = dir
            .segments
            .last()
            .cloned()
            .unwrap_or_else(|| wire_path::SEPARATOR.to_string());
        let children = read_children(&dir.path, true)?;
        Ok(FileEntry::directory(name, modified_secs(&metadata), children))
    }
}

impl DirectoryLookup for TenantFilesystem {
    fn is_directory(&self, segments: &[String]) -> bool {
        self.resolve_dir(&wire_path::join(segments)).is_ok()
    }
}

fn modified_secs(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_children(dir: &Path, recursive: bool) -> Result<Vec<FileEntry>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| StorageError::from_io(&e, format!("cannot read {}", dir.display())))?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        // symlink_metadata: links are reported, never followed
        let metadata = match fs::symlink_metadata(entry.path()) {
            Ok(m) => m,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let modified = modified_secs(&metadata);

        if metadata.is_dir() {
            let nested = if recursive {
                read_children(&entry.path(), true)?
            } else {
                Vec::new()
            };
            children.push(FileEntry::directory(name, modified, nested));
        } else {
            children.push(FileEntry::file(name, metadata.len(), modified));
        }
    }
    Ok(children)
}

fn copy_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    if metadata.is_dir() {
        fs::create_dir(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                debug!(path = ?entry.path(), "Skipping symbolic link during copy");
                continue;
            }
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, metadata.permissions())?;
    } else {
        // fs::copy carries the permission bits over
        fs::copy(src, dst)?;
    }
    Ok(())
}
