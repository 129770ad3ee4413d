//! Path algebra for tenant-relative paths.
//!
//! Paths on the wire are `/`-separated, rooted at the tenant root and
//! terminated with a trailing separator when they name a directory. Nothing
//! in this module touches storage; existence checks go through
//! [`DirectoryLookup`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Separator used on the wire, independent of the host platform.
pub const SEPARATOR: char = '/';

/// Token that moves to the parent directory.
pub const PARENT_TOKEN: &str = "..";

/// Token that moves back to the previously visited directory.
pub const BACK_TOKEN: &str = "-";

/// Splits a path into its non-empty segments.
///
/// `"a//b/"` becomes `["a", "b"]`, and `"/"` or `""` become an empty list.
pub fn split(path: &str) -> Vec<String> {
    path.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Joins segments into a rooted path with a trailing separator.
///
/// An empty slice maps to `"/"`.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut path = String::from(SEPARATOR);
    for segment in segments {
        path.push_str(segment.as_ref());
        path.push(SEPARATOR);
    }
    path
}

/// Lexically resolves `path` into segments below the root.
///
/// `.` is dropped and `..` removes the previous segment. A `..` that would
/// climb above the root is rejected with `BadRequest`, so the result can
/// always be re-based under a tenant root without escaping it.
pub fn normalize(path: &str) -> Result<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for segment in path.split(SEPARATOR) {
        match segment {
            "" | "." => {}
            PARENT_TOKEN => {
                if segments.pop().is_none() {
                    return Err(StorageError::bad_request(format!(
                        "path {path} escapes the root directory"
                    )));
                }
            }
            other => segments.push(other.to_string()),
        }
    }
    Ok(segments)
}

/// Checks that `name` is a single path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::bad_request("name must not be empty"));
    }
    if name == "." || name == PARENT_TOKEN {
        return Err(StorageError::bad_request(format!("invalid name: {name}")));
    }
    if name.contains(SEPARATOR) || name.contains('\\') || name.contains('\0') {
        return Err(StorageError::bad_request(format!(
            "name must not contain path separators: {name}"
        )));
    }
    Ok(())
}

/// Existence check used by [`NavigationState::navigate`].
pub trait DirectoryLookup {
    /// Returns `true` when `segments` (relative to the tenant root) name an
    /// existing directory.
    fn is_directory(&self, segments: &[String]) -> bool;
}

/// What `..` does when the current directory is already the root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentAtRoot {
    /// Stay at the root and report success.
    #[default]
    Ignore,
    /// Fail with `NotFound` and leave the state untouched.
    Reject,
}

/// Per-session position inside the tenant tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationState {
    current: Vec<String>,
    history: Vec<String>,
}

impl NavigationState {
    /// A state positioned at the tenant root with no history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.current
    }

    /// The current directory as a joined path.
    pub fn current_path(&self) -> String {
        join(&self.current)
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_root(&self) -> bool {
        self.current.is_empty()
    }

    /// Resolves `path` relative to the current directory.
    ///
    /// Absolute paths (leading separator) resolve from the root.
    pub fn resolve(&self, path: &str) -> Result<Vec<String>> {
        if path.starts_with(SEPARATOR) {
            return normalize(path);
        }
        normalize(&format!("{}{}", self.current_path(), path))
    }

    /// Applies a navigation token.
    ///
    /// On failure the state is unchanged. Every successful move records the
    /// previous location in the history first, so `-` always returns to the
    /// immediately prior directory.
    pub fn navigate(
        &mut self,
        token: &str,
        lookup: &impl DirectoryLookup,
        policy: ParentAtRoot,
    ) -> Result<String> {
        let token = token.trim();
        let target = match token {
            PARENT_TOKEN => {
                if self.current.is_empty() {
                    return match policy {
                        ParentAtRoot::Ignore => Ok(self.current_path()),
                        ParentAtRoot::Reject => Err(StorageError::not_found(
                            "already at the root directory",
                        )),
                    };
                }
                let mut parent = self.current.clone();
                parent.pop();
                parent
            }
            "" | "/" => Vec::new(),
            BACK_TOKEN => {
                let Some(previous) = self.history.last() else {
                    return Ok(self.current_path());
                };
                let segments = split(previous);
                if !lookup.is_directory(&segments) {
                    return Err(StorageError::not_found(format!(
                        "directory {previous} not found"
                    )));
                }
                self.history.pop();
                segments
            }
            other => {
                let segments = self
                    .resolve(other)
                    .map_err(|_| StorageError::not_found(format!("directory {other} not found")))?;
                if !lookup.is_directory(&segments) {
                    return Err(StorageError::not_found(format!(
                        "directory {other} not found"
                    )));
                }
                segments
            }
        };

        self.history.push(self.current_path());
        self.current = target;
        Ok(self.current_path())
    }
}
