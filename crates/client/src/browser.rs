//! Client-side view of the tenant tree.
//!
//! The shell keeps the last tree fetched from `/filesystem/state` and walks it
//! locally for `cd` and `ls`. Paths typed by the user are turned into
//! absolute wire paths here before any server call.

use protocol::path::{self, DirectoryLookup};
use protocol::{FileEntry, NavigationState, ParentAtRoot, StorageError};

/// Tree lookup used by [`NavigationState::navigate`].
struct TreeLookup<'a>(&'a FileEntry);

impl DirectoryLookup for TreeLookup<'_> {
    fn is_directory(&self, segments: &[String]) -> bool {
        self.0
            .descend(segments)
            .map(|entry| entry.is_dir)
            .unwrap_or(false)
    }
}

/// Navigator over a cached [`FileEntry`] tree.
#[derive(Debug, Clone)]
pub struct RemoteBrowser {
    root: FileEntry,
    navigation: NavigationState,
}

impl Default for RemoteBrowser {
    fn default() -> Self {
        Self::new(FileEntry::directory("/", 0, Vec::new()))
    }
}

impl RemoteBrowser {
    pub fn new(root: FileEntry) -> Self {
        Self {
            root,
            navigation: NavigationState::new(),
        }
    }

    pub fn tree(&self) -> &FileEntry {
        &self.root
    }

    /// Installs a freshly fetched tree. If the current directory vanished,
    /// navigation starts over at the root.
    pub fn set_tree(&mut self, root: FileEntry) {
        self.root = root;
        if !TreeLookup(&self.root).is_directory(self.navigation.segments()) {
            self.navigation = NavigationState::new();
        }
    }

    /// Current directory as a wire path (`/docs/`).
    pub fn current_path(&self) -> String {
        self.navigation.current_path()
    }

    /// Shell prompt, e.g. `alice/docs/>`.
    pub fn prompt(&self, user: &str) -> String {
        format!("{}{}>", user, self.current_path())
    }

    pub fn cd(&mut self, target: &str) -> protocol::Result<String> {
        self.navigation
            .navigate(target, &TreeLookup(&self.root), ParentAtRoot::Ignore)
    }

    /// Absolute wire path of a directory typed by the user.
    pub fn resolve_dir(&self, input: &str) -> protocol::Result<String> {
        Ok(path::join(&self.navigation.resolve(input)?))
    }

    /// Splits a typed file path into its parent directory and name.
    ///
    /// A trailing separator is rejected since the last segment must name an
    /// entry.
    pub fn resolve_entry(&self, input: &str) -> protocol::Result<(String, String)> {
        if input.is_empty() || input.ends_with(path::SEPARATOR) {
            return Err(StorageError::bad_request(
                "unexpected separator symbol at the end of the path",
            ));
        }
        let mut segments = self.navigation.resolve(input)?;
        let name = segments
            .pop()
            .ok_or_else(|| StorageError::bad_request(format!("{input} does not name an entry")))?;
        Ok((path::join(&segments), name))
    }

    /// Lines printed by `ls`: "Empty" or a table with directories first.
    pub fn ls(&self, input: &str) -> protocol::Result<Vec<String>> {
        let segments = self.navigation.resolve(input)?;
        let dir = self
            .root
            .descend(&segments)
            .filter(|entry| entry.is_dir)
            .ok_or_else(|| StorageError::not_found(format!("{input} not found")))?;

        if dir.children.is_empty() {
            return Ok(vec!["Empty".to_string()]);
        }

        let mut children: Vec<&FileEntry> = dir.children.iter().collect();
        children.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        let width = children
            .iter()
            .map(|entry| entry.name.len())
            .max()
            .unwrap_or(0)
            .max(4);
        let mut lines = vec![format!("{:<width$}  {:<5}  {:>12}  MODIFIED", "NAME", "DIR", "SIZE")];
        lines.extend(children.iter().map(|entry| {
            format!(
                "{:<width$}  {:<5}  {:>12}  {}",
                entry.name, entry.is_dir, entry.size, entry.modified
            )
        }));
        Ok(lines)
    }
}
