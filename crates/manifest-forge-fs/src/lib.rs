//! Rooted in-memory filesystem used as the scratch tree for chart
//! materialization, overlay layout and archive extraction.
//!
//! All paths are absolute and rooted at `/`. The walk is deterministic
//! (children are visited in UTF-8 path order) and visits regular files and
//! directories only.

pub mod targz;

use std::io::{Read, Write};

use vfs::VfsPath;

pub const ROOT: &str = "/";
pub const SEPARATOR: char = '/';

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("vfs error: {0}")]
    Vfs(#[from] vfs::VfsError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file at '{path}' does not exist")]
    NotFound { path: String },

    #[error("cannot process irregular file '{path}'")]
    Irregular { path: String },
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// What the walk should do after visiting a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Do not descend into the directory that was just visited.
    SkipDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// In-memory filesystem rooted at `/`.
///
/// Cloning is cheap and clones share the underlying tree.
#[derive(Debug, Clone)]
pub struct Filesystem {
    root: VfsPath,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: VfsPath::new(vfs::MemoryFS::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &str {
        ROOT
    }

    #[must_use]
    pub fn is_abs(path: &str) -> bool {
        path.starts_with(SEPARATOR)
    }

    /// Join path segments with a single separator, keeping the result
    /// rooted when the first segment is.
    #[must_use]
    pub fn join(base: &str, rel: &str) -> String {
        let rel = rel.trim_matches(SEPARATOR);
        if rel.is_empty() {
            return base.to_string();
        }
        let base = base.trim_end_matches(SEPARATOR);
        if base.is_empty() {
            format!("{SEPARATOR}{rel}")
        } else {
            format!("{base}{SEPARATOR}{rel}")
        }
    }

    /// The parent directory of `path` (`/` is its own parent).
    #[must_use]
    pub fn dir(path: &str) -> String {
        let trimmed = path.trim_end_matches(SEPARATOR);
        match trimmed.rfind(SEPARATOR) {
            Some(0) | None => ROOT.to_string(),
            Some(idx) => trimmed[..idx].to_string(),
        }
    }

    fn resolve(&self, path: &str) -> FsResult<VfsPath> {
        Ok(self.root.join(path.trim_start_matches(SEPARATOR))?)
    }

    pub fn exists(&self, path: &str) -> FsResult<bool> {
        Ok(self.resolve(path)?.exists()?)
    }

    pub fn is_dir(&self, path: &str) -> FsResult<bool> {
        Ok(self.resolve(path)?.is_dir()?)
    }

    pub fn is_file(&self, path: &str) -> FsResult<bool> {
        Ok(self.resolve(path)?.is_file()?)
    }

    pub fn create_dir_all(&self, path: &str) -> FsResult<()> {
        self.resolve(path)?.create_dir_all()?;
        Ok(())
    }

    pub fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let file = self.resolve(path)?;
        if !file.exists()? {
            return Err(FsError::NotFound {
                path: path.to_string(),
            });
        }
        let mut buf = Vec::new();
        file.open_file()?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Write `data` at `path`, creating parent directories as needed.
    pub fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let file = self.resolve(path)?;
        file.parent().create_dir_all()?;
        let mut out = file.create_file()?;
        out.write_all(data)?;
        Ok(())
    }

    /// Pre-order walk over `start`, visiting directories before their
    /// children. Children are visited in UTF-8 path order. Returning
    /// [`WalkControl::SkipDir`] from a directory visit prunes that subtree.
    pub fn walk<F>(&self, start: &str, mut visit: F) -> FsResult<()>
    where
        F: FnMut(&str, EntryKind) -> FsResult<WalkControl>,
    {
        let root = self.resolve(start)?;
        if !root.exists()? {
            return Err(FsError::NotFound {
                path: start.to_string(),
            });
        }
        self.walk_dir(&root, &mut visit)
    }

    fn walk_dir<F>(&self, dir: &VfsPath, visit: &mut F) -> FsResult<()>
    where
        F: FnMut(&str, EntryKind) -> FsResult<WalkControl>,
    {
        let mut children: Vec<VfsPath> = dir.read_dir()?.collect();
        children.sort_by(|a, b| a.as_str().cmp(b.as_str()));

        for child in children {
            let path = normalize_abs(child.as_str());
            if child.is_dir()? {
                match visit(&path, EntryKind::Directory)? {
                    WalkControl::SkipDir => continue,
                    WalkControl::Continue => self.walk_dir(&child, visit)?,
                }
            } else if child.is_file()? {
                visit(&path, EntryKind::File)?;
            } else {
                return Err(FsError::Irregular { path });
            }
        }
        Ok(())
    }

    /// Collect every regular file under `start` in walk order.
    pub fn list_files(&self, start: &str) -> FsResult<Vec<String>> {
        let mut out = Vec::new();
        self.walk(start, |path, kind| {
            if kind == EntryKind::File {
                out.push(path.to_string());
            }
            Ok(WalkControl::Continue)
        })?;
        Ok(out)
    }
}

fn normalize_abs(path: &str) -> String {
    if path.starts_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{SEPARATOR}{path}")
    }
}

/// The path of `path` relative to `base`, without a leading separator.
#[must_use]
pub fn relative_to(path: &str, base: &str) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .trim_start_matches(SEPARATOR)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_dir() {
        assert_eq!(Filesystem::join("/", "chart"), "/chart");
        assert_eq!(Filesystem::join("/a", "b/c"), "/a/b/c");
        assert_eq!(Filesystem::join("/a/", "/b/"), "/a/b");
        assert_eq!(Filesystem::join("/a", ""), "/a");
        assert_eq!(Filesystem::dir("/a/b/c"), "/a/b");
        assert_eq!(Filesystem::dir("/a"), "/");
        assert_eq!(Filesystem::dir("/"), "/");
    }

    #[test]
    fn is_abs() {
        assert!(Filesystem::is_abs("/a/b"));
        assert!(!Filesystem::is_abs("a/b"));
        assert!(!Filesystem::is_abs(""));
    }

    #[test]
    fn write_read_roundtrip() {
        let fs = Filesystem::new();
        fs.write_file("/a/b/file.txt", b"hello").unwrap();
        assert_eq!(fs.read_file("/a/b/file.txt").unwrap(), b"hello");
        assert!(fs.exists("/a/b").unwrap());
        assert!(fs.is_dir("/a").unwrap());
    }

    #[test]
    fn read_missing_file() {
        let fs = Filesystem::new();
        let err = fs.read_file("/nope").unwrap_err();
        assert!(matches!(err, FsError::NotFound { .. }));
    }

    #[test]
    fn walk_is_ordered_and_prunable() {
        let fs = Filesystem::new();
        fs.write_file("/x/b.txt", b"b").unwrap();
        fs.write_file("/x/a.txt", b"a").unwrap();
        fs.write_file("/x/sub/c.txt", b"c").unwrap();
        fs.write_file("/y/d.txt", b"d").unwrap();

        let mut seen = Vec::new();
        fs.walk("/", |path, kind| {
            seen.push(path.to_string());
            if kind == EntryKind::Directory && path == "/x/sub" {
                return Ok(WalkControl::SkipDir);
            }
            Ok(WalkControl::Continue)
        })
        .unwrap();

        assert_eq!(seen, vec!["/x", "/x/a.txt", "/x/b.txt", "/x/sub", "/y", "/y/d.txt"]);
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_to("/chart/templates/a.yaml", "/chart"), "templates/a.yaml");
        assert_eq!(relative_to("/a", "/"), "a");
    }
}
