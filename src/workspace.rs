//! File-system seam used by the assembler and the patch applier.

use crate::util::normalize_path;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Operations the pipeline needs from a workspace.
///
/// Paths handed to `read_file`, `write_file` and `list_children` are absolute.
/// `create_file` takes a path relative to [`Workspace::root`].
pub trait Workspace: Send + Sync {
    fn root(&self) -> &Path;

    /// Read a text file; `Ok(None)` when it does not exist.
    fn read_file(&self, path: &Path) -> io::Result<Option<String>>;

    /// Replace a file's content. The write is committed before returning.
    fn write_file(&self, path: &Path, content: &str) -> io::Result<()>;

    fn list_children(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    /// Create a file (and missing parent directories) at a root-relative path.
    fn create_file(&self, relative: &Path, content: &str) -> io::Result<PathBuf>;

    /// Turn a path string from engine output into an absolute, normalized path.
    fn resolve(&self, raw: &str) -> PathBuf {
        let raw = Path::new(raw.trim());
        if raw.is_absolute() {
            normalize_path(raw)
        } else {
            normalize_path(&self.root().join(raw))
        }
    }

    /// Search the workspace tree for a file whose absolute path equals `target`.
    fn find_file(&self, target: &Path) -> Option<PathBuf> {
        let target = normalize_path(target);
        if !target.starts_with(self.root()) {
            return None;
        }
        find_in(self, self.root(), &target)
    }
}

fn find_in<W: Workspace + ?Sized>(ws: &W, dir: &Path, target: &Path) -> Option<PathBuf> {
    let children = match ws.list_children(dir) {
        Ok(children) => children,
        Err(err) => {
            log::debug!("Cannot list {}: {}", dir.display(), err);
            return None;
        }
    };
    for child in children {
        if child.is_dir {
            // Only directories on the way to the target can contain it.
            if target.starts_with(&child.path) {
                if let Some(found) = find_in(ws, &child.path, target) {
                    return Some(found);
                }
            }
        } else if child.path == target {
            return Some(child.path);
        }
    }
    None
}

/// Reject relative paths that are absolute or climb out of the root.
pub fn check_relative(relative: &Path) -> io::Result<()> {
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside the workspace", relative.display()),
        ));
    }
    Ok(())
}

/// Workspace backed by the local file system
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize_path(&root.into()),
        }
    }
}

impl Workspace for FsWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_file(&self, path: &Path) -> io::Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write_file(&self, path: &Path, content: &str) -> io::Result<()> {
        write_atomic(path, content)
    }

    fn list_children(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut children = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                DirEntry {
                    path: entry.path(),
                    is_dir,
                }
            })
            .collect::<Vec<_>>();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    fn create_file(&self, relative: &Path, content: &str) -> io::Result<PathBuf> {
        check_relative(relative)?;
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, content)?;
        Ok(path)
    }
}

/// Write through a sibling temp file and rename it over the target.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = path.with_file_name(format!(".{}.splice-tmp", file_name));

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);

        if let Ok(meta) = fs::metadata(path) {
            fs::set_permissions(&tmp_path, meta.permissions())?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
