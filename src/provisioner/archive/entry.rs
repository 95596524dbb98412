//! Payload entries produced by the directory walk

use super::TimestampPolicy;
use super::permissions::{PermissionPolicy, host_mode};
use crate::exceptions::ArchiveError;
use log::trace;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Relative, forward-slash path of an entry inside the archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchivePath(String);

impl ArchivePath {
    /// Convert a path relative to the payload root.
    ///
    /// Absolute paths, drive prefixes, `..` and non-UTF-8 names are refused;
    /// `.` components are dropped.
    pub fn from_relative(relative: &Path) -> Result<Self, ArchiveError> {
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| ArchiveError::DisallowedPath(relative.to_path_buf()))?;
                    parts.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ArchiveError::DisallowedPath(relative.to_path_buf()));
                }
            }
        }
        if parts.is_empty() {
            return Err(ArchiveError::DisallowedPath(relative.to_path_buf()));
        }
        Ok(ArchivePath(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an entry carries into the archive
#[derive(Debug)]
pub enum EntryContent {
    /// Regular file, opened and positioned at its start
    File(File),
    Directory,
    /// Symbolic link with its (unresolved) target
    Symlink(PathBuf),
}

/// One payload item, alive only until it is streamed into the archive
#[derive(Debug)]
pub struct ArchiveEntry {
    pub path: ArchivePath,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub metadata: Metadata,
    pub content: EntryContent,
}

/// Walk `root` in sorted order, yielding one result per entry below it.
///
/// Symlinks are recorded, never followed. The caller decides what to do
/// with an `Err`; the packer stops at the first one.
pub fn walk_entries<'a>(
    root: &'a Path,
    policy: &'a dyn PermissionPolicy,
    timestamps: TimestampPolicy,
) -> impl Iterator<Item = Result<ArchiveEntry, ArchiveError>> + 'a {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .map(move |step| {
            let dir_entry = step.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
                ArchiveError::Stat { path, source }
            })?;
            build_entry(root, dir_entry.path(), policy, timestamps)
        })
}

fn build_entry(
    root: &Path,
    path: &Path,
    policy: &dyn PermissionPolicy,
    timestamps: TimestampPolicy,
) -> Result<ArchiveEntry, ArchiveError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ArchiveError::DisallowedPath(path.to_path_buf()))?;
    let archive_path = ArchivePath::from_relative(relative)?;

    let metadata = fs::symlink_metadata(path).map_err(|source| ArchiveError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let mtime = timestamps.mtime_for(&metadata);
    let host = host_mode(&metadata);
    let file_type = metadata.file_type();

    let (mode, size, content) = if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|source| ArchiveError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        (0o777, 0, EntryContent::Symlink(target))
    } else if file_type.is_dir() {
        (policy.directory_mode(host), 0, EntryContent::Directory)
    } else if file_type.is_file() {
        let mut file = File::open(path).map_err(|source| ArchiveError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mode = policy.file_mode(path, host, &mut file);
        (mode, metadata.len(), EntryContent::File(file))
    } else {
        // opening a FIFO for reading blocks until a writer shows up
        return Err(ArchiveError::UnsupportedFileType(path.to_path_buf()));
    };

    trace!("📄 {} mode {:04o} size {}", archive_path, mode, size);
    Ok(ArchiveEntry {
        path: archive_path,
        mode,
        size,
        mtime,
        metadata,
        content,
    })
}
