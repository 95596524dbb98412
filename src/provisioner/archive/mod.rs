//! Payload archive: a gzip-compressed tar stream of the stage2 directory
//!
//! Entries are streamed straight from the walk into the encoder; nothing
//! holds the full entry list. Headers are written in deterministic mode
//! (owner ids zeroed) with the mode chosen by a [`PermissionPolicy`] and the
//! mtime chosen by a [`TimestampPolicy`], so packing an unchanged tree twice
//! yields identical bytes.

pub mod entry;
pub mod permissions;

pub use entry::{ArchiveEntry, ArchivePath, EntryContent, walk_entries};
pub use permissions::{
    ContentHeuristic, FilesystemCapability, NativeBits, PermissionMode, PermissionPolicy,
    looks_executable,
};

use super::defaults::SOURCE_DATE_EPOCH_ENV;
use crate::exceptions::{ArchiveError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use log::{debug, info, warn};
use serde::Serialize;
use std::env;
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::time::{Instant, UNIX_EPOCH};
use tar::{Builder, Header, HeaderMode};

/// Source of the mtime recorded for each entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Keep each file's own modification time
    #[default]
    Preserve,
    /// Record the same time (seconds since the epoch) for every entry
    Fixed(u64),
}

impl TimestampPolicy {
    /// `Fixed` when `SOURCE_DATE_EPOCH` holds a valid timestamp, else `Preserve`
    pub fn from_env() -> Self {
        match env::var(SOURCE_DATE_EPOCH_ENV) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(secs) => TimestampPolicy::Fixed(secs),
                Err(_) => {
                    warn!("⚠️ Ignoring unparsable {SOURCE_DATE_EPOCH_ENV}={value}");
                    TimestampPolicy::Preserve
                }
            },
            Err(_) => TimestampPolicy::Preserve,
        }
    }

    pub fn mtime_for(self, metadata: &Metadata) -> u64 {
        match self {
            TimestampPolicy::Fixed(secs) => secs,
            TimestampPolicy::Preserve => metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Counts of what went into an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PackSummary {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    /// Uncompressed bytes of regular file content
    pub payload_bytes: u64,
}

impl PackSummary {
    pub fn entries(&self) -> usize {
        self.files + self.directories + self.symlinks
    }
}

/// Builds payload archives with a fixed permission and timestamp policy
#[derive(Debug)]
pub struct ArchivePacker {
    policy: Box<dyn PermissionPolicy>,
    timestamps: TimestampPolicy,
}

impl ArchivePacker {
    pub fn new(policy: Box<dyn PermissionPolicy>, timestamps: TimestampPolicy) -> Self {
        ArchivePacker { policy, timestamps }
    }

    pub fn policy(&self) -> &dyn PermissionPolicy {
        self.policy.as_ref()
    }

    /// Pack `root` into `writer`, returning the writer once the gzip stream is finished.
    ///
    /// The first failing entry aborts the pack; whatever was written to
    /// `writer` by then is not a valid archive.
    pub fn pack<W: Write>(
        &self,
        root: &Path,
        writer: W,
    ) -> std::result::Result<(W, PackSummary), ArchiveError> {
        let root_meta = fs::metadata(root).map_err(|source| ArchiveError::Stat {
            path: root.to_path_buf(),
            source,
        })?;
        if !root_meta.is_dir() {
            return Err(ArchiveError::Stat {
                path: root.to_path_buf(),
                source: io::Error::other("payload root is not a directory"),
            });
        }

        let timer = Instant::now();
        debug!(
            "📦 Packing {} with {} permissions",
            root.display(),
            self.policy.name()
        );

        let mut builder = Builder::new(GzEncoder::new(writer, Compression::best()));
        builder.follow_symlinks(false);

        let mut summary = PackSummary::default();
        for entry in walk_entries(root, self.policy.as_ref(), self.timestamps) {
            append_entry(&mut builder, entry?, &mut summary)?;
        }

        let encoder = builder.into_inner().map_err(ArchiveError::Write)?;
        let writer = encoder.finish().map_err(ArchiveError::Write)?;

        info!(
            "📦 Packed {} files, {} directories, {} symlinks ({} bytes) in {:?}",
            summary.files,
            summary.directories,
            summary.symlinks,
            summary.payload_bytes,
            timer.elapsed()
        );
        Ok((writer, summary))
    }

    /// Pack `root` into an anonymous temporary file, rewound to its start.
    ///
    /// The file is deleted by the OS once the returned handle is dropped.
    pub fn pack_to_tempfile(&self, root: &Path) -> Result<(File, PackSummary)> {
        let temp = tempfile::tempfile()?;
        let (buffered, summary) = self.pack(root, BufWriter::new(temp))?;
        let mut file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.rewind()?;
        Ok((file, summary))
    }
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    entry: ArchiveEntry,
    summary: &mut PackSummary,
) -> std::result::Result<(), ArchiveError> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&entry.metadata, HeaderMode::Deterministic);
    header.set_mode(entry.mode);
    header.set_mtime(entry.mtime);

    let path = entry.path.as_str();
    let written = match entry.content {
        EntryContent::Directory => {
            summary.directories += 1;
            header.set_size(0);
            builder.append_data(&mut header, path, io::empty())
        }
        EntryContent::File(file) => {
            summary.files += 1;
            summary.payload_bytes += entry.size;
            header.set_size(entry.size);
            // a file growing mid-pack must not overrun its header size
            builder.append_data(&mut header, path, file.take(entry.size))
        }
        EntryContent::Symlink(target) => {
            summary.symlinks += 1;
            header.set_size(0);
            builder.append_link(&mut header, path, &target)
        }
    };
    written.map_err(ArchiveError::Write)
}
