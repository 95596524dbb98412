//! Read a built installer back and list its payload
//!
//! Used to verify a fresh build and by the `inspect` command. Nothing is
//! extracted to disk.

use super::defaults::{
    GZIP_MAGIC, PLACEHOLDER_CLOUD_DIR, PLACEHOLDER_CUT_LINE, PLACEHOLDER_RUNNER,
};
use crate::exceptions::{CloudMakerError, Result};
use flate2::read::GzDecoder;
use log::{debug, trace};
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};

/// Give up looking for the `CUT_LINE=` assignment after this many lines
const MAX_STUB_LINES: usize = 512;

/// One entry of the installer's payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadEntry {
    pub path: String,
    pub kind: &'static str,
    #[serde(serialize_with = "serialize_octal")]
    pub mode: u32,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl PayloadEntry {
    pub fn is_executable(&self) -> bool {
        self.mode & 0o111 != 0
    }
}

/// Layout and payload listing of an installer file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallerInfo {
    pub path: PathBuf,
    pub cut_line: usize,
    pub stub_bytes: u64,
    pub archive_bytes: u64,
    pub archive_sha256: String,
    /// `CLOUD_DIR` as written in the stub (still shell-quoted)
    pub cloud_dir: Option<String>,
    /// `RUNNER` as written in the stub (still shell-quoted)
    pub runner: Option<String>,
    pub entries: Vec<PayloadEntry>,
}

fn serialize_octal<S: Serializer>(
    mode: &u32,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{mode:04o}"))
}

fn malformed(path: &Path, message: impl std::fmt::Display) -> CloudMakerError {
    CloudMakerError::VerificationFailed(format!("{}: {message}", path.display()))
}

/// Stub assignments found while scanning for the payload start
#[derive(Debug, Default)]
struct StubScan {
    cut_line: Option<usize>,
    cloud_dir: Option<String>,
    runner: Option<String>,
    stub_bytes: u64,
}

/// Value of `NAME=value` on `line`, if the line assigns `name`
fn assignment<'l>(line: &'l str, name: &str) -> Option<&'l str> {
    line.strip_prefix(name)?.strip_prefix('=')
}

/// Read stub lines until the payload start, returning what the stub declares
fn scan_stub<R: BufRead>(reader: &mut R, path: &Path) -> Result<StubScan> {
    let mut scan = StubScan::default();
    let mut line = Vec::new();
    let mut lines_read = 0usize;

    loop {
        if let Some(cut_line) = scan.cut_line {
            if lines_read + 1 == cut_line {
                return Ok(scan);
            }
        } else if lines_read >= MAX_STUB_LINES {
            return Err(malformed(path, "no CUT_LINE assignment in stub"));
        }

        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 || line.last() != Some(&b'\n') {
            return Err(malformed(path, "file ends inside the stub"));
        }
        lines_read += 1;
        scan.stub_bytes += read as u64;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if scan.cut_line.is_none() {
            if let Some(value) = assignment(text, PLACEHOLDER_CUT_LINE) {
                let cut_line: usize = value
                    .parse()
                    .map_err(|_| malformed(path, format!("bad CUT_LINE value '{value}'")))?;
                if cut_line <= lines_read {
                    return Err(malformed(
                        path,
                        format!("CUT_LINE {cut_line} points inside the stub"),
                    ));
                }
                trace!("🔍 CUT_LINE={} at line {}", cut_line, lines_read);
                scan.cut_line = Some(cut_line);
            }
        }
        if let Some(value) = assignment(text, PLACEHOLDER_CLOUD_DIR) {
            scan.cloud_dir.get_or_insert_with(|| value.to_string());
        }
        if let Some(value) = assignment(text, PLACEHOLDER_RUNNER) {
            scan.runner.get_or_insert_with(|| value.to_string());
        }
    }
}

fn list_entries<R: Read>(payload: R, path: &Path) -> Result<Vec<PayloadEntry>> {
    let mut archive = Archive::new(GzDecoder::new(payload));
    let mut entries = Vec::new();
    for entry in archive
        .entries()
        .map_err(|e| malformed(path, format!("not a tar stream: {e}")))?
    {
        let entry = entry.map_err(|e| malformed(path, format!("corrupt payload: {e}")))?;
        let header = entry.header();
        let kind = match header.entry_type() {
            EntryType::Regular => "file",
            EntryType::Directory => "directory",
            EntryType::Symlink => "symlink",
            _ => "other",
        };
        let entry_path = entry
            .path()
            .map_err(|e| malformed(path, format!("bad entry path: {e}")))?;
        let link_target = entry
            .link_name()
            .ok()
            .flatten()
            .map(|target| target.to_string_lossy().into_owned());
        entries.push(PayloadEntry {
            path: entry_path.to_string_lossy().trim_end_matches('/').to_string(),
            kind,
            mode: header.mode().unwrap_or(0),
            size: header.size().unwrap_or(0),
            link_target,
        });
    }
    Ok(entries)
}

/// Inspect the installer at `path`
pub fn inspect(path: &Path) -> Result<InstallerInfo> {
    let file = File::open(path)?;
    let total = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let scan = scan_stub(&mut reader, path)?;
    let cut_line = scan
        .cut_line
        .ok_or_else(|| malformed(path, "no CUT_LINE assignment in stub"))?;

    let mut file = reader.into_inner();
    file.seek(SeekFrom::Start(scan.stub_bytes))?;
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)
        .map_err(|_| malformed(path, "no payload after the stub"))?;
    if &magic != GZIP_MAGIC {
        return Err(malformed(
            path,
            format!("line {cut_line} does not start a gzip stream"),
        ));
    }

    file.seek(SeekFrom::Start(scan.stub_bytes))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let archive_sha256 = hex::encode(hasher.finalize());

    file.seek(SeekFrom::Start(scan.stub_bytes))?;
    let entries = list_entries(BufReader::new(file), path)?;
    debug!(
        "🔍 {}: stub {} bytes, {} payload entries",
        path.display(),
        scan.stub_bytes,
        entries.len()
    );

    Ok(InstallerInfo {
        path: path.to_path_buf(),
        cut_line,
        stub_bytes: scan.stub_bytes,
        archive_bytes: total - scan.stub_bytes,
        archive_sha256,
        cloud_dir: scan.cloud_dir,
        runner: scan.runner,
        entries,
    })
}
