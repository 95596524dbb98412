//! Permission policies for archive entries
//!
//! The guest extracts the payload with whatever modes the archive records, so
//! a stage2 script packed without its executable bit simply fails to run.
//! Hosts whose filesystems carry a real executable bit use [`NativeBits`];
//! everything else falls back to sniffing file content with
//! [`ContentHeuristic`].

use super::super::defaults::{
    ELF_MAGIC, EXECUTABLE_BITS, HEURISTIC_DIR_MODE, HEURISTIC_FILE_MODE, MAGIC_LEN, MODE_MASK,
    SHEBANG,
};
use crate::exceptions::ConfigError;
use log::{trace, warn};
use std::fmt;
use std::fs::Metadata;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// A readable, rewindable content stream
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// Decides the mode recorded for each archive entry
pub trait PermissionPolicy: fmt::Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Mode for a directory whose host mode is `host_mode`
    fn directory_mode(&self, host_mode: u32) -> u32;

    /// Mode for a regular file. `content` must be left at the position it had on entry.
    fn file_mode(&self, path: &Path, host_mode: u32, content: &mut dyn ReadSeek) -> u32;
}

/// Copy the host's permission bits, capped at `0755`
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBits;

impl PermissionPolicy for NativeBits {
    fn name(&self) -> &'static str {
        "native"
    }

    fn directory_mode(&self, host_mode: u32) -> u32 {
        host_mode & MODE_MASK
    }

    fn file_mode(&self, _path: &Path, host_mode: u32, _content: &mut dyn ReadSeek) -> u32 {
        host_mode & MODE_MASK
    }
}

/// Infer executability from a shebang or ELF header
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHeuristic;

impl PermissionPolicy for ContentHeuristic {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn directory_mode(&self, _host_mode: u32) -> u32 {
        HEURISTIC_DIR_MODE
    }

    fn file_mode(&self, path: &Path, _host_mode: u32, content: &mut dyn ReadSeek) -> u32 {
        match looks_executable(content) {
            Ok(true) => {
                trace!("🔍 {} looks executable", path.display());
                HEURISTIC_FILE_MODE | EXECUTABLE_BITS
            }
            Ok(false) => HEURISTIC_FILE_MODE,
            Err(e) => {
                warn!("⚠️ reading magic bytes of {} failed: {}", path.display(), e);
                HEURISTIC_FILE_MODE
            }
        }
    }
}

/// Whether the next bytes of `content` start with `#!` or are the ELF magic.
///
/// Reads at most four bytes and seeks back to the starting position, even
/// when the read fails.
pub fn looks_executable(content: &mut dyn ReadSeek) -> io::Result<bool> {
    let start = content.stream_position()?;
    let mut magic = Vec::with_capacity(MAGIC_LEN as usize);
    let read = Read::take(&mut *content, MAGIC_LEN).read_to_end(&mut magic);
    let restored = content.seek(SeekFrom::Start(start));
    read?;
    restored?;

    Ok(magic.starts_with(SHEBANG) || magic[..] == ELF_MAGIC[..])
}

/// Whether the building filesystem can express an executable bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemCapability {
    ExecutableBits,
    NoExecutableBits,
}

impl FilesystemCapability {
    /// Capability of the filesystems this binary was built for
    pub fn host() -> Self {
        if cfg!(unix) {
            FilesystemCapability::ExecutableBits
        } else {
            FilesystemCapability::NoExecutableBits
        }
    }

    /// The policy matching this capability
    pub fn policy(self) -> Box<dyn PermissionPolicy> {
        match self {
            FilesystemCapability::ExecutableBits => Box::new(NativeBits),
            FilesystemCapability::NoExecutableBits => Box::new(ContentHeuristic),
        }
    }
}

/// Requested permission handling, from config or command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PermissionMode {
    /// Decide from the host filesystem's capability
    #[default]
    Auto,
    /// Always copy host bits
    Native,
    /// Always sniff file content
    Heuristic,
}

impl PermissionMode {
    pub fn capability(self) -> FilesystemCapability {
        match self {
            PermissionMode::Auto => FilesystemCapability::host(),
            PermissionMode::Native => FilesystemCapability::ExecutableBits,
            PermissionMode::Heuristic => FilesystemCapability::NoExecutableBits,
        }
    }

    pub fn policy(self) -> Box<dyn PermissionPolicy> {
        self.capability().policy()
    }
}

impl FromStr for PermissionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(PermissionMode::Auto),
            "native" => Ok(PermissionMode::Native),
            "heuristic" => Ok(PermissionMode::Heuristic),
            other => Err(ConfigError::InvalidValue {
                key: "permission_mode".to_string(),
                value: other.to_string(),
                message: "expected auto, native or heuristic".to_string(),
            }),
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PermissionMode::Auto => "auto",
            PermissionMode::Native => "native",
            PermissionMode::Heuristic => "heuristic",
        };
        f.write_str(name)
    }
}

/// Permission bits as the host reports them
#[cfg(unix)]
pub fn host_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

/// Permission bits as the host reports them
#[cfg(not(unix))]
pub fn host_mode(metadata: &Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn file_mode(policy: &dyn PermissionPolicy, host: u32, bytes: &[u8]) -> u32 {
        let mut content = Cursor::new(bytes.to_vec());
        policy.file_mode(Path::new("sample"), host, &mut content)
    }

    #[test]
    fn test_native_masks_host_bits() {
        assert_eq!(file_mode(&NativeBits, 0o4777, b"data"), 0o755);
        assert_eq!(file_mode(&NativeBits, 0o600, b"#!/bin/sh"), 0o600);
        assert_eq!(NativeBits.directory_mode(0o777), 0o755);
        assert_eq!(NativeBits.directory_mode(0o700), 0o700);
    }

    #[test]
    fn test_heuristic_detects_shebang_and_elf() {
        assert_eq!(
            file_mode(&ContentHeuristic, 0, b"#!/bin/sh\necho hi\n"),
            0o755
        );
        assert_eq!(
            file_mode(&ContentHeuristic, 0, b"\x7fELF\x02\x01\x01"),
            0o755
        );
        assert_eq!(file_mode(&ContentHeuristic, 0, b"#!"), 0o755);
    }

    #[test]
    fn test_heuristic_plain_files() {
        assert_eq!(file_mode(&ContentHeuristic, 0o777, b"import os\n"), 0o644);
        assert_eq!(file_mode(&ContentHeuristic, 0o777, b""), 0o644);
        assert_eq!(file_mode(&ContentHeuristic, 0o777, b"\x7fEL"), 0o644);
        assert_eq!(file_mode(&ContentHeuristic, 0o777, b" #!/bin/sh"), 0o644);
        assert_eq!(ContentHeuristic.directory_mode(0o700), 0o755);
    }

    #[test]
    fn test_magic_read_restores_position() {
        let mut content = Cursor::new(b"xx#!/bin/sh".to_vec());
        content.seek(SeekFrom::Start(2)).unwrap();

        assert!(looks_executable(&mut content).unwrap());
        assert_eq!(content.position(), 2);

        let mut rest = String::new();
        content.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "#!/bin/sh");
    }

    #[derive(Debug)]
    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device went away"))
        }
    }

    impl Seek for FailingReader {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_unreadable_magic_is_not_executable() {
        let mut content = FailingReader;
        assert!(looks_executable(&mut content).is_err());
        assert_eq!(
            ContentHeuristic.file_mode(Path::new("broken"), 0o755, &mut content),
            0o644
        );
    }

    #[test]
    fn test_mode_parsing_and_selection() {
        let parse = |s: &str| s.parse::<PermissionMode>().unwrap();
        assert_eq!(parse("Native"), PermissionMode::Native);
        assert_eq!(parse("heuristic"), PermissionMode::Heuristic);
        assert_eq!(parse(""), PermissionMode::Auto);
        assert!("sometimes".parse::<PermissionMode>().is_err());

        assert_eq!(PermissionMode::Native.policy().name(), "native");
        assert_eq!(PermissionMode::Heuristic.policy().name(), "heuristic");
        assert_eq!(
            PermissionMode::Auto.capability(),
            FilesystemCapability::host()
        );
    }
}
