//! Error types for cloud-maker

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Configuration errors (reading, parsing, resolving a system section)
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    Read { path: PathBuf, source: io::Error },

    /// Malformed ini syntax
    Parse { line: usize, message: String },

    /// The requested system has no section
    SectionNotFound(String),

    /// A required key is absent from the resolved section
    MissingKey { section: String, key: String },

    /// A `%(name)s` reference could not be expanded
    Interpolation { key: String, message: String },

    /// A key holds a value outside its accepted set
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read config file {}: {source}", path.display())
            }
            ConfigError::Parse { line, message } => write!(f, "config line {line}: {message}"),
            ConfigError::SectionNotFound(name) => write!(f, "no section [{name}] in config"),
            ConfigError::MissingKey { section, key } => {
                write!(f, "section [{section}] is missing required key '{key}'")
            }
            ConfigError::Interpolation { key, message } => {
                write!(f, "cannot interpolate '{key}': {message}")
            }
            ConfigError::InvalidValue {
                key,
                value,
                message,
            } => write!(f, "invalid value '{value}' for '{key}': {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Stub template rendering errors
#[derive(Debug, PartialEq, Eq)]
pub enum TemplateError {
    /// The template names a placeholder with no value
    UnresolvedPlaceholder(String),

    /// A substituted value would add lines to the stub
    MultilineValue(String),

    /// The last stub line would run into the archive bytes
    MissingTrailingNewline,

    /// Rendered text does not have `CUT_LINE - 1` lines
    LineCountMismatch { expected: usize, actual: usize },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnresolvedPlaceholder(name) => {
                write!(f, "template placeholder {{{name}}} has no value")
            }
            TemplateError::MultilineValue(name) => {
                write!(f, "value for {{{name}}} contains a line break")
            }
            TemplateError::MissingTrailingNewline => {
                write!(f, "template does not end with a newline")
            }
            TemplateError::LineCountMismatch { expected, actual } => write!(
                f,
                "rendered stub has {actual} lines, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Payload archive errors
#[derive(Debug)]
pub enum ArchiveError {
    /// Directory walk or stat failed for an entry
    Stat { path: PathBuf, source: io::Error },

    /// A payload file could not be opened for reading
    Open { path: PathBuf, source: io::Error },

    /// A path that cannot be stored relative to the payload root
    DisallowedPath(PathBuf),

    /// Not a regular file, directory or symlink (FIFO, socket, device)
    UnsupportedFileType(PathBuf),

    /// Writing the compressed stream failed
    Write(io::Error),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Stat { path, source } => {
                write!(f, "cannot stat {}: {source}", path.display())
            }
            ArchiveError::Open { path, source } => {
                write!(f, "cannot open {}: {source}", path.display())
            }
            ArchiveError::DisallowedPath(path) => {
                write!(f, "path not allowed in archive: {}", path.display())
            }
            ArchiveError::UnsupportedFileType(path) => {
                write!(f, "unsupported file type: {}", path.display())
            }
            ArchiveError::Write(err) => write!(f, "archive write failed: {err}"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Stat { source, .. } | ArchiveError::Open { source, .. } => Some(source),
            ArchiveError::Write(err) => Some(err),
            ArchiveError::DisallowedPath(_) | ArchiveError::UnsupportedFileType(_) => None,
        }
    }
}

/// Main error type for cloud-maker operations
#[derive(Debug)]
pub enum CloudMakerError {
    /// Configuration error
    Config(ConfigError),

    /// Stub template error
    Template(TemplateError),

    /// Payload archive error
    Archive(ArchiveError),

    /// IO error on the destination or temporary storage
    IoError(io::Error),

    /// A built installer does not match what was packed
    VerificationFailed(String),
}

impl fmt::Display for CloudMakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudMakerError::Config(err) => write!(f, "Config error: {err}"),
            CloudMakerError::Template(err) => write!(f, "Template error: {err}"),
            CloudMakerError::Archive(err) => write!(f, "Archive error: {err}"),
            CloudMakerError::IoError(err) => write!(f, "IO error: {err}"),
            CloudMakerError::VerificationFailed(msg) => write!(f, "Verification failed: {msg}"),
        }
    }
}

impl std::error::Error for CloudMakerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CloudMakerError::Config(err) => Some(err),
            CloudMakerError::Template(err) => Some(err),
            CloudMakerError::Archive(err) => Some(err),
            CloudMakerError::IoError(err) => Some(err),
            CloudMakerError::VerificationFailed(_) => None,
        }
    }
}

impl From<io::Error> for CloudMakerError {
    fn from(err: io::Error) -> Self {
        CloudMakerError::IoError(err)
    }
}

impl From<ConfigError> for CloudMakerError {
    fn from(err: ConfigError) -> Self {
        CloudMakerError::Config(err)
    }
}

impl From<TemplateError> for CloudMakerError {
    fn from(err: TemplateError) -> Self {
        CloudMakerError::Template(err)
    }
}

impl From<ArchiveError> for CloudMakerError {
    fn from(err: ArchiveError) -> Self {
        CloudMakerError::Archive(err)
    }
}

impl From<tempfile::PersistError> for CloudMakerError {
    fn from(err: tempfile::PersistError) -> Self {
        CloudMakerError::IoError(err.error)
    }
}

/// Result type for cloud-maker operations
pub type Result<T> = std::result::Result<T, CloudMakerError>;
