//! Standard exit codes for the cloud-maker binary
//!
//! Every error class gets its own code so wrapper scripts can tell a bad
//! config apart from an unreadable payload without parsing stderr.

use crate::exceptions::CloudMakerError;

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Invalid command-line arguments (clap's own usage errors also exit 2)
pub const EXIT_INVALID_ARGS: i32 = 2;

/// Panic or unrecoverable error
pub const EXIT_PANIC: i32 = 101;

/// Configuration error (missing section, missing key, bad syntax)
pub const EXIT_CONFIG_ERROR: i32 = 109;

/// Stub template error (unresolved placeholder, multi-line value)
pub const EXIT_TEMPLATE_ERROR: i32 = 111;

/// Payload archive error (unreadable file, disallowed path)
pub const EXIT_ARCHIVE_ERROR: i32 = 112;

/// I/O error (destination or temporary storage)
pub const EXIT_IO_ERROR: i32 = 106;

/// A built or inspected installer is malformed
pub const EXIT_VERIFICATION_ERROR: i32 = 113;

/// Map an error to the exit code reported by the binary
pub fn exit_code_for(err: &CloudMakerError) -> i32 {
    match err {
        CloudMakerError::Config(_) => EXIT_CONFIG_ERROR,
        CloudMakerError::Template(_) => EXIT_TEMPLATE_ERROR,
        CloudMakerError::Archive(_) => EXIT_ARCHIVE_ERROR,
        CloudMakerError::IoError(_) => EXIT_IO_ERROR,
        CloudMakerError::VerificationFailed(_) => EXIT_VERIFICATION_ERROR,
    }
}
