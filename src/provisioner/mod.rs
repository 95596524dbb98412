//! Self-extracting provisioner installers
//!
//! An installer is a POSIX shell stub followed directly by a gzip-compressed
//! tar archive of the stage2 directory. Running it unpacks the archive into
//! the guest directory and execs the stage2 script from there.

pub mod archive;
pub mod assembler;
pub mod defaults;
pub mod inspect;
pub mod stub;

pub use archive::{ArchivePacker, PackSummary, PermissionMode, TimestampPolicy};
pub use assembler::{AssemblyReport, InstallerAssembler, StagedInstaller, assemble};
pub use inspect::{InstallerInfo, PayloadEntry, inspect};
pub use stub::{RenderedStub, render_stub};
