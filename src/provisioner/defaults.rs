// Centralized default values for provisioner builds

// =================================
// Configuration defaults
// =================================
pub const DEFAULT_CONFIG_FILE: &str = "provisioner.ini";
pub const DEFAULT_OUTPUT_FILE: &str = "provisioner.sh";
pub const DEFAULT_CLOUD_DIR: &str = "/var/tmp/cloud-maker";
pub const DEFAULT_STAGE2_SCRIPT: &str = "main.sh";

// Config keys read from a system section
pub const KEY_STAGE2_DIR: &str = "stage2_dir";
pub const KEY_OUTPUT_FILE: &str = "output_file";
pub const KEY_GUEST_STAGE2_DIR: &str = "guest_stage2_dir";
pub const KEY_STAGE2_SCRIPT: &str = "stage2_script";
pub const KEY_PERMISSION_MODE: &str = "permission_mode";

// =================================
// Stub placeholders
// =================================
pub const PLACEHOLDER_CUT_LINE: &str = "CUT_LINE";
pub const PLACEHOLDER_CLOUD_DIR: &str = "CLOUD_DIR";
pub const PLACEHOLDER_RUNNER: &str = "RUNNER";

// =================================
// Archive permission defaults
// =================================
pub const MODE_MASK: u32 = 0o755; // Never record group/other write or setuid bits
pub const HEURISTIC_DIR_MODE: u32 = 0o755;
pub const HEURISTIC_FILE_MODE: u32 = 0o644;
pub const EXECUTABLE_BITS: u32 = 0o111;
pub const OUTPUT_MODE: u32 = 0o755; // The installer itself

// Content markers for heuristic executability
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";
pub const SHEBANG: &[u8; 2] = b"#!";
pub const MAGIC_LEN: u64 = 4;

// =================================
// Reproducibility
// =================================
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";
pub const SKIP_VERIFICATION_ENV: &str = "CLOUD_MAKER_SKIP_VERIFICATION";

// gzip stream magic, checked where the archive should start
pub const GZIP_MAGIC: &[u8; 2] = b"\x1f\x8b";
