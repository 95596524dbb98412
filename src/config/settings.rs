//! Typed view of a resolved system section

use super::{ConfigSection, first_of};
use crate::exceptions::ConfigError;
use crate::provisioner::archive::PermissionMode;
use crate::provisioner::defaults::{
    DEFAULT_CLOUD_DIR, DEFAULT_OUTPUT_FILE, DEFAULT_STAGE2_SCRIPT, KEY_GUEST_STAGE2_DIR,
    KEY_OUTPUT_FILE, KEY_PERMISSION_MODE, KEY_STAGE2_DIR, KEY_STAGE2_SCRIPT,
};
use std::path::PathBuf;

/// Everything a provisioner build needs from the config, read once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerSettings {
    /// System (section) name
    pub system: String,
    /// Local payload directory to pack
    pub stage2_dir: PathBuf,
    /// Where to write the installer unless overridden on the command line
    pub output_file: PathBuf,
    /// Directory the guest unpacks into
    pub guest_stage2_dir: String,
    /// Entry point, relative to `guest_stage2_dir`
    pub stage2_script: String,
    pub permission_mode: PermissionMode,
}

impl ProvisionerSettings {
    pub fn from_section(section: &ConfigSection) -> Result<Self, ConfigError> {
        let stage2_dir = section.require(KEY_STAGE2_DIR)?;
        if stage2_dir.trim().is_empty() {
            return Err(invalid(KEY_STAGE2_DIR, stage2_dir, "must name a directory"));
        }

        let stage2_script = first_of(section, &[KEY_STAGE2_SCRIPT], DEFAULT_STAGE2_SCRIPT);
        if stage2_script.is_empty() {
            return Err(invalid(
                KEY_STAGE2_SCRIPT,
                stage2_script,
                "must name a script",
            ));
        }

        let permission_mode = section
            .get(KEY_PERMISSION_MODE)
            .map(str::parse::<PermissionMode>)
            .transpose()?
            .unwrap_or_default();

        Ok(ProvisionerSettings {
            system: section.name().to_string(),
            stage2_dir: PathBuf::from(stage2_dir),
            output_file: PathBuf::from(first_of(section, &[KEY_OUTPUT_FILE], DEFAULT_OUTPUT_FILE)),
            guest_stage2_dir: first_of(section, &[KEY_GUEST_STAGE2_DIR], DEFAULT_CLOUD_DIR)
                .to_string(),
            stage2_script: stage2_script.to_string(),
            permission_mode,
        })
    }
}

fn invalid(key: &str, value: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}
