//! High-level API for cloud-maker operations

use crate::config::{ConfigView, EnvDefaults, ProvisionerSettings};
use crate::exceptions::{CloudMakerError, ConfigError, Result};
use crate::provisioner::defaults::SKIP_VERIFICATION_ENV;
use crate::provisioner::{
    ArchivePacker, AssemblyReport, InstallerAssembler, InstallerInfo, PermissionMode,
    StagedInstaller, TimestampPolicy, inspect,
};
use crate::utils::is_env_true;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Options for building a provisioner
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Output path, overriding the system's `output_file`
    pub output: Option<PathBuf>,
    /// Permission mode, overriding the system's `permission_mode`
    pub permission_mode: Option<PermissionMode>,
    /// Timestamp policy; `SOURCE_DATE_EPOCH` decides when unset
    pub timestamps: Option<TimestampPolicy>,
    /// Skip reading the installer back after building
    pub skip_verification: bool,
}

/// Build the provisioner for `system` described by the config at `config_path`
pub fn build_provisioner(
    config_path: &Path,
    system: &str,
    options: BuildOptions,
) -> Result<AssemblyReport> {
    let view = ConfigView::load(config_path, &EnvDefaults::from_env())?;
    let section = match view.resolve(system) {
        Ok(section) => section,
        Err(err @ ConfigError::SectionNotFound(_)) => {
            let known: Vec<&str> = view.systems().collect();
            let known = if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            };
            warn!(
                "⚠️ No [{}] in {}; defined systems: {}",
                system,
                config_path.display(),
                known
            );
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    let settings = ProvisionerSettings::from_section(&section)?;

    let destination = options
        .output
        .clone()
        .unwrap_or_else(|| settings.output_file.clone());
    let mode = options.permission_mode.unwrap_or(settings.permission_mode);
    let timestamps = options.timestamps.unwrap_or_else(TimestampPolicy::from_env);
    let packer = ArchivePacker::new(mode.policy(), timestamps);
    debug!(
        "🔧 Permission mode {} ({}), timestamps {:?}",
        mode,
        packer.policy().name(),
        timestamps
    );

    let staged = InstallerAssembler::new(&settings, &packer)
        .stage(&destination)?;
    let verify = !(options.skip_verification || is_env_true(SKIP_VERIFICATION_ENV));
    persist_verified(staged, verify)
}

/// Check a staged installer, then move it into place.
///
/// A staged installer that fails verification is dropped, so the
/// destination keeps its previous content.
fn persist_verified(staged: StagedInstaller, verify: bool) -> Result<AssemblyReport> {
    if verify {
        verify_installer(staged.path(), staged.report())?;
    } else {
        warn!(
            "⚠️ Skipping verification of {}",
            staged.report().destination.display()
        );
    }
    staged.persist()
}

/// Read the installer at `path` back and check it against `report`
fn verify_installer(path: &Path, report: &AssemblyReport) -> Result<()> {
    let info = inspect(path)?;
    if info.cut_line != report.cut_line {
        return Err(CloudMakerError::VerificationFailed(format!(
            "stub declares CUT_LINE={} but the payload starts at line {}",
            info.cut_line, report.cut_line
        )));
    }
    if info.archive_bytes != report.archive_bytes {
        return Err(CloudMakerError::VerificationFailed(format!(
            "payload is {} bytes, expected {}",
            info.archive_bytes, report.archive_bytes
        )));
    }
    if info.entries.len() != report.summary.entries() {
        return Err(CloudMakerError::VerificationFailed(format!(
            "payload lists {} entries, packed {}",
            info.entries.len(),
            report.summary.entries()
        )));
    }
    info!(
        "🔍 Verified {} ({} entries, sha256 {})",
        report.destination.display(),
        info.entries.len(),
        info.archive_sha256
    );
    Ok(())
}

/// Inspect an installer
pub fn inspect_provisioner(path: &Path) -> Result<InstallerInfo> {
    inspect(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_project(dir: &TempDir) -> PathBuf {
        let build = dir.path().join("build");
        fs::create_dir_all(build.join("conf")).unwrap();
        fs::write(build.join("main.sh"), "#!/bin/sh\necho ok\n")
            .unwrap();
        fs::write(build.join("conf/app.ini"), "[app]\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let executable = fs::Permissions::from_mode(0o755);
            fs::set_permissions(build.join("main.sh"), executable)
                .unwrap();
        }

        let config = dir.path().join("provisioner.ini");
        fs::write(
            &config,
            format!(
                "[DEFAULT]\nroot = {}\n\n[web]\nstage2_dir = %(root)s/build\noutput_file = %(root)s/web.sh\n",
                dir.path().display()
            ),
        )
        .unwrap();
        config
    }

    fn fixed() -> BuildOptions {
        BuildOptions {
            timestamps: Some(TimestampPolicy::Fixed(0)),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_uses_configured_output() {
        let dir = TempDir::new().unwrap();
        let config = write_project(&dir);

        let report = build_provisioner(&config, "web", fixed()).unwrap();
        assert_eq!(report.destination, dir.path().join("web.sh"));
        assert_eq!(report.summary.files, 2);

        let info = inspect_provisioner(&report.destination).unwrap();
        assert_eq!(info.cut_line, report.cut_line);
        let main = info.entries.iter().find(|e| e.path == "main.sh").unwrap();
        assert!(main.is_executable());
    }

    #[test]
    fn test_output_override() {
        let dir = TempDir::new().unwrap();
        let config = write_project(&dir);
        let output = dir.path().join("custom.sh");

        let options = BuildOptions {
            output: Some(output.clone()),
            permission_mode: Some(PermissionMode::Heuristic),
            ..fixed()
        };
        let report = build_provisioner(&config, "web", options).unwrap();
        assert_eq!(report.destination, output);
        assert!(output.exists());
        assert!(!dir.path().join("web.sh").exists());
    }

    #[test]
    fn test_missing_system_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let config = write_project(&dir);

        let err = build_provisioner(&config, "db", fixed()).unwrap_err();
        assert!(matches!(
            err,
            CloudMakerError::Config(ConfigError::SectionNotFound(ref name)) if name == "db"
        ));
        assert!(!dir.path().join("web.sh").exists());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.ini");
        let err = build_provisioner(&missing, "web", fixed()).unwrap_err();
        assert!(matches!(
            err,
            CloudMakerError::Config(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_failed_verification_keeps_previous_installer() {
        let dir = TempDir::new().unwrap();
        let config = write_project(&dir);
        let destination = dir.path().join("web.sh");
        fs::write(&destination, "previous build\n").unwrap();

        let view = ConfigView::load(&config, &EnvDefaults::from_env()).unwrap();
        let section = view.resolve("web").unwrap();
        let settings = ProvisionerSettings::from_section(&section).unwrap();
        let policy = PermissionMode::Heuristic.policy();
        let packer = ArchivePacker::new(policy, TimestampPolicy::Fixed(0));
        let staged = InstallerAssembler::new(&settings, &packer)
            .stage(&destination)
            .unwrap();
        // truncate the payload so the read-back cannot match
        fs::write(staged.path(), "#!/bin/sh\nCUT_LINE=3\n").unwrap();

        let err = persist_verified(staged, true).unwrap_err();
        assert!(matches!(err, CloudMakerError::VerificationFailed(_)));
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "previous build\n"
        );

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|name| name.to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(
            leftovers.is_empty(),
            "staging files left behind: {leftovers:?}"
        );
    }

    #[test]
    fn test_inspect_rejects_plain_script() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.sh");
        fs::write(&path, "#!/bin/sh\necho hi\n").unwrap();
        assert!(inspect_provisioner(&path).is_err());
    }
}
