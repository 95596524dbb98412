//! Installer assembly: stub bytes, then archive bytes, in one file
//!
//! The output is staged in a temporary file beside the destination and
//! renamed over it only once the archive has been copied in completely. A
//! failure at any step drops the staging file, so the destination keeps
//! whatever it held before (or stays absent).

use super::archive::{ArchivePacker, PackSummary};
use super::stub::{self, RenderedStub};
use crate::config::ProvisionerSettings;
use crate::exceptions::Result;
use log::{debug, info, trace};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

/// What an assembly produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub destination: PathBuf,
    pub cut_line: usize,
    pub stub_bytes: u64,
    pub archive_bytes: u64,
    pub summary: PackSummary,
}

/// Sequences stub rendering, packing and the final write
#[derive(Debug)]
pub struct InstallerAssembler<'a> {
    settings: &'a ProvisionerSettings,
    packer: &'a ArchivePacker,
}

impl<'a> InstallerAssembler<'a> {
    pub fn new(settings: &'a ProvisionerSettings, packer: &'a ArchivePacker) -> Self {
        InstallerAssembler { settings, packer }
    }

    /// Write the complete installer to a staging file beside `destination`.
    ///
    /// `destination` itself is not touched until [`StagedInstaller::persist`].
    pub fn stage(&self, destination: &Path) -> Result<StagedInstaller> {
        let timer = Instant::now();
        info!(
            "🔨 Assembling provisioner for [{}] into {}",
            self.settings.system,
            destination.display()
        );

        let stub = stub::render_stub(self.settings)?;
        debug!(
            "🧩 Rendered stub: {} bytes, payload at line {}",
            stub.text.len(),
            stub.cut_line
        );

        let mut staged = NamedTempFile::new_in(staging_dir(destination))?;
        trace!("📄 Staging output in {}", staged.path().display());
        staged.write_all(stub.as_bytes())?;

        let (mut archive, summary) = self.packer.pack_to_tempfile(&self.settings.stage2_dir)?;
        let archive_bytes = append_archive(staged.as_file_mut(), &stub, &mut archive)?;
        drop(archive);

        staged.as_file_mut().flush()?;
        staged.as_file().sync_all()?;
        mark_executable(staged.as_file())?;

        debug!(
            "📦 Staged {} stub + {} archive bytes in {:?}",
            stub.text.len(),
            archive_bytes,
            timer.elapsed()
        );
        Ok(StagedInstaller {
            staged,
            report: AssemblyReport {
                destination: destination.to_path_buf(),
                cut_line: stub.cut_line,
                stub_bytes: stub.text.len() as u64,
                archive_bytes,
                summary,
            },
        })
    }

    /// Build the installer and move it over `destination`
    pub fn assemble(&self, destination: &Path) -> Result<AssemblyReport> {
        self.stage(destination)?.persist()
    }
}

/// A finished installer that has not replaced its destination yet.
///
/// Dropping it deletes the staging file.
#[derive(Debug)]
pub struct StagedInstaller {
    staged: NamedTempFile,
    report: AssemblyReport,
}

impl StagedInstaller {
    /// Path of the staging file, readable like the final installer
    pub fn path(&self) -> &Path {
        self.staged.path()
    }

    pub fn report(&self) -> &AssemblyReport {
        &self.report
    }

    /// Atomically rename the staging file over the destination
    pub fn persist(self) -> Result<AssemblyReport> {
        let StagedInstaller { staged, report } = self;
        staged.persist(&report.destination)?;
        info!(
            "✅ Wrote {} ({} stub + {} archive bytes)",
            report.destination.display(),
            report.stub_bytes,
            report.archive_bytes
        );
        Ok(report)
    }
}

/// Build the installer at `destination` (see [`InstallerAssembler`])
pub fn assemble(
    settings: &ProvisionerSettings,
    packer: &ArchivePacker,
    destination: &Path,
) -> Result<AssemblyReport> {
    InstallerAssembler::new(settings, packer)
        .assemble(destination)
}

/// Copy `archive` from its start to the end of `out`, right after the stub
fn append_archive(out: &mut File, stub: &RenderedStub, archive: &mut File) -> Result<u64> {
    let archive_start = out.stream_position()?;
    debug_assert_eq!(archive_start, stub.text.len() as u64);

    archive.seek(SeekFrom::Start(0))?;
    let copied = io::copy(archive, out)?;
    debug!(
        "📍 Archive at offset {:#x}, {} bytes",
        archive_start, copied
    );
    Ok(copied)
}

/// Directory to stage in: same filesystem as `destination`, so the final rename is atomic
fn staging_dir(destination: &Path) -> &Path {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn mark_executable(file: &File) -> io::Result<()> {
    use super::defaults::OUTPUT_MODE;
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(OUTPUT_MODE))
}

#[cfg(not(unix))]
fn mark_executable(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigView, EnvDefaults};
    use crate::provisioner::archive::{ContentHeuristic, TimestampPolicy};
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::fs;
    use tar::Archive;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        settings: ProvisionerSettings,
    }

    /// `[web]` with `build/main.sh` (shebang) and `build/lib/helper.py`
    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(build.join("lib")).unwrap();
        fs::write(build.join("main.sh"), "#!/bin/sh\necho provisioned\n")
            .unwrap();
        fs::write(build.join("lib/helper.py"), "print('helper')\n")
            .unwrap();

        let ini = format!(
            "[web]\nstage2_dir = {}\noutput_file = out.sh\n",
            build.display()
        );
        let env = EnvDefaults {
            home: "/home/ci".into(),
            user: "ci".into(),
        };
        let view = ConfigView::parse(&ini, &env).unwrap();
        let section = view.resolve("web").unwrap();
        let settings = ProvisionerSettings::from_section(&section).unwrap();
        Fixture { dir, settings }
    }

    fn packer() -> ArchivePacker {
        ArchivePacker::new(
            Box::new(ContentHeuristic),
            TimestampPolicy::Fixed(1_600_000_000),
        )
    }

    /// Split an installer at the start of line `cut_line`
    fn split_at_line(bytes: &[u8], cut_line: usize) -> (&[u8], &[u8]) {
        let mut offset = 0;
        for _ in 1..cut_line {
            let newline = bytes[offset..].iter().position(|&b| b == b'\n').unwrap();
            offset += newline + 1;
        }
        bytes.split_at(offset)
    }

    fn modes(payload: &[u8]) -> BTreeMap<String, u32> {
        let mut archive = Archive::new(GzDecoder::new(payload));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let path = e.path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string();
                (path, e.header().mode().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_end_to_end_layout() {
        let fx = fixture();
        let out = fx.dir.path().join(&fx.settings.output_file);
        let report = assemble(&fx.settings, &packer(), &out).unwrap();

        let bytes = fs::read(&out).unwrap();
        let stub = stub::render_stub(&fx.settings).unwrap();
        let (head, payload) = split_at_line(&bytes, report.cut_line);

        assert_eq!(head, stub.as_bytes());
        assert_eq!(report.stub_bytes, head.len() as u64);
        assert_eq!(report.archive_bytes, payload.len() as u64);

        let modes = modes(payload);
        assert_eq!(modes["main.sh"] & 0o111, 0o111);
        assert_eq!(modes["lib/helper.py"] & 0o111, 0);
        assert!(modes.contains_key("lib"));
        assert_eq!(report.summary.files, 2);
    }

    #[test]
    fn test_payload_is_exact_archive_stream() {
        let fx = fixture();
        let out = fx.dir.path().join("out.sh");
        let report = assemble(&fx.settings, &packer(), &out).unwrap();

        let (expected, _) = packer().pack(&fx.settings.stage2_dir, Vec::new()).unwrap();
        let bytes = fs::read(&out).unwrap();
        let (_, payload) = split_at_line(&bytes, report.cut_line);
        assert_eq!(payload, &expected[..]);
    }

    #[test]
    fn test_assembly_is_idempotent() {
        let fx = fixture();
        let first = fx.dir.path().join("first.sh");
        let second = fx.dir.path().join("second.sh");
        assemble(&fx.settings, &packer(), &first).unwrap();
        assemble(&fx.settings, &packer(), &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_failed_pack_leaves_destination_untouched() {
        let mut fx = fixture();
        fx.settings.stage2_dir = fx.dir.path().join("does-not-exist");

        let fresh = fx.dir.path().join("fresh.sh");
        assert!(assemble(&fx.settings, &packer(), &fresh).is_err());
        assert!(!fresh.exists());

        let existing = fx.dir.path().join("existing.sh");
        fs::write(&existing, "previous build\n").unwrap();
        assert!(assemble(&fx.settings, &packer(), &existing).is_err());
        assert_eq!(fs::read_to_string(&existing).unwrap(), "previous build\n");

        let leftovers: Vec<_> = fs::read_dir(fx.dir.path())
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
    fn test_failed_render_creates_nothing() {
        let mut fx = fixture();
        fx.settings.guest_stage2_dir = "/tmp/two\nlines".to_string();

        let out = fx.dir.path().join("out.sh");
        let err = assemble(&fx.settings, &packer(), &out).unwrap_err();
        assert!(matches!(
            err,
            crate::exceptions::CloudMakerError::Template(_)
        ));
        assert!(!out.exists());
    }

    #[test]
    fn test_staging_dir_for_bare_file_name() {
        assert_eq!(staging_dir(Path::new("out.sh")), Path::new("."));
        assert_eq!(staging_dir(Path::new("dist/out.sh")), Path::new("dist"));
    }

    #[test]
    fn test_staged_installer_leaves_destination_alone() {
        let fx = fixture();
        let out = fx.dir.path().join("out.sh");
        let packer = packer();
        let assembler = InstallerAssembler::new(&fx.settings, &packer);

        let staged = assembler.stage(&out).unwrap();
        assert!(staged.path().exists());
        assert!(!out.exists());
        let staging_path = staged.path().to_path_buf();
        drop(staged);
        assert!(!staging_path.exists());
        assert!(!out.exists());

        let report = assembler.stage(&out).unwrap().persist().unwrap();
        assert_eq!(report.destination, out);
        assert!(out.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_installer_runs_under_sh() {
        use std::process::Command;

        let fx = fixture();
        let build = &fx.settings.stage2_dir;
        fs::write(
            build.join("main.sh"),
            "#!/bin/sh\necho \"ran-$1\"\ncat lib/helper.py\n",
        )
        .unwrap();

        let guest = fx.dir.path().join("guest dir/it's here");
        let mut settings = fx.settings.clone();
        settings.guest_stage2_dir = guest.to_string_lossy().into_owned();

        let out = fx.dir.path().join("out.sh");
        assemble(&settings, &packer(), &out).unwrap();

        let output = Command::new("sh").arg(&out).arg("X").output().unwrap();
        assert!(
            output.status.success(),
            "installer failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        assert_eq!(
            String::from_utf8(output.stdout).unwrap(),
            "ran-X\nprint('helper')\n"
        );
        assert_eq!(
            fs::read_to_string(guest.join("lib/helper.py")).unwrap(),
            "print('helper')\n"
        );
        assert!(guest.join("main.sh").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        let out = fx.dir.path().join("out.sh");
        assemble(&fx.settings, &packer(), &out).unwrap();
        let mode = fs::metadata(&out).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }
}
