// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Build the preserved configuration archive embedded in upgrades.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! The archive is a tar.gz bundle written into the target slot through the
//! journal-preserving flash write and extracted by the firmware's own hook
//! on first boot. It always carries the rollback installer script; it
//! optionally carries the confirm-timeout marker and a configuration set
//! (an explicit allow-list, or a caller-supplied archive).

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::SafeUpgradeError;
use crate::rollback;

/// Where the finished payload lands before flashing.
pub const ARCHIVE_PATH: &str = "/tmp/safe-upgrade-backup.tar.gz";
/// Working area; recreated for every build, removed best-effort after.
const STAGING_DIR: &str = "/tmp/safe-upgrade-preserve";

/// Configuration carried across an upgrade when the caller supplies no
/// archive of their own.
pub const DEFAULT_PRESERVED: &[&str] = &[
    "/etc/config/network",
    "/etc/config/wireless",
    "/etc/config/system",
    "/etc/dropbear",
    "/etc/passwd",
    "/etc/shadow",
];

/// What goes into the archive besides the installer script.
#[derive(Debug, Clone)]
pub struct ArchiveSpec {
    /// Leave the confirm-timeout marker out entirely.
    pub disable_reboot_safety: bool,
    /// Confirmation window in seconds (already floor-checked upstream).
    pub reboot_safety_timeout: u64,
    /// Caller-supplied configuration archive to embed instead of the
    /// allow-list. A missing file falls back to the allow-list.
    pub preserve_archive: Option<PathBuf>,
}

/// Builds the preserved archive into configurable paths; production uses
/// the fixed `/tmp` locations.
#[derive(Debug)]
pub struct ArchiveBuilder {
    staging: PathBuf,
    output: PathBuf,
}

impl ArchiveBuilder {
    /// Builder over the fixed production paths.
    #[must_use]
    pub fn new() -> Self {
        ArchiveBuilder {
            staging: PathBuf::from(STAGING_DIR),
            output: PathBuf::from(ARCHIVE_PATH),
        }
    }

    /// Builder over explicit paths (tests).
    #[must_use]
    pub fn with_paths(staging: PathBuf, output: PathBuf) -> Self {
        ArchiveBuilder { staging, output }
    }

    /// Assemble the archive and return its path.
    pub fn build(&self, spec: &ArchiveSpec) -> Result<PathBuf, SafeUpgradeError> {
        if self.staging.exists() {
            fs::remove_dir_all(&self.staging)?;
        }
        fs::create_dir_all(&self.staging)?;

        self.stage_installer()?;
        if spec.disable_reboot_safety {
            info!("reboot safety disabled; no confirm-timeout marker embedded");
        } else {
            self.stage_timeout_marker(spec.reboot_safety_timeout)?;
        }
        self.stage_config(spec)?;

        let staging_arg = self.staging.to_string_lossy().into_owned();
        let output_arg = self.output.to_string_lossy().into_owned();
        crate::exec::run_checked("tar", &["-czf", &output_arg, "-C", &staging_arg, "."])?;
        self.log_contents(&output_arg);

        // Working area is disposable; a failed cleanup is not worth failing
        // an otherwise complete archive.
        if let Err(err) = fs::remove_dir_all(&self.staging) {
            warn!("could not remove staging dir: {err}");
        }
        Ok(self.output.clone())
    }

    fn stage_installer(&self) -> Result<(), SafeUpgradeError> {
        let dest = self.staging.join(rollback::INSTALLER_REL_PATH);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, rollback::installer_script())?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    fn stage_timeout_marker(&self, timeout_secs: u64) -> Result<(), SafeUpgradeError> {
        let rel = rollback::CONFIRM_TIMEOUT_FILE.trim_start_matches('/');
        let dest = self.staging.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, format!("{timeout_secs}\n"))?;
        Ok(())
    }

    fn stage_config(&self, spec: &ArchiveSpec) -> Result<(), SafeUpgradeError> {
        if let Some(caller) = &spec.preserve_archive {
            if caller.is_file() {
                let caller_arg = caller.to_string_lossy().into_owned();
                let staging_arg = self.staging.to_string_lossy().into_owned();
                crate::exec::run_checked("tar", &["-xzf", &caller_arg, "-C", &staging_arg])?;
                return Ok(());
            }
            warn!(
                "preserve archive {} not found, falling back to default config set",
                caller.display()
            );
        }
        for path in DEFAULT_PRESERVED {
            let source = Path::new(path);
            if !source.exists() {
                continue;
            }
            let rel = path.trim_start_matches('/');
            let dest = self.staging.join(rel);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let dest_parent = dest
                .parent()
                .unwrap_or(&self.staging)
                .to_string_lossy()
                .into_owned();
            // cp -a keeps ownership and modes of the preserved config.
            if let Err(err) = crate::exec::run_checked("cp", &["-a", path, &dest_parent]) {
                warn!("could not preserve {path}: {err}");
            }
        }
        Ok(())
    }

    fn log_contents(&self, output_arg: &str) {
        match crate::exec::run_capture("tar", &["-tzf", output_arg]) {
            Ok(listing) if listing.status.success() => {
                let names = String::from_utf8_lossy(&listing.stdout);
                for name in names.lines().filter(|line| !line.ends_with('/')) {
                    info!("preserving {name}");
                }
            }
            _ => warn!("could not list archive contents"),
        }
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        ArchiveBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn list(output: &Path) -> Vec<String> {
        let output_arg = output.to_string_lossy().into_owned();
        let listing = crate::exec::run_capture("tar", &["-tzf", &output_arg]).unwrap();
        assert!(listing.status.success());
        String::from_utf8_lossy(&listing.stdout)
            .lines()
            .map(|line| line.trim_start_matches("./").to_string())
            .collect()
    }

    fn spec(disable: bool) -> ArchiveSpec {
        ArchiveSpec {
            disable_reboot_safety: disable,
            reboot_safety_timeout: 600,
            preserve_archive: None,
        }
    }

    #[test]
    fn archive_carries_installer_and_timeout_marker() {
        let dir = tempdir().unwrap();
        let builder = ArchiveBuilder::with_paths(
            dir.path().join("staging"),
            dir.path().join("backup.tar.gz"),
        );
        let output = builder.build(&spec(false)).unwrap();
        let names = list(&output);
        assert!(names.iter().any(|n| n == rollback::INSTALLER_REL_PATH));
        assert!(names
            .iter()
            .any(|n| n == rollback::CONFIRM_TIMEOUT_FILE.trim_start_matches('/')));
    }

    #[test]
    fn disabled_safety_omits_timeout_marker() {
        let dir = tempdir().unwrap();
        let builder = ArchiveBuilder::with_paths(
            dir.path().join("staging"),
            dir.path().join("backup.tar.gz"),
        );
        let output = builder.build(&spec(true)).unwrap();
        let names = list(&output);
        assert!(names.iter().any(|n| n == rollback::INSTALLER_REL_PATH));
        assert!(!names
            .iter()
            .any(|n| n == rollback::CONFIRM_TIMEOUT_FILE.trim_start_matches('/')));
    }

    #[test]
    fn missing_caller_archive_falls_back() {
        let dir = tempdir().unwrap();
        let builder = ArchiveBuilder::with_paths(
            dir.path().join("staging"),
            dir.path().join("backup.tar.gz"),
        );
        let mut archive_spec = spec(false);
        archive_spec.preserve_archive = Some(dir.path().join("nope.tar.gz"));
        let output = builder.build(&archive_spec).unwrap();
        assert!(output.is_file());
    }

    #[test]
    fn caller_archive_is_embedded() {
        let dir = tempdir().unwrap();
        // Build a tiny caller archive with one config file.
        let source = dir.path().join("src");
        fs::create_dir_all(source.join("etc")).unwrap();
        fs::write(source.join("etc/custom.conf"), "x=1\n").unwrap();
        let caller = dir.path().join("caller.tar.gz");
        crate::exec::run_checked(
            "tar",
            &[
                "-czf",
                &caller.to_string_lossy(),
                "-C",
                &source.to_string_lossy(),
                ".",
            ],
        )
        .unwrap();

        let builder = ArchiveBuilder::with_paths(
            dir.path().join("staging"),
            dir.path().join("backup.tar.gz"),
        );
        let mut archive_spec = spec(false);
        archive_spec.preserve_archive = Some(caller);
        let output = builder.build(&archive_spec).unwrap();
        let names = list(&output);
        assert!(names.iter().any(|n| n == "etc/custom.conf"));
        assert!(names.iter().any(|n| n == rollback::INSTALLER_REL_PATH));
    }
}
