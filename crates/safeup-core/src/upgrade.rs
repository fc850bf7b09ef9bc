// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Safe-upgrade state machine over the injected device seams.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! The orchestrator owns the ordered effects that keep the device bootable
//! through any interruption: during `bootstrap` the global `bootcmd` is
//! written only after every key it depends on is durable, and during
//! `upgrade` the `testing_part` mark is written only after the target slot
//! holds a complete image. A crash after any prefix of either sequence
//! leaves the previous boot path intact.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::archive::ArchiveSpec;
use crate::bootscript;
use crate::env::{self, EnvStore};
use crate::error::SafeUpgradeError;
use crate::firmware::{self, Introspect};
use crate::flash::FlashControl;
use crate::host::HostOps;
use crate::partition::{self, PartitionSet, Slot};
use crate::probe::{self, SystemProbe};
use crate::rollback;

/// Value of the install marker written at bootstrap.
pub const SU_VERSION: &str = "1.0";

/// Flags of the `upgrade` verb.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Flash even when firmware metadata is missing or mismatched.
    pub force: bool,
    /// Skip the final reboot.
    pub no_reboot: bool,
    /// Omit the confirm-timeout marker from the archive.
    pub disable_reboot_safety: bool,
    /// Confirmation window in seconds; floor 60.
    pub reboot_safety_timeout: u64,
    /// Caller-supplied configuration archive to preserve.
    pub preserve_archive: Option<PathBuf>,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        UpgradeOptions {
            force: false,
            no_reboot: false,
            disable_reboot_safety: false,
            reboot_safety_timeout: rollback::DEFAULT_TIMEOUT_SECS,
            preserve_archive: None,
        }
    }
}

/// Resolver snapshot reported by the `show` verb.
#[derive(Debug)]
pub struct StatusReport {
    /// Running board identity.
    pub board: String,
    /// Whether the board is in the supported list.
    pub supported: bool,
    /// Install marker value, when bootstrapped.
    pub version: Option<String>,
    /// Slot roles; `None` before bootstrap.
    pub partitions: Option<PartitionSet>,
    /// Seconds before a pending forced reboot, or the `-1` sentinel.
    pub confirm_remaining: i64,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "board:             {} ({})",
            self.board,
            if self.supported { "supported" } else { "not supported" }
        )?;
        match &self.version {
            Some(version) => writeln!(f, "safe-upgrade:      installed (version {version})")?,
            None => writeln!(f, "safe-upgrade:      not installed")?,
        }
        if let Some(parts) = &self.partitions {
            writeln!(f, "current partition: {}", parts.current)?;
            writeln!(f, "other partition:   {}", parts.other)?;
            writeln!(f, "stable partition:  {}", parts.stable)?;
            match parts.testing {
                Some(slot) => writeln!(f, "testing partition: {slot}")?,
                None => writeln!(f, "testing partition: none")?,
            }
        }
        if self.confirm_remaining >= 0 {
            writeln!(f, "confirm window:    {}s remaining", self.confirm_remaining)?;
        } else {
            writeln!(f, "confirm window:    none pending")?;
        }
        Ok(())
    }
}

/// The upgrade state machine. Every collaborator arrives by reference so a
/// single foreground invocation is the only writer; the store itself offers
/// no multi-key atomicity (see [`env::EnvStore`]).
#[derive(Debug)]
pub struct Orchestrator<'a, E, F, P, H, I>
where
    E: EnvStore,
    F: FlashControl,
    P: SystemProbe,
    H: HostOps,
    I: Introspect,
{
    env: &'a mut E,
    flash: &'a mut F,
    probe: &'a P,
    host: &'a mut H,
    introspect: &'a I,
}

impl<'a, E, F, P, H, I> Orchestrator<'a, E, F, P, H, I>
where
    E: EnvStore,
    F: FlashControl,
    P: SystemProbe,
    H: HostOps,
    I: Introspect,
{
    /// Wire up the orchestrator.
    pub fn new(
        env: &'a mut E,
        flash: &'a mut F,
        probe: &'a P,
        host: &'a mut H,
        introspect: &'a I,
    ) -> Self {
        Orchestrator {
            env,
            flash,
            probe,
            host,
            introspect,
        }
    }

    /// Install the dual-boot mechanism on a freshly flashed device.
    ///
    /// Only supported while running from slot 1; installing from slot 2 is
    /// a known limitation of the boot layout, rejected rather than worked
    /// around. The global `bootcmd` is written last: it is the single key
    /// that makes the mechanism live, and everything it references must be
    /// durable first.
    pub fn bootstrap(&mut self, force: bool) -> Result<(), SafeUpgradeError> {
        if partition::is_installed(&*self.env)? {
            if !force {
                return Err(SafeUpgradeError::AlreadyInstalled);
            }
            warn!("already installed, redoing bootstrap");
        }
        let current = partition::current_slot(self.probe)?;
        if current != Slot::One {
            return Err(SafeUpgradeError::InstallFromWrongPartition(current.index()));
        }
        // Captured, not recomputed: a later cmdline change must not alter
        // what the already-written slot boots with.
        let cmdline = self.probe.kernel_cmdline()?;

        self.env.set(env::KEY_STABLE, "1")?;
        self.env.set(env::KEY_TESTING, "0")?;
        self.env.set(env::KEY_FW1_ADDR, bootscript::FW1_ADDR)?;
        self.env.set(env::KEY_FW2_ADDR, bootscript::FW2_ADDR)?;
        self.env.set(
            &env::boot_key(Slot::One),
            &bootscript::boot_command(Slot::One, &cmdline),
        )?;
        self.env.set(env::KEY_VERSION, SU_VERSION)?;
        self.env
            .set(env::KEY_BOOTCMD, &bootscript::boot_dispatcher())?;
        info!("safe-upgrade {SU_VERSION} bootstrapped on partition 1");
        Ok(())
    }

    /// Flash a new firmware into the inactive slot and mark it for a single
    /// test boot. The stable slot is never touched; `testing_part` flips
    /// only after the write completed.
    pub fn upgrade(
        &mut self,
        image: &Path,
        opts: &UpgradeOptions,
    ) -> Result<(), SafeUpgradeError> {
        if !partition::is_installed(&*self.env)? {
            return Err(SafeUpgradeError::NotInstalled);
        }
        if opts.reboot_safety_timeout < rollback::MIN_TIMEOUT_SECS {
            return Err(SafeUpgradeError::TimeoutBelowFloor(opts.reboot_safety_timeout));
        }
        let parts = partition::partitions(&*self.env, self.probe)?;
        if opts.force {
            warn!("--force given, skipping firmware validation");
        } else {
            let board = self.probe.board_name()?;
            firmware::verify(self.introspect, image, &board)?;
        }

        let spec = ArchiveSpec {
            disable_reboot_safety: opts.disable_reboot_safety,
            reboot_safety_timeout: opts.reboot_safety_timeout,
            preserve_archive: opts.preserve_archive.clone(),
        };
        let archive = self.host.build_preserved_archive(&spec)?;
        // Coarse net for the window between flashing and the installed
        // watcher becoming active on the next boot.
        self.host
            .arm_deferred_reboot(rollback::FALLBACK_REBOOT_SECS)?;

        self.flash.erase(parts.other)?;
        self.flash.write_preserving(parts.other, image, &archive)?;

        let cmdline = self.probe.kernel_cmdline()?;
        self.env.set(
            &env::boot_key(parts.other),
            &bootscript::boot_command(parts.other, &cmdline),
        )?;
        self.env
            .set(env::KEY_TESTING, &parts.other.index().to_string())?;
        info!("partition {} written and marked for test boot", parts.other);

        if opts.no_reboot {
            info!("reboot skipped; boot partition {} manually", parts.other);
            return Ok(());
        }
        self.host.reboot()
    }

    /// Promote the running slot to stable. The pending rollback timer is
    /// torn down before the commit so a forced reboot cannot fire between
    /// the two steps.
    pub fn confirm(&mut self) -> Result<(), SafeUpgradeError> {
        if !partition::is_installed(&*self.env)? {
            return Err(SafeUpgradeError::NotInstalled);
        }
        let parts = partition::partitions(&*self.env, self.probe)?;
        if parts.current == parts.stable {
            return Err(SafeUpgradeError::AlreadyConfirmed);
        }
        self.host.cancel_rollback()?;
        self.env
            .set(env::KEY_STABLE, &parts.current.index().to_string())?;
        info!("partition {} confirmed stable", parts.current);
        Ok(())
    }

    /// Boot the other slot exactly once on the next reboot, without
    /// declaring it stable.
    pub fn test_other_partition(&mut self) -> Result<(), SafeUpgradeError> {
        if !partition::is_installed(&*self.env)? {
            return Err(SafeUpgradeError::NotInstalled);
        }
        let parts = partition::partitions(&*self.env, self.probe)?;
        self.env
            .set(env::KEY_TESTING, &parts.other.index().to_string())?;
        info!("partition {} will boot once on next reboot", parts.other);
        Ok(())
    }

    /// Check a candidate image against the running board. No side effects.
    pub fn verify(&self, image: &Path) -> Result<(), SafeUpgradeError> {
        let board = self.probe.board_name()?;
        firmware::verify(self.introspect, image, &board)
    }

    /// Fail with `BoardNotSupported` unless the running board matches the
    /// supported-device list.
    pub fn require_supported_board(&self) -> Result<String, SafeUpgradeError> {
        let board = self.probe.board_name()?;
        if probe::board_supported(&board) {
            Ok(board)
        } else {
            Err(SafeUpgradeError::BoardNotSupported(board))
        }
    }

    /// Snapshot for the `show` verb.
    pub fn status(&self) -> Result<StatusReport, SafeUpgradeError> {
        let board = self.probe.board_name()?;
        let supported = probe::board_supported(&board);
        let version = self.env.get(env::KEY_VERSION)?;
        let partitions = if version.is_some() {
            Some(partition::partitions(&*self.env, self.probe)?)
        } else {
            None
        };
        Ok(StatusReport {
            board,
            supported,
            version,
            partitions,
            confirm_remaining: rollback::confirm_remaining(self.probe),
        })
    }
}
