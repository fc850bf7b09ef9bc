// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy and fixed process exit statuses.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::io;

use thiserror::Error;

/// Fixed exit statuses of the `safe-upgrade` CLI.
///
/// The integer values are part of the operator contract and must not be
/// renumbered; scripts on deployed routers branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Operation completed.
    Ok = 0,
    /// Firmware image missing metadata or not built for this board.
    InvalidFirmware = 1,
    /// The running slot is already the stable slot.
    AlreadyConfirmed = 2,
    /// Bootloader environment unreachable or not set up.
    EnvironmentNotConfigured = 3,
    /// The running board is not in the supported-device list.
    BoardNotSupported = 4,
    /// Safe-upgrade has not been bootstrapped on this device.
    NotInstalled = 5,
    /// Safe-upgrade is already bootstrapped.
    AlreadyInstalled = 6,
    /// Bootstrap attempted while running from the second slot.
    InstallFromWrongPartition = 7,
    /// Unclassified runtime failure (I/O, collaborator, flash).
    Failure = 9,
}

impl ExitStatus {
    /// Integer code handed to `std::process::exit`.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Errors raised by the safe-upgrade state machine and its collaborators.
#[derive(Debug, Error)]
pub enum SafeUpgradeError {
    /// The image lacks metadata or declares no supported device.
    #[error("firmware image is not valid for this board")]
    InvalidFirmware,
    /// `confirm` on a slot that is already stable.
    #[error("current partition is already confirmed as stable")]
    AlreadyConfirmed,
    /// The bootloader environment could not be read or lacks a required key.
    #[error("bootloader environment not configured: {0}")]
    EnvironmentNotConfigured(String),
    /// The running board is outside the supported-device list.
    #[error("board '{0}' is not supported")]
    BoardNotSupported(String),
    /// An installed-only operation ran before `bootstrap`.
    #[error("safe-upgrade is not installed; run bootstrap first")]
    NotInstalled,
    /// `bootstrap` on a device that already carries the install marker.
    #[error("safe-upgrade is already installed (use --force to redo)")]
    AlreadyInstalled,
    /// `bootstrap` is only supported while running from slot 1.
    #[error("bootstrap must run from partition 1, currently on partition {0}")]
    InstallFromWrongPartition(u8),
    /// Reboot-safety timeout below the 60 second floor.
    #[error("reboot safety timeout {0}s is below the 60s floor")]
    TimeoutBelowFloor(u64),
    /// Erase or write of the target slot failed; the stable slot is untouched.
    #[error("flash operation failed: {0}")]
    Flash(String),
    /// An external collaborator binary failed or could not be spawned.
    #[error("collaborator '{command}' failed: {reason}")]
    Collaborator {
        /// Program that was invoked.
        command: String,
        /// Exit status or spawn error.
        reason: String,
    },
    /// Filesystem error outside the flash path.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SafeUpgradeError {
    /// Map the error onto the fixed CLI exit status.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            SafeUpgradeError::InvalidFirmware => ExitStatus::InvalidFirmware,
            SafeUpgradeError::AlreadyConfirmed => ExitStatus::AlreadyConfirmed,
            SafeUpgradeError::EnvironmentNotConfigured(_) => {
                ExitStatus::EnvironmentNotConfigured
            }
            SafeUpgradeError::BoardNotSupported(_) => ExitStatus::BoardNotSupported,
            SafeUpgradeError::NotInstalled => ExitStatus::NotInstalled,
            SafeUpgradeError::AlreadyInstalled => ExitStatus::AlreadyInstalled,
            SafeUpgradeError::InstallFromWrongPartition(_) => {
                ExitStatus::InstallFromWrongPartition
            }
            SafeUpgradeError::TimeoutBelowFloor(_)
            | SafeUpgradeError::Flash(_)
            | SafeUpgradeError::Collaborator { .. }
            | SafeUpgradeError::Io(_) => ExitStatus::Failure,
        }
    }
}
