// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Side-effectful host actions behind one injectable seam.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::PathBuf;

use log::info;

use crate::archive::{ArchiveBuilder, ArchiveSpec};
use crate::error::SafeUpgradeError;
use crate::probe::SystemProbe;
use crate::rollback;

/// Host actions the orchestrator must perform but cannot own directly:
/// archive assembly, rollback arming and teardown, and the final reboot.
/// A recorded fake stands in during tests so the state machine's effect
/// ordering is observable.
pub trait HostOps {
    /// Build the preserved configuration archive, returning its path.
    fn build_preserved_archive(
        &mut self,
        spec: &ArchiveSpec,
    ) -> Result<PathBuf, SafeUpgradeError>;

    /// Arm the coarse deferred reboot ahead of flashing.
    fn arm_deferred_reboot(&mut self, delay_secs: u64) -> Result<(), SafeUpgradeError>;

    /// Remove rollback markers and terminate the pending watcher.
    fn cancel_rollback(&mut self) -> Result<(), SafeUpgradeError>;

    /// Reboot the device. Does not return on real hardware.
    fn reboot(&mut self) -> Result<(), SafeUpgradeError>;
}

/// Production host operations on the router itself.
#[derive(Debug)]
pub struct RouterHost<'a, P: SystemProbe> {
    probe: &'a P,
}

impl<'a, P: SystemProbe> RouterHost<'a, P> {
    /// Host ops using `probe` for boot-relative time.
    #[must_use]
    pub fn new(probe: &'a P) -> Self {
        RouterHost { probe }
    }
}

impl<P: SystemProbe> HostOps for RouterHost<'_, P> {
    fn build_preserved_archive(
        &mut self,
        spec: &ArchiveSpec,
    ) -> Result<PathBuf, SafeUpgradeError> {
        ArchiveBuilder::new().build(spec)
    }

    fn arm_deferred_reboot(&mut self, delay_secs: u64) -> Result<(), SafeUpgradeError> {
        rollback::arm_deferred_reboot(self.probe, delay_secs)
    }

    fn cancel_rollback(&mut self) -> Result<(), SafeUpgradeError> {
        rollback::cancel_pending()
    }

    fn reboot(&mut self) -> Result<(), SafeUpgradeError> {
        info!("rebooting");
        crate::exec::run_checked("reboot", &[])
    }
}
