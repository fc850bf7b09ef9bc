// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Erase and write raw-flash firmware slots.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::Path;

use log::info;

use crate::error::SafeUpgradeError;
use crate::partition::Slot;

/// Raw flash access for the two firmware slots.
///
/// Erase plus write is a long, uninterruptible window: a partially written
/// slot is unrecoverable, and the device stays bootable only because
/// `testing_part` is flipped after — never before — a successful write.
pub trait FlashControl {
    /// Erase a slot.
    fn erase(&mut self, slot: Slot) -> Result<(), SafeUpgradeError>;

    /// Write `image` to a slot while guaranteeing that `preserved` survives
    /// an interrupted write and is replayed into the new filesystem on next
    /// boot (the journal-preserving write).
    fn write_preserving(
        &mut self,
        slot: Slot,
        image: &Path,
        preserved: &Path,
    ) -> Result<(), SafeUpgradeError>;
}

/// Flash access through the `mtd` collaborator. `-j` injects the preserved
/// archive into the jffs2 overlay as part of the write, which is what makes
/// the archive power-loss safe.
#[derive(Debug, Default)]
pub struct MtdFlash;

impl MtdFlash {
    /// Create the accessor.
    #[must_use]
    pub fn new() -> Self {
        MtdFlash
    }

    fn mtd_label(slot: Slot) -> String {
        format!("fw{}", slot.index())
    }
}

impl FlashControl for MtdFlash {
    fn erase(&mut self, slot: Slot) -> Result<(), SafeUpgradeError> {
        let label = Self::mtd_label(slot);
        info!("erasing partition {label}");
        crate::exec::run_checked("mtd", &["erase", &label])
            .map_err(|err| SafeUpgradeError::Flash(err.to_string()))
    }

    fn write_preserving(
        &mut self,
        slot: Slot,
        image: &Path,
        preserved: &Path,
    ) -> Result<(), SafeUpgradeError> {
        let label = Self::mtd_label(slot);
        let image_arg = image.to_string_lossy().into_owned();
        let preserved_arg = preserved.to_string_lossy().into_owned();
        info!("writing {} to partition {label}", image.display());
        crate::exec::run_checked("mtd", &["-j", &preserved_arg, "write", &image_arg, &label])
            .map_err(|err| SafeUpgradeError::Flash(err.to_string()))
    }
}
