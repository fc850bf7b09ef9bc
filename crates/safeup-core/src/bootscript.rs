// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Generate the boot command strings persisted in the environment.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! The bootloader runs literal command strings out of the environment:
//! `boot_1` / `boot_2` boot one slot each, `bootcmd` dispatches between
//! them. Generating all three here keeps the flash-geometry and
//! kernel-cmdline substitution points in one type-checked place instead of
//! scattered string concatenation.

use crate::partition::Slot;

/// Flash address of slot 1 (8 MiB slots on 16 MiB SPI NOR).
pub const FW1_ADDR: &str = "0x9f050000";
/// Flash address of slot 2.
pub const FW2_ADDR: &str = "0x9f850000";

/// Physical flash address of a slot.
#[must_use]
pub fn slot_addr(slot: Slot) -> &'static str {
    match slot {
        Slot::One => FW1_ADDR,
        Slot::Two => FW2_ADDR,
    }
}

/// Boot command for one slot, embedding the captured kernel command line.
///
/// The cmdline is captured from the running kernel, not recomputed, so a
/// later change to the running system cannot silently alter what an
/// already-written slot boots with.
#[must_use]
pub fn boot_command(slot: Slot, kernel_cmdline: &str) -> String {
    format!(
        "setenv bootargs '{}'; bootm {}",
        kernel_cmdline,
        slot_addr(slot)
    )
}

/// The global dispatcher: boot `testing_part` exactly once (clearing it
/// before the attempt so a failed boot cannot loop), otherwise boot
/// `stable_part`.
#[must_use]
pub fn boot_dispatcher() -> String {
    "if test ${testing_part} -ne 0; then \
     setenv boot_part ${testing_part}; setenv testing_part 0; saveenv; \
     else setenv boot_part ${stable_part}; fi; \
     run boot_${boot_part}"
        .to_string()
}
