// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Read-only sources describing the running board and kernel.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use crate::error::SafeUpgradeError;

/// Device identifiers this tool is allowed to flash. Matching is by
/// substring in both directions (board name and firmware metadata), which
/// tolerates vendor suffix variants such as `librerouter,librerouter-v1`.
pub const SUPPORTED_DEVICES: &[&str] = &["librerouter-v1"];

const BOARD_NAME_PATH: &str = "/tmp/sysinfo/board_name";
const PARTITION_TABLE_PATH: &str = "/proc/mtd";
const KERNEL_CMDLINE_PATH: &str = "/proc/cmdline";
const UPTIME_PATH: &str = "/proc/uptime";

/// Read-only view of the running system, injectable for tests.
pub trait SystemProbe {
    /// Identity of the running hardware, trimmed of trailing newline.
    fn board_name(&self) -> Result<String, SafeUpgradeError>;

    /// Text description of the live partition table.
    fn partition_table(&self) -> Result<String, SafeUpgradeError>;

    /// Kernel command line of the running system, captured verbatim.
    fn kernel_cmdline(&self) -> Result<String, SafeUpgradeError>;

    /// Seconds since boot.
    fn uptime(&self) -> Result<u64, SafeUpgradeError>;
}

/// True iff the board identity contains one of the supported-device
/// patterns.
#[must_use]
pub fn board_supported(board: &str) -> bool {
    SUPPORTED_DEVICES.iter().any(|device| board.contains(device))
}

/// Probe backed by the usual procfs/sysinfo paths on the router.
#[derive(Debug, Default)]
pub struct ProcProbe;

impl ProcProbe {
    /// Create the probe.
    #[must_use]
    pub fn new() -> Self {
        ProcProbe
    }

    fn read_trimmed(path: &str) -> Result<String, SafeUpgradeError> {
        let text = fs::read_to_string(Path::new(path))?;
        Ok(text.trim_end_matches('\n').to_string())
    }
}

impl SystemProbe for ProcProbe {
    fn board_name(&self) -> Result<String, SafeUpgradeError> {
        Self::read_trimmed(BOARD_NAME_PATH)
    }

    fn partition_table(&self) -> Result<String, SafeUpgradeError> {
        Self::read_trimmed(PARTITION_TABLE_PATH)
    }

    fn kernel_cmdline(&self) -> Result<String, SafeUpgradeError> {
        Self::read_trimmed(KERNEL_CMDLINE_PATH)
    }

    fn uptime(&self) -> Result<u64, SafeUpgradeError> {
        let text = Self::read_trimmed(UPTIME_PATH)?;
        let seconds = text
            .split_whitespace()
            .next()
            .and_then(|field| field.parse::<f64>().ok())
            .ok_or_else(|| {
                SafeUpgradeError::EnvironmentNotConfigured(format!(
                    "unparseable uptime '{text}'"
                ))
            })?;
        Ok(seconds as u64)
    }
}
