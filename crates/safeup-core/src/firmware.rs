// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate candidate firmware images against the running board.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::error::SafeUpgradeError;
use crate::probe::SUPPORTED_DEVICES;

/// Where the extracted metadata JSON is dropped before parsing.
const METADATA_SCRATCH: &str = "/tmp/safe-upgrade-fw-metadata.json";

/// Compatibility metadata embedded in a firmware image. Read-only; the
/// image itself is never modified by validation.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FirmwareMetadata {
    /// Device identifiers the image declares support for.
    #[serde(default)]
    pub supported_devices: Vec<String>,
    /// Human-readable firmware version, when present.
    #[serde(default)]
    pub version: Option<String>,
}

/// Image introspection seam. The real implementation shells out to the
/// firmware tooling; tests substitute canned metadata.
pub trait Introspect {
    /// Extract embedded metadata, or `None` when the image carries none.
    fn metadata(&self, image: &Path) -> Result<Option<FirmwareMetadata>, SafeUpgradeError>;
}

/// Introspection through the `fwtool` collaborator, which copies the
/// metadata trailer of an image into a separate file.
#[derive(Debug)]
pub struct FwTool {
    scratch: PathBuf,
}

impl FwTool {
    /// Collaborator writing metadata to the fixed scratch path.
    #[must_use]
    pub fn new() -> Self {
        FwTool {
            scratch: PathBuf::from(METADATA_SCRATCH),
        }
    }
}

impl Default for FwTool {
    fn default() -> Self {
        FwTool::new()
    }
}

impl Introspect for FwTool {
    fn metadata(&self, image: &Path) -> Result<Option<FirmwareMetadata>, SafeUpgradeError> {
        let scratch = self.scratch.to_string_lossy().into_owned();
        let image_arg = image.to_string_lossy().into_owned();
        let output = crate::exec::run_capture("fwtool", &["-q", "-i", &scratch, &image_arg])?;
        if !output.status.success() {
            // No metadata trailer in the image.
            debug!("fwtool found no metadata in {}", image.display());
            let _ = fs::remove_file(&self.scratch);
            return Ok(None);
        }
        let text = fs::read_to_string(&self.scratch)?;
        let _ = fs::remove_file(&self.scratch);
        match serde_json::from_str::<FirmwareMetadata>(&text) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) => {
                debug!("unparseable firmware metadata: {err}");
                Ok(None)
            }
        }
    }
}

/// True iff some declared device and the running board both contain the
/// same supported-device pattern.
///
/// The double substring match is deliberately loose: image metadata says
/// `librerouter,librerouter-v1` while the board file says
/// `librerouter-v1`, and both must resolve to the same pattern. Do not
/// tighten to equality without revisiting deployed image metadata.
#[must_use]
pub fn is_valid(metadata: &FirmwareMetadata, board: &str) -> bool {
    metadata.supported_devices.iter().any(|declared| {
        SUPPORTED_DEVICES
            .iter()
            .any(|pattern| declared.contains(pattern) && board.contains(pattern))
    })
}

/// Check an image against the running board. No side effects beyond the
/// scratch file used by the introspection collaborator.
pub fn verify(
    introspect: &impl Introspect,
    image: &Path,
    board: &str,
) -> Result<(), SafeUpgradeError> {
    match introspect.metadata(image)? {
        Some(metadata) if is_valid(&metadata, board) => Ok(()),
        _ => Err(SafeUpgradeError::InvalidFirmware),
    }
}
