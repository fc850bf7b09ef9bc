// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Spawn external collaborator binaries with uniform error mapping.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::process::{Command, Output, Stdio};

use log::debug;

use crate::error::SafeUpgradeError;

/// Run a collaborator and capture its output. Spawn failures (missing
/// binary, permission) are reported as collaborator errors; a non-zero
/// exit is left for the caller to interpret.
pub(crate) fn run_capture(program: &str, args: &[&str]) -> Result<Output, SafeUpgradeError> {
    debug!("exec: {program} {}", args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| SafeUpgradeError::Collaborator {
            command: program.to_string(),
            reason: err.to_string(),
        })
}

/// Run a collaborator and require a zero exit status.
pub(crate) fn run_checked(program: &str, args: &[&str]) -> Result<(), SafeUpgradeError> {
    let output = run_capture(program, args)?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(SafeUpgradeError::Collaborator {
        command: program.to_string(),
        reason: format!("exit {}: {}", output.status, stderr.trim()),
    })
}

/// Spawn a collaborator detached from the current process, returning its pid.
/// Used for the sleep-then-reboot watchers that must outlive the CLI.
pub(crate) fn spawn_detached(program: &str, args: &[&str]) -> Result<u32, SafeUpgradeError> {
    debug!("exec (detached): {program} {}", args.join(" "));
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| SafeUpgradeError::Collaborator {
            command: program.to_string(),
            reason: err.to_string(),
        })?;
    Ok(child.id())
}
