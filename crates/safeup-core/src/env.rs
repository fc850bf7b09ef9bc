// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Typed accessor over the persistent bootloader environment.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::HashMap;

use crate::error::SafeUpgradeError;
use crate::partition::Slot;

/// Install marker and version of the safe-upgrade mechanism.
pub const KEY_VERSION: &str = "su_version";
/// Ordinal of the known-good slot booted by default.
pub const KEY_STABLE: &str = "stable_part";
/// Ordinal of a slot to boot exactly once; `0` means none.
pub const KEY_TESTING: &str = "testing_part";
/// Flash address of slot 1.
pub const KEY_FW1_ADDR: &str = "fw1_addr";
/// Flash address of slot 2.
pub const KEY_FW2_ADDR: &str = "fw2_addr";
/// Global boot dispatcher consumed by the bootloader.
pub const KEY_BOOTCMD: &str = "bootcmd";

/// Name of the per-slot boot command key (`boot_1` / `boot_2`).
#[must_use]
pub fn boot_key(slot: Slot) -> String {
    format!("boot_{}", slot.index())
}

/// Persistent key→string store surviving reboot and power loss.
///
/// The store offers no multi-key atomicity. Callers must order writes so
/// that a crash after any prefix of a sequence leaves the device bootable;
/// the orchestrator relies on this when it writes `bootcmd` last during
/// bootstrap and `testing_part` only after a successful flash write.
pub trait EnvStore {
    /// Read a key. `Ok(None)` means the key is absent, distinct from a key
    /// holding an empty string.
    fn get(&self, key: &str) -> Result<Option<String>, SafeUpgradeError>;

    /// Durably write a key.
    fn set(&mut self, key: &str, value: &str) -> Result<(), SafeUpgradeError>;
}

/// U-Boot environment accessed through `fw_printenv` / `fw_setenv`.
///
/// Requires `/etc/fw_env.config` to describe the env flash region; a spawn
/// failure is reported as an unconfigured environment rather than a
/// collaborator error, since every verb is useless without the store.
#[derive(Debug, Default)]
pub struct UBootEnv;

impl UBootEnv {
    /// Create the accessor.
    #[must_use]
    pub fn new() -> Self {
        UBootEnv
    }
}

impl EnvStore for UBootEnv {
    fn get(&self, key: &str) -> Result<Option<String>, SafeUpgradeError> {
        let output = crate::exec::run_capture("fw_printenv", &["-n", key])
            .map_err(|err| SafeUpgradeError::EnvironmentNotConfigured(err.to_string()))?;
        if output.status.success() {
            let value = String::from_utf8_lossy(&output.stdout);
            return Ok(Some(value.trim_end_matches('\n').to_string()));
        }
        // fw_printenv also exits non-zero when the env partition itself is
        // unreadable or fw_env.config is broken; only the undefined-variable
        // case may read as an absent key.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if variable_undefined(&stderr) {
            return Ok(None);
        }
        Err(SafeUpgradeError::EnvironmentNotConfigured(format!(
            "fw_printenv {key}: {}",
            stderr.trim()
        )))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SafeUpgradeError> {
        crate::exec::run_checked("fw_setenv", &[key, value])
            .map_err(|err| SafeUpgradeError::EnvironmentNotConfigured(err.to_string()))
    }
}

/// True when a non-zero `fw_printenv` exit reported an undefined variable
/// (`## Error: "<key>" not defined`) rather than an unreadable store.
fn variable_undefined(stderr: &str) -> bool {
    stderr.contains("not defined")
}

/// In-memory store with an ordered write journal and an optional simulated
/// crash after N writes. Backs the crash-ordering tests; also useful to
/// dry-run the state machine on a host.
#[derive(Debug, Default)]
pub struct MemEnv {
    values: HashMap<String, String>,
    journal: Vec<(String, String)>,
    fail_after: Option<usize>,
}

impl MemEnv {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        MemEnv::default()
    }

    /// Pre-seeded store.
    #[must_use]
    pub fn with_values<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut env = MemEnv::new();
        for (key, value) in pairs {
            env.values.insert(key.to_string(), value.to_string());
        }
        env
    }

    /// Fail every `set` after `count` successful writes, simulating a power
    /// loss part-way through a multi-key sequence.
    pub fn fail_after(&mut self, count: usize) {
        self.fail_after = Some(count);
    }

    /// Writes accepted so far, in order.
    #[must_use]
    pub fn journal(&self) -> &[(String, String)] {
        &self.journal
    }
}

impl EnvStore for MemEnv {
    fn get(&self, key: &str) -> Result<Option<String>, SafeUpgradeError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SafeUpgradeError> {
        if let Some(limit) = self.fail_after {
            if self.journal.len() >= limit {
                return Err(SafeUpgradeError::EnvironmentNotConfigured(format!(
                    "simulated power loss writing '{key}'"
                )));
            }
        }
        self.values.insert(key.to_string(), value.to_string());
        self.journal.push((key.to_string(), value.to_string()));
        Ok(())
    }
}
