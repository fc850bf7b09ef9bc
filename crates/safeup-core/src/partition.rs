// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Derive the logical roles of the two firmware slots.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fmt;

use crate::env::{self, EnvStore};
use crate::error::SafeUpgradeError;
use crate::probe::SystemProbe;

/// Partition-table label of the second firmware slot. Its absence in the
/// live table means the system was booted from that slot.
const SLOT2_LABEL: &str = "fw2";

/// One of exactly two firmware slots. Never stored as a struct anywhere;
/// roles are recomputed on every query so stored and physical state cannot
/// diverge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// First slot, at `fw1_addr`.
    One,
    /// Second slot, at `fw2_addr`.
    Two,
}

impl Slot {
    /// Ordinal as persisted in the environment (1 or 2).
    #[must_use]
    pub fn index(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }

    /// The slot that is not `self`.
    #[must_use]
    pub fn other(self) -> Slot {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }

    /// Parse a persisted ordinal.
    #[must_use]
    pub fn from_index(index: u8) -> Option<Slot> {
        match index {
            1 => Some(Slot::One),
            2 => Some(Slot::Two),
            _ => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

/// The derived roles of both slots at one point in time.
///
/// `current` need not equal `stable`: they differ mid-upgrade, and after a
/// reboot into a testing slot before confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSet {
    /// Slot the system is presently executing from.
    pub current: Slot,
    /// The complement of `current`.
    pub other: Slot,
    /// Persisted known-good slot booted by default.
    pub stable: Slot,
    /// Slot to boot exactly once, if any.
    pub testing: Option<Slot>,
}

/// Infer the running slot from the live partition-table text.
///
/// The rule looks inverted on purpose: when the system boots from slot 2
/// the remapped table carries no `fw2` label, so absence of the label means
/// current = 2. Verified against LibreRouter v1; re-check empirically
/// before trusting it on a new hardware revision.
pub fn current_slot(probe: &impl SystemProbe) -> Result<Slot, SafeUpgradeError> {
    let table = probe.partition_table()?;
    if table.contains(SLOT2_LABEL) {
        Ok(Slot::One)
    } else {
        Ok(Slot::Two)
    }
}

/// Resolve all four roles from the store and the live table.
pub fn partitions(
    env: &impl EnvStore,
    probe: &impl SystemProbe,
) -> Result<PartitionSet, SafeUpgradeError> {
    let current = current_slot(probe)?;
    let stable = read_slot(env, env::KEY_STABLE)?.ok_or_else(|| {
        SafeUpgradeError::EnvironmentNotConfigured(format!("{} is not set", env::KEY_STABLE))
    })?;
    let testing = match env.get(env::KEY_TESTING)? {
        None => None,
        // "0" clears the one-shot slot; anything else must name a real slot.
        Some(raw) => match parse_ordinal(env::KEY_TESTING, &raw)? {
            None => None,
            Some(ordinal) => Some(Slot::from_index(ordinal).ok_or_else(|| {
                SafeUpgradeError::EnvironmentNotConfigured(format!(
                    "{} holds invalid slot '{raw}'",
                    env::KEY_TESTING
                ))
            })?),
        },
    };
    Ok(PartitionSet {
        current,
        other: current.other(),
        stable,
        testing,
    })
}

/// True iff the install marker is present.
pub fn is_installed(env: &impl EnvStore) -> Result<bool, SafeUpgradeError> {
    Ok(env.get(env::KEY_VERSION)?.is_some())
}

fn read_slot(env: &impl EnvStore, key: &str) -> Result<Option<Slot>, SafeUpgradeError> {
    match env.get(key)? {
        None => Ok(None),
        Some(raw) => {
            let ordinal = parse_ordinal(key, &raw)?;
            match ordinal.map(Slot::from_index) {
                Some(Some(slot)) => Ok(Some(slot)),
                Some(None) | None => Err(SafeUpgradeError::EnvironmentNotConfigured(format!(
                    "{key} holds invalid slot '{raw}'"
                ))),
            }
        }
    }
}

fn parse_ordinal(key: &str, raw: &str) -> Result<Option<u8>, SafeUpgradeError> {
    let value: u8 = raw.trim().parse().map_err(|_| {
        SafeUpgradeError::EnvironmentNotConfigured(format!("{key} holds non-numeric '{raw}'"))
    })?;
    if value == 0 {
        Ok(None)
    } else {
        Ok(Some(value))
    }
}
