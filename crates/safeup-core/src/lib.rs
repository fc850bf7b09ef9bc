// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Dual-partition safe firmware upgrade library for router boards.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Safe firmware upgrades across two raw-flash slots.
//!
//! A board carries two firmware partitions. The bootloader environment
//! records which slot is `stable` (booted by default) and which, if any, is
//! `testing` (booted exactly once, then cleared by the boot dispatcher).
//! The orchestrator in [`upgrade`] writes the inactive slot, marks it as
//! testing and arms an auto-rollback timer; only an operator `confirm`
//! promotes the new slot to stable. Every effect goes through an injected
//! seam ([`env::EnvStore`], [`flash::FlashControl`], [`probe::SystemProbe`],
//! [`host::HostOps`]) so the crash-ordering and rollback-race guarantees are
//! testable without a device.

pub mod archive;
pub mod bootscript;
pub mod env;
pub mod error;
mod exec;
pub mod firmware;
pub mod flash;
pub mod host;
pub mod partition;
pub mod probe;
pub mod rollback;
pub mod upgrade;

pub use error::{ExitStatus, SafeUpgradeError};
pub use partition::{PartitionSet, Slot};
pub use upgrade::{Orchestrator, UpgradeOptions};
