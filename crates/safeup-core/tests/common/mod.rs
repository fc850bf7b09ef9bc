// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Recorded fakes for exercising the upgrade state machine.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use safeup_core::archive::ArchiveSpec;
use safeup_core::env::{EnvStore, MemEnv};
use safeup_core::error::SafeUpgradeError;
use safeup_core::firmware::{FirmwareMetadata, Introspect};
use safeup_core::flash::FlashControl;
use safeup_core::host::HostOps;
use safeup_core::probe::SystemProbe;
use safeup_core::Slot;

/// Shared, ordered record of every side effect the orchestrator requested.
pub type EventLog = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.borrow().clone()
}

/// Partition table as seen when running from slot 1 (the fw2 label exists).
pub const TABLE_SLOT1: &str = "dev:    size   erasesize  name\n\
                               mtd0: 00040000 00010000 \"u-boot\"\n\
                               mtd1: 00800000 00010000 \"fw1\"\n\
                               mtd2: 00800000 00010000 \"fw2\"\n";
/// Partition table as seen when running from slot 2 (no fw2 label).
pub const TABLE_SLOT2: &str = "dev:    size   erasesize  name\n\
                               mtd0: 00040000 00010000 \"u-boot\"\n\
                               mtd1: 00800000 00010000 \"firmware\"\n";

pub struct FakeProbe {
    pub board: String,
    pub table: String,
    pub cmdline: String,
    pub uptime: Cell<u64>,
}

impl FakeProbe {
    pub fn on_slot1() -> Self {
        FakeProbe {
            board: "librerouter-v1".into(),
            table: TABLE_SLOT1.into(),
            cmdline: "console=ttyS0,115200 rootfstype=squashfs".into(),
            uptime: Cell::new(100),
        }
    }

    pub fn on_slot2() -> Self {
        FakeProbe {
            table: TABLE_SLOT2.into(),
            ..FakeProbe::on_slot1()
        }
    }
}

impl SystemProbe for FakeProbe {
    fn board_name(&self) -> Result<String, SafeUpgradeError> {
        Ok(self.board.clone())
    }

    fn partition_table(&self) -> Result<String, SafeUpgradeError> {
        Ok(self.table.clone())
    }

    fn kernel_cmdline(&self) -> Result<String, SafeUpgradeError> {
        Ok(self.cmdline.clone())
    }

    fn uptime(&self) -> Result<u64, SafeUpgradeError> {
        Ok(self.uptime.get())
    }
}

/// Env store that mirrors every accepted write into the shared event log.
pub struct LoggedEnv {
    inner: MemEnv,
    log: EventLog,
}

impl LoggedEnv {
    pub fn new(inner: MemEnv, log: EventLog) -> Self {
        LoggedEnv { inner, log }
    }

    pub fn inner(&self) -> &MemEnv {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut MemEnv {
        &mut self.inner
    }
}

impl EnvStore for LoggedEnv {
    fn get(&self, key: &str) -> Result<Option<String>, SafeUpgradeError> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SafeUpgradeError> {
        self.inner.set(key, value)?;
        self.log.borrow_mut().push(format!("env:set {key}={value}"));
        Ok(())
    }
}

pub struct FakeFlash {
    log: EventLog,
    pub fail_erase: bool,
    pub fail_write: bool,
}

impl FakeFlash {
    pub fn new(log: EventLog) -> Self {
        FakeFlash {
            log,
            fail_erase: false,
            fail_write: false,
        }
    }
}

impl FlashControl for FakeFlash {
    fn erase(&mut self, slot: Slot) -> Result<(), SafeUpgradeError> {
        if self.fail_erase {
            return Err(SafeUpgradeError::Flash(format!("erase fw{slot} failed")));
        }
        self.log.borrow_mut().push(format!("flash:erase fw{slot}"));
        Ok(())
    }

    fn write_preserving(
        &mut self,
        slot: Slot,
        image: &Path,
        preserved: &Path,
    ) -> Result<(), SafeUpgradeError> {
        if self.fail_write {
            return Err(SafeUpgradeError::Flash(format!("write fw{slot} failed")));
        }
        self.log.borrow_mut().push(format!(
            "flash:write fw{slot} image={} preserved={}",
            image.display(),
            preserved.display()
        ));
        Ok(())
    }
}

pub struct FakeHost {
    log: EventLog,
    pub archive_path: PathBuf,
}

impl FakeHost {
    pub fn new(log: EventLog) -> Self {
        FakeHost {
            log,
            archive_path: PathBuf::from("/tmp/fake-backup.tar.gz"),
        }
    }
}

impl HostOps for FakeHost {
    fn build_preserved_archive(
        &mut self,
        spec: &ArchiveSpec,
    ) -> Result<PathBuf, SafeUpgradeError> {
        self.log.borrow_mut().push(format!(
            "host:archive timeout={} disabled={}",
            spec.reboot_safety_timeout, spec.disable_reboot_safety
        ));
        Ok(self.archive_path.clone())
    }

    fn arm_deferred_reboot(&mut self, delay_secs: u64) -> Result<(), SafeUpgradeError> {
        self.log.borrow_mut().push(format!("host:arm {delay_secs}"));
        Ok(())
    }

    fn cancel_rollback(&mut self) -> Result<(), SafeUpgradeError> {
        self.log.borrow_mut().push("host:cancel".to_string());
        Ok(())
    }

    fn reboot(&mut self) -> Result<(), SafeUpgradeError> {
        self.log.borrow_mut().push("host:reboot".to_string());
        Ok(())
    }
}

pub struct FakeIntrospect {
    pub metadata: Option<FirmwareMetadata>,
}

impl FakeIntrospect {
    /// Metadata declaring the image valid for the librerouter board.
    pub fn valid() -> Self {
        FakeIntrospect {
            metadata: Some(FirmwareMetadata {
                supported_devices: vec!["librerouter,librerouter-v1".into()],
                version: Some("1.5".into()),
            }),
        }
    }

    /// Image without any metadata trailer.
    pub fn missing() -> Self {
        FakeIntrospect { metadata: None }
    }

    /// Metadata declaring some other hardware.
    pub fn mismatched() -> Self {
        FakeIntrospect {
            metadata: Some(FirmwareMetadata {
                supported_devices: vec!["some-other-router".into()],
                version: None,
            }),
        }
    }
}

impl Introspect for FakeIntrospect {
    fn metadata(&self, _image: &Path) -> Result<Option<FirmwareMetadata>, SafeUpgradeError> {
        Ok(self.metadata.clone())
    }
}
