// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate rollback timer race resolution and countdown reporting.
// Author: Lukas Bower
#![forbid(unsafe_code)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::FakeProbe;
use safeup_core::rollback::{
    confirm_remaining_at, write_trigger, RollbackTimer, TimerOutcome, NOT_PENDING,
};
use tempfile::tempdir;

#[test]
fn confirm_within_window_wins_the_race() {
    let rebooted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&rebooted);
    let timer = RollbackTimer::spawn(Duration::from_secs(60), move || {
        flag.store(true, Ordering::SeqCst);
    });
    // The confirm path closes the channel; exactly one side wins.
    assert_eq!(timer.cancel(), TimerOutcome::Cancelled);
    assert!(!rebooted.load(Ordering::SeqCst));
}

#[test]
fn missed_window_forces_the_reboot_action() {
    let rebooted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&rebooted);
    let timer = RollbackTimer::spawn(Duration::from_millis(20), move || {
        flag.store(true, Ordering::SeqCst);
    });
    std::thread::sleep(Duration::from_millis(80));
    // Confirmation arriving after expiry loses: the action already ran.
    assert_eq!(timer.cancel(), TimerOutcome::Fired);
    assert!(rebooted.load(Ordering::SeqCst));
}

#[test]
fn countdown_is_monotonically_non_increasing() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("deferred-reboot-at");
    let probe = FakeProbe::on_slot2();
    probe.uptime.set(400);
    write_trigger(&marker, 1000).unwrap();

    let mut last = confirm_remaining_at(&probe, &marker);
    assert_eq!(last, 600);
    for now in [500, 650, 900, 999] {
        probe.uptime.set(now);
        let remaining = confirm_remaining_at(&probe, &marker);
        assert!(remaining <= last);
        assert!(remaining > 0);
        last = remaining;
    }
    // At and past the trigger the countdown collapses to the sentinel.
    probe.uptime.set(1000);
    assert_eq!(confirm_remaining_at(&probe, &marker), NOT_PENDING);
    probe.uptime.set(2000);
    assert_eq!(confirm_remaining_at(&probe, &marker), NOT_PENDING);
}

#[test]
fn absent_or_garbled_marker_reads_as_not_pending() {
    let dir = tempdir().unwrap();
    let probe = FakeProbe::on_slot1();
    let missing = dir.path().join("no-such-marker");
    assert_eq!(confirm_remaining_at(&probe, &missing), NOT_PENDING);

    let garbled = dir.path().join("garbled");
    std::fs::write(&garbled, "soon\n").unwrap();
    assert_eq!(confirm_remaining_at(&probe, &garbled), NOT_PENDING);
}
