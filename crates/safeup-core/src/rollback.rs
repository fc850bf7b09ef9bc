// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Auto-rollback safety net for unconfirmed firmware slots.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Two layers keep an unconfirmed slot from bricking the device: a
//! boot-time watcher script installed into the written slot (the
//! fine-grained net, honoring the configured timeout), and a coarse
//! deferred reboot armed before flashing starts (covering the window until
//! the installed script becomes active). Both record state in marker files
//! so `confirm` can tear them down and `confirm-remaining` can report the
//! time left.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::SafeUpgradeError;
use crate::probe::SystemProbe;

/// Operator confirmation window written into the preserved archive.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Floor below which a confirmation window is refused.
pub const MIN_TIMEOUT_SECS: u64 = 60;
/// Delay of the coarse deferred reboot armed before flashing.
pub const FALLBACK_REBOOT_SECS: u64 = 600;

/// Marker carried into the new slot; holds the timeout in seconds.
pub const CONFIRM_TIMEOUT_FILE: &str = "/etc/safe-upgrade-confirm-timeout";
/// Absolute trigger uptime (seconds) of the pending forced reboot.
pub const DEFERRED_REBOOT_FILE: &str = "/tmp/deferred-reboot-at";
/// Pid of the detached sleep-then-reboot watcher.
pub const WATCHDOG_PID_FILE: &str = "/tmp/safe-upgrade-watchdog.pid";
/// Install location of the boot-time watcher inside the archive, relative
/// to the filesystem root. uci-defaults scripts run once at first boot and
/// are deleted afterwards, which gives the one-shot semantics for free.
pub const INSTALLER_REL_PATH: &str = "etc/uci-defaults/95_safe-upgrade-rollback";

/// Sentinel returned by [`confirm_remaining`] when no reboot is pending.
pub const NOT_PENDING: i64 = -1;

/// Filesystem locations of the rollback markers and the watcher pid.
#[derive(Debug, Clone)]
pub struct RollbackPaths {
    /// Trigger-uptime marker of the pending forced reboot.
    pub deferred: PathBuf,
    /// Timeout marker read by the boot-time watcher.
    pub timeout: PathBuf,
    /// Pid of the detached sleep-then-reboot watcher.
    pub pidfile: PathBuf,
}

impl RollbackPaths {
    /// The live locations used on a real router.
    #[must_use]
    pub fn system() -> Self {
        RollbackPaths {
            deferred: PathBuf::from(DEFERRED_REBOOT_FILE),
            timeout: PathBuf::from(CONFIRM_TIMEOUT_FILE),
            pidfile: PathBuf::from(WATCHDOG_PID_FILE),
        }
    }

    /// All markers under one directory, for tests and host dry runs.
    #[must_use]
    pub fn under(dir: &Path) -> Self {
        RollbackPaths {
            deferred: dir.join("deferred-reboot-at"),
            timeout: dir.join("confirm-timeout"),
            pidfile: dir.join("watchdog.pid"),
        }
    }
}

/// Boot-time watcher script carried inside the preserved archive.
///
/// No-op when the timeout marker is absent (safety disabled or already
/// confirmed) or below the floor; otherwise records the trigger uptime and
/// its pid, then sleeps and hard-resets. The reboot is forced because a
/// firmware build that nobody could confirm may also be unable to shut
/// down cleanly.
#[must_use]
pub fn installer_script() -> String {
    format!(
        "#!/bin/sh\n\
         # Armed by safe-upgrade for a freshly written slot.\n\
         [ -f {timeout} ] || exit 0\n\
         t=$(cat {timeout})\n\
         case \"$t\" in ''|*[!0-9]*) exit 0;; esac\n\
         [ \"$t\" -ge {floor} ] || exit 0\n\
         now=$(cut -d. -f1 /proc/uptime)\n\
         echo $((now + t)) > {deferred}\n\
         ( sleep \"$t\"; reboot -f ) &\n\
         echo $! > {pidfile}\n\
         exit 0\n",
        timeout = CONFIRM_TIMEOUT_FILE,
        floor = MIN_TIMEOUT_SECS,
        deferred = DEFERRED_REBOOT_FILE,
        pidfile = WATCHDOG_PID_FILE,
    )
}

/// Arm the coarse deferred reboot: persist the trigger uptime and detach a
/// sleep-then-reboot watcher that outlives this process.
pub fn arm_deferred_reboot(
    probe: &impl SystemProbe,
    delay_secs: u64,
) -> Result<(), SafeUpgradeError> {
    let trigger = probe.uptime()? + delay_secs;
    write_trigger(Path::new(DEFERRED_REBOOT_FILE), trigger)?;
    let shell = format!("sleep {delay_secs}; reboot -f");
    let pid = crate::exec::spawn_detached("sh", &["-c", &shell])?;
    fs::write(WATCHDOG_PID_FILE, format!("{pid}\n"))?;
    info!("deferred reboot armed in {delay_secs}s (pid {pid})");
    Ok(())
}

/// Tear down any pending rollback: drop the markers, then terminate the
/// recorded watcher. Must complete before the watcher's sleep elapses,
/// which is why `confirm` calls this before committing the stable slot.
pub fn cancel_pending() -> Result<(), SafeUpgradeError> {
    cancel_pending_at(&RollbackPaths::system())
}

/// [`cancel_pending`] against explicit marker locations.
pub fn cancel_pending_at(paths: &RollbackPaths) -> Result<(), SafeUpgradeError> {
    remove_if_present(&paths.deferred);
    remove_if_present(&paths.timeout);
    match fs::read_to_string(&paths.pidfile) {
        Ok(raw) => {
            let pid = raw.trim();
            if !pid.is_empty() {
                // The watcher may have exited on its own; a failed kill is fine.
                if let Err(err) = crate::exec::run_capture("kill", &[pid]) {
                    warn!("could not signal watcher pid {pid}: {err}");
                }
            }
            remove_if_present(&paths.pidfile);
        }
        Err(_) => {
            // No watcher recorded; nothing to terminate.
        }
    }
    Ok(())
}

/// Seconds until the pending forced reboot, or [`NOT_PENDING`] when the
/// marker is absent, unreadable, or already behind the current uptime.
pub fn confirm_remaining(probe: &impl SystemProbe) -> i64 {
    confirm_remaining_at(probe, Path::new(DEFERRED_REBOOT_FILE))
}

/// [`confirm_remaining`] against an explicit marker path.
pub fn confirm_remaining_at(probe: &impl SystemProbe, marker: &Path) -> i64 {
    let trigger = match fs::read_to_string(marker) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value,
            Err(_) => return NOT_PENDING,
        },
        Err(_) => return NOT_PENDING,
    };
    let now = match probe.uptime() {
        Ok(value) => value,
        Err(_) => return NOT_PENDING,
    };
    if trigger <= now {
        return NOT_PENDING;
    }
    (trigger - now) as i64
}

/// Write a trigger-uptime marker.
pub fn write_trigger(marker: &Path, trigger_uptime: u64) -> Result<(), SafeUpgradeError> {
    fs::write(marker, format!("{trigger_uptime}\n"))?;
    Ok(())
}

fn remove_if_present(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove {}: {err}", path.display());
        }
    }
}

/// Resolution of an in-process rollback timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// The timeout elapsed and the fire action ran.
    Fired,
    /// Confirmation arrived first; the fire action never ran.
    Cancelled,
}

/// In-process rollback timer with deterministic cancellation.
///
/// The confirm path owns a channel sender; the timer thread blocks in
/// `recv_timeout`, so cancel-vs-expiry resolves on exactly one side: either
/// the message (or hangup) arrives within the window and the timer yields
/// [`TimerOutcome::Cancelled`], or the window elapses and the fire action
/// runs. Dropping the handle cancels.
#[derive(Debug)]
pub struct RollbackTimer {
    cancel_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<TimerOutcome>,
}

impl RollbackTimer {
    /// Start a timer that runs `on_fire` once `delay` elapses uncancelled.
    pub fn spawn<F>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || match cancel_rx.recv_timeout(delay) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                on_fire();
                TimerOutcome::Fired
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => TimerOutcome::Cancelled,
        });
        RollbackTimer { cancel_tx, handle }
    }

    /// Cancel the timer and report which side won the race.
    pub fn cancel(self) -> TimerOutcome {
        let _ = self.cancel_tx.send(());
        self.handle.join().unwrap_or(TimerOutcome::Fired)
    }

    /// Block until the timer resolves without cancelling it.
    pub fn wait(self) -> TimerOutcome {
        let RollbackTimer { cancel_tx, handle } = self;
        let outcome = handle.join().unwrap_or(TimerOutcome::Fired);
        drop(cancel_tx);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct UptimeProbe(u64);

    impl SystemProbe for UptimeProbe {
        fn board_name(&self) -> Result<String, SafeUpgradeError> {
            Ok("librerouter-v1".into())
        }
        fn partition_table(&self) -> Result<String, SafeUpgradeError> {
            Ok(String::new())
        }
        fn kernel_cmdline(&self) -> Result<String, SafeUpgradeError> {
            Ok(String::new())
        }
        fn uptime(&self) -> Result<u64, SafeUpgradeError> {
            Ok(self.0)
        }
    }

    #[test]
    fn cancel_drops_markers_and_countdown_reads_not_pending() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RollbackPaths::under(dir.path());
        write_trigger(&paths.deferred, 1_000).unwrap();
        fs::write(&paths.timeout, "600\n").unwrap();
        // Whitespace-only pid means nothing to signal during teardown.
        fs::write(&paths.pidfile, "\n").unwrap();

        let probe = UptimeProbe(400);
        assert_eq!(confirm_remaining_at(&probe, &paths.deferred), 600);

        cancel_pending_at(&paths).unwrap();
        assert!(!paths.deferred.exists());
        assert!(!paths.timeout.exists());
        assert!(!paths.pidfile.exists());
        assert_eq!(confirm_remaining_at(&probe, &paths.deferred), NOT_PENDING);
    }

    #[test]
    fn cancel_with_no_markers_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RollbackPaths::under(dir.path());
        cancel_pending_at(&paths).unwrap();
        assert!(!paths.deferred.exists());
    }

    #[test]
    fn installer_script_guards_marker_and_floor() {
        let script = installer_script();
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains(CONFIRM_TIMEOUT_FILE));
        assert!(script.contains(&format!("-ge {MIN_TIMEOUT_SECS}")));
        assert!(script.contains("reboot -f"));
        assert!(script.contains(WATCHDOG_PID_FILE));
    }

    #[test]
    fn timer_fires_when_not_cancelled() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = RollbackTimer::spawn(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(timer.wait(), TimerOutcome::Fired);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancel_before_expiry_suppresses_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let timer = RollbackTimer::spawn(Duration::from_secs(60), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(timer.cancel(), TimerOutcome::Cancelled);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_the_handle_cancels() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        {
            let _timer = RollbackTimer::spawn(Duration::from_secs(60), move || {
                flag.store(true, Ordering::SeqCst);
            });
        }
        assert!(!fired.load(Ordering::SeqCst));
    }
}
