// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the safe-upgrade tool.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `safe-upgrade` — dual-partition firmware upgrades that cannot brick the
//! board. Each verb maps to exactly one state transition of the core
//! orchestrator and one fixed exit status; scripts rely on the codes.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use safeup_core::env::UBootEnv;
use safeup_core::firmware::FwTool;
use safeup_core::flash::MtdFlash;
use safeup_core::host::RouterHost;
use safeup_core::probe::ProcProbe;
use safeup_core::rollback;
use safeup_core::{ExitStatus, Orchestrator, SafeUpgradeError, UpgradeOptions};

#[derive(Debug, Parser)]
#[command(
    name = "safe-upgrade",
    version,
    about = "Dual-partition safe firmware upgrades"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show partition roles and upgrade state.
    Show,
    /// Check a firmware image against this board, without side effects.
    Verify {
        /// Candidate firmware image.
        firmware: PathBuf,
    },
    /// Flash a firmware into the inactive partition and boot it once.
    Upgrade {
        /// Firmware image to write.
        firmware: PathBuf,
        /// Skip the reboot after flashing.
        #[arg(short = 'n', long)]
        no_reboot: bool,
        /// Do not arm the auto-rollback confirmation window.
        #[arg(long)]
        disable_reboot_safety: bool,
        /// Flash even when the firmware metadata does not match this board.
        #[arg(long)]
        force: bool,
        /// Configuration archive to carry into the new partition instead of
        /// the default config set.
        #[arg(long, value_name = "FILE")]
        preserve_archive: Option<PathBuf>,
        /// Seconds before the unconfirmed partition is rebooted away.
        #[arg(
            long,
            value_name = "SECS",
            default_value_t = rollback::DEFAULT_TIMEOUT_SECS,
            value_parser = clap::value_parser!(u64).range(rollback::MIN_TIMEOUT_SECS..)
        )]
        reboot_safety_timeout: u64,
    },
    /// Promote the running partition to stable and stop the rollback timer.
    Confirm,
    /// Install the dual-boot mechanism into the bootloader environment.
    Bootstrap {
        /// Redo the bootstrap even when already installed.
        #[arg(long)]
        force: bool,
    },
    /// Boot the other partition exactly once on the next reboot.
    TestOtherPartition,
    /// Check whether the running board is supported.
    BoardSupported,
    /// Print seconds left before the forced rollback reboot, or -1.
    ConfirmRemaining,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::from(ExitStatus::Ok.code()),
        Err(err) => {
            error!("{err}");
            eprintln!("safe-upgrade: {err}");
            ExitCode::from(err.exit_status().code())
        }
    }
}

fn run(command: Command) -> Result<(), SafeUpgradeError> {
    let mut env = UBootEnv::new();
    let mut flash = MtdFlash::new();
    let probe = ProcProbe::new();
    let introspect = FwTool::new();
    let mut host = RouterHost::new(&probe);
    let mut orchestrator =
        Orchestrator::new(&mut env, &mut flash, &probe, &mut host, &introspect);

    match command {
        Command::Show => {
            print!("{}", orchestrator.status()?);
            Ok(())
        }
        Command::Verify { firmware } => {
            orchestrator.verify(&firmware)?;
            println!("firmware is valid for this board");
            Ok(())
        }
        Command::Upgrade {
            firmware,
            no_reboot,
            disable_reboot_safety,
            force,
            preserve_archive,
            reboot_safety_timeout,
        } => {
            let opts = UpgradeOptions {
                force,
                no_reboot,
                disable_reboot_safety,
                reboot_safety_timeout,
                preserve_archive,
            };
            orchestrator.upgrade(&firmware, &opts)
        }
        Command::Confirm => orchestrator.confirm(),
        Command::Bootstrap { force } => orchestrator.bootstrap(force),
        Command::TestOtherPartition => orchestrator.test_other_partition(),
        Command::BoardSupported => {
            let board = orchestrator.require_supported_board()?;
            println!("{board}");
            Ok(())
        }
        Command::ConfirmRemaining => {
            println!("{}", rollback::confirm_remaining(&probe));
            Ok(())
        }
    }
}
