//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the `dork`
//! command-line tool. Each subcommand is defined in its own file to keep the
//! logic separated and maintainable.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and
//!   options, derived using `clap` (argument-less commands skip this).
//! - An `execute` function that takes the scanned workspaces and performs
//!   the command's logic.
//!
//! Mutating commands run one lifecycle chain per workspace through
//! [`run`]: a failure aborts the chain for that workspace, is reported,
//! and counts towards a non-zero process exit, while the remaining
//! workspaces still get their turn.

pub mod boot;
pub mod build;
pub mod clean;
pub mod commit;
pub mod create;
pub mod info;
pub mod inventory;
pub mod remove;
pub mod start;
pub mod status;
pub mod stop;
pub mod update;

use anyhow::Result;
use dork::dork::Dork;
use dork::output::{emoji, OutputConfig};

/// Runs one operation chain per workspace, reporting each outcome. Returns
/// an error when any workspace failed so the process exits non-zero.
pub(crate) fn run<F>(dorks: &[Dork], output: &OutputConfig, op: F) -> Result<()>
where
    F: Fn(&Dork) -> dork::error::Result<()>,
{
    let mut failed = 0;
    for dork in dorks {
        match op(dork) {
            Ok(()) => println!("{} {}", emoji(output, "✅", "[OK]"), dork.name()),
            Err(err) => {
                failed += 1;
                eprintln!("{} {}: {}", emoji(output, "❌", "[FAIL]"), dork.name(), err);
            }
        }
    }
    finish(failed, dorks.len())
}

/// Turns a failure count into the process outcome.
pub(crate) fn finish(failed: usize, total: usize) -> Result<()> {
    if failed > 0 {
        anyhow::bail!("{} of {} workspaces failed", failed, total);
    }
    Ok(())
}
