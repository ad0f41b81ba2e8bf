//! # Remove Command Implementation
//!
//! This module implements the `remove` subcommand, which removes every
//! container of each workspace (stopping running ones first). Workstation
//! workspaces also drop all of their project's images, and dangling images
//! are swept in any mode.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::{emoji, OutputConfig};

/// Execute the `remove` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    let mut failed = 0;
    for dork in dorks {
        match dork.remove() {
            Ok(report) => println!(
                "{} {}: removed {} containers, {} images, {} dangling",
                emoji(output, "🗑️", "[REMOVED]"),
                dork.name(),
                report.containers,
                report.images,
                report.dangling
            ),
            Err(err) => {
                failed += 1;
                eprintln!("{} {}: {}", emoji(output, "❌", "[FAIL]"), dork.name(), err);
            }
        }
    }
    super::finish(failed, dorks.len())
}
