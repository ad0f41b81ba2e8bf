//! # Clean Command Implementation
//!
//! This module implements the `clean` subcommand, which removes containers
//! and images that newer commits have superseded. Server workspaces widen
//! the scope to their whole project and also reclaim the bind-mounted host
//! directories of removed containers.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::{emoji, OutputConfig};

/// Execute the `clean` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    let mut failed = 0;
    for dork in dorks {
        match dork.clean() {
            Ok(report) => println!(
                "{} {}: removed {} containers and {} images",
                emoji(output, "🧹", "[CLEAN]"),
                dork.name(),
                report.containers,
                report.images
            ),
            Err(err) => {
                failed += 1;
                eprintln!("{} {}: {}", emoji(output, "❌", "[FAIL]"), dork.name(), err);
            }
        }
    }
    super::finish(failed, dorks.len())
}
