//! # Boot Command Implementation
//!
//! This module implements the `boot` subcommand, meant to run once after a
//! host reboot: start every workspace that already has a container, and
//! leave the rest untouched. Unlike `start`, boot never creates anything.

use anyhow::Result;
use log::debug;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Execute the `boot` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, |dork| {
        if dork.container()?.is_none() {
            debug!("[{}] No container, skipping boot", dork.name());
            return Ok(());
        }
        dork.start()
    })
}
