//! # Start Command Implementation
//!
//! This module implements the `start` subcommand: create the container if
//! it is missing, then start it and wait until it answers the reachability
//! probe. Starting stops any running sibling of the same workspace and
//! afterwards enforces the configured running-container limit.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Execute the `start` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, |dork| {
        dork.create(None)?;
        dork.start()
    })
}
