//! # Stop Command Implementation
//!
//! This module implements the `stop` subcommand. Stopping is lenient: a
//! workspace without a container, or with one that is already stopped,
//! counts as success.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Execute the `stop` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, Dork::stop)
}
