//! # Commit Command Implementation
//!
//! This module implements the `commit` subcommand, which turns each clean
//! workspace container into an image named `project/hash`, a starting point
//! future containers of the project can build on. Dirty or new containers
//! are refused; run `update` first.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Execute the `commit` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, Dork::commit)
}
