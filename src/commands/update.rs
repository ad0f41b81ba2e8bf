//! # Update Command Implementation
//!
//! This module implements the `update` subcommand, the everyday workhorse:
//! create and start the container when needed, provision the changes
//! between the container commit and the repository head, then clean up
//! superseded containers and images.

use anyhow::Result;
use clap::Args;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Bring workspace containers up to date with their repositories.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Run a full provisioning pass instead of only the update tags
    /// resolved from the changed files.
    #[arg(long)]
    pub full: bool,
}

/// Execute the `update` command.
pub fn execute(args: UpdateArgs, dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, |dork| {
        dork.create(None)?;
        dork.start()?;
        dork.update(args.full)?;
        dork.clean().map(|_| ())
    })
}
