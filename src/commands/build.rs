//! # Build Command Implementation
//!
//! This module implements the `build` subcommand, which runs provisioning
//! with an explicit tag selection instead of the tags resolved from changed
//! files. Used for full rebuilds and for re-running individual provisioning
//! steps by hand.

use anyhow::Result;
use clap::Args;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Run a provisioning pass with explicit tag selection.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Only run provisioning tasks with these tags.
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Skip provisioning tasks with these tags.
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub skip_tags: Vec<String>,
}

/// Execute the `build` command.
pub fn execute(args: BuildArgs, dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, |dork| {
        dork.create(None)?;
        dork.start()?;
        dork.build(&args.tags, &args.skip_tags)
    })
}
