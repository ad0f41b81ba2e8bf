//! # Create Command Implementation
//!
//! This module implements the `create` subcommand, which makes sure each
//! workspace has a container. Workspaces that already have one are left
//! alone; the rest get a container built from the best starting image the
//! commit ancestry offers, or from an explicitly requested image.

use anyhow::Result;
use clap::Args;

use dork::dork::Dork;
use dork::output::OutputConfig;

/// Create missing workspace containers.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image to start from instead of the closest ancestor image. Must
    /// name an existing image at or below the repository head.
    #[arg(long, value_name = "IMAGE")]
    pub image: Option<String>,
}

/// Execute the `create` command.
pub fn execute(args: CreateArgs, dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    super::run(dorks, output, |dork| dork.create(args.image.as_deref()))
}
