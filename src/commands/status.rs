//! # Status Command Implementation
//!
//! This module implements the `status` subcommand, which prints one table
//! row per discovered workspace: name, mode, state, status and the address
//! of the running container.
//!
//! This command is a safe, read-only operation that does not touch any
//! containers.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::{render_status_table, OutputConfig, StatusRow};

/// Execute the `status` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    let mut rows = Vec::with_capacity(dorks.len());
    for dork in dorks {
        let container = dork.container()?;
        rows.push(StatusRow {
            name: dork.name(),
            mode: dork.mode(),
            state: dork.state()?,
            status: dork.status()?,
            address: container
                .as_ref()
                .and_then(|c| c.address())
                .map(str::to_string),
        });
    }
    print!("{}", render_status_table(output, &rows));
    Ok(())
}
