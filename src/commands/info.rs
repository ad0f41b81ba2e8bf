//! # Info Command Implementation
//!
//! This module implements the `info` subcommand, which prints a detailed
//! block per workspace: repository location, branch and head, the derived
//! classifications, the active container and image, how many commits the
//! container lags behind, and the roles that would provision it.
//!
//! This command is a safe, read-only operation that does not touch any
//! containers.

use anyhow::Result;

use dork::dork::Dork;
use dork::output::{mode_cell, state_cell, status_cell, OutputConfig};

/// Execute the `info` command.
pub fn execute(dorks: &[Dork], output: &OutputConfig) -> Result<()> {
    for (index, dork) in dorks.iter().enumerate() {
        if index > 0 {
            println!();
        }
        print_workspace(dork, output)?;
    }
    Ok(())
}

fn print_workspace(dork: &Dork, output: &OutputConfig) -> Result<()> {
    let repository = dork.repository();
    println!("{}", dork.name());
    println!("  directory: {}", repository.directory().display());
    println!(
        "  branch:    {} (head {})",
        repository.branch(),
        short_hash(repository.head())
    );
    println!(
        "  mode:      {}  state: {}  status: {}",
        mode_cell(output, dork.mode()),
        state_cell(output, dork.state()?),
        status_cell(output, dork.status()?)
    );

    match dork.container()? {
        Some(container) => {
            let address = container.address().unwrap_or("-");
            println!(
                "  container: {} ({}, {})",
                container.name(),
                address,
                dork.domain()
            );
            let behind = dork.commits_behind()?;
            if behind > 0 {
                println!("  behind:    {} commits", behind);
            }
        }
        None => println!("  container: -"),
    }

    match dork.image()? {
        Some(image) => println!("  image:     {}", image.name()),
        None => println!("  image:     -"),
    }

    let roles = dork.role_names()?;
    if roles.is_empty() {
        println!("  roles:     -");
    } else {
        println!("  roles:     {}", roles.join(", "));
    }
    Ok(())
}

/// Shortens a commit hash for display. Test fixtures use short hashes
/// already; real ones get the usual seven characters.
fn short_hash(hash: &str) -> &str {
    if hash.len() > 7 {
        &hash[..7]
    } else {
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_truncates_long_hashes() {
        assert_eq!(
            short_hash("0123456789abcdef0123456789abcdef01234567"),
            "0123456"
        );
    }

    #[test]
    fn test_short_hash_keeps_short_hashes() {
        assert_eq!(short_hash("c3"), "c3");
        assert_eq!(short_hash("new"), "new");
    }
}
