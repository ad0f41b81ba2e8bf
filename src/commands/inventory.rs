//! # Inventory Command Implementation
//!
//! This module implements the `inventory` subcommand, which prints one
//! provisioning inventory line per running workspace container. The output
//! mirrors the hosts-file block the name registry maintains, in a form an
//! Ansible invocation can consume directly.

use anyhow::Result;

use dork::dork::Dork;

/// Execute the `inventory` command.
pub fn execute(dorks: &[Dork]) -> Result<()> {
    for dork in dorks {
        let Some(container) = dork.container()? else {
            continue;
        };
        if !container.running() {
            continue;
        }
        if let Some(address) = container.address() {
            println!("{}", entry(&dork.domain(), address));
        }
    }
    Ok(())
}

fn entry(domain: &str, address: &str) -> String {
    format!("{} ansible_host={}", domain, address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_format() {
        assert_eq!(
            entry("demo.feature.dork", "172.17.0.2"),
            "demo.feature.dork ansible_host=172.17.0.2"
        );
    }
}
