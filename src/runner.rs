//! # Provisioning Runner
//!
//! Applies roles to a running container by generating a one-shot playbook
//! and handing it to `ansible-playbook`. The [`Provisioner`] trait keeps the
//! lifecycle engine independent of the executor; tests record invocations
//! through a fake instead of running anything.
//!
//! The generated play targets the container's registered name, so the hosts
//! file block maintained by the name registry doubles as the inventory
//! resolver.

use crate::error::Result;
use log::{debug, info};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

/// Trait for applying provisioning roles - allows mocking in tests.
pub trait Provisioner: Send + Sync {
    /// Runs the given roles against `host` from the repository directory.
    /// `tags` limits the run to matching tasks, `skip_tags` masks tasks out.
    /// Returns the executor's exit code; a non-zero code is reported by the
    /// caller, not here.
    fn apply(
        &self,
        roles: &[String],
        host: &str,
        repository: &Path,
        extra_vars: &BTreeMap<String, serde_json::Value>,
        tags: &[String],
        skip_tags: &[String],
    ) -> Result<i32>;
}

/// The default implementation of `Provisioner`, which uses the system's
/// `ansible-playbook` command.
#[derive(Debug, Default)]
pub struct AnsiblePlaybook;

#[derive(Serialize)]
struct Play<'a> {
    hosts: &'a str,
    roles: &'a [String],
}

fn render_playbook(roles: &[String]) -> Result<String> {
    let plays = vec![Play {
        hosts: "all",
        roles,
    }];
    Ok(serde_yaml::to_string(&plays)?)
}

impl Provisioner for AnsiblePlaybook {
    fn apply(
        &self,
        roles: &[String],
        host: &str,
        repository: &Path,
        extra_vars: &BTreeMap<String, serde_json::Value>,
        tags: &[String],
        skip_tags: &[String],
    ) -> Result<i32> {
        let staging = tempfile::tempdir()?;

        let inventory = staging.path().join("inventory");
        fs::write(&inventory, format!("{}\n", host))?;

        let playbook = staging.path().join("playbook.yml");
        fs::write(&playbook, render_playbook(roles)?)?;

        let mut command = Command::new("ansible-playbook");
        command
            .arg("-i")
            .arg(&inventory)
            .arg(&playbook)
            .current_dir(repository);

        if !extra_vars.is_empty() {
            let vars = staging.path().join("vars.json");
            fs::write(&vars, serde_json::to_string(extra_vars)?)?;
            command
                .arg("--extra-vars")
                .arg(format!("@{}", vars.display()));
        }
        if !tags.is_empty() {
            command.arg("--tags").arg(tags.join(","));
        }
        if !skip_tags.is_empty() {
            command.arg("--skip-tags").arg(skip_tags.join(","));
        }

        let tag_list = if tags.is_empty() {
            "all".to_string()
        } else {
            tags.join(",")
        };
        let skip_list = if skip_tags.is_empty() {
            "none".to_string()
        } else {
            skip_tags.join(",")
        };
        info!(
            "Applying roles [{}] to {} (tags: {}, skipped: {})",
            roles.join(", "),
            host,
            tag_list,
            skip_list
        );
        debug!("Running {:?}", command);

        // Inherit stdio so the executor's own reporting reaches the user.
        let status = command.status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_playbook_lists_roles() {
        let roles = vec!["base".to_string(), "php".to_string()];
        let playbook = render_playbook(&roles).unwrap();
        assert!(playbook.contains("hosts: all"));
        assert!(playbook.contains("- base"));
        assert!(playbook.contains("- php"));
    }

    #[test]
    fn test_render_playbook_without_roles() {
        let playbook = render_playbook(&[]).unwrap();
        assert!(playbook.contains("roles: []"));
    }
}
