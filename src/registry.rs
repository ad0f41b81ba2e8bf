//! # Container Name Registry
//!
//! Publishes the names of running containers so developers, browsers, and
//! the provisioning runner can reach them by domain instead of by address.
//! The default implementation maintains a marked block in the system hosts
//! file; everything outside the markers is left untouched, and refreshing
//! rewrites only the block.

use crate::error::Result;
use log::debug;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// First line of the managed hosts block.
pub const BLOCK_START: &str = "# DORK START";

/// Last line of the managed hosts block.
pub const BLOCK_END: &str = "# DORK END";

/// Trait for publishing container names - allows mocking in tests.
pub trait NameRegistry: Send + Sync {
    /// Replaces the registry content with the given `(domain, address)`
    /// entries.
    fn refresh(&self, entries: &[(String, String)]) -> Result<()>;
}

/// The default implementation of `NameRegistry`, which maintains a marked
/// block in a hosts file.
#[derive(Debug)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    pub fn new(path: PathBuf) -> HostsFile {
        HostsFile { path }
    }

    fn render_block(entries: &[(String, String)]) -> String {
        let mut block = String::from(BLOCK_START);
        block.push('\n');
        for (domain, address) in entries {
            block.push_str(&format!("{} {}\n", address, domain));
        }
        block.push_str(BLOCK_END);
        block
    }
}

impl NameRegistry for HostsFile {
    fn refresh(&self, entries: &[(String, String)]) -> Result<()> {
        let mut content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        let block = Self::render_block(entries);
        let marker = Regex::new(&format!("{}\n(?s:.*?){}", BLOCK_START, BLOCK_END))?;
        if marker.is_match(&content) {
            content = marker
                .replace(&content, regex::NoExpand(&block))
                .into_owned();
        } else {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(&block);
            content.push('\n');
        }

        debug!(
            "Publishing {} names to {}",
            entries.len(),
            self.path.display()
        );
        fs::write(&self.path, content)?;
        Ok(())
    }
}
