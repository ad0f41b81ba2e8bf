//! # Configuration Schema and Parsing
//!
//! This module defines the data structures that represent the `dork.ini`
//! configuration file, as well as the logic for loading it. Settings are
//! merged from a fixed list of locations, with later files overriding
//! earlier ones:
//!
//! 1. `/etc/dork/dork.ini` — system-wide settings
//! 2. `~/.dork.ini` — per-user settings
//! 3. an explicit `--config` path, when given
//!
//! ## Key Components
//!
//! - **`Config`**: Typed view of the `[dork]` section. Every key has a
//!   default, so a missing file or section yields a fully usable
//!   configuration.
//!
//! - **Project sections**: Any section other than `[dork]` holds per-project
//!   variables, exposed through [`Config::variables`]. These override role
//!   settings when provisioning runs.
//!
//! List-valued keys use the conventions of the file format they live in:
//! `roles_path` is colon-separated, `root_branches` is comma-separated.
//! Numeric keys are validated at load time and report a `Config` error with
//! a hint rather than silently falling back.

use crate::error::{Error, Result};
use ini::Ini;
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Typed configuration for the dork tool.
///
/// Constructed with defaults and refined by merging INI files on top; see
/// the module documentation for the merge order.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the project sources on the host.
    pub host_source_directory: PathBuf,
    /// Directory containing the project builds on the host.
    pub host_build_directory: PathBuf,
    /// Directory containing the project logs on the host.
    pub host_log_directory: PathBuf,
    /// Directory the project source is mounted at inside a container.
    pub container_source_directory: String,
    /// Directory the project build is mounted at inside a container.
    pub container_build_directory: String,
    /// Directory the project logs are mounted at inside a container.
    pub container_log_directory: String,
    /// Directories scanned for provisioning roles, in order.
    pub roles_path: Vec<PathBuf>,
    /// Image a container is created from when no valid ancestor exists.
    pub base_image: String,
    /// Branches that may bootstrap containers from the base image.
    pub root_branches: Vec<String>,
    /// Maximum number of simultaneously running containers. 0 means
    /// unlimited.
    pub max_containers: usize,
    /// Seconds to wait for a started container to become reachable.
    pub startup_timeout: u64,
    /// Domain suffix appended to container hostnames.
    pub domain_suffix: String,
    /// Hosts file the name registry maintains its managed block in.
    pub hosts_file: PathBuf,
    /// Per-project variables from sections other than `[dork]`.
    projects: HashMap<String, HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host_source_directory: PathBuf::from("/var/source"),
            host_build_directory: PathBuf::from("/var/build"),
            host_log_directory: PathBuf::from("/var/log/dork"),
            container_source_directory: "/var/source".to_string(),
            container_build_directory: "/var/build".to_string(),
            container_log_directory: "/var/log/dork".to_string(),
            roles_path: vec![
                PathBuf::from("/etc/ansible/roles"),
                PathBuf::from("/opt/roles"),
            ],
            base_image: "dork/container".to_string(),
            root_branches: vec!["main".to_string(), "master".to_string()],
            max_containers: 0,
            startup_timeout: 30,
            domain_suffix: "dork".to_string(),
            hosts_file: PathBuf::from("/etc/hosts"),
            projects: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from the standard locations, optionally
    /// followed by an explicit path. Missing files are skipped; unreadable
    /// or malformed files are errors.
    pub fn load(extra: Option<&Path>) -> Result<Config> {
        let mut paths: Vec<PathBuf> = vec![PathBuf::from("/etc/dork/dork.ini")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".dork.ini"));
        }
        if let Some(path) = extra {
            paths.push(path.to_path_buf());
        }

        let mut config = Config::default();
        for path in paths {
            if !path.is_file() {
                debug!("Skipping absent configuration file {}", path.display());
                continue;
            }
            debug!("Reading configuration from {}", path.display());
            let ini = Ini::load_from_file(&path)?;
            config.merge_ini(&ini)?;
        }
        Ok(config)
    }

    /// Parses a configuration from an INI string on top of the defaults.
    pub fn from_str(content: &str) -> Result<Config> {
        let ini = Ini::load_from_str(content).map_err(ini::Error::Parse)?;
        let mut config = Config::default();
        config.merge_ini(&ini)?;
        Ok(config)
    }

    /// Merges one parsed INI file over the current values. Keys present in
    /// the file win; everything else is left alone.
    pub fn merge_ini(&mut self, ini: &Ini) -> Result<()> {
        if let Some(section) = ini.section(Some("dork")) {
            for (key, value) in section.iter() {
                self.apply(key, value)?;
            }
        }
        for (name, section) in ini.iter() {
            let name = match name {
                Some("dork") | None => continue,
                Some(name) => name,
            };
            let vars = self.projects.entry(name.to_string()).or_default();
            for (key, value) in section.iter() {
                vars.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "host_source_directory" => self.host_source_directory = PathBuf::from(value),
            "host_build_directory" => self.host_build_directory = PathBuf::from(value),
            "host_log_directory" => self.host_log_directory = PathBuf::from(value),
            "container_source_directory" => self.container_source_directory = value.to_string(),
            "container_build_directory" => self.container_build_directory = value.to_string(),
            "container_log_directory" => self.container_log_directory = value.to_string(),
            "roles_path" => {
                self.roles_path = value
                    .split(':')
                    .filter(|part| !part.is_empty())
                    .map(PathBuf::from)
                    .collect();
            }
            "base_image" => self.base_image = value.to_string(),
            "root_branches" => {
                self.root_branches = value
                    .split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "max_containers" => {
                self.max_containers = value.parse().map_err(|_| Error::Config {
                    message: format!("max_containers must be an integer, got \"{}\"", value),
                    hint: Some("use 0 for unlimited".to_string()),
                })?;
            }
            "startup_timeout" => {
                self.startup_timeout = value.parse().map_err(|_| Error::Config {
                    message: format!("startup_timeout must be a number of seconds, got \"{}\"", value),
                    hint: None,
                })?;
            }
            "domain_suffix" => self.domain_suffix = value.to_string(),
            "hosts_file" => self.hosts_file = PathBuf::from(value),
            other => debug!("Ignoring unknown configuration key \"{}\"", other),
        }
        Ok(())
    }

    /// Returns the configured variables for a project, empty when the
    /// project has no section.
    pub fn variables(&self, project: &str) -> HashMap<String, String> {
        self.projects.get(project).cloned().unwrap_or_default()
    }

    /// True when the branch may bootstrap containers from the base image.
    pub fn is_root_branch(&self, branch: &str) -> bool {
        self.root_branches.iter().any(|b| b == branch)
    }
}
