//! # Container Engine Interface
//!
//! This module wraps the container engine behind the [`ContainerEngine`]
//! trait. The default implementation, [`DockerCli`], shells out to the
//! `docker` binary and parses `docker inspect` JSON payloads; tests swap in
//! scripted fakes the same way the git layer does.
//!
//! ## Key Components
//!
//! - **`Container`**: A container record as the lifecycle engine sees it.
//!   The name encodes the workspace identity as `project.instance.hash`;
//!   records whose names do not follow that shape are not managed by this
//!   tool and are filtered out of listings.
//!
//! - **`Image`**: An image record named `project/hash`. A bootstrap image is
//!   constructed directly from the configured base image reference and
//!   carries the sentinel hash.
//!
//! - **`ContainerEngine`**: The operations the lifecycle engine needs:
//!   listings, create/start/stop/remove/rename/commit, image deletion, and a
//!   reachability probe.
//!
//! Listings are never cached here. Every call reflects live engine state, so
//! callers re-list after each mutating operation instead of reusing stale
//! records.

use crate::error::{Error, Result};
use crate::git::SENTINEL;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A container record, parsed from the engine's inspect output.
#[derive(Debug, Clone)]
pub struct Container {
    id: String,
    name: String,
    project: String,
    instance: String,
    hash: String,
    image: String,
    running: bool,
    address: Option<String>,
    binds: Vec<(PathBuf, String)>,
    created: Option<DateTime<Utc>>,
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
}

impl Container {
    /// Builds a container record from its engine identity. Returns `None`
    /// when the name does not follow the `project.instance.hash` naming, in
    /// which case the container is not managed by this tool.
    pub fn parse(id: &str, name: &str, image: &str, running: bool) -> Option<Container> {
        let name = name.trim_start_matches('/');
        let mut segments = name.splitn(3, '.');
        let project = segments.next()?.to_string();
        let instance = segments.next()?.to_string();
        let hash = segments.next()?.to_string();
        if project.is_empty() || instance.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Container {
            id: id.to_string(),
            name: name.to_string(),
            project,
            instance,
            hash,
            image: image.to_string(),
            running,
            address: None,
            binds: Vec::new(),
            created: None,
            started: None,
            finished: None,
        })
    }

    /// Sets the address the container is reachable at while running.
    pub fn with_address(mut self, address: &str) -> Container {
        self.address = Some(address.to_string());
        self
    }

    /// Adds one host-to-container bind mount.
    pub fn with_bind(mut self, host: &Path, container: &str) -> Container {
        self.binds.push((host.to_path_buf(), container.to_string()));
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Container {
        self.created = Some(created);
        self
    }

    pub fn with_started(mut self, started: DateTime<Utc>) -> Container {
        self.started = Some(started);
        self
    }

    pub fn with_finished(mut self, finished: DateTime<Utc>) -> Container {
        self.finished = Some(finished);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First segment of the container name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Second segment of the container name.
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The commit hash the container was last provisioned to, parsed from
    /// the third name segment.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Reference of the image the container was created from.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// The container's address, `None` unless it is running.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn started(&self) -> Option<DateTime<Utc>> {
        self.started
    }

    pub fn finished(&self) -> Option<DateTime<Utc>> {
        self.finished
    }

    /// The container's internal domain name under the given suffix. The
    /// canonical workstation (project == instance) drops the instance
    /// segment.
    pub fn domain(&self, suffix: &str) -> String {
        if self.project == self.instance {
            format!("{}.{}", self.project, suffix)
        } else {
            format!("{}.{}.{}", self.project, self.instance, suffix)
        }
    }

    /// The host directory bound to the given container directory, if any.
    pub fn host_path_for(&self, container_dir: &str) -> Option<&Path> {
        self.binds
            .iter()
            .find(|(_, target)| target == container_dir)
            .map(|(host, _)| host.as_path())
    }
}

/// An image record named `project/hash`.
#[derive(Debug, Clone)]
pub struct Image {
    id: String,
    name: String,
    project: String,
    hash: String,
}

impl Image {
    /// Builds an image record. Returns `None` when the name has no
    /// `project/hash` shape.
    pub fn parse(id: &str, name: &str) -> Option<Image> {
        let mut segments = name.splitn(2, '/');
        let project = segments.next()?.to_string();
        let hash = segments.next()?.to_string();
        if project.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Image {
            id: id.to_string(),
            name: name.to_string(),
            project,
            hash,
        })
    }

    /// A bootstrap image for repositories with no usable ancestor: the
    /// configured base reference, ordered below every real commit.
    pub fn bootstrap(name: &str) -> Image {
        Image {
            id: String::new(),
            name: name.to_string(),
            project: String::new(),
            hash: SENTINEL.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First segment of the image name.
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The commit hash the image was committed at, second name segment.
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

/// Trait for container engine operations - allows mocking in tests.
///
/// Mutating calls invalidate previously returned listings; callers are
/// expected to list again before the next derived-property read.
pub trait ContainerEngine: Send + Sync {
    /// All containers known to the engine, running or not.
    fn containers(&self) -> Result<Vec<Container>>;

    /// All tagged images known to the engine.
    fn images(&self) -> Result<Vec<Image>>;

    /// Ids of dangling (untagged) images.
    fn dangling_images(&self) -> Result<Vec<String>>;

    /// Creates a container from an image with bind mounts and a hostname.
    fn create(
        &self,
        name: &str,
        image: &str,
        volumes: &[(PathBuf, String)],
        hostname: &str,
    ) -> Result<()>;

    fn start(&self, id: &str) -> Result<()>;

    fn stop(&self, id: &str) -> Result<()>;

    fn remove(&self, id: &str) -> Result<()>;

    fn rename(&self, id: &str, name: &str) -> Result<()>;

    /// Commits a container's filesystem to a new image.
    fn commit(&self, id: &str, image_name: &str) -> Result<()>;

    fn remove_image(&self, id: &str) -> Result<()>;

    /// Whether the address answers the reachability probe.
    fn is_reachable(&self, address: &str) -> bool;
}

/// The default implementation of `ContainerEngine`, which uses the system's
/// `docker` command.
#[derive(Debug, Default)]
pub struct DockerCli;

/// Inspect payload subset for containers.
#[derive(Debug, Deserialize)]
struct InspectContainer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Created")]
    created: Option<DateTime<Utc>>,
    #[serde(rename = "State", default)]
    state: InspectState,
    #[serde(rename = "NetworkSettings", default)]
    network: InspectNetwork,
    #[serde(rename = "HostConfig", default)]
    host_config: InspectHostConfig,
}

#[derive(Debug, Default, Deserialize)]
struct InspectState {
    #[serde(rename = "Running", default)]
    running: bool,
    #[serde(rename = "StartedAt")]
    started_at: Option<DateTime<Utc>>,
    #[serde(rename = "FinishedAt")]
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Debug, Default, Deserialize)]
struct InspectHostConfig {
    #[serde(rename = "Binds")]
    binds: Option<Vec<String>>,
}

/// Inspect payload subset for images.
#[derive(Debug, Deserialize)]
struct InspectImage {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "RepoTags")]
    repo_tags: Option<Vec<String>>,
}

impl DockerCli {
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .map_err(|e| Error::Engine {
                command: format!("docker {}", args.join(" ")),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Engine {
                command: format!("docker {}", args.join(" ")),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn ids(&self, args: &[&str]) -> Result<Vec<String>> {
        Ok(self
            .run(args)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn inspect<T: serde::de::DeserializeOwned>(&self, ids: &[String]) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["inspect"];
        args.extend(ids.iter().map(String::as_str));
        let stdout = self.run(&args)?;
        Ok(serde_json::from_str(&stdout)?)
    }
}

impl InspectContainer {
    fn into_container(self) -> Option<Container> {
        let mut container =
            Container::parse(&self.id, &self.name, &self.image, self.state.running)?;
        if self.state.running && !self.network.ip_address.is_empty() {
            container = container.with_address(&self.network.ip_address);
        }
        for bind in self.host_config.binds.unwrap_or_default() {
            let mut parts = bind.splitn(3, ':');
            if let (Some(host), Some(target)) = (parts.next(), parts.next()) {
                container = container.with_bind(Path::new(host), target);
            }
        }
        if let Some(created) = self.created.filter(|t| t.timestamp() > 0) {
            container = container.with_created(created);
        }
        if let Some(started) = self.state.started_at.filter(|t| t.timestamp() > 0) {
            container = container.with_started(started);
        }
        if let Some(finished) = self.state.finished_at.filter(|t| t.timestamp() > 0) {
            container = container.with_finished(finished);
        }
        Some(container)
    }
}

impl ContainerEngine for DockerCli {
    fn containers(&self) -> Result<Vec<Container>> {
        let ids = self.ids(&["ps", "-aq", "--no-trunc"])?;
        let raw: Vec<InspectContainer> = self.inspect(&ids)?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| {
                let name = entry.name.clone();
                let container = entry.into_container();
                if container.is_none() {
                    debug!("Ignoring unmanaged container {}", name);
                }
                container
            })
            .collect())
    }

    fn images(&self) -> Result<Vec<Image>> {
        let ids = self.ids(&["images", "-q", "--no-trunc"])?;
        let raw: Vec<InspectImage> = self.inspect(&ids)?;
        Ok(raw
            .into_iter()
            .filter_map(|entry| {
                let tag = entry.repo_tags.unwrap_or_default().into_iter().next()?;
                let name = tag.split(':').next().unwrap_or(&tag).to_string();
                Image::parse(&entry.id, &name)
            })
            .collect())
    }

    fn dangling_images(&self) -> Result<Vec<String>> {
        self.ids(&["images", "-q", "--no-trunc", "-f", "dangling=true"])
    }

    fn create(
        &self,
        name: &str,
        image: &str,
        volumes: &[(PathBuf, String)],
        hostname: &str,
    ) -> Result<()> {
        let name_flag = format!("--name={}", name);
        let mut args = vec!["create", name_flag.as_str(), "-h", hostname, "-P"];
        let binds: Vec<String> = volumes
            .iter()
            .map(|(host, target)| format!("{}:{}", host.display(), target))
            .collect();
        for bind in &binds {
            args.push("-v");
            args.push(bind);
        }
        args.push(image);
        // The base images run their services under supervisord.
        args.push("/usr/bin/supervisord");
        self.run(&args)?;
        Ok(())
    }

    fn start(&self, id: &str) -> Result<()> {
        self.run(&["start", id])?;
        Ok(())
    }

    fn stop(&self, id: &str) -> Result<()> {
        self.run(&["stop", id])?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.run(&["rm", id])?;
        Ok(())
    }

    fn rename(&self, id: &str, name: &str) -> Result<()> {
        self.run(&["rename", id, name])?;
        Ok(())
    }

    fn commit(&self, id: &str, image_name: &str) -> Result<()> {
        self.run(&["commit", id, image_name])?;
        Ok(())
    }

    fn remove_image(&self, id: &str) -> Result<()> {
        self.run(&["rmi", id])?;
        Ok(())
    }

    fn is_reachable(&self, address: &str) -> bool {
        let config = dirs::home_dir()
            .map(|home| home.join(".ssh/config"))
            .filter(|path| path.is_file());
        let mut command = Command::new("ssh");
        if let Some(config) = &config {
            command.arg("-F").arg(config);
        }
        command
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(address)
            .arg("/bin/true")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_container_name_segments() {
        let container = Container::parse("1f2e", "/demo.feature.abc123", "img", false).unwrap();
        assert_eq!(container.project(), "demo");
        assert_eq!(container.instance(), "feature");
        assert_eq!(container.hash(), "abc123");
        assert_eq!(container.name(), "demo.feature.abc123");
    }

    #[test]
    fn test_parse_container_rejects_unmanaged_names() {
        assert!(Container::parse("1f2e", "/registry", "img", false).is_none());
        assert!(Container::parse("1f2e", "/only.two", "img", false).is_none());
        assert!(Container::parse("1f2e", "/..", "img", false).is_none());
    }

    #[test]
    fn test_container_domain() {
        let workstation = Container::parse("a", "demo.demo.c1", "img", true).unwrap();
        assert_eq!(workstation.domain("dork"), "demo.dork");

        let feature = Container::parse("b", "demo.feature.c1", "img", true).unwrap();
        assert_eq!(feature.domain("dork"), "demo.feature.dork");
    }

    #[test]
    fn test_container_host_path_lookup() {
        let container = Container::parse("a", "demo.demo.c1", "img", false)
            .unwrap()
            .with_bind(Path::new("/var/source/demo/demo"), "/var/source")
            .with_bind(Path::new("/var/build/demo/demo"), "/var/build");
        assert_eq!(
            container.host_path_for("/var/source"),
            Some(Path::new("/var/source/demo/demo"))
        );
        assert_eq!(container.host_path_for("/var/log/dork"), None);
    }

    #[test]
    fn test_parse_image_name() {
        let image = Image::parse("sha256:1", "demo/abc123").unwrap();
        assert_eq!(image.project(), "demo");
        assert_eq!(image.hash(), "abc123");
        assert!(Image::parse("sha256:1", "plainname").is_none());
    }

    #[test]
    fn test_bootstrap_image_carries_sentinel() {
        let image = Image::bootstrap("dork/container");
        assert_eq!(image.hash(), SENTINEL);
        assert_eq!(image.name(), "dork/container");
    }

    #[test]
    fn test_inspect_container_payload() {
        let payload = r#"
        [{
            "Id": "1f2e3d",
            "Name": "/demo.demo.c2",
            "Image": "sha256:9a8b",
            "Created": "2024-05-01T10:00:00Z",
            "State": {
                "Running": true,
                "StartedAt": "2024-05-01T10:00:05Z",
                "FinishedAt": "0001-01-01T00:00:00Z"
            },
            "NetworkSettings": { "IPAddress": "172.17.0.2" },
            "HostConfig": {
                "Binds": ["/var/source/demo/demo:/var/source"]
            }
        }]
        "#;
        let raw: Vec<InspectContainer> = serde_json::from_str(payload).unwrap();
        let container = raw.into_iter().next().unwrap().into_container().unwrap();
        assert_eq!(container.id(), "1f2e3d");
        assert!(container.running());
        assert_eq!(container.address(), Some("172.17.0.2"));
        assert_eq!(
            container.host_path_for("/var/source"),
            Some(Path::new("/var/source/demo/demo"))
        );
        assert!(container.started().is_some());
        // Docker's zero time means "never finished".
        assert!(container.finished().is_none());
    }

    #[test]
    fn test_inspect_container_stopped_has_no_address() {
        let payload = r#"
        [{
            "Id": "1f2e3d",
            "Name": "/demo.demo.c2",
            "Image": "sha256:9a8b",
            "Created": "2024-05-01T10:00:00Z",
            "State": { "Running": false },
            "NetworkSettings": { "IPAddress": "" },
            "HostConfig": {}
        }]
        "#;
        let raw: Vec<InspectContainer> = serde_json::from_str(payload).unwrap();
        let container = raw.into_iter().next().unwrap().into_container().unwrap();
        assert!(!container.running());
        assert_eq!(container.address(), None);
    }
}
