//! # Workspace Lifecycle Engine
//!
//! This module ties the collaborators together. A [`Dork`] pairs one git
//! working tree with one container workspace and drives it through the
//! lifecycle: repository → image → container → running, with provisioning
//! runs keeping the container in sync with the checked-out commit.
//!
//! ## Key Components
//!
//! - **`Services`**: The collaborator bundle one command invocation works
//!   with: configuration, the memoized ancestry view, the role store, the
//!   container engine, the provisioner and the name registry.
//!
//! - **`Dork`**: One managed workspace. Identity (`project`, `instance`) is
//!   derived from the repository path relative to the configured source
//!   root; everything else is recomputed from live engine state on demand.
//!
//! - **`Mode` / `State` / `Status`**: Derived classifications. Mode tells
//!   workstation from server checkouts, state tracks the engine resource
//!   progression, status compares the container against the repository head.
//!
//! Lifecycle operations return `Result` and are composed into chains by the
//! command layer; the first failure aborts the chain for that workspace and
//! leaves all others untouched.

use crate::config::Config;
use crate::engine::{Container, ContainerEngine, DockerCli, Image};
use crate::error::{Error, Result};
use crate::git::{self, Ancestry, Repository, SystemGit, SENTINEL};
use crate::registry::{HostsFile, NameRegistry};
use crate::roles::{RoleStore, DEFAULT_TRIGGER};
use crate::runner::{AnsiblePlaybook, Provisioner};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How a workspace is used, derived from its path and branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A personal checkout: project and instance segments are equal.
    Workstation,
    /// A branch checkout maintained by automation: the instance segment is
    /// the checked-out branch and that branch is a configured root branch.
    Server,
    /// Anything else, managed by hand.
    Manual,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Workstation => write!(f, "WORKSTATION"),
            Mode::Server => write!(f, "SERVER"),
            Mode::Manual => write!(f, "MANUAL"),
        }
    }
}

/// How far along the engine resources for a workspace are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Only the repository exists.
    Repository,
    /// An image exists but no container.
    Image,
    /// A container exists but is not running.
    Container,
    /// The container is running.
    Running,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Repository => write!(f, "REPOSITORY"),
            State::Image => write!(f, "IMAGE"),
            State::Container => write!(f, "CONTAINER"),
            State::Running => write!(f, "RUNNING"),
        }
    }
}

/// How fresh the container is relative to the repository head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No container, or one still carrying the sentinel hash.
    New,
    /// The container hash equals the repository head.
    Clean,
    /// The container lags behind the repository head.
    Dirty,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::New => write!(f, "NEW"),
            Status::Clean => write!(f, "CLEAN"),
            Status::Dirty => write!(f, "DIRTY"),
        }
    }
}

/// What `clean` removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanReport {
    pub containers: usize,
    pub images: usize,
}

/// What `remove` removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveReport {
    pub containers: usize,
    pub images: usize,
    pub dangling: usize,
}

/// The collaborators one command invocation works with.
///
/// Constructed once per process; the ancestry memo and the role cache live
/// here so every workspace touched by the same command shares them.
pub struct Services {
    config: Config,
    ancestry: Ancestry,
    roles: RoleStore,
    engine: Arc<dyn ContainerEngine>,
    provisioner: Arc<dyn Provisioner>,
    registry: Arc<dyn NameRegistry>,
}

impl Services {
    pub fn new(
        config: Config,
        git: Arc<dyn git::GitOps>,
        engine: Arc<dyn ContainerEngine>,
        provisioner: Arc<dyn Provisioner>,
        registry: Arc<dyn NameRegistry>,
    ) -> Services {
        Services {
            ancestry: Ancestry::new(git),
            roles: RoleStore::new(),
            engine,
            provisioner,
            registry,
            config,
        }
    }

    /// Wires up the system collaborators: `git`, `docker`,
    /// `ansible-playbook` and the hosts file from the configuration.
    pub fn with_defaults(config: Config) -> Services {
        let registry = HostsFile::new(config.hosts_file.clone());
        Services::new(
            config,
            Arc::new(SystemGit),
            Arc::new(DockerCli),
            Arc::new(AnsiblePlaybook),
            Arc::new(registry),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ancestry(&self) -> &Ancestry {
        &self.ancestry
    }

    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn provisioner(&self) -> &dyn Provisioner {
        self.provisioner.as_ref()
    }

    pub fn registry(&self) -> &dyn NameRegistry {
        self.registry.as_ref()
    }
}

/// One managed workspace: a git repository paired with the containers and
/// images that carry its name.
pub struct Dork {
    services: Arc<Services>,
    repository: Repository,
    project: String,
    instance: String,
}

impl Dork {
    pub fn new(services: Arc<Services>, repository: Repository) -> Dork {
        let (project, instance) = identity(
            repository.directory(),
            &services.config().host_source_directory,
        );
        Dork {
            services,
            repository,
            project,
            instance,
        }
    }

    /// Discovers every repository at or under `root` and wraps each in a
    /// `Dork`, sorted by project and then by commit ancestry so older heads
    /// of one project come first. Repositories whose head cannot be
    /// resolved are skipped with a warning.
    pub fn scan(services: &Arc<Services>, root: &Path) -> Vec<Dork> {
        let mut dorks = Vec::new();
        for directory in git::scan(root) {
            match Repository::open(&directory, services.ancestry().git()) {
                Ok(repository) => dorks.push(Dork::new(Arc::clone(services), repository)),
                Err(err) => warn!("Skipping {}: {}", directory.display(), err),
            }
        }

        let mut heads: HashMap<String, Vec<String>> = HashMap::new();
        for dork in &dorks {
            heads
                .entry(dork.project.clone())
                .or_default()
                .push(dork.repository.head().to_string());
        }

        dorks.sort_by_cached_key(|dork| {
            let siblings = heads.get(&dork.project).map(Vec::as_slice).unwrap_or(&[]);
            let rank = services.ancestry().rank(
                dork.repository.directory(),
                dork.repository.head(),
                siblings,
            );
            (dork.project.clone(), rank, dork.instance.clone())
        });
        dorks
    }

    /// Stops the longest-running containers until at most
    /// `max_containers` are left running. A limit of zero means unlimited.
    pub fn enforce_max_containers(services: &Services) -> Result<()> {
        let limit = services.config().max_containers;
        if limit == 0 {
            return Ok(());
        }

        let mut running: Vec<Container> = services
            .engine()
            .containers()?
            .into_iter()
            .filter(Container::running)
            .collect();
        // Newest first, so the oldest get popped off the end.
        running.sort_by_key(|container| {
            std::cmp::Reverse(container.started().unwrap_or(DateTime::<Utc>::MIN_UTC))
        });

        let mut stopped = 0;
        while running.len() > limit {
            let Some(oldest) = running.pop() else {
                break;
            };
            debug!("Too many containers running, stopping {}", oldest.name());
            services.engine().stop(oldest.id())?;
            stopped += 1;
        }
        if stopped > 0 {
            info!(
                "Stopped {} containers to respect the limit of {}",
                stopped, limit
            );
            refresh_registry(services)?;
        }
        Ok(())
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The display name: `project` alone for workstation checkouts,
    /// `project.instance` otherwise.
    pub fn name(&self) -> String {
        if self.project == self.instance {
            self.project.clone()
        } else {
            format!("{}.{}", self.project, self.instance)
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The registered domain name of this workspace's container.
    pub fn domain(&self) -> String {
        let suffix = &self.services.config().domain_suffix;
        if self.project == self.instance {
            format!("{}.{}", self.project, suffix)
        } else {
            format!("{}.{}.{}", self.project, self.instance, suffix)
        }
    }

    pub fn mode(&self) -> Mode {
        derive_mode(
            &self.project,
            &self.instance,
            self.repository.branch(),
            self.services.config(),
        )
    }

    pub fn state(&self) -> Result<State> {
        if let Some(container) = self.container()? {
            if container.running() {
                return Ok(State::Running);
            }
            return Ok(State::Container);
        }
        if self.image()?.is_some() {
            return Ok(State::Image);
        }
        Ok(State::Repository)
    }

    pub fn status(&self) -> Result<Status> {
        let container = self.container()?;
        Ok(self.status_of(container.as_ref()))
    }

    fn status_of(&self, container: Option<&Container>) -> Status {
        match container {
            None => Status::New,
            Some(container) if container.hash() == SENTINEL => Status::New,
            Some(container) if container.hash() == self.repository.head() => Status::Clean,
            Some(_) => Status::Dirty,
        }
    }

    /// Number of commits between the active container and the repository
    /// head. Zero when no container exists or the container is new.
    pub fn commits_behind(&self) -> Result<usize> {
        match self.container()? {
            Some(container) => {
                let commits = self.services.ancestry().commits_between(
                    self.repository.directory(),
                    container.hash(),
                    self.repository.head(),
                )?;
                Ok(commits.len())
            }
            None => Ok(0),
        }
    }

    /// Names of the roles that would provision this workspace, in order.
    pub fn role_names(&self) -> Result<Vec<String>> {
        let set = self
            .services
            .roles()
            .load(&self.repository, &self.services.config().roles_path)?;
        Ok(set
            .tree()?
            .iter()
            .map(|role| role.name().to_string())
            .collect())
    }

    /// The active container: among those named for this project and
    /// instance, the one whose hash is the closest ancestor of the
    /// repository head.
    pub fn container(&self) -> Result<Option<Container>> {
        let candidates: Vec<Container> = self
            .services
            .engine()
            .containers()?
            .into_iter()
            .filter(|c| c.project() == self.project && c.instance() == self.instance)
            .collect();
        Ok(self.closest_container(&candidates)?.cloned())
    }

    /// The closest project image at or below the repository head.
    pub fn image(&self) -> Result<Option<Image>> {
        let candidates: Vec<Image> = self
            .services
            .engine()
            .images()?
            .into_iter()
            .filter(|i| i.project() == self.project)
            .collect();
        let closest = self.services.ancestry().closest(
            self.repository.directory(),
            &candidates,
            self.repository.head(),
            |image: &Image| image.hash(),
        )?;
        Ok(closest.cloned())
    }

    fn closest_container<'a>(&self, candidates: &'a [Container]) -> Result<Option<&'a Container>> {
        self.services.ancestry().closest(
            self.repository.directory(),
            candidates,
            self.repository.head(),
            |container: &Container| container.hash(),
        )
    }

    /// Ensures a container exists for this workspace. An existing active
    /// container makes this a no-op; otherwise the starting image is
    /// resolved per the documented priority and a stopped container is
    /// created from it.
    pub fn create(&self, start_image: Option<&str>) -> Result<()> {
        let name = self.name();
        debug!("[{}] Attempting to create container", name);

        if let Some(container) = self.container()? {
            debug!("[{}] Reusing existing container {}", name, container.name());
            return Ok(());
        }
        info!("[{}] No container found, creating a new one", name);

        let image = match start_image {
            Some(requested) => self.requested_image(requested)?,
            None => self.starting_image()?,
        };

        let container_name = format!("{}.{}.{}", self.project, self.instance, image.hash());
        let volumes = self.volumes();
        self.services
            .engine()
            .create(&container_name, image.name(), &volumes, &self.domain())?;
        info!(
            "[{}] Successfully created {} from {}",
            name,
            container_name,
            image.name()
        );
        Ok(())
    }

    /// Resolves an explicitly requested starting image. The image must
    /// exist and its hash must sit at or below the repository head.
    fn requested_image(&self, requested: &str) -> Result<Image> {
        let image = self
            .services
            .engine()
            .images()?
            .into_iter()
            .find(|image| image.name() == requested)
            .ok_or_else(|| Error::StartImageNotFound {
                name: requested.to_string(),
            })?;

        let valid = self.services.ancestry().less_or_equal(
            self.repository.directory(),
            image.hash(),
            self.repository.head(),
        )?;
        if !valid {
            return Err(Error::InvalidStartImage {
                name: requested.to_string(),
            });
        }
        info!("[{}] Using {} as new starting point", self.name(), requested);
        Ok(image)
    }

    /// Resolves the starting image when none was requested: the newer of
    /// the closest project image and the closest project container (the
    /// latter committed first), falling back to the configured base image
    /// on root branches.
    fn starting_image(&self) -> Result<Image> {
        let name = self.name();
        let image = self.image()?;

        // Containers of sibling instances qualify as starting points too.
        let candidates: Vec<Container> = self
            .services
            .engine()
            .containers()?
            .into_iter()
            .filter(|c| c.project() == self.project)
            .collect();
        let container = self.closest_container(&candidates)?.cloned();

        match (image, container) {
            (Some(image), Some(container)) => {
                debug!(
                    "[{}] Comparing {} with {}",
                    name,
                    container.name(),
                    image.name()
                );
                let newer = image.hash() == SENTINEL
                    || self.services.ancestry().ancestor_strict(
                        self.repository.directory(),
                        image.hash(),
                        container.hash(),
                    )?;
                if newer {
                    debug!("[{}] {} is newer than {}", name, container.name(), image.name());
                    self.commit_container(&container)
                } else {
                    debug!("[{}] Reusing existing image {}", name, image.name());
                    Ok(image)
                }
            }
            (None, Some(container)) => {
                info!("[{}] No image found, committing {}", name, container.name());
                self.commit_container(&container)
            }
            (Some(image), None) => {
                debug!("[{}] No container found, building from {}", name, image.name());
                Ok(image)
            }
            (None, None) => {
                let config = self.services.config();
                if config.is_root_branch(self.repository.branch()) {
                    warn!(
                        "[{}] No image or container, starting from {}",
                        name, config.base_image
                    );
                    Ok(Image::bootstrap(&config.base_image))
                } else {
                    Err(Error::NoValidStartingPoint {
                        branch: self.repository.branch().to_string(),
                        roots: config.root_branches.clone(),
                    })
                }
            }
        }
    }

    /// Commits a container to `project/hash` and returns the fresh image
    /// record from a new listing.
    fn commit_container(&self, container: &Container) -> Result<Image> {
        let image_name = format!("{}/{}", self.project, container.hash());
        info!("[{}] Committing new image {}", self.name(), image_name);
        self.services.engine().commit(container.id(), &image_name)?;
        self.services
            .engine()
            .images()?
            .into_iter()
            .find(|image| image.name() == image_name)
            .ok_or_else(|| Error::Engine {
                command: format!("docker commit {}", container.name()),
                stderr: format!("committed image {} missing from listing", image_name),
            })
    }

    /// The bind mounts a new container gets: the working tree plus
    /// project/instance scoped build and log directories.
    fn volumes(&self) -> Vec<(PathBuf, String)> {
        let config = self.services.config();
        vec![
            (
                self.repository.directory().to_path_buf(),
                config.container_source_directory.clone(),
            ),
            (
                config
                    .host_build_directory
                    .join(&self.project)
                    .join(&self.instance),
                config.container_build_directory.clone(),
            ),
            (
                config
                    .host_log_directory
                    .join(&self.project)
                    .join(&self.instance),
                config.container_log_directory.clone(),
            ),
        ]
    }

    /// Starts the active container, stopping any running sibling of the
    /// same workspace first, and waits until it answers the reachability
    /// probe. Refreshes the name registry and enforces the running-count
    /// limit afterwards.
    pub fn start(&self) -> Result<()> {
        let name = self.name();
        debug!("[{}] Attempting to start container", name);

        let container = self.container()?.ok_or_else(|| Error::NoMatchingContainer {
            workspace: name.clone(),
        })?;

        if container.running() {
            info!("[{}] No need to start, container already running", name);
            return Ok(());
        }

        // Only one container per workspace may run at a time.
        for sibling in self.services.engine().containers()? {
            if sibling.project() == self.project
                && sibling.instance() == self.instance
                && sibling.running()
                && sibling.id() != container.id()
            {
                info!("[{}] Stopping sibling {}", name, sibling.name());
                self.services.engine().stop(sibling.id())?;
            }
        }

        self.services.engine().start(container.id())?;
        self.await_reachable(&container)?;

        refresh_registry(&self.services)?;
        info!("[{}] Successfully started container", name);
        Dork::enforce_max_containers(&self.services)
    }

    /// Polls the freshly started container once a second until it answers
    /// the reachability probe or the configured timeout elapses.
    fn await_reachable(&self, container: &Container) -> Result<()> {
        let timeout = self.services.config().startup_timeout;
        let deadline = Duration::from_secs(timeout);
        let begin = Instant::now();
        loop {
            let current = self
                .services
                .engine()
                .containers()?
                .into_iter()
                .find(|c| c.id() == container.id());
            if let Some(address) = current.as_ref().and_then(Container::address) {
                if self.services.engine().is_reachable(address) {
                    return Ok(());
                }
            }
            if begin.elapsed() >= deadline {
                return Err(Error::StartupTimeout {
                    name: container.name().to_string(),
                    seconds: timeout,
                });
            }
            debug!("[{}] Container not reachable yet, retrying", self.name());
            thread::sleep(Duration::from_secs(1));
        }
    }

    /// Stops the active container. Lenient: a missing or already stopped
    /// container is not an error.
    pub fn stop(&self) -> Result<()> {
        let name = self.name();
        debug!("[{}] Attempting to stop container", name);

        let Some(container) = self.container()? else {
            warn!("[{}] Cannot stop, no matching container found", name);
            return Ok(());
        };
        if !container.running() {
            info!("[{}] No need to stop, container not running", name);
            return Ok(());
        }

        self.services.engine().stop(container.id())?;
        refresh_registry(&self.services)?;
        info!("[{}] Successfully stopped container", name);
        Ok(())
    }

    /// Brings the running container up to date with the repository head.
    ///
    /// A new container (or `full == true`) gets an unfiltered provisioning
    /// run; otherwise the update tags are resolved from the files changed
    /// between the container commit and head. On success the container is
    /// renamed to the head hash, restarted, and on root-branch workstations
    /// promoted to a new image.
    pub fn update(&self, full: bool) -> Result<()> {
        let name = self.name();
        debug!("[{}] Attempting to run update", name);

        let container = self.container()?.ok_or_else(|| Error::NoMatchingContainer {
            workspace: name.clone(),
        })?;
        if !container.running() {
            return Err(Error::ContainerNotRunning {
                name: container.name().to_string(),
            });
        }

        let head = self.repository.head().to_string();
        let fresh = full || self.status_of(Some(&container)) == Status::New;

        let mut tags: Vec<String> = Vec::new();
        if fresh {
            // Unfiltered run; role metadata may have changed underneath us.
            self.services.roles().clear(self.repository.directory());
            warn!("[{}] Container is new, running full build", name);
        } else {
            let changes = self.services.ancestry().files_changed(
                self.repository.directory(),
                &head,
                container.hash(),
            )?;
            info!("[{}] Found {} changed files", name, changes.len());

            let set = self
                .services
                .roles()
                .load(&self.repository, &self.services.config().roles_path)?;
            let mut resolved = BTreeSet::new();
            for role in set.tree()? {
                let matched = set.update_tags(role.name(), &changes)?;
                if !matched.is_empty() {
                    debug!("[{}] Matched {:?} in {}", name, matched, role.name());
                    resolved.extend(matched);
                }
            }
            tags = resolved.into_iter().collect();
            if tags.is_empty() {
                tags.push("always".to_string());
            }
            info!("[{}] Applying {:?} to update", name, tags);
        }

        self.play(&tags, &[])?;

        if container.hash() != head {
            let new_name = format!("{}.{}.{}", self.project, self.instance, head);
            info!("[{}] Renaming to commit hash {}", name, head);
            self.services.engine().rename(container.id(), &new_name)?;

            // A rename leaves stale engine metadata behind unless the
            // container is cycled once.
            info!("[{}] Restarting container", name);
            self.services.engine().stop(container.id())?;
            self.services.engine().start(container.id())?;
            refresh_registry(&self.services)?;

            if self.services.config().is_root_branch(self.repository.branch())
                && self.mode() == Mode::Workstation
            {
                info!(
                    "[{}] Branch {} updated, committing new image",
                    name,
                    self.repository.branch()
                );
                self.commit()?;
            }
        }

        info!("[{}] Update successful", name);
        Ok(())
    }

    /// Runs provisioning with an explicit tag selection, bypassing the
    /// changeset computation. Used for full or forced rebuilds.
    pub fn build(&self, tags: &[String], skip_tags: &[String]) -> Result<()> {
        let name = self.name();
        self.services.roles().clear(self.repository.directory());
        debug!("[{}] Attempting to run full build", name);

        let container = self.container()?.ok_or_else(|| Error::NoMatchingContainer {
            workspace: name.clone(),
        })?;
        if !container.running() {
            return Err(Error::ContainerNotRunning {
                name: container.name().to_string(),
            });
        }

        self.play(tags, skip_tags)?;
        debug!("[{}] Build successful", name);
        Ok(())
    }

    /// Hands the triggered role tree to the provisioner. Extra variables
    /// merge role settings with the per-project configuration section, the
    /// latter winning. Disabled trigger names become skip-tags, and the
    /// reserved default trigger name never reaches the provisioner.
    fn play(&self, tags: &[String], extra_skip: &[String]) -> Result<()> {
        let config = self.services.config();
        let set = self.services.roles().load(&self.repository, &config.roles_path)?;

        let roles: Vec<String> = set
            .tree()?
            .iter()
            .map(|role| role.name().to_string())
            .collect();

        let mut extra_vars: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        for role in &roles {
            for (key, value) in set.settings(role)? {
                extra_vars.insert(key, yaml_to_json(value)?);
            }
        }
        for (key, value) in config.variables(&self.project) {
            extra_vars.insert(key, serde_json::Value::String(value));
        }
        debug!("[{}] Variables: {:?}", self.name(), extra_vars);

        let mut skip: Vec<String> = set.skip_tags()?;
        skip.extend(extra_skip.iter().cloned());
        skip.retain(|tag| tag != DEFAULT_TRIGGER);
        skip.sort();
        skip.dedup();
        debug!("[{}] Skipping tags: {:?}", self.name(), skip);

        let tags: Vec<String> = tags
            .iter()
            .filter(|tag| tag.as_str() != DEFAULT_TRIGGER)
            .cloned()
            .collect();

        let code = self.services.provisioner().apply(
            &roles,
            &self.domain(),
            self.repository.directory(),
            &extra_vars,
            &tags,
            &skip,
        )?;
        if code != 0 {
            return Err(Error::ProvisioningFailure { code });
        }
        Ok(())
    }

    /// Removes containers and images that have been superseded by newer
    /// commits. Scope is this workspace, widened to the whole project for
    /// server checkouts, where bind-mounted host directories and backing
    /// images of removed containers are cleaned up as well.
    pub fn clean(&self) -> Result<CleanReport> {
        let name = self.name();
        debug!("[{}] Attempting cleanup", name);

        let server = self.mode() == Mode::Server;
        let active = self.container()?;
        let active_id = active.as_ref().map(|c| c.id().to_string());

        let scope: Vec<Container> = self
            .services
            .engine()
            .containers()?
            .into_iter()
            .filter(|c| {
                c.project() == self.project && (server || c.instance() == self.instance)
            })
            .collect();
        if server {
            info!("[{}] Automatic server cleanup, using project scope", name);
        } else {
            info!("[{}] Instance scope cleanup", name);
        }

        let mut report = CleanReport::default();
        for container in &scope {
            if Some(container.id()) == active_id.as_deref() {
                continue;
            }
            if !self.superseded(container.hash(), &scope)? {
                continue;
            }
            // Root branch containers back the server checkouts themselves.
            if server && self.services.config().is_root_branch(container.instance()) {
                continue;
            }

            debug!("[{}] Removing {}", name, container.name());
            self.services.engine().stop(container.id())?;
            self.services.engine().remove(container.id())?;
            report.containers += 1;

            if server {
                self.remove_host_directories(container);
                self.remove_backing_image(container)?;
            }
        }

        // Images below another project image are starting points nobody
        // needs anymore.
        let images: Vec<Image> = self
            .services
            .engine()
            .images()?
            .into_iter()
            .filter(|i| i.project() == self.project)
            .collect();
        for image in &images {
            if self.superseded_image(image.hash(), &images)? {
                debug!("[{}] Removing image {}", name, image.name());
                if let Err(err) = self.services.engine().remove_image(image.id()) {
                    debug!("[{}] Keeping image {}: {}", name, image.name(), err);
                } else {
                    report.images += 1;
                }
            }
        }

        info!(
            "[{}] Cleanup successful, removed {} containers and {} images",
            name, report.containers, report.images
        );
        Ok(report)
    }

    /// Whether any sibling carries a strictly newer commit.
    fn superseded(&self, hash: &str, siblings: &[Container]) -> Result<bool> {
        for sibling in siblings {
            if self.services.ancestry().ancestor_strict(
                self.repository.directory(),
                hash,
                sibling.hash(),
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn superseded_image(&self, hash: &str, siblings: &[Image]) -> Result<bool> {
        for sibling in siblings {
            if self.services.ancestry().ancestor_strict(
                self.repository.directory(),
                hash,
                sibling.hash(),
            )? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes the host directories a removed server container had bind
    /// mounted. Failures are logged, not fatal.
    fn remove_host_directories(&self, container: &Container) {
        let config = self.services.config();
        let mounts = [
            container.host_path_for(&config.container_source_directory),
            container.host_path_for(&config.container_build_directory),
            container.host_path_for(&config.container_log_directory),
        ];
        for path in mounts.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!("[{}] Removing directory {}", self.name(), path.display());
            if let Err(err) = fs::remove_dir_all(path) {
                warn!(
                    "[{}] Unable to remove directory {}: {}",
                    self.name(),
                    path.display(),
                    err
                );
            }
        }
    }

    /// Best-effort removal of the image a removed container was created
    /// from. The base image and images still in use stay.
    fn remove_backing_image(&self, container: &Container) -> Result<()> {
        for image in self.services.engine().images()? {
            if image.id() == container.image()
                && image.name() != self.services.config().base_image
            {
                if let Err(err) = self.services.engine().remove_image(image.id()) {
                    debug!("[{}] Keeping image {}: {}", self.name(), image.name(), err);
                }
            }
        }
        Ok(())
    }

    /// Commits the active container to an image named `project/hash`,
    /// creating a new starting point for future containers. Requires the
    /// container to be clean.
    pub fn commit(&self) -> Result<()> {
        let name = self.name();
        debug!("[{}] Attempting to commit container", name);

        let container = self.container()?.ok_or_else(|| Error::NoMatchingContainer {
            workspace: name.clone(),
        })?;
        let status = self.status_of(Some(&container));
        if status != Status::Clean {
            return Err(Error::DirtyCommit {
                name: container.name().to_string(),
                status: status.to_string(),
            });
        }

        let image_name = format!("{}/{}", self.project, container.hash());
        self.services.engine().commit(container.id(), &image_name)?;
        info!("[{}] Successfully committed container to {}", name, image_name);
        Ok(())
    }

    /// Removes every container of this workspace, stopping running ones
    /// first. Workstations also drop all project images; dangling images
    /// are swept in any mode.
    pub fn remove(&self) -> Result<RemoveReport> {
        let name = self.name();
        debug!("[{}] Removing all containers", name);

        let mut report = RemoveReport::default();
        let mut stopped_any = false;
        for container in self.services.engine().containers()? {
            if container.project() != self.project || container.instance() != self.instance {
                continue;
            }
            if container.running() {
                self.services.engine().stop(container.id())?;
                stopped_any = true;
            }
            self.services.engine().remove(container.id())?;
            report.containers += 1;
            debug!("[{}] Removed {}", name, container.name());
        }
        info!("[{}] Removed {} containers", name, report.containers);
        if stopped_any {
            refresh_registry(&self.services)?;
        }

        if self.mode() == Mode::Workstation {
            warn!("[{}] Workstation mode, removing all images", name);
            for image in self.services.engine().images()? {
                if image.project() != self.project {
                    continue;
                }
                if let Err(err) = self.services.engine().remove_image(image.id()) {
                    debug!("[{}] Keeping image {}: {}", name, image.name(), err);
                } else {
                    report.images += 1;
                    debug!("[{}] Removed {}", name, image.name());
                }
            }
            info!("[{}] Removed {} images", name, report.images);
        }

        debug!("[{}] Cleaning dangling images", name);
        for id in self.services.engine().dangling_images()? {
            if let Err(err) = self.services.engine().remove_image(&id) {
                debug!("[{}] Keeping dangling image {}: {}", name, id, err);
            } else {
                report.dangling += 1;
            }
        }
        info!("[{}] Removed {} dangling images", name, report.dangling);
        Ok(report)
    }
}

/// Rewrites the registry block from the current set of running containers.
fn refresh_registry(services: &Services) -> Result<()> {
    let suffix = &services.config().domain_suffix;
    let mut entries: Vec<(String, String)> = Vec::new();
    for container in services.engine().containers()? {
        if !container.running() {
            continue;
        }
        if let Some(address) = container.address() {
            entries.push((container.domain(suffix), address.to_string()));
        }
    }
    entries.sort();
    services.registry().refresh(&entries)
}

/// Derives (project, instance) from a repository path: the first and last
/// segments relative to the source root. A repository at or outside the
/// root falls back to its own directory name for both.
fn identity(directory: &Path, root: &Path) -> (String, String) {
    if let Ok(relative) = directory.strip_prefix(root) {
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if let (Some(first), Some(last)) = (segments.first(), segments.last()) {
            return (first.clone(), last.clone());
        }
    }
    let name = directory
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| directory.display().to_string());
    (name.clone(), name)
}

fn derive_mode(project: &str, instance: &str, branch: &str, config: &Config) -> Mode {
    if project == instance {
        return Mode::Workstation;
    }
    if instance == branch && config.is_root_branch(branch) {
        return Mode::Server;
    }
    Mode::Manual
}

/// Converts a YAML settings value into the JSON the provisioner consumes.
/// YAML-only constructs have no JSON counterpart and are rejected.
fn yaml_to_json(value: serde_yaml::Value) -> Result<serde_json::Value> {
    let json = serde_json::to_value(value)?;
    Ok(json)
}
