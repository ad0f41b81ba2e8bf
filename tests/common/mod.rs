//! Shared test doubles for the lifecycle integration tests.
//!
//! The fakes stand in for the real collaborators while keeping their
//! observable behavior: the engine double holds a mutable container and
//! image inventory and rejects the operations docker rejects, the git
//! double answers ancestry queries from a scripted commit graph, and the
//! provisioner and registry doubles record every invocation so tests can
//! assert on what reached them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::{Fixture, FakeGit};
//!
//! let git = FakeGit::new().with_history(&["c1", "c2"]);
//! let fixture = Fixture::new(git);
//! let directory = fixture.repository("demo", "c2", "main");
//! let dork = fixture.dork(&directory);
//! ```

use chrono::{DateTime, Duration, TimeZone, Utc};
use dork::config::Config;
use dork::dork::{Dork, Services};
use dork::engine::{Container, ContainerEngine, Image};
use dork::error::{Error, Result};
use dork::git::{GitOps, Repository};
use dork::registry::NameRegistry;
use dork::runner::Provisioner;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Git backend scripted from a commit graph.
///
/// The graph is declared up front with the builder methods; working trees
/// are registered (and may be moved to new heads) through [`FakeGit::register`],
/// which the fixture calls for every repository it creates.
pub struct FakeGit {
    repos: Mutex<HashMap<PathBuf, (String, String)>>,
    edges: HashSet<(String, String)>,
    diffs: HashMap<(String, String), Vec<String>>,
    ranges: HashMap<(String, String), Vec<String>>,
}

impl FakeGit {
    pub fn new() -> FakeGit {
        FakeGit {
            repos: Mutex::new(HashMap::new()),
            edges: HashSet::new(),
            diffs: HashMap::new(),
            ranges: HashMap::new(),
        }
    }

    /// Declares a linear history, oldest commit first, closing the
    /// ancestor relation transitively.
    pub fn with_history(mut self, commits: &[&str]) -> FakeGit {
        for (index, ancestor) in commits.iter().enumerate() {
            for descendant in &commits[index + 1..] {
                self.edges
                    .insert((ancestor.to_string(), descendant.to_string()));
            }
        }
        self
    }

    /// Declares a single ancestor/descendant pair for branched graphs.
    /// Unlike [`FakeGit::with_history`] this does not close transitively.
    #[allow(dead_code)]
    pub fn with_edge(mut self, ancestor: &str, descendant: &str) -> FakeGit {
        self.edges
            .insert((ancestor.to_string(), descendant.to_string()));
        self
    }

    /// Declares the paths `git diff` reports between two commits, in both
    /// directions.
    #[allow(dead_code)]
    pub fn with_diff(mut self, a: &str, b: &str, files: &[&str]) -> FakeGit {
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        self.diffs
            .insert((a.to_string(), b.to_string()), files.clone());
        self.diffs.insert((b.to_string(), a.to_string()), files);
        self
    }

    /// Declares the commits `git log` reports between two endpoints, in
    /// both directions.
    #[allow(dead_code)]
    pub fn with_range(mut self, a: &str, b: &str, commits: &[&str]) -> FakeGit {
        let commits: Vec<String> = commits.iter().map(|c| c.to_string()).collect();
        self.ranges
            .insert((a.to_string(), b.to_string()), commits.clone());
        self.ranges.insert((b.to_string(), a.to_string()), commits);
        self
    }

    /// Registers (or moves) the head commit and branch of a working tree.
    pub fn register(&self, directory: &Path, head: &str, branch: &str) {
        self.repos.lock().unwrap().insert(
            directory.to_path_buf(),
            (head.to_string(), branch.to_string()),
        );
    }

    fn lookup(&self, directory: &Path) -> Result<(String, String)> {
        self.repos
            .lock()
            .unwrap()
            .get(directory)
            .cloned()
            .ok_or_else(|| Error::Git {
                command: "git rev-parse HEAD".to_string(),
                directory: directory.display().to_string(),
                stderr: "not a git repository".to_string(),
            })
    }
}

impl GitOps for FakeGit {
    fn head_commit(&self, directory: &Path) -> Result<String> {
        Ok(self.lookup(directory)?.0)
    }

    fn current_branch(&self, directory: &Path) -> Result<String> {
        Ok(self.lookup(directory)?.1)
    }

    fn is_ancestor(&self, _directory: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        Ok(self
            .edges
            .contains(&(ancestor.to_string(), descendant.to_string())))
    }

    fn commits_between(&self, _directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        Ok(self
            .ranges
            .get(&(a.to_string(), b.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn changed_files(&self, _directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        Ok(self
            .diffs
            .get(&(a.to_string(), b.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

struct FakeContainer {
    id: String,
    name: String,
    image: String,
    running: bool,
    address: Option<String>,
    binds: Vec<(PathBuf, String)>,
    started: Option<DateTime<Utc>>,
}

struct FakeImage {
    id: String,
    name: String,
}

#[derive(Default)]
struct EngineState {
    containers: Vec<FakeContainer>,
    images: Vec<FakeImage>,
    dangling: Vec<String>,
    next_id: usize,
    // Monotonic start-time tick; engine starts always land after seeded
    // offsets so enforcement tests get a stable order.
    clock: i64,
    calls: Vec<String>,
}

/// In-memory container engine with docker's failure modes: removing a
/// running container fails, removing an image still referenced by a
/// container fails, and creating a container resolves the image reference
/// to the image id the way `docker inspect` reports it.
pub struct FakeEngine {
    state: Mutex<EngineState>,
    reachable: AtomicBool,
}

fn engine_error(command: String, stderr: &str) -> Error {
    Error::Engine {
        command,
        stderr: stderr.to_string(),
    }
}

fn start_time(tick: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::seconds(tick)
}

impl FakeEngine {
    pub fn new() -> FakeEngine {
        FakeEngine {
            state: Mutex::new(EngineState::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Seeds a stopped container named `project.instance.hash`, returning
    /// its id.
    pub fn add_container(&self, project: &str, instance: &str, hash: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("cid-{}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: format!("{}.{}.{}", project, instance, hash),
            image: String::new(),
            running: false,
            address: None,
            binds: Vec::new(),
            started: None,
        });
        id
    }

    /// Seeds a running container with an address and a start time
    /// `started_offset` seconds into the fake timeline.
    pub fn add_running(
        &self,
        project: &str,
        instance: &str,
        hash: &str,
        started_offset: i64,
    ) -> String {
        let mut state = self.state.lock().unwrap();
        state.clock = state.clock.max(started_offset);
        state.next_id += 1;
        let id = format!("cid-{}", state.next_id);
        let address = format!("172.17.0.{}", state.next_id + 1);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: format!("{}.{}.{}", project, instance, hash),
            image: String::new(),
            running: true,
            address: Some(address),
            binds: Vec::new(),
            started: Some(start_time(started_offset)),
        });
        id
    }

    /// Seeds a tagged image named `project/hash`, returning its id.
    pub fn add_image(&self, project: &str, hash: &str) -> String {
        self.add_image_named(&format!("{}/{}", project, hash))
    }

    /// Seeds an image under a raw reference, such as the base image.
    pub fn add_image_named(&self, name: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("img-{}", state.next_id);
        state.images.push(FakeImage {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }

    /// Seeds an untagged image id.
    #[allow(dead_code)]
    pub fn add_dangling(&self, id: &str) {
        self.state.lock().unwrap().dangling.push(id.to_string());
    }

    /// Attaches a bind mount to a seeded container.
    #[allow(dead_code)]
    pub fn bind(&self, id: &str, host: &Path, target: &str) {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .expect("unknown container id");
        container
            .binds
            .push((host.to_path_buf(), target.to_string()));
    }

    /// Points a seeded container's backing image at an image id.
    #[allow(dead_code)]
    pub fn set_backing_image(&self, id: &str, image: &str) {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .expect("unknown container id");
        container.image = image.to_string();
    }

    /// Makes the reachability probe fail from now on.
    #[allow(dead_code)]
    pub fn set_unreachable(&self) {
        self.reachable.store(false, Ordering::SeqCst);
    }

    /// Names of all containers, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.containers.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    /// Names of the running containers, sorted.
    pub fn running_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .containers
            .iter()
            .filter(|c| c.running)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of all tagged images, sorted.
    pub fn image_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.images.iter().map(|i| i.name.clone()).collect();
        names.sort();
        names
    }

    /// Ids of the remaining untagged images.
    #[allow(dead_code)]
    pub fn dangling_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().dangling.clone()
    }

    /// Every mutating engine call in invocation order, e.g. `"start cid-1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl ContainerEngine for FakeEngine {
    fn containers(&self) -> Result<Vec<Container>> {
        let state = self.state.lock().unwrap();
        let mut containers = Vec::new();
        for fake in &state.containers {
            let Some(mut container) =
                Container::parse(&fake.id, &fake.name, &fake.image, fake.running)
            else {
                continue;
            };
            if let Some(address) = &fake.address {
                container = container.with_address(address);
            }
            for (host, target) in &fake.binds {
                container = container.with_bind(host, target);
            }
            if let Some(started) = fake.started {
                container = container.with_started(started);
            }
            containers.push(container);
        }
        Ok(containers)
    }

    fn images(&self) -> Result<Vec<Image>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .images
            .iter()
            .filter_map(|fake| Image::parse(&fake.id, &fake.name))
            .collect())
    }

    fn dangling_images(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().dangling.clone())
    }

    fn create(
        &self,
        name: &str,
        image: &str,
        volumes: &[(PathBuf, String)],
        _hostname: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {}", name));
        if state.containers.iter().any(|c| c.name == name) {
            return Err(engine_error(
                format!("docker create --name={}", name),
                "container name already in use",
            ));
        }
        let image = state
            .images
            .iter()
            .find(|i| i.name == image)
            .map(|i| i.id.clone())
            .unwrap_or_else(|| image.to_string());
        state.next_id += 1;
        let id = format!("cid-{}", state.next_id);
        state.containers.push(FakeContainer {
            id,
            name: name.to_string(),
            image,
            running: false,
            address: None,
            binds: volumes.to_vec(),
            started: None,
        });
        Ok(())
    }

    fn start(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("start {}", id));
        state.clock += 1;
        state.next_id += 1;
        let tick = state.clock;
        let address = format!("172.17.0.{}", state.next_id + 1);
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| engine_error(format!("docker start {}", id), "no such container"))?;
        container.running = true;
        container.address = Some(address);
        container.started = Some(start_time(tick));
        Ok(())
    }

    fn stop(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("stop {}", id));
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| engine_error(format!("docker stop {}", id), "no such container"))?;
        container.running = false;
        container.address = None;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rm {}", id));
        let index = state
            .containers
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| engine_error(format!("docker rm {}", id), "no such container"))?;
        if state.containers[index].running {
            return Err(engine_error(
                format!("docker rm {}", id),
                "cannot remove a running container",
            ));
        }
        state.containers.remove(index);
        Ok(())
    }

    fn rename(&self, id: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rename {} {}", id, name));
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| engine_error(format!("docker rename {}", id), "no such container"))?;
        container.name = name.to_string();
        Ok(())
    }

    fn commit(&self, id: &str, image_name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("commit {} {}", id, image_name));
        if !state.containers.iter().any(|c| c.id == id) {
            return Err(engine_error(
                format!("docker commit {}", id),
                "no such container",
            ));
        }
        state.next_id += 1;
        let image_id = format!("img-{}", state.next_id);
        // Committing over an existing reference retags it.
        if let Some(existing) = state.images.iter_mut().find(|i| i.name == image_name) {
            existing.id = image_id;
        } else {
            state.images.push(FakeImage {
                id: image_id,
                name: image_name.to_string(),
            });
        }
        Ok(())
    }

    fn remove_image(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("rmi {}", id));
        if state.containers.iter().any(|c| c.image == id) {
            return Err(engine_error(
                format!("docker rmi {}", id),
                "image is being used by a container",
            ));
        }
        if let Some(index) = state.images.iter().position(|i| i.id == id) {
            state.images.remove(index);
            return Ok(());
        }
        if let Some(index) = state.dangling.iter().position(|d| d == id) {
            state.dangling.remove(index);
            return Ok(());
        }
        Err(engine_error(format!("docker rmi {}", id), "no such image"))
    }

    fn is_reachable(&self, _address: &str) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// One recorded provisioning invocation.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct PlayCall {
    pub roles: Vec<String>,
    pub host: String,
    pub repository: PathBuf,
    pub extra_vars: BTreeMap<String, serde_json::Value>,
    pub tags: Vec<String>,
    pub skip_tags: Vec<String>,
}

/// Provisioner double that records every invocation and returns a scripted
/// exit code.
pub struct FakeProvisioner {
    exit_code: AtomicI32,
    plays: Mutex<Vec<PlayCall>>,
}

impl FakeProvisioner {
    pub fn new() -> FakeProvisioner {
        FakeProvisioner {
            exit_code: AtomicI32::new(0),
            plays: Mutex::new(Vec::new()),
        }
    }

    /// Makes every following invocation return the given exit code.
    #[allow(dead_code)]
    pub fn fail_with(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
    }

    /// All recorded invocations, oldest first.
    pub fn plays(&self) -> Vec<PlayCall> {
        self.plays.lock().unwrap().clone()
    }
}

impl Provisioner for FakeProvisioner {
    fn apply(
        &self,
        roles: &[String],
        host: &str,
        repository: &Path,
        extra_vars: &BTreeMap<String, serde_json::Value>,
        tags: &[String],
        skip_tags: &[String],
    ) -> Result<i32> {
        self.plays.lock().unwrap().push(PlayCall {
            roles: roles.to_vec(),
            host: host.to_string(),
            repository: repository.to_path_buf(),
            extra_vars: extra_vars.clone(),
            tags: tags.to_vec(),
            skip_tags: skip_tags.to_vec(),
        });
        Ok(self.exit_code.load(Ordering::SeqCst))
    }
}

/// Registry double that records every refresh.
pub struct FakeRegistry {
    refreshes: Mutex<Vec<Vec<(String, String)>>>,
}

impl FakeRegistry {
    pub fn new() -> FakeRegistry {
        FakeRegistry {
            refreshes: Mutex::new(Vec::new()),
        }
    }

    /// All recorded refreshes, oldest first.
    #[allow(dead_code)]
    pub fn refreshes(&self) -> Vec<Vec<(String, String)>> {
        self.refreshes.lock().unwrap().clone()
    }

    /// The entries of the most recent refresh, if any happened.
    pub fn last(&self) -> Option<Vec<(String, String)>> {
        self.refreshes.lock().unwrap().last().cloned()
    }
}

impl NameRegistry for FakeRegistry {
    fn refresh(&self, entries: &[(String, String)]) -> Result<()> {
        self.refreshes.lock().unwrap().push(entries.to_vec());
        Ok(())
    }
}

/// A service bundle over the fakes, rooted in a temporary source
/// directory.
pub struct Fixture {
    pub root: TempDir,
    pub git: Arc<FakeGit>,
    pub engine: Arc<FakeEngine>,
    pub provisioner: Arc<FakeProvisioner>,
    pub registry: Arc<FakeRegistry>,
    pub services: Arc<Services>,
}

impl Fixture {
    /// A fixture with default configuration.
    pub fn new(git: FakeGit) -> Fixture {
        Fixture::build(git, Config::default())
    }

    /// A fixture whose configuration is tweaked before wiring.
    pub fn with_config(git: FakeGit, tweak: impl FnOnce(&mut Config)) -> Fixture {
        let mut config = Config::default();
        tweak(&mut config);
        Fixture::build(git, config)
    }

    /// A fixture configured from an INI string, for per-project variables.
    #[allow(dead_code)]
    pub fn with_ini(git: FakeGit, ini: &str) -> Fixture {
        Fixture::build(git, Config::from_str(ini).unwrap())
    }

    fn build(git: FakeGit, mut config: Config) -> Fixture {
        let root = TempDir::new().unwrap();
        config.host_source_directory = root.path().to_path_buf();
        // The reachability poll answers on the first probe, so waiting
        // would only slow the suite down.
        config.startup_timeout = 0;

        let git = Arc::new(git);
        let engine = Arc::new(FakeEngine::new());
        let provisioner = Arc::new(FakeProvisioner::new());
        let registry = Arc::new(FakeRegistry::new());
        let services = Arc::new(Services::new(
            config,
            Arc::clone(&git) as Arc<dyn GitOps>,
            Arc::clone(&engine) as Arc<dyn ContainerEngine>,
            Arc::clone(&provisioner) as Arc<dyn Provisioner>,
            Arc::clone(&registry) as Arc<dyn NameRegistry>,
        ));
        Fixture {
            root,
            git,
            engine,
            provisioner,
            registry,
            services,
        }
    }

    /// Creates a working tree under the source root and registers its head
    /// and branch with the git double. Returns the directory.
    pub fn repository(&self, relative: &str, head: &str, branch: &str) -> PathBuf {
        let directory = self.root.path().join(relative);
        fs::create_dir_all(directory.join(".git")).unwrap();
        self.git.register(&directory, head, branch);
        directory
    }

    /// Opens a workspace over an already registered working tree.
    pub fn dork(&self, directory: &Path) -> Dork {
        let repository = Repository::open(directory, self.services.ancestry().git()).unwrap();
        Dork::new(Arc::clone(&self.services), repository)
    }
}

/// Writes a role's `meta/main.yml` under a roles directory.
#[allow(dead_code)]
pub fn write_role(roles: &Path, name: &str, meta: &str) {
    let directory = roles.join(name).join("meta");
    fs::create_dir_all(&directory).unwrap();
    fs::write(directory.join("main.yml"), meta).unwrap();
}
