//! # Role Metadata and Trigger Matching
//!
//! Provisioning roles describe which workspaces they apply to through
//! trigger declarations in their `meta/main.yml`. This module loads the
//! metadata from the configured role directories, evaluates the triggers
//! against a repository's working tree, and resolves the dependency graph
//! into the role set, tags, and settings one provisioning run needs.
//!
//! A role declares its triggers under a `dork` section:
//!
//! ```yaml
//! dependencies:
//!   - base
//!   - role: php
//! dork:
//!   build_triggers:
//!     drupal7:
//!       - "*.info": 'core\s*=\s*7\.x'
//!       - "index.php"
//!     composer: true
//!   update_triggers:
//!     - "config/**": [config]
//!   settings:
//!     php_version: "8.3"
//! ```
//!
//! Named build triggers hold file conditions that must all hold against the
//! working tree; a bare list is shorthand for a single trigger named
//! `default`. Boolean triggers enable or disable a trigger name by hand, and
//! the reserved name `global` marks a role that applies everywhere.
//!
//! ## Key Components
//!
//! - **`Role`**: One role's compiled metadata: dependencies, build and
//!   update triggers, settings.
//!
//! - **`RoleSet`**: Every known role evaluated against one repository.
//!   Resolves active triggers, update tags, and settings through the
//!   dependency graph, and reports cycles as errors.
//!
//! - **`RoleStore`**: Caches the evaluated set per repository directory so
//!   one command invocation walks each working tree at most once.

use crate::error::{Error, Result};
use crate::git::Repository;
use glob::Pattern;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Reserved trigger name that matches every repository.
pub const GLOBAL_TRIGGER: &str = "global";

/// Trigger name given to a bare condition list. Reserved, and filtered out
/// of tag lists before they reach the provisioner.
pub const DEFAULT_TRIGGER: &str = "default";

/// Subdirectory of a repository holding its own override roles. Roles found
/// there apply to that repository unconditionally.
pub const OVERRIDE_ROLES_DIR: &str = ".dork/roles";

/// One file condition of a build trigger.
#[derive(Debug, Clone)]
pub enum FileCondition {
    /// A file matching the glob exists in the working tree.
    Exists(Pattern),
    /// A file matching the glob exists and its content matches the regex.
    Content { pattern: Pattern, content: Regex },
}

impl FileCondition {
    fn holds(&self, repository: &Repository) -> bool {
        match self {
            FileCondition::Exists(pattern) => repository.contains_file(pattern, None),
            FileCondition::Content { pattern, content } => {
                repository.contains_file(pattern, Some(content))
            }
        }
    }
}

/// One declared build trigger.
#[derive(Debug, Clone)]
pub enum BuildTrigger {
    /// Matches when every condition holds against the working tree.
    Conditions(Vec<FileCondition>),
    /// Enables (`true`) or disables (`false`) the trigger name by hand.
    Flag(bool),
}

#[derive(Debug, Clone)]
struct UpdateTrigger {
    pattern: Pattern,
    tags: Vec<String>,
}

/// One role's compiled metadata.
#[derive(Debug, Clone)]
pub struct Role {
    name: String,
    dependencies: Vec<String>,
    build_triggers: BTreeMap<String, BuildTrigger>,
    update_triggers: Vec<UpdateTrigger>,
    settings: BTreeMap<String, serde_yaml::Value>,
}

/// Raw `meta/main.yml` payload before compilation.
#[derive(Debug, Deserialize)]
struct MetaFile {
    #[serde(default)]
    dependencies: Vec<Dependency>,
    #[serde(default)]
    dork: MetaSection,
}

/// Dependencies appear as bare names or `{role: name}` mappings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Dependency {
    Name(String),
    Spec { role: String },
}

impl Dependency {
    fn into_name(self) -> String {
        match self {
            Dependency::Name(name) => name,
            Dependency::Spec { role } => role,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetaSection {
    #[serde(default)]
    build_triggers: RawBuildTriggers,
    #[serde(default)]
    update_triggers: Vec<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    settings: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBuildTriggers {
    Named(BTreeMap<String, RawTrigger>),
    Bare(Vec<RawCondition>),
}

impl Default for RawBuildTriggers {
    fn default() -> Self {
        RawBuildTriggers::Named(BTreeMap::new())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTrigger {
    Flag(bool),
    Conditions(Vec<RawCondition>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCondition {
    Exists(String),
    Content(BTreeMap<String, String>),
}

impl Role {
    fn from_meta(name: &str, meta: MetaFile, implicit_global: bool) -> Result<Role> {
        let named = match meta.dork.build_triggers {
            RawBuildTriggers::Named(named) => named,
            RawBuildTriggers::Bare(conditions) => {
                let mut named = BTreeMap::new();
                named.insert(
                    DEFAULT_TRIGGER.to_string(),
                    RawTrigger::Conditions(conditions),
                );
                named
            }
        };

        let mut build_triggers = BTreeMap::new();
        for (trigger, raw) in named {
            let compiled = match raw {
                RawTrigger::Flag(flag) => BuildTrigger::Flag(flag),
                RawTrigger::Conditions(conditions) => {
                    let mut compiled = Vec::new();
                    for condition in conditions {
                        compile_condition(name, condition, &mut compiled)?;
                    }
                    BuildTrigger::Conditions(compiled)
                }
            };
            build_triggers.insert(trigger, compiled);
        }
        if implicit_global {
            build_triggers.insert(GLOBAL_TRIGGER.to_string(), BuildTrigger::Flag(true));
        }

        let mut update_triggers = Vec::new();
        for mapping in meta.dork.update_triggers {
            for (glob, tags) in mapping {
                update_triggers.push(UpdateTrigger {
                    pattern: compile_pattern(name, &glob)?,
                    tags,
                });
            }
        }

        Ok(Role {
            name: name.to_string(),
            dependencies: meta
                .dependencies
                .into_iter()
                .map(Dependency::into_name)
                .collect(),
            build_triggers,
            update_triggers,
            settings: meta.dork.settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Sorts the role's triggers against the working tree into matched
    /// condition triggers and hand-set flags.
    fn evaluate(&self, repository: &Repository) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for (name, trigger) in &self.build_triggers {
            match trigger {
                BuildTrigger::Conditions(conditions) => {
                    if !conditions.is_empty()
                        && conditions.iter().all(|condition| condition.holds(repository))
                    {
                        evaluation.matched.insert(name.clone());
                    }
                }
                BuildTrigger::Flag(true) if name == GLOBAL_TRIGGER => {
                    evaluation.matched.insert(name.clone());
                }
                BuildTrigger::Flag(true) => {
                    evaluation.enabled.insert(name.clone());
                }
                BuildTrigger::Flag(false) => {
                    evaluation.disabled.insert(name.clone());
                }
            }
        }
        evaluation
    }
}

fn compile_pattern(role: &str, glob: &str) -> Result<Pattern> {
    Pattern::new(glob).map_err(|err| Error::RoleMeta {
        role: role.to_string(),
        message: format!("invalid glob {:?}: {}", glob, err),
    })
}

fn compile_condition(
    role: &str,
    condition: RawCondition,
    out: &mut Vec<FileCondition>,
) -> Result<()> {
    match condition {
        RawCondition::Exists(glob) => {
            out.push(FileCondition::Exists(compile_pattern(role, &glob)?));
        }
        RawCondition::Content(pairs) => {
            for (glob, regex) in pairs {
                let content = Regex::new(&regex).map_err(|err| Error::RoleMeta {
                    role: role.to_string(),
                    message: format!("invalid regex {:?}: {}", regex, err),
                })?;
                out.push(FileCondition::Content {
                    pattern: compile_pattern(role, &glob)?,
                    content,
                });
            }
        }
    }
    Ok(())
}

/// Per-role trigger evaluation against one working tree.
#[derive(Debug, Default)]
struct Evaluation {
    matched: BTreeSet<String>,
    enabled: BTreeSet<String>,
    disabled: BTreeSet<String>,
}

/// Every known role, evaluated against one repository.
#[derive(Debug)]
pub struct RoleSet {
    roles: BTreeMap<String, Role>,
    evaluations: BTreeMap<String, Evaluation>,
}

impl RoleSet {
    /// Loads role metadata from the given directories, then the repository's
    /// own override directory, and evaluates every trigger against the
    /// working tree. Later directories shadow earlier ones by role name.
    pub fn load(repository: &Repository, roots: &[PathBuf]) -> Result<RoleSet> {
        let mut roles = BTreeMap::new();
        for root in roots {
            load_directory(&mut roles, root, false)?;
        }
        let overrides = repository.directory().join(OVERRIDE_ROLES_DIR);
        load_directory(&mut roles, &overrides, true)?;

        let evaluations = roles
            .iter()
            .map(|(name, role)| (name.clone(), role.evaluate(repository)))
            .collect();
        Ok(RoleSet { roles, evaluations })
    }

    /// Whether the role applies to the repository: at least one of its
    /// build triggers matched.
    pub fn triggered(&self, name: &str) -> bool {
        self.evaluations
            .get(name)
            .map(|evaluation| !evaluation.matched.is_empty())
            .unwrap_or(false)
    }

    /// The roles to provision, in name order: every triggered role that is
    /// not already pulled in as a dependency of another triggered role.
    pub fn tree(&self) -> Result<Vec<&Role>> {
        let triggered: Vec<&Role> = self
            .roles
            .values()
            .filter(|role| self.triggered(role.name()))
            .collect();

        let mut kept = Vec::new();
        for role in &triggered {
            let mut included = false;
            for other in &triggered {
                if other.name() == role.name() {
                    continue;
                }
                if self.includes(other.name(), role.name())? {
                    included = true;
                    break;
                }
            }
            if !included {
                kept.push(*role);
            }
        }
        Ok(kept)
    }

    /// The trigger names active for a role: matched and enabled names minus
    /// the disabled ones, unioned with the active names of its dependencies.
    /// A role with no matched trigger contributes nothing, even when it
    /// declares enabled flags.
    pub fn active_triggers(&self, name: &str) -> Result<BTreeSet<String>> {
        let mut path = Vec::new();
        self.collect_active(name, &mut path)
    }

    /// Tags to run for a changeset: the tags of every update trigger whose
    /// glob matches at least one changed path, resolved through the
    /// dependency graph.
    pub fn update_tags(&self, name: &str, changes: &[String]) -> Result<BTreeSet<String>> {
        let mut path = Vec::new();
        self.collect_update_tags(name, changes, &mut path)
    }

    /// The role's settings merged over its dependency graph. Dependencies
    /// are merged first, so a role overrides the values it inherits.
    pub fn settings(&self, name: &str) -> Result<BTreeMap<String, serde_yaml::Value>> {
        let mut path = Vec::new();
        let mut merged = BTreeMap::new();
        self.collect_settings(name, &mut path, &mut merged)?;
        Ok(merged)
    }

    /// Trigger names declared across the provisioned roles but not active,
    /// in sorted order. Passed to the provisioner to mask the matching
    /// tasks.
    pub fn skip_tags(&self) -> Result<Vec<String>> {
        let mut declared = BTreeSet::new();
        let mut active = BTreeSet::new();
        for role in self.tree()? {
            let mut path = Vec::new();
            self.collect_declared(role.name(), &mut path, &mut declared)?;
            active.extend(self.active_triggers(role.name())?);
        }
        Ok(declared.difference(&active).cloned().collect())
    }

    /// Guards the dependency walk against cycles: an already visited name
    /// means the metadata loops.
    fn enter(&self, name: &str, path: &mut Vec<String>) -> Result<()> {
        if path.iter().any(|seen| seen == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(Error::RoleCycle {
                cycle: cycle.join(" -> "),
            });
        }
        path.push(name.to_string());
        Ok(())
    }

    /// Whether `name` transitively depends on `target`.
    fn includes(&self, name: &str, target: &str) -> Result<bool> {
        let mut path = Vec::new();
        self.depends_on(name, target, &mut path)
    }

    fn depends_on(&self, name: &str, target: &str, path: &mut Vec<String>) -> Result<bool> {
        self.enter(name, path)?;
        let mut found = false;
        if let Some(role) = self.roles.get(name) {
            for dependency in &role.dependencies {
                if dependency == target {
                    found = true;
                    break;
                }
                if self.roles.contains_key(dependency.as_str())
                    && self.depends_on(dependency, target, path)?
                {
                    found = true;
                    break;
                }
            }
        }
        path.pop();
        Ok(found)
    }

    fn collect_active(&self, name: &str, path: &mut Vec<String>) -> Result<BTreeSet<String>> {
        self.enter(name, path)?;
        let mut active = BTreeSet::new();
        if let (Some(role), Some(evaluation)) = (self.roles.get(name), self.evaluations.get(name))
        {
            if !evaluation.matched.is_empty() {
                active.extend(evaluation.matched.iter().cloned());
                active.extend(evaluation.enabled.iter().cloned());
                for disabled in &evaluation.disabled {
                    active.remove(disabled);
                }
                for dependency in &role.dependencies {
                    if self.roles.contains_key(dependency.as_str()) {
                        active.extend(self.collect_active(dependency, path)?);
                    } else {
                        debug!("Role {} depends on unknown role {}", name, dependency);
                    }
                }
            }
        }
        path.pop();
        Ok(active)
    }

    fn collect_update_tags(
        &self,
        name: &str,
        changes: &[String],
        path: &mut Vec<String>,
    ) -> Result<BTreeSet<String>> {
        self.enter(name, path)?;
        let mut tags = BTreeSet::new();
        if let Some(role) = self.roles.get(name) {
            for trigger in &role.update_triggers {
                if changes.iter().any(|file| trigger.pattern.matches(file)) {
                    tags.extend(trigger.tags.iter().cloned());
                }
            }
            for dependency in &role.dependencies {
                if self.roles.contains_key(dependency.as_str()) {
                    tags.extend(self.collect_update_tags(dependency, changes, path)?);
                }
            }
        }
        path.pop();
        Ok(tags)
    }

    fn collect_settings(
        &self,
        name: &str,
        path: &mut Vec<String>,
        merged: &mut BTreeMap<String, serde_yaml::Value>,
    ) -> Result<()> {
        self.enter(name, path)?;
        if let Some(role) = self.roles.get(name) {
            for dependency in &role.dependencies {
                if self.roles.contains_key(dependency.as_str()) {
                    self.collect_settings(dependency, path, merged)?;
                }
            }
            for (key, value) in &role.settings {
                merged.insert(key.clone(), value.clone());
            }
        }
        path.pop();
        Ok(())
    }

    fn collect_declared(
        &self,
        name: &str,
        path: &mut Vec<String>,
        declared: &mut BTreeSet<String>,
    ) -> Result<()> {
        self.enter(name, path)?;
        if let Some(role) = self.roles.get(name) {
            declared.extend(role.build_triggers.keys().cloned());
            for dependency in &role.dependencies {
                if self.roles.contains_key(dependency.as_str()) {
                    self.collect_declared(dependency, path, declared)?;
                }
            }
        }
        path.pop();
        Ok(())
    }
}

fn load_directory(
    roles: &mut BTreeMap<String, Role>,
    root: &Path,
    implicit_global: bool,
) -> Result<()> {
    if !root.is_dir() {
        debug!("No role directory at {}", root.display());
        return Ok(());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(root)? {
        entries.push(entry?);
    }
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let meta = entry.path().join("meta/main.yml");
        if !meta.is_file() {
            debug!("Skipping {} without role metadata", entry.path().display());
            continue;
        }
        let text = fs::read_to_string(&meta)?;
        let file: MetaFile = serde_yaml::from_str(&text).map_err(|err| Error::RoleMeta {
            role: name.clone(),
            message: err.to_string(),
        })?;
        let role = Role::from_meta(&name, file, implicit_global)?;
        roles.insert(name, role);
    }
    Ok(())
}

/// Caches evaluated role sets per repository directory.
///
/// Provisioning can change which triggers match, so callers drop a
/// repository's entry before a full build and after it.
pub struct RoleStore {
    cache: Mutex<HashMap<PathBuf, Arc<RoleSet>>>,
}

impl RoleStore {
    pub fn new() -> RoleStore {
        RoleStore {
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<RoleSet>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The evaluated role set for a repository, loading it on first use.
    pub fn load(&self, repository: &Repository, roots: &[PathBuf]) -> Result<Arc<RoleSet>> {
        let key = repository.directory().to_path_buf();
        if let Some(known) = self.guard().get(&key) {
            return Ok(Arc::clone(known));
        }
        let set = Arc::new(RoleSet::load(repository, roots)?);
        self.guard().insert(key, Arc::clone(&set));
        Ok(set)
    }

    /// Drops the cached set for one repository directory.
    pub fn clear(&self, directory: &Path) {
        self.guard().remove(directory);
    }

    /// Drops every cached set.
    pub fn clear_all(&self) {
        self.guard().clear();
    }
}

impl Default for RoleStore {
    fn default() -> Self {
        RoleStore::new()
    }
}
