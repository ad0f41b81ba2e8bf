//! # Git Plumbing and Commit Ancestry
//!
//! This module wraps the system `git` binary behind the [`GitOps`] trait and
//! builds the commit partial order on top of it. Container and image
//! freshness is decided entirely by ancestry: a commit is "older" than
//! another exactly when it is a strict git ancestor of it, and two commits
//! on diverged branches are simply incomparable.
//!
//! ## Key Components
//!
//! - **`GitOps`**: Defines the interface for the git queries the tool needs
//!   (head commit, branch, ancestry test, commit and file diffs). The
//!   default implementation, `SystemGit`, shells out to `git`; tests swap in
//!   scripted fakes.
//!
//! - **`Repository`**: A local working tree with its head commit and branch
//!   resolved once at construction, plus the file queries the trigger engine
//!   asks (`contains_file`).
//!
//! - **`Ancestry`**: Memoized ordering queries. Ancestry tests, commit
//!   ranges, and file diffs are cached per `(directory, a, b)` for the
//!   lifetime of the value, which is constructed once per command
//!   invocation.
//!
//! The sentinel hash [`SENTINEL`] represents "before any commit". Bootstrap
//! base images carry it; it orders strictly below every real commit and is
//! never passed to the git binary.

use crate::error::{Error, Result};
use glob::Pattern;
use log::{debug, warn};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use walkdir::WalkDir;

/// Commit hash carried by bootstrap base images: an ancestor of every real
/// commit and a descendant of none.
pub const SENTINEL: &str = "new";

/// Trait for git operations - allows mocking in tests
pub trait GitOps: Send + Sync {
    /// Hash of the commit the repository head points at.
    fn head_commit(&self, directory: &Path) -> Result<String>;

    /// Name of the currently checked out branch.
    fn current_branch(&self, directory: &Path) -> Result<String>;

    /// Whether `ancestor` is an ancestor of `descendant` in the repository's
    /// commit graph. Equal commits count as their own ancestors here; the
    /// strictness handling lives in [`Ancestry`].
    fn is_ancestor(&self, directory: &Path, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Commit hashes reachable from either endpoint but not both.
    fn commits_between(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>>;

    /// Paths that differ between two commits.
    fn changed_files(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>>;
}

/// The default implementation of `GitOps`, which uses the system's `git`
/// command.
#[derive(Debug, Default)]
pub struct SystemGit;

impl SystemGit {
    fn run(&self, directory: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(directory)
            .output()
            .map_err(|e| Error::Git {
                command: format!("git {}", args.join(" ")),
                directory: directory.display().to_string(),
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git {
                command: format!("git {}", args.join(" ")),
                directory: directory.display().to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitOps for SystemGit {
    fn head_commit(&self, directory: &Path) -> Result<String> {
        self.run(directory, &["rev-parse", "HEAD"])
    }

    fn current_branch(&self, directory: &Path) -> Result<String> {
        self.run(directory, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn is_ancestor(&self, directory: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        // merge-base signals "no" through exit code 1, everything else is a
        // real failure.
        let output = Command::new("git")
            .args(["merge-base", "--is-ancestor", ancestor, descendant])
            .current_dir(directory)
            .output()
            .map_err(|e| Error::Git {
                command: format!("git merge-base --is-ancestor {} {}", ancestor, descendant),
                directory: directory.display().to_string(),
                stderr: e.to_string(),
            })?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(Error::Git {
                command: format!("git merge-base --is-ancestor {} {}", ancestor, descendant),
                directory: directory.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn commits_between(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        let range = format!("{}...{}", a, b);
        let stdout = self.run(directory, &["log", "--format=%H", &range])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn changed_files(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        let stdout = self.run(directory, &["diff", "--name-only", a, b])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// A local working tree with its identity resolved once at construction.
#[derive(Debug, Clone)]
pub struct Repository {
    directory: PathBuf,
    head: String,
    branch: String,
}

impl Repository {
    /// Opens the working tree at `directory`, resolving head and branch.
    pub fn open(directory: &Path, git: &dyn GitOps) -> Result<Repository> {
        let head = git.head_commit(directory)?;
        let branch = git.current_branch(directory)?;
        Ok(Repository {
            directory: directory.to_path_buf(),
            head,
            branch,
        })
    }

    /// Builds a repository from already known values, for tests.
    #[cfg(test)]
    pub fn fixed(directory: &Path, head: &str, branch: &str) -> Repository {
        Repository {
            directory: directory.to_path_buf(),
            head: head.to_string(),
            branch: branch.to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// True when the working tree holds a file whose relative path matches
    /// the glob and, when given, whose content matches the regex. Unreadable
    /// files never match.
    pub fn contains_file(&self, pattern: &Pattern, content: Option<&Regex>) -> bool {
        let walker = WalkDir::new(&self.directory)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git");

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!("Skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = match entry.path().strip_prefix(&self.directory) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            if !pattern.matches(&relative.to_string_lossy()) {
                continue;
            }
            match content {
                None => return true,
                Some(regex) => {
                    if let Ok(text) = std::fs::read_to_string(entry.path()) {
                        if regex.is_match(&text) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}

/// Discovers git repositories at or under a root directory. A found
/// repository is not descended into, so nested working trees stay hidden.
pub fn scan(root: &Path) -> Vec<PathBuf> {
    let mut repositories = Vec::new();
    let mut walker = WalkDir::new(root).into_iter();
    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), err);
                continue;
            }
        };
        if entry.file_type().is_dir() && entry.path().join(".git").exists() {
            repositories.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    repositories
}

type PairKey = (PathBuf, String, String);

/// Memoized view of the commit partial order.
///
/// All queries are relative to a repository directory passed per call, so a
/// single value serves every repository touched by one command invocation.
pub struct Ancestry {
    git: Arc<dyn GitOps>,
    ancestors: Mutex<HashMap<PairKey, bool>>,
    ranges: Mutex<HashMap<PairKey, Vec<String>>>,
    diffs: Mutex<HashMap<PairKey, Vec<String>>>,
}

impl Ancestry {
    pub fn new(git: Arc<dyn GitOps>) -> Self {
        Ancestry {
            git,
            ancestors: Mutex::new(HashMap::new()),
            ranges: Mutex::new(HashMap::new()),
            diffs: Mutex::new(HashMap::new()),
        }
    }

    pub fn git(&self) -> &dyn GitOps {
        self.git.as_ref()
    }

    // Memo maps are insert-only; entries stay valid even if a lock was
    // poisoned mid-insert.
    fn guard<'a, T>(mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hash equality, sentinel included.
    pub fn equal(&self, a: &str, b: &str) -> bool {
        a == b
    }

    /// Whether `ancestor` is a strict ancestor of `descendant`. Equal hashes
    /// are never strict ancestors; the sentinel precedes every real commit
    /// and follows none.
    pub fn ancestor_strict(
        &self,
        directory: &Path,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool> {
        if ancestor == descendant || descendant == SENTINEL {
            return Ok(false);
        }
        if ancestor == SENTINEL {
            return Ok(true);
        }

        let key = (
            directory.to_path_buf(),
            ancestor.to_string(),
            descendant.to_string(),
        );
        if let Some(&known) = Self::guard(&self.ancestors).get(&key) {
            return Ok(known);
        }
        let result = self.git.is_ancestor(directory, ancestor, descendant)?;
        Self::guard(&self.ancestors).insert(key, result);
        Ok(result)
    }

    /// `a <= b` in the commit order: equal or strict ancestor.
    pub fn less_or_equal(&self, directory: &Path, a: &str, b: &str) -> Result<bool> {
        Ok(a == b || self.ancestor_strict(directory, a, b)?)
    }

    /// `a >= b` in the commit order: equal or strict descendant.
    pub fn greater_or_equal(&self, directory: &Path, a: &str, b: &str) -> Result<bool> {
        self.less_or_equal(directory, b, a)
    }

    /// Commit hashes between the two endpoints, exclusive. A sentinel
    /// endpoint has no representable range and yields nothing.
    pub fn commits_between(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        if a == SENTINEL || b == SENTINEL {
            debug!("No commit range against the sentinel hash");
            return Ok(Vec::new());
        }
        let key = (directory.to_path_buf(), a.to_string(), b.to_string());
        if let Some(known) = Self::guard(&self.ranges).get(&key) {
            return Ok(known.clone());
        }
        let result = self.git.commits_between(directory, a, b)?;
        Self::guard(&self.ranges).insert(key, result.clone());
        Ok(result)
    }

    /// Paths differing between two commits. Callers handle the sentinel
    /// themselves (a new container gets a full provisioning run, not a
    /// diff), so a sentinel endpoint yields nothing here.
    pub fn files_changed(&self, directory: &Path, a: &str, b: &str) -> Result<Vec<String>> {
        if a == SENTINEL || b == SENTINEL {
            debug!("No file diff against the sentinel hash");
            return Ok(Vec::new());
        }
        let key = (directory.to_path_buf(), a.to_string(), b.to_string());
        if let Some(known) = Self::guard(&self.diffs).get(&key) {
            return Ok(known.clone());
        }
        let result = self.git.changed_files(directory, a, b)?;
        Self::guard(&self.diffs).insert(key, result.clone());
        Ok(result)
    }

    /// Picks the candidate closest to `head`: among the candidates ordered
    /// at or below `head`, the one no other qualifying candidate strictly
    /// exceeds. Mutually incomparable maxima are resolved towards the
    /// lexicographically smallest hash, with a warning.
    pub fn closest<'a, T>(
        &self,
        directory: &Path,
        candidates: &'a [T],
        head: &str,
        hash: impl Fn(&T) -> &str,
    ) -> Result<Option<&'a T>> {
        let mut qualifying: Vec<&T> = Vec::new();
        for candidate in candidates {
            if self.less_or_equal(directory, hash(candidate), head)? {
                qualifying.push(candidate);
            }
        }

        let mut maximal: Vec<&T> = Vec::new();
        for candidate in &qualifying {
            let mut exceeded = false;
            for other in &qualifying {
                if self.ancestor_strict(directory, hash(candidate), hash(other))? {
                    exceeded = true;
                    break;
                }
            }
            if !exceeded {
                maximal.push(candidate);
            }
        }

        if maximal.len() > 1 {
            maximal.sort_by(|a, b| hash(a).cmp(hash(b)));
            warn!(
                "{} equally close candidates for {}, picking {}",
                maximal.len(),
                head,
                hash(maximal[0])
            );
        }
        Ok(maximal.first().copied())
    }

    /// Number of `others` that are strict ancestors of `head`. Used to rank
    /// checkouts of one project from oldest to newest head. Sibling clones
    /// need not hold each other's commits, so a pair this repository cannot
    /// relate counts as unrelated instead of failing the ranking.
    pub fn rank(&self, directory: &Path, head: &str, others: &[String]) -> usize {
        let mut rank = 0;
        for other in others {
            match self.ancestor_strict(directory, other, head) {
                Ok(true) => rank += 1,
                Ok(false) => {}
                Err(err) => debug!("Cannot order {} against {}: {}", other, head, err),
            }
        }
        rank
    }

    /// Drops all memoized results.
    pub fn clear(&self) {
        Self::guard(&self.ancestors).clear();
        Self::guard(&self.ranges).clear();
        Self::guard(&self.diffs).clear();
    }
}
