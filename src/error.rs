//! # Error Handling
//!
//! This module defines the centralized error handling mechanism for the
//! `dork` application. It uses the `thiserror` library to create a
//! comprehensive `Error` enum that covers all anticipated failure modes,
//! providing clear and descriptive error messages.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum that represents all possible errors that can
//!   occur within the application. Each variant corresponds to a specific
//!   type of error and includes contextual information to aid in debugging.
//!
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`, used
//!   throughout the application to simplify function signatures.
//!
//! Lifecycle operations surface their precondition failures as dedicated
//! variants (`NoMatchingContainer`, `ContainerNotRunning`, `DirtyCommit`,
//! ...) so that command dispatch can report one failure per workspace and
//! keep going, while external-collaborator failures (git, the container
//! engine, the provisioning executor) carry the failing command and its
//! stderr.

use thiserror::Error;

/// Main error type for dork operations
#[derive(Error, Debug)]
pub enum Error {
    /// A container has to be created but no usable ancestor image or
    /// container exists and the repository is not on a root branch.
    #[error(
        "no valid starting point: branch \"{branch}\" must be built from one of {roots:?} first, or rebased"
    )]
    NoValidStartingPoint { branch: String, roots: Vec<String> },

    /// An explicitly requested starting image does not exist.
    #[error("image {name} could not be found")]
    StartImageNotFound { name: String },

    /// An explicitly requested starting image is not an ancestor of the
    /// repository head.
    #[error("{name} is not a valid starting point for this repository")]
    InvalidStartImage { name: String },

    /// An operation that requires a container found none for the workspace.
    #[error("no matching container for {workspace}")]
    NoMatchingContainer { workspace: String },

    /// An operation that requires a running container found a stopped one.
    #[error("container {name} is not running")]
    ContainerNotRunning { name: String },

    /// The container never became reachable within the configured timeout.
    #[error("container {name} did not become reachable within {seconds}s")]
    StartupTimeout { name: String, seconds: u64 },

    /// A commit was attempted while the container is not clean.
    #[error("cannot commit {status} container {name}")]
    DirtyCommit { name: String, status: String },

    /// The provisioning executor returned a non-zero exit code.
    #[error("provisioning failed with exit code {code}")]
    ProvisioningFailure { code: i32 },

    /// A container engine command returned a non-success status.
    #[error("engine command failed: {command}: {stderr}")]
    Engine { command: String, stderr: String },

    /// A git command returned a non-success status.
    #[error("git command failed in {directory}: {command}: {stderr}")]
    Git {
        command: String,
        directory: String,
        stderr: String,
    },

    /// A circular dependency was detected between role metadata files.
    #[error("dependency cycle in role metadata: {cycle}")]
    RoleCycle { cycle: String },

    /// A role metadata file could not be loaded or validated.
    #[error("invalid metadata for role {role}: {message}")]
    RoleMeta { role: String, message: String },

    /// A configuration value could not be parsed or validated.
    ///
    /// This error includes the specific issue and optionally a hint about
    /// how to fix it.
    #[error("configuration error: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    Config {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// An INI parsing error, wrapped from `ini::Error`.
    #[error("INI parsing error: {0}")]
    Ini(#[from] ini::Error),
}

impl Error {
    /// Shorthand for a configuration error without a hint.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config {
            message: message.into(),
            hint: None,
        }
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
