//! # Dork Library
//!
//! This library provides the core functionality for managing per-repository
//! development containers. It is designed to be used by the `dork`
//! command-line tool but can also be integrated into other applications that
//! drive the same lifecycle.
//!
//! ## Quick Example
//!
//! ```
//! use dork::config::Config;
//! use dork::engine::Container;
//!
//! // Configuration comes with usable defaults and merges INI files on top.
//! let config = Config::default();
//! assert!(config.is_root_branch("main"));
//!
//! // Containers carry their workspace identity in the name.
//! let container = Container::parse("1f2e", "/demo.feature.4a5b", "img", true).unwrap();
//! assert_eq!(container.project(), "demo");
//! assert_eq!(container.instance(), "feature");
//! assert_eq!(container.hash(), "4a5b");
//! ```
//!
//! ## Core Concepts
//!
//! The library is built around a few key concepts:
//!
//! - **Commit Ancestry (`git`)**: Containers and images are keyed by git
//!   commit hashes and ordered by the ancestry relation, with a sentinel
//!   hash below every real commit. All comparisons are memoized per
//!   invocation.
//! - **Container Engine (`engine`)**: Listings and mutations of containers
//!   and images, behind a trait so tests can script them. Names encode the
//!   workspace identity (`project.instance.hash` and `project/hash`).
//! - **Roles and Triggers (`roles`)**: Declarative provisioning metadata.
//!   Build triggers decide which roles apply to a repository, update
//!   triggers map changed files to provisioning tags.
//! - **Lifecycle Engine (`dork`)**: The state machine that creates, starts,
//!   updates, cleans and removes workspace containers, choosing starting
//!   images by commit ancestry.
//! - **Ambient Collaborators (`runner`, `registry`, `config`)**: The
//!   provisioning executor, the hosts-file name registry and the merged INI
//!   configuration.
//!
//! ## Execution Flow
//!
//! A command invocation performs the following high-level steps:
//!
//! 1.  **Scan**: Discover git repositories under the working directory and
//!     pair each with its workspace identity.
//! 2.  **Classify**: Derive mode, state and status from live engine and
//!     repository state.
//! 3.  **Operate**: Run the requested lifecycle chain per workspace,
//!     short-circuiting that workspace on the first failure.
//! 4.  **Record**: Refresh the name registry and enforce the running
//!     container limit after mutating operations.

pub mod config;
pub mod dork;
pub mod engine;
pub mod error;
pub mod git;
pub mod output;
pub mod registry;
pub mod roles;
pub mod runner;
