//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::commands;
use dork::config::Config;
use dork::dork::{Dork, Services};
use dork::output::{emoji, OutputConfig};

/// Dork - Manage development containers that track git history
#[derive(Parser, Debug)]
#[command(name = "dork")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Directory scanned for git repositories
    #[arg(
        short = 'd',
        long,
        global = true,
        value_name = "DIR",
        env = "DORK_WORKING_DIRECTORY"
    )]
    working_directory: Option<PathBuf>,

    /// Additional configuration file, merged over the system-wide ones
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a table of all workspaces with mode, state and status
    Status,

    /// Show details for each workspace
    Info,

    /// Print a provisioning inventory of running workspace containers
    Inventory,

    /// Create missing workspace containers
    Create(commands::create::CreateArgs),

    /// Create containers where needed and start them
    Start,

    /// Create, start and provision containers, then clean up
    Update(commands::update::UpdateArgs),

    /// Run a provisioning pass with explicit tags
    Build(commands::build::BuildArgs),

    /// Stop running workspace containers
    Stop,

    /// Remove workspace containers (and workstation images)
    Remove,

    /// Remove containers and images superseded by newer commits
    Clean,

    /// Commit clean containers as new starting images
    Commit,

    /// Start every workspace that already has a container
    Boot,
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let output = OutputConfig::from_env_and_flag(&self.color);

        let config = Config::load(self.config.as_deref())?;
        let root = match &self.working_directory {
            Some(directory) => directory.clone(),
            None => std::env::current_dir()?,
        };

        let services = Arc::new(Services::with_defaults(config));
        let dorks = Dork::scan(&services, &root);
        if dorks.is_empty() {
            println!(
                "{} No repositories found under {}",
                emoji(&output, "🔍", "[SCAN]"),
                root.display()
            );
            return Ok(());
        }

        match self.command {
            Commands::Status => commands::status::execute(&dorks, &output),
            Commands::Info => commands::info::execute(&dorks, &output),
            Commands::Inventory => commands::inventory::execute(&dorks),
            Commands::Create(args) => commands::create::execute(args, &dorks, &output),
            Commands::Start => commands::start::execute(&dorks, &output),
            Commands::Update(args) => commands::update::execute(args, &dorks, &output),
            Commands::Build(args) => commands::build::execute(args, &dorks, &output),
            Commands::Stop => commands::stop::execute(&dorks, &output),
            Commands::Remove => commands::remove::execute(&dorks, &output),
            Commands::Clean => commands::clean::execute(&dorks, &output),
            Commands::Commit => commands::commit::execute(&dorks, &output),
            Commands::Boot => commands::boot::execute(&dorks, &output),
        }
    }
}

/// Initializes the logger from the `--log-level` flag. Unknown levels fall
/// back to `info` with a note on stderr.
fn init_logging(level: &str) {
    let filter = match level.parse::<log::LevelFilter>() {
        Ok(filter) => filter,
        Err(_) => {
            eprintln!("Unknown log level \"{}\", using \"info\"", level);
            log::LevelFilter::Info
        }
    };
    env_logger::Builder::new()
        .filter_level(filter)
        .format_timestamp(None)
        .init();
}
