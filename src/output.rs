//! # Output Configuration
//!
//! This module provides utilities for controlling CLI output appearance,
//! including color and emoji support based on terminal capabilities and
//! user preferences, plus the styled cells the status table is built from.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dork::output::{OutputConfig, emoji};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//!
//! // Use emoji helper that respects config
//! println!("{} Scanning...", emoji(&config, "🔍", "[SCAN]"));
//! ```

use crate::dork::{Mode, State, Status};
use console::Style;
use std::env;

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Arguments
    /// * `color_flag` - The value of the --color CLI flag: "always", "never", or "auto"
    ///
    /// # Behavior
    /// - `--color=always`: Force colors on (overrides NO_COLOR)
    /// - `--color=never`: Force colors off
    /// - `--color=auto`: Detect based on environment
    ///
    /// In auto mode, colors are disabled if:
    /// - `NO_COLOR` environment variable is set (any value, including empty)
    /// - `CLICOLOR=0` is set
    /// - `TERM=dumb` is set
    /// - stdout is not a TTY (unless `CLICOLOR_FORCE=1`)
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    /// Detect whether color output is supported based on environment.
    fn detect_color_support() -> bool {
        // Check NO_COLOR first (https://no-color.org/)
        // The presence of the variable (even if empty) disables colors
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        // Check CLICOLOR=0 disables colors
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        // Check CLICOLOR_FORCE=1 forces colors
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        // Check TERM=dumb
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        // Use console crate's detection for TTY and color support
        console::Term::stdout().features().colors_supported()
    }

    /// Create a configuration with colors always enabled.
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Create a configuration with colors always disabled.
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the appropriate string based on color configuration.
///
/// When colors are enabled, returns the emoji. When disabled, returns
/// the plain text alternative.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// One line of the status table.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub name: String,
    pub mode: Mode,
    pub state: State,
    pub status: Status,
    pub address: Option<String>,
}

/// Renders the workspace status table. Cells are padded before styling so
/// ANSI escapes never skew the column widths.
pub fn render_status_table(config: &OutputConfig, rows: &[StatusRow]) -> String {
    let headers = ["NAME", "MODE", "STATE", "STATUS", "ADDRESS"];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.name.clone(),
                row.mode.to_string(),
                row.state.to_string(),
                row.status.to_string(),
                row.address.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    for row in &cells {
        for (index, cell) in row.iter().enumerate() {
            widths[index] = widths[index].max(cell.len());
        }
    }

    let mut table = String::new();
    for (index, header) in headers.iter().enumerate() {
        let padded = pad(header, widths[index], index == headers.len() - 1);
        table.push_str(&paint(config, &padded, Style::new().bold()));
        if index < headers.len() - 1 {
            table.push_str("  ");
        }
    }
    table.push('\n');

    for (row, line) in rows.iter().zip(&cells) {
        let styles = [
            Style::new(),
            mode_style(row.mode),
            state_style(row.state),
            status_style(row.status),
            Style::new(),
        ];
        for (index, cell) in line.iter().enumerate() {
            let padded = pad(cell, widths[index], index == line.len() - 1);
            table.push_str(&paint(config, &padded, styles[index].clone()));
            if index < line.len() - 1 {
                table.push_str("  ");
            }
        }
        table.push('\n');
    }
    table
}

/// A workspace mode rendered for terminal output.
pub fn mode_cell(config: &OutputConfig, mode: Mode) -> String {
    paint(config, &mode.to_string(), mode_style(mode))
}

/// A workspace state rendered for terminal output.
pub fn state_cell(config: &OutputConfig, state: State) -> String {
    paint(config, &state.to_string(), state_style(state))
}

/// A workspace status rendered for terminal output.
pub fn status_cell(config: &OutputConfig, status: Status) -> String {
    paint(config, &status.to_string(), status_style(status))
}

fn mode_style(mode: Mode) -> Style {
    match mode {
        Mode::Workstation => Style::new().yellow(),
        Mode::Server => Style::new().red(),
        Mode::Manual => Style::new().green(),
    }
}

fn state_style(state: State) -> Style {
    match state {
        State::Repository => Style::new().red(),
        State::Image => Style::new().dim(),
        State::Container => Style::new().white(),
        State::Running => Style::new().green(),
    }
}

fn status_style(status: Status) -> Style {
    match status {
        Status::New => Style::new().dim(),
        Status::Dirty => Style::new().red(),
        Status::Clean => Style::new().green(),
    }
}

fn pad(text: &str, width: usize, last: bool) -> String {
    if last {
        text.to_string()
    } else {
        format!("{:width$}", text, width = width)
    }
}

fn paint(config: &OutputConfig, text: &str, style: Style) -> String {
    if config.use_color {
        style.force_styling(true).apply_to(text).to_string()
    } else {
        text.to_string()
    }
}
