//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - SOURCE and DEST are positional; with the default `move` mode DEST is the
//!   new parent, with `rename` it is the full new path.
//! - --debug is a shorthand for --log-level debug.

use clap::{Parser, ValueHint};
use std::path::PathBuf;

use treemove::config::{Config, LogLevel};
use treemove::pipeline::Mode;

/// CLI wrapper for the treemove library.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Relocate a subtree of hierarchical content with validation and rollback"
)]
pub struct Args {
    /// Root of the subtree to relocate.
    #[arg(value_name = "SOURCE", value_hint = ValueHint::AnyPath)]
    pub source: Option<PathBuf>,

    /// Destination parent (mode `move`) or full new path (mode `rename`).
    #[arg(value_name = "DEST", value_hint = ValueHint::AnyPath)]
    pub destination: Option<PathBuf>,

    /// Relocation mode: `move` appends the source's own name to DEST,
    /// `rename` uses DEST verbatim.
    #[arg(long, default_value = "move", value_parser = parse_mode)]
    pub mode: Mode,

    /// Label used in diagnostics and worker thread names.
    #[arg(long, default_value = "relocation")]
    pub process_name: String,

    /// Override the worker-pool width shared by every pipeline stage.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Override attempts per node-level operation.
    #[arg(long, value_name = "N")]
    pub retry_attempts: Option<u32>,

    /// Override the fixed delay between attempts, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(long, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    /// Print where treemove will look for the config file (or TREEMOVE_CONFIG if set), then exit.
    #[arg(
        long,
        help = "Print the config file location used by treemove and exit"
    )]
    pub print_config: bool,

    /// Emit logs in structured JSON (includes timestamp, level, and structured fields).
    #[arg(long, help = "Emit logs in structured JSON")]
    pub json: bool,
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    Mode::parse(s).ok_or_else(|| format!("invalid mode: '{s}' (expected 'move' or 'rename')"))
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(w) = self.workers {
            cfg.workers = w.max(1);
        }
        if let Some(a) = self.retry_attempts {
            cfg.retry_attempts = a;
        }
        if let Some(ms) = self.retry_delay_ms {
            cfg.retry_delay = std::time::Duration::from_millis(ms);
        }
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
