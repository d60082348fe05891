//! XML configuration support.
//! - Loads settings from config.xml (quick_xml).
//! - Creates a template if missing (unless TREEMOVE_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; value validation happens
//!   where the values are used.
//! - Unknown fields are rejected so misconfigurations surface early.

use anyhow::{Context, Result};
use quick_xml::de::from_str as from_xml_str;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::config::paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
use crate::config::types::{Config, LogLevel};
use crate::config::CONFIG_ENV;

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    #[serde(rename = "workers", default, deserialize_with = "de_u64_trimmed_opt")]
    workers: Option<u64>,
    #[serde(
        rename = "retry_attempts",
        default,
        deserialize_with = "de_u64_trimmed_opt"
    )]
    retry_attempts: Option<u64>,
    #[serde(
        rename = "retry_delay_ms",
        default,
        deserialize_with = "de_u64_trimmed_opt"
    )]
    retry_delay_ms: Option<u64>,
    #[serde(rename = "log_level")]
    log_level: Option<String>,
    #[serde(rename = "log_file")]
    log_file: Option<String>,
}

// Custom deserializer that trims surrounding whitespace for optional u64
fn de_u64_trimmed_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| s.trim().parse::<u64>().ok()))
}

fn apply(parsed: XmlConfig, cfg: &mut Config) {
    if let Some(w) = parsed.workers {
        cfg.workers = (w as usize).max(1);
    }
    if let Some(a) = parsed.retry_attempts {
        cfg.retry_attempts = a as u32;
    }
    if let Some(ms) = parsed.retry_delay_ms {
        cfg.retry_delay = Duration::from_millis(ms);
    }
    if let Some(s) = parsed.log_level.as_deref() {
        if let Ok(level) = s.trim().parse::<LogLevel>() {
            cfg.log_level = level;
        }
    }
    if let Some(s) = parsed.log_file.as_deref() {
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            cfg.log_file = Some(PathBuf::from(trimmed));
        }
    }
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig =
        from_xml_str(&contents).with_context(|| format!("parse config xml '{}'", path.display()))?;
    let mut cfg = Config::default();
    apply(parsed, &mut cfg);
    Ok(cfg)
}

/// Read config from XML. TREEMOVE_CONFIG wins over the per-platform default
/// path. Returns None when no config file exists (creating a template at the
/// default location on the way out).
pub fn load_config_from_xml() -> Option<Config> {
    let env_path = env::var_os(CONFIG_ENV).map(PathBuf::from);
    let env_set = env_path.is_some();
    let cfg_path = env_path.or_else(default_config_path)?;

    if !cfg_path.exists() {
        if !env_set {
            let _ = create_template_config(&cfg_path);
        }
        return None;
    }

    match load_config_from_xml_path(&cfg_path) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            debug!(
                "Failed to load config.xml at {}: {:#}",
                cfg_path.display(),
                e
            );
            None
        }
    }
}

/// Create default template config file and parent directory.
/// Refuses paths with symlinked ancestors.
pub fn create_template_config(path: &Path) -> Result<()> {
    if path_has_symlink_ancestor(path)? {
        return Err(anyhow::anyhow!(
            "Refusing to create config: ancestor of {} is a symlink",
            path.display()
        ));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let suggested_log = default_log_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "/path/to/treemove.log".into());

    let defaults = Config::default();
    let content = format!(
        "<!--\n  treemove configuration (XML)\n\n  Fields:\n    workers         -> worker-pool width shared by every pipeline stage\n    retry_attempts  -> attempts per node-level operation before it counts as failed\n    retry_delay_ms  -> fixed delay between attempts, in milliseconds\n    log_level       -> quiet | normal | info | debug\n    log_file        -> path to log file (optional; stdout/stderr still used)\n\n  Notes:\n    - CLI flags override XML values.\n    - Set {env} to use a config file at another location.\n-->\n<config>\n  <workers>{workers}</workers>\n  <retry_attempts>{attempts}</retry_attempts>\n  <retry_delay_ms>{delay}</retry_delay_ms>\n  <log_level>normal</log_level>\n  <log_file>{log}</log_file>\n</config>\n",
        env = CONFIG_ENV,
        workers = defaults.workers,
        attempts = defaults.retry_attempts,
        delay = defaults.retry_delay.as_millis(),
        log = suggested_log,
    );

    fs::write(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    debug!("Created template config at {}", path.display());
    Ok(())
}
