//! Configuration: types, default paths, XML loading.
//! CLI flags override XML values; XML overrides built-in defaults.

pub mod paths;
pub mod types;
pub mod xml;

pub use paths::{default_config_path, default_log_path, path_has_symlink_ancestor};
pub use types::{Config, LogLevel};
pub use xml::{create_template_config, load_config_from_xml};

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV: &str = "TREEMOVE_CONFIG";
