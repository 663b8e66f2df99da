//! Configuration file loading and management
//!
//! This module handles loading and parsing the probe configuration from
//! `$XDG_CONFIG_HOME/imager-python/probe.toml`. If the configuration file
//! doesn't exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use imager_python::HostConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    /// Probe behaviour
    #[serde(default)]
    pub probe: ProbeSettings,
    /// Interpreter host settings, passed through unchanged
    #[serde(default)]
    pub host: HostConfig,
}

/// What the probe checks and how it reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Directory anchoring the exe-relative search path entries.
    /// If None, uses the directory of the running executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe_dir: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Log every attribute of the mask generator module at debug level
    pub list_attributes: bool,
    /// Scripted mask generator entry point
    pub mask_generator: MaskGeneratorSettings,
    /// Attribute chains that must resolve
    pub attribute_checks: Vec<AttributeCheck>,
}

/// Location of the scripted mask generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MaskGeneratorSettings {
    /// Module to import
    pub module: String,
    /// Class instantiated with no arguments
    pub class: String,
    /// Method fetched from the instance
    pub method: String,
}

/// A module import followed by attribute lookups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeCheck {
    /// Module to import
    pub module: String,
    /// Attribute names looked up in order
    pub path: Vec<String>,
}

impl AttributeCheck {
    /// Dotted name of the final attribute
    pub fn display_name(&self) -> String {
        std::iter::once(self.module.as_str())
            .chain(self.path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            exe_dir: None,
            log_level: "info".to_string(),
            list_attributes: true,
            mask_generator: MaskGeneratorSettings::default(),
            attribute_checks: vec![AttributeCheck {
                module: "PIL".to_string(),
                path: vec!["Image".to_string(), "frombuffer".to_string()],
            }],
        }
    }
}

impl Default for MaskGeneratorSettings {
    fn default() -> Self {
        Self {
            module: "MaskGenerator".to_string(),
            class: "MaskGenerator".to_string(),
            method: "Gen".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/imager-python/probe.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "aiholoimager", "imager-python")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("probe.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        r#"# imager-python probe configuration

[probe]
# Directory holding the host executable. Anchors the exe-relative
# search path entries (site-packages, vendored packages).
# Default: directory of the probe executable
# exe_dir = "/opt/aiholoimager/bin"

# Log level: trace, debug, info, warn, error
# Default: "info"
log_level = "info"

# List the attributes of the mask generator module at debug level
list_attributes = true

[probe.mask_generator]
module = "MaskGenerator"
class = "MaskGenerator"
method = "Gen"

[[probe.attribute_checks]]
module = "PIL"
path = ["Image", "frombuffer"]

[host]
# Program name reported by the embedded runtime
program_name = "AIHoloImager"

# Search path entries relative to exe_dir
site_packages = "Python/Lib/site-packages"
vendored_packages = ["InstantMesh"]

# Absolute entries appended after the standard ones
# extra_paths = ["/srv/models/python"]

# Log each attribute lookup together with the receiving object
trace_attribute_lookups = false

# Guest runtime locations default to the values baked in at build time
# stdlib_dir = "/usr/lib/python3.10"
# platform_tag = "config-3.10-x86_64-linux-gnu"
# runtime_lib_dir = "/usr/lib/x86_64-linux-gnu"
"#
        .to_string()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.probe.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.probe.log_level,
                valid_log_levels.join(", ")
            );
        }

        let generator = &self.probe.mask_generator;
        if generator.module.is_empty() || generator.class.is_empty() || generator.method.is_empty() {
            anyhow::bail!("mask_generator module, class and method must all be set");
        }

        for check in &self.probe.attribute_checks {
            if check.module.is_empty() {
                anyhow::bail!("attribute_checks entries need a module");
            }
        }

        self.host.validate().context("Invalid [host] section")?;
        Ok(())
    }

    /// Get the executable directory
    ///
    /// Returns the configured directory or the one holding the running executable
    pub fn exe_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.probe.exe_dir {
            return Ok(dir.clone());
        }

        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        exe.parent()
            .map(Path::to_path_buf)
            .context("Executable has no parent directory")
    }
}
