//! Host configuration.
//!
//! Every value the guest runtime sees is set here explicitly. Defaults come
//! from the locations baked in at build time; a TOML file can override them
//! for deployments that ship their own runtime tree.

use crate::error::{HostError, HostResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Guest stdlib tree baked in at build time.
pub const STDLIB_DIR: &str = env!("IMAGER_PY_STDLIB_DIR");

/// Directory of the guest runtime shared library, baked in at build time.
pub const RUNTIME_LIB_DIR: &str = env!("IMAGER_PY_RUNTIME_LIB_DIR");

/// Platform-specific config subdirectory of [`STDLIB_DIR`].
pub const PLATFORM_TAG: &str = env!("IMAGER_PY_PLATFORM_TAG");

/// Program name the guest runtime reports.
pub const DEFAULT_PROGRAM_NAME: &str = "AIHoloImager";

/// Interpreter host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Fixed program name handed to the guest.
    pub program_name: String,

    /// Guest standard library tree.
    pub stdlib_dir: PathBuf,

    /// Subdirectory of `stdlib_dir` holding the platform config.
    pub platform_tag: String,

    /// Directory of the guest runtime shared library.
    pub runtime_lib_dir: PathBuf,

    /// Site-packages directory, relative to the executable directory.
    pub site_packages: PathBuf,

    /// Vendored package roots, relative to the executable directory.
    pub vendored_packages: Vec<PathBuf>,

    /// Entries appended after the standard ones.
    pub extra_paths: Vec<PathBuf>,

    /// Log every attribute lookup with the receiving object.
    pub trace_attribute_lookups: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            stdlib_dir: PathBuf::from(STDLIB_DIR),
            platform_tag: PLATFORM_TAG.to_string(),
            runtime_lib_dir: PathBuf::from(RUNTIME_LIB_DIR),
            site_packages: PathBuf::from("Python/Lib/site-packages"),
            vendored_packages: vec![PathBuf::from("InstantMesh")],
            extra_paths: Vec::new(),
            trace_attribute_lookups: false,
        }
    }
}

impl HostConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> HostResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> HostResult<Self> {
        let config: HostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> HostResult<()> {
        if self.program_name.is_empty() {
            return Err(HostError::InvalidConfig(
                "program_name cannot be empty".to_string(),
            ));
        }

        if self.program_name.contains('\0') {
            return Err(HostError::InvalidConfig(
                "program_name cannot contain NUL".to_string(),
            ));
        }

        if self.platform_tag.is_empty() || Path::new(&self.platform_tag).is_absolute() {
            return Err(HostError::InvalidConfig(format!(
                "platform_tag must name a subdirectory of stdlib_dir: {:?}",
                self.platform_tag
            )));
        }

        if self.site_packages.is_absolute() {
            return Err(HostError::InvalidConfig(format!(
                "site_packages must be relative to the executable directory: {}",
                self.site_packages.display()
            )));
        }

        if let Some(vendored) = self.vendored_packages.iter().find(|p| p.is_absolute()) {
            return Err(HostError::InvalidConfig(format!(
                "vendored package must be relative to the executable directory: {}",
                vendored.display()
            )));
        }

        Ok(())
    }

    /// Platform config directory under the stdlib tree.
    pub fn platform_config_dir(&self) -> PathBuf {
        self.stdlib_dir.join(&self.platform_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.program_name, "AIHoloImager");
        assert_eq!(config.stdlib_dir, PathBuf::from(STDLIB_DIR));
        assert_eq!(config.runtime_lib_dir, PathBuf::from(RUNTIME_LIB_DIR));
        assert_eq!(config.site_packages, PathBuf::from("Python/Lib/site-packages"));
        assert_eq!(config.vendored_packages, vec![PathBuf::from("InstantMesh")]);
        assert!(config.extra_paths.is_empty());
        assert!(!config.trace_attribute_lookups);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
stdlib_dir = "/opt/python/lib/python3.10"
platform_tag = "config-3.10-aarch64-linux-gnu"
vendored_packages = ["InstantMesh", "third_party/sam"]
trace_attribute_lookups = true
"#;

        let config = HostConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.program_name, DEFAULT_PROGRAM_NAME);
        assert_eq!(config.stdlib_dir, PathBuf::from("/opt/python/lib/python3.10"));
        assert_eq!(
            config.platform_config_dir(),
            PathBuf::from("/opt/python/lib/python3.10/config-3.10-aarch64-linux-gnu")
        );
        assert_eq!(config.vendored_packages.len(), 2);
        assert!(config.trace_attribute_lookups);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"program_name = \"MeshProbe\"\nextra_paths = [\"/srv/models\"]\n")
            .unwrap();

        let config = HostConfig::load(temp_file.path()).unwrap();
        assert_eq!(config.program_name, "MeshProbe");
        assert_eq!(config.extra_paths, vec![PathBuf::from("/srv/models")]);
    }

    #[test]
    fn test_invalid_program_name() {
        let result = HostConfig::from_toml_str("program_name = \"\"");
        assert!(matches!(result, Err(HostError::InvalidConfig(_))));
    }

    #[test]
    fn test_absolute_vendored_package_rejected() {
        let result = HostConfig::from_toml_str("vendored_packages = [\"/abs/InstantMesh\"]");
        assert!(matches!(result, Err(HostError::InvalidConfig(_))));
    }

    #[test]
    fn test_absolute_site_packages_rejected() {
        let mut config = HostConfig::default();
        config.site_packages = PathBuf::from("/usr/lib/site-packages");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_platform_tag_must_be_relative() {
        let mut config = HostConfig::default();
        config.platform_tag = String::new();
        assert!(matches!(config.validate(), Err(HostError::InvalidConfig(_))));

        let result = HostConfig::from_toml_str("platform_tag = \"/usr/lib/python3.10/config\"");
        assert!(matches!(result, Err(HostError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = HostConfig::from_toml_str("program_name = [");
        assert!(matches!(result, Err(HostError::Toml(_))));
    }
}
