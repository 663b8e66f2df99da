//! Module search path construction.
//!
//! The guest resolves imports from the following locations (in order):
//!
//! 1. The stdlib tree baked in at build time
//! 2. The platform config subdirectory of the stdlib tree
//! 3. The guest runtime library directory
//! 4. The executable directory
//! 5. `<exe_dir>/Python/Lib/site-packages`
//! 6. Vendored package roots under the executable directory (`InstantMesh`)
//!
//! Earlier entries shadow later ones. Every entry is normalized lexically;
//! the filesystem is never consulted.

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::facade::WideString;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Ordered list of directories consulted by `import`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPath {
    entries: Vec<PathBuf>,
}

impl SearchPath {
    /// Build the search path for an executable directory.
    pub fn build(config: &HostConfig, exe_dir: &Path) -> Self {
        let mut entries = vec![
            config.stdlib_dir.clone(),
            config.platform_config_dir(),
            config.runtime_lib_dir.clone(),
            exe_dir.to_path_buf(),
            exe_dir.join(&config.site_packages),
        ];
        entries.extend(config.vendored_packages.iter().map(|p| exe_dir.join(p)));
        entries.extend(config.extra_paths.iter().cloned());

        let entries: Vec<PathBuf> = entries.iter().map(|p| lexically_normal(p)).collect();
        for (index, entry) in entries.iter().enumerate() {
            debug!("Search path entry {}: {}", index, entry.display());
        }

        Self { entries }
    }

    /// Entries in resolution order.
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Iterate over the entries in resolution order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the path has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encode every entry for the guest configuration.
    pub(crate) fn to_wide(&self) -> HostResult<Vec<WideString>> {
        self.entries
            .iter()
            .map(|entry| {
                entry
                    .to_str()
                    .map(WideString::from)
                    .ok_or_else(|| HostError::NonUnicodePath(entry.clone()))
            })
            .collect()
    }
}

/// Normalize a path without touching the filesystem.
///
/// `.` components are dropped and `name/..` pairs collapse. Leading `..`
/// survive on relative paths and are absorbed by the root on absolute ones.
pub fn lexically_normal(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return if path.as_os_str().is_empty() {
            PathBuf::new()
        } else {
            PathBuf::from(".")
        };
    }

    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HostConfig {
        HostConfig {
            stdlib_dir: PathBuf::from("/usr/lib/python3.10/"),
            platform_tag: "config-3.10-x86_64-linux-gnu".to_string(),
            runtime_lib_dir: PathBuf::from("/usr/lib/x86_64-linux-gnu/./"),
            ..HostConfig::default()
        }
    }

    #[test]
    fn test_lexically_normal() {
        let cases = [
            ("/opt/app/bin", "/opt/app/bin"),
            ("/opt/app/bin/", "/opt/app/bin"),
            ("/opt/./app//bin", "/opt/app/bin"),
            ("/opt/app/../lib", "/opt/lib"),
            ("/..", "/"),
            ("/../opt", "/opt"),
            ("a/b/../../..", ".."),
            ("../x/./y", "../x/y"),
            ("a/..", "."),
            ("./", "."),
            ("", ""),
        ];

        for (input, expected) in cases {
            assert_eq!(
                lexically_normal(Path::new(input)),
                PathBuf::from(expected),
                "normalizing {input:?}"
            );
        }
    }

    #[test]
    fn test_build_order() {
        let search_path = SearchPath::build(&config(), Path::new("/opt/app/bin"));

        let expected: Vec<PathBuf> = [
            "/usr/lib/python3.10",
            "/usr/lib/python3.10/config-3.10-x86_64-linux-gnu",
            "/usr/lib/x86_64-linux-gnu",
            "/opt/app/bin",
            "/opt/app/bin/Python/Lib/site-packages",
            "/opt/app/bin/InstantMesh",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        assert_eq!(search_path.entries(), expected.as_slice());
        assert_eq!(search_path.len(), 6);
    }

    #[test]
    fn test_exe_dir_is_normalized() {
        let search_path = SearchPath::build(&config(), Path::new("/opt/app/tools/../bin/."));
        let entries = search_path.entries();

        assert_eq!(entries[3], PathBuf::from("/opt/app/bin"));
        assert_eq!(entries[4], PathBuf::from("/opt/app/bin/Python/Lib/site-packages"));
        assert_eq!(entries[5], PathBuf::from("/opt/app/bin/InstantMesh"));
    }

    #[test]
    fn test_vendored_and_extra_paths_keep_order() {
        let mut config = config();
        config.vendored_packages = vec![PathBuf::from("InstantMesh"), PathBuf::from("sam/../sam2")];
        config.extra_paths = vec![PathBuf::from("/srv/models/./py")];

        let search_path = SearchPath::build(&config, Path::new("/opt/app/bin"));
        let tail: Vec<&Path> = search_path.iter().skip(5).collect();

        assert_eq!(
            tail,
            vec![
                Path::new("/opt/app/bin/InstantMesh"),
                Path::new("/opt/app/bin/sam2"),
                Path::new("/srv/models/py"),
            ]
        );
    }

    #[test]
    fn test_to_wide_round_trips_entries() {
        let search_path = SearchPath::build(&config(), Path::new("/opt/app/bin"));
        let wide = search_path.to_wide().unwrap();

        assert_eq!(wide.len(), search_path.len());
        assert_eq!(wide[3].to_string_lossy(), "/opt/app/bin");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_unicode_entry_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let exe_dir = Path::new(OsStr::from_bytes(b"/opt/\xffapp"));
        let search_path = SearchPath::build(&config(), exe_dir);

        assert!(matches!(
            search_path.to_wide(),
            Err(HostError::NonUnicodePath(_))
        ));
    }
}
