//! Filesystem probing for package artefacts (spec.md §3 "External
//! artefacts", §4.3 store scan, §4.7.1 setup-file check, §4.9 file-derived
//! version refresh).
//!
//! Per the design notes in spec.md §9, the several "does file X exist /
//! what does it say" checks scattered across the install worker and main
//! loop are modelled as one small capability trait so those workers can be
//! unit-tested against an in-memory double instead of real paths.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Everything the registry and workers need to know about a package
/// directory's on-disk state.
pub trait PackageProbe: Send + Sync {
    /// Read `<store>/<name>/version`'s first line, returning `None` unless
    /// the first character is `v`.
    fn stored_version(&self, name: &str) -> Option<String>;

    /// Read the install marker file's first line; `Some(String::new())`
    /// means the marker exists but is empty (installed version "unknown"
    /// per spec.md §3); `None` means no marker file exists at all.
    fn installed_version(&self, name: &str) -> Option<String>;

    /// Parse `<store>/<name>/gitHubInfo` as `owner:branch`, if present.
    fn github_info(&self, name: &str) -> Option<(String, String)>;

    /// Whether `<store>/<name>/REMOVED` exists.
    fn has_removed_marker(&self, name: &str) -> bool;

    /// Whether `<store>/<name>/DO_NOT_AUTO_INSTALL` exists.
    fn has_do_not_auto_install_marker(&self, name: &str) -> bool;

    /// Whether `<store>/<name>/raspberryPiOnly` exists.
    fn is_raspberry_pi_only(&self, name: &str) -> bool;

    /// Whether `<store>/<name>/optionsRequired` exists.
    fn options_required(&self, name: &str) -> bool;

    /// Whether `setupOptions/<name>/optionsSet` exists, i.e. the package's
    /// interactive setup options have already been configured once.
    fn options_set(&self, name: &str) -> bool;

    /// Contents of `<store>/<name>/firstCompatibleVersion`, if present.
    fn first_compatible_version(&self, name: &str) -> Option<String>;

    /// Contents of `<store>/<name>/obsoleteVersion`, if present.
    fn obsolete_version(&self, name: &str) -> Option<String>;

    /// Whether `<store>/<name>/setup` exists and is executable.
    fn setup_is_executable(&self, name: &str) -> bool;

    /// The package's directory, whether or not it currently exists.
    fn package_dir(&self, name: &str) -> PathBuf;

    /// List the basenames of every child directory directly under the
    /// store root (spec.md §4.3 phase 3 candidates).
    fn store_children(&self) -> Vec<String>;

    /// Write `<store>/<name>/REMOVED`, if the package directory exists
    /// (spec.md §4.3 "Removal").
    fn write_removed_marker(&self, name: &str) -> std::io::Result<()>;

    /// Write `<store>/<name>/DO_NOT_AUTO_INSTALL` (spec.md §4.7.1 step 2,
    /// manual uninstall).
    fn write_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()>;

    /// Remove `<store>/<name>/DO_NOT_AUTO_INSTALL`, if present
    /// (spec.md §4.7.1 step 2, manual install).
    fn clear_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()>;
}

/// Real filesystem-backed implementation, rooted at a configured store
/// directory, install-marker directory, and setup-options directory.
#[derive(Debug, Clone)]
pub struct FilesystemProbe {
    store_dir: PathBuf,
    install_marker_dir: PathBuf,
    setup_options_dir: PathBuf,
}

impl FilesystemProbe {
    /// Construct a probe rooted at the given store, install-marker, and
    /// setup-options directories. `setup_options_dir` is a sibling of the
    /// per-package store directories, not nested inside them (ground
    /// truth: `examples/original_source/PackageManager.py` reads
    /// `/data/setupOptions/<name>/optionsSet` alongside `/data/<name>/...`).
    pub fn new(
        store_dir: impl Into<PathBuf>,
        install_marker_dir: impl Into<PathBuf>,
        setup_options_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store_dir: store_dir.into(),
            install_marker_dir: install_marker_dir.into(),
            setup_options_dir: setup_options_dir.into(),
        }
    }

    fn read_first_line(path: &Path) -> Option<String> {
        let text = std::fs::read_to_string(path).ok()?;
        Some(text.lines().next().unwrap_or("").trim().to_string())
    }

    fn exists(path: &Path) -> bool {
        path.exists()
    }
}

impl PackageProbe for FilesystemProbe {
    fn stored_version(&self, name: &str) -> Option<String> {
        let line = Self::read_first_line(&self.package_dir(name).join("version"))?;
        if line.starts_with('v') {
            Some(line)
        } else {
            None
        }
    }

    fn installed_version(&self, name: &str) -> Option<String> {
        let path = self.install_marker_dir.join(format!("installedVersion-{name}"));
        let text = std::fs::read_to_string(&path).ok()?;
        Some(text.lines().next().unwrap_or("").trim().to_string())
    }

    fn github_info(&self, name: &str) -> Option<(String, String)> {
        let line = Self::read_first_line(&self.package_dir(name).join("gitHubInfo"))?;
        let (owner, branch) = line.split_once(':')?;
        Some((owner.trim().to_string(), branch.trim().to_string()))
    }

    fn has_removed_marker(&self, name: &str) -> bool {
        Self::exists(&self.package_dir(name).join("REMOVED"))
    }

    fn has_do_not_auto_install_marker(&self, name: &str) -> bool {
        Self::exists(&self.package_dir(name).join("DO_NOT_AUTO_INSTALL"))
    }

    fn is_raspberry_pi_only(&self, name: &str) -> bool {
        Self::exists(&self.package_dir(name).join("raspberryPiOnly"))
    }

    fn options_required(&self, name: &str) -> bool {
        Self::exists(&self.package_dir(name).join("optionsRequired"))
    }

    fn options_set(&self, name: &str) -> bool {
        Self::exists(&self.setup_options_dir.join(name).join("optionsSet"))
    }

    fn first_compatible_version(&self, name: &str) -> Option<String> {
        Self::read_first_line(&self.package_dir(name).join("firstCompatibleVersion"))
    }

    fn obsolete_version(&self, name: &str) -> Option<String> {
        Self::read_first_line(&self.package_dir(name).join("obsoleteVersion"))
    }

    fn setup_is_executable(&self, name: &str) -> bool {
        let path = self.package_dir(name).join("setup");
        match std::fs::metadata(&path) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    fn package_dir(&self, name: &str) -> PathBuf {
        self.store_dir.join(name)
    }

    fn store_children(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.store_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect()
    }

    fn write_removed_marker(&self, name: &str) -> std::io::Result<()> {
        let dir = self.package_dir(name);
        if !dir.exists() {
            return Ok(());
        }
        std::fs::write(dir.join("REMOVED"), b"")
    }

    fn write_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()> {
        std::fs::write(self.package_dir(name).join("DO_NOT_AUTO_INSTALL"), b"")
    }

    fn clear_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.package_dir(name).join("DO_NOT_AUTO_INSTALL")) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    //! In-memory test double, used across this crate's unit tests.
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct FakeProbe {
        pub stored: Mutex<HashMap<String, String>>,
        pub installed: Mutex<HashMap<String, String>>,
        pub github_info: Mutex<HashMap<String, (String, String)>>,
        pub removed: Mutex<HashSet<String>>,
        pub do_not_auto_install: Mutex<HashSet<String>>,
        pub raspberry_pi_only: Mutex<HashSet<String>>,
        pub options_required: Mutex<HashSet<String>>,
        pub options_set: Mutex<HashSet<String>>,
        pub first_compatible: Mutex<HashMap<String, String>>,
        pub obsolete: Mutex<HashMap<String, String>>,
        pub setup_executable: Mutex<HashSet<String>>,
        pub children: Mutex<Vec<String>>,
    }

    impl PackageProbe for FakeProbe {
        fn stored_version(&self, name: &str) -> Option<String> {
            self.stored.lock().unwrap().get(name).cloned()
        }
        fn installed_version(&self, name: &str) -> Option<String> {
            self.installed.lock().unwrap().get(name).cloned()
        }
        fn github_info(&self, name: &str) -> Option<(String, String)> {
            self.github_info.lock().unwrap().get(name).cloned()
        }
        fn has_removed_marker(&self, name: &str) -> bool {
            self.removed.lock().unwrap().contains(name)
        }
        fn has_do_not_auto_install_marker(&self, name: &str) -> bool {
            self.do_not_auto_install.lock().unwrap().contains(name)
        }
        fn is_raspberry_pi_only(&self, name: &str) -> bool {
            self.raspberry_pi_only.lock().unwrap().contains(name)
        }
        fn options_required(&self, name: &str) -> bool {
            self.options_required.lock().unwrap().contains(name)
        }
        fn options_set(&self, name: &str) -> bool {
            self.options_set.lock().unwrap().contains(name)
        }
        fn first_compatible_version(&self, name: &str) -> Option<String> {
            self.first_compatible.lock().unwrap().get(name).cloned()
        }
        fn obsolete_version(&self, name: &str) -> Option<String> {
            self.obsolete.lock().unwrap().get(name).cloned()
        }
        fn setup_is_executable(&self, name: &str) -> bool {
            self.setup_executable.lock().unwrap().contains(name)
        }
        fn package_dir(&self, name: &str) -> PathBuf {
            PathBuf::from("/fake-store").join(name)
        }
        fn store_children(&self) -> Vec<String> {
            self.children.lock().unwrap().clone()
        }

        fn write_removed_marker(&self, name: &str) -> std::io::Result<()> {
            self.removed.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        fn write_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()> {
            self.do_not_auto_install.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        fn clear_do_not_auto_install_marker(&self, name: &str) -> std::io::Result<()> {
            self.do_not_auto_install.lock().unwrap().remove(name);
            Ok(())
        }
    }
}
