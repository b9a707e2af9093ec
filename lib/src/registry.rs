//! The package registry: an ordered table of package records plus the
//! discovery, add, and remove logic of spec.md §4.3.
//!
//! The registry itself is a plain, non-thread-safe structure. Callers
//! (the bus facade in [`crate::bus`]) hold it behind a `Mutex` and are
//! responsible for the locking discipline spec.md §5 requires: acquire,
//! snapshot what's needed, release, do I/O, reacquire, publish.

use std::path::Path;

use crate::error::RegistryError;
use crate::probe::PackageProbe;
use crate::version;

/// Reject-list of branch/version-like suffixes that disqualify a store
/// directory from being auto-admitted as a package during the store scan
/// (spec.md §4.3 phase 3).
const STORE_SCAN_REJECT_SUFFIXES: &[&str] = &[
    "-current", "-latest", "-main", "-test", "-debug", "-beta", "-backup1", "-backup2", "-0",
    "-1", "-2", "-3", "-4", "-5", "-6", "-7", "-8", "-9", " ",
];

/// Accept-list of branch/version tokens a media archive's filename must
/// contain to be considered for extraction (spec.md §4.8).
pub const MEDIA_ACCEPT_TOKENS: &[&str] = &[
    "-current", "-latest", "-main", "-test", "-debug", "-beta", "-install", "-0", "-1", "-2",
    "-3", "-4", "-5", "-6", "-7", "-8", "-9",
];

/// Setup-script exit codes and the synthetic `NoSetupFile` state
/// (spec.md §4.7.1, §6). `Ok` and `Pending` round out the set of values
/// `InstallState` can take per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// No error; package is eligible for install/uninstall.
    Ok,
    /// An install/uninstall is currently in flight for this package.
    Pending,
    /// `<store>/<name>/setup` is missing or not executable.
    NoSetupFile,
    /// Setup exited 123: reboot required to finish applying the change.
    RebootRequired,
    /// Setup exited 250: must be run again from the command line.
    RunAgain,
    /// Setup exited 251: required options were not set.
    OptionsNotSet,
    /// Setup exited 252: a file-set operation failed.
    FileSetError,
    /// Setup exited 253: incompatible with this platform.
    PlatformIncompatible,
    /// Setup exited 254: incompatible with this system version.
    VersionIncompatible,
    /// Any other non-zero exit code.
    GenericError(i32),
}

impl InstallState {
    /// Map a setup-script exit code onto an `InstallState` (spec.md §4.7.1
    /// table). Exit code 0 is `Ok`.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => InstallState::Ok,
            123 => InstallState::RebootRequired,
            250 => InstallState::RunAgain,
            251 => InstallState::OptionsNotSet,
            252 => InstallState::FileSetError,
            253 => InstallState::PlatformIncompatible,
            254 => InstallState::VersionIncompatible,
            other => InstallState::GenericError(other),
        }
    }

    /// Invariant 3 / spec.md §4.7.1's last paragraph: a `StoredVersion`
    /// change plausibly clears these specific error states, since a new
    /// build could fix exactly these problems.
    pub fn clears_on_stored_version_change(self) -> bool {
        matches!(
            self,
            InstallState::FileSetError
                | InstallState::VersionIncompatible
                | InstallState::OptionsNotSet
                | InstallState::NoSetupFile
        )
    }

    /// Invariant 3: only `Ok` permits either install direction.
    pub fn is_ok(self) -> bool {
        matches!(self, InstallState::Ok)
    }
}

/// Compatibility determination (spec.md §3 Incompatibility field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Incompatibility {
    /// Compatible; eligible for auto-install.
    #[default]
    None,
    /// `raspberryPiOnly` is set but the running platform is not a Pi.
    Platform,
    /// The system version falls outside `firstCompatibleVersion`/
    /// `obsoleteVersion`.
    Version,
    /// `optionsRequired` is set and the package's setup options have not
    /// yet been configured (no `optionsSet` marker); setup must be run
    /// interactively from the command line first (spec.md §6's
    /// `Incompatible` glossary entry).
    NeedsCommandLine,
}

impl Incompatibility {
    /// The bus-facing string for this value (spec.md §6).
    pub fn as_bus_str(self) -> &'static str {
        match self {
            Incompatibility::None => "",
            Incompatibility::Version => "VERSION",
            Incompatibility::Platform => "PLATFORM",
            Incompatibility::NeedsCommandLine => "CMDLINE",
        }
    }
}

/// Minimum system version a package is compatible with when it carries no
/// `firstCompatibleVersion` file at all (ground truth:
/// `examples/original_source/PackageManager.py`'s `UpdateFileVersions`
/// defaults `firstVersion` to this value on a missing-file read).
const DEFAULT_FIRST_COMPATIBLE_VERSION: &str = "v2.40";

/// Inputs to compatibility determination, gathered from the probe so the
/// decision itself is a pure function and unit-testable in isolation.
#[derive(Debug, Clone, Default)]
pub struct CompatibilityInputs {
    /// `<store>/<name>/raspberryPiOnly` exists.
    pub raspberry_pi_only: bool,
    /// `<store>/<name>/optionsRequired` exists.
    pub options_required: bool,
    /// `setupOptions/<name>/optionsSet` exists, i.e. the package's
    /// interactive setup options have already been configured once.
    pub options_set: bool,
    /// `<store>/<name>/firstCompatibleVersion` contents, if present. When
    /// absent, `DEFAULT_FIRST_COMPATIBLE_VERSION` is used as the floor.
    pub first_compatible_version: Option<String>,
    /// `<store>/<name>/obsoleteVersion` contents, if present.
    pub obsolete_version: Option<String>,
    /// Whether the running platform is some variant of Raspberry Pi.
    pub platform_is_raspberry_pi: bool,
    /// The version to check range membership against (normally the
    /// package's stored version).
    pub reference_version: Option<String>,
}

/// Determine compatibility from the gathered inputs.
pub fn determine_incompatibility(inputs: &CompatibilityInputs) -> Incompatibility {
    if inputs.raspberry_pi_only && !inputs.platform_is_raspberry_pi {
        return Incompatibility::Platform;
    }
    let reference = version::to_number(inputs.reference_version.as_deref());
    let first_compatible = inputs
        .first_compatible_version
        .as_deref()
        .unwrap_or(DEFAULT_FIRST_COMPATIBLE_VERSION);
    if reference < version::to_number(Some(first_compatible)) {
        return Incompatibility::Version;
    }
    if let Some(obsolete) = &inputs.obsolete_version {
        if reference >= version::to_number(Some(obsolete)) {
            return Incompatibility::Version;
        }
    }
    if inputs.options_required && !inputs.options_set {
        return Incompatibility::NeedsCommandLine;
    }
    Incompatibility::None
}

/// One managed package (spec.md §3).
#[derive(Debug, Clone)]
pub struct PackageRecord {
    /// Unique, immutable key.
    pub name: String,
    /// Upstream repository owner/org.
    pub upstream_owner: String,
    /// Upstream repository branch.
    pub upstream_branch: String,
    /// Version published upstream, or `None` for the "unknown" sentinel.
    pub upstream_version: Option<String>,
    /// Version present in the local store.
    pub stored_version: Option<String>,
    /// Version currently installed, per the marker file.
    pub installed_version: Option<String>,
    /// Guards against a duplicate auto-download/auto-install in flight.
    pub download_pending: bool,
    /// Setup-script-derived install state.
    pub install_state: InstallState,
    /// Compatibility determination.
    pub incompatibility: Incompatibility,
    /// Latched once a successful setup run demands a reboot.
    pub reboot_needed: bool,
}

impl PackageRecord {
    /// A freshly-created record: no versions known yet, fully compatible,
    /// nothing pending.
    pub fn new(name: impl Into<String>, owner: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upstream_owner: owner.into(),
            upstream_branch: branch.into(),
            upstream_version: None,
            stored_version: None,
            installed_version: None,
            download_pending: false,
            install_state: InstallState::Ok,
            incompatibility: Incompatibility::None,
            reboot_needed: false,
        }
    }

    /// Invariant 4: incompatible packages (other than via manual install,
    /// which still runs and lets the exit code decide) are not eligible
    /// for auto-install.
    pub fn is_compatible(&self) -> bool {
        self.incompatibility == Incompatibility::None
    }

    /// Invariant 2/3: eligible for either install direction.
    pub fn eligible_for_install_action(&self) -> bool {
        self.install_state.is_ok()
    }
}

/// An ordered table of package records (spec.md §3 invariant 1: names are
/// unique; lookup is O(n) but always under the caller's lock).
#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<PackageRecord>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of packages currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, in order.
    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    /// All records, mutably, in order.
    pub fn records_mut(&mut self) -> &mut [PackageRecord] {
        &mut self.records
    }

    /// Index of the package with the given name, if present.
    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|r| r.name == name)
    }

    /// Immutable lookup by name.
    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.find_index(name).map(|i| &self.records[i])
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut PackageRecord> {
        let idx = self.find_index(name)?;
        Some(&mut self.records[idx])
    }

    /// Insert a new package record. Rejects duplicate names
    /// (spec.md testable property 2) without mutating the registry.
    pub fn insert(&mut self, record: PackageRecord) -> Result<usize, RegistryError> {
        if record.name.trim().is_empty() {
            return Err(RegistryError::InvalidName(record.name));
        }
        if self.find_index(&record.name).is_some() {
            return Err(RegistryError::DuplicateName(record.name));
        }
        self.records.push(record);
        Ok(self.records.len() - 1)
    }

    /// Remove a package by name via compaction: shift subsequent records
    /// down one slot, then pop the tail (spec.md §4.3 "Removal").
    ///
    /// If `store_dir` is given and the package's directory exists, the
    /// caller is expected to have already written (or be about to write)
    /// its `REMOVED` marker; this method only mutates the in-memory table.
    pub fn remove(&mut self, name: &str) -> Result<PackageRecord, RegistryError> {
        let idx = self
            .find_index(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok(self.records.remove(idx))
    }

    /// Discovery phase 1: seed from persisted settings (spec.md §4.3).
    /// Skips any name already present.
    pub fn discover_from_settings(&mut self, entries: impl IntoIterator<Item = (String, String, String)>) {
        for (name, owner, branch) in entries {
            if self.find_index(&name).is_some() {
                continue;
            }
            let _ = self.insert(PackageRecord::new(name, owner, branch));
        }
    }

    /// Discovery phase 2: seed from the plain-text default package list
    /// (`name owner branch` lines, `#` comments allowed). Skips names
    /// already present.
    pub fn discover_from_default_list(&mut self, path: &Path) -> std::io::Result<Vec<(String, String, String)>> {
        let text = std::fs::read_to_string(path)?;
        let mut added = Vec::new();
        for line in parse_default_list(&text) {
            if self.find_index(&line.0).is_some() {
                continue;
            }
            if self
                .insert(PackageRecord::new(line.0.clone(), line.1.clone(), line.2.clone()))
                .is_ok()
            {
                added.push(line);
            }
        }
        Ok(added)
    }

    /// Discovery phase 3: scan the local store for candidate package
    /// directories (spec.md §4.3). Rejects names matching
    /// [`STORE_SCAN_REJECT_SUFFIXES`], directories without a valid
    /// `version` file, directories carrying a `REMOVED` marker, and (on a
    /// non-Raspberry-Pi platform) directories marked `raspberryPiOnly`.
    /// Skips names already present. Returns the names actually admitted.
    pub fn discover_from_store(&mut self, probe: &dyn PackageProbe, platform_is_raspberry_pi: bool) -> Vec<String> {
        let mut admitted = Vec::new();
        for name in probe.store_children() {
            if self.find_index(&name).is_some() {
                continue;
            }
            if !is_admissible_store_name(&name) {
                continue;
            }
            if probe.has_removed_marker(&name) {
                continue;
            }
            if probe.stored_version(&name).is_none() {
                continue;
            }
            if probe.is_raspberry_pi_only(&name) && !platform_is_raspberry_pi {
                continue;
            }
            let (owner, branch) = probe.github_info(&name).unwrap_or_default();
            if self.insert(PackageRecord::new(name.clone(), owner, branch)).is_ok() {
                admitted.push(name);
            }
        }
        admitted
    }

    /// Upstream-info resolution for a newly-added package (spec.md §4.3):
    /// GUI editor scratchpad takes priority, then `gitHubInfo`, then the
    /// default-list entry. Fields already non-empty are not overwritten.
    pub fn resolve_upstream_info(
        gui_owner: Option<&str>,
        gui_branch: Option<&str>,
        github_info: Option<(&str, &str)>,
        default_list: Option<(&str, &str)>,
    ) -> (String, String) {
        let owner = gui_owner
            .filter(|s| !s.is_empty())
            .or(github_info.map(|(o, _)| o))
            .or(default_list.map(|(o, _)| o))
            .unwrap_or("")
            .to_string();
        let branch = gui_branch
            .filter(|s| !s.is_empty())
            .or(github_info.map(|(_, b)| b))
            .or(default_list.map(|(_, b)| b))
            .unwrap_or("")
            .to_string();
        (owner, branch)
    }
}

fn is_admissible_store_name(name: &str) -> bool {
    if name.contains(' ') {
        return false;
    }
    !STORE_SCAN_REJECT_SUFFIXES
        .iter()
        .any(|suffix| *suffix != " " && name.ends_with(*suffix))
}

fn parse_default_list(text: &str) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(name), Some(owner), Some(branch)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        out.push((name.to_string(), owner.to_string(), branch.to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tests_support::FakeProbe;

    #[test]
    fn insert_rejects_duplicates_and_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        registry.insert(PackageRecord::new("A", "o", "b")).unwrap();
        let err = registry.insert(PackageRecord::new("A", "o2", "b2"));
        assert!(matches!(err, Err(RegistryError::DuplicateName(_))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A").unwrap().upstream_owner, "o");
    }

    #[test]
    fn remove_compacts_and_decrements_count() {
        let mut registry = Registry::new();
        registry.insert(PackageRecord::new("A", "o", "b")).unwrap();
        registry.insert(PackageRecord::new("B", "o", "b")).unwrap();
        registry.insert(PackageRecord::new("C", "o", "b")).unwrap();
        registry.remove("B").unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("B").is_none());
        assert_eq!(registry.records()[0].name, "A");
        assert_eq!(registry.records()[1].name, "C");
    }

    #[test]
    fn remove_missing_is_an_error() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.remove("nope"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn default_list_parses_and_skips_comments() {
        let text = "# comment\nfoo owner1 main\n\nbar owner2 devel\n";
        let parsed = parse_default_list(text);
        assert_eq!(
            parsed,
            vec![
                ("foo".to_string(), "owner1".to_string(), "main".to_string()),
                ("bar".to_string(), "owner2".to_string(), "devel".to_string()),
            ]
        );
    }

    #[test]
    fn store_scan_rejects_suffixes_and_missing_version() {
        let probe = FakeProbe::default();
        probe.children.lock().unwrap().extend([
            "good-pkg".to_string(),
            "bad-pkg-current".to_string(),
            "bad-pkg-5".to_string(),
            "no-version-pkg".to_string(),
            "removed-pkg".to_string(),
        ]);
        probe
            .stored
            .lock()
            .unwrap()
            .insert("good-pkg".to_string(), "v1.0".to_string());
        probe
            .stored
            .lock()
            .unwrap()
            .insert("removed-pkg".to_string(), "v1.0".to_string());
        probe.removed.lock().unwrap().insert("removed-pkg".to_string());

        let mut registry = Registry::new();
        let admitted = registry.discover_from_store(&probe, false);
        assert_eq!(admitted, vec!["good-pkg".to_string()]);
    }

    #[test]
    fn store_scan_respects_raspberry_pi_only_on_non_pi_platform() {
        let probe = FakeProbe::default();
        probe.children.lock().unwrap().push("pi-pkg".to_string());
        probe
            .stored
            .lock()
            .unwrap()
            .insert("pi-pkg".to_string(), "v1.0".to_string());
        probe.raspberry_pi_only.lock().unwrap().insert("pi-pkg".to_string());

        let mut registry = Registry::new();
        assert!(registry.discover_from_store(&probe, false).is_empty());
        assert!(registry.discover_from_store(&probe, true).contains(&"pi-pkg".to_string()));
    }

    #[test]
    fn upstream_info_priority_order() {
        let (owner, branch) = Registry::resolve_upstream_info(
            Some("gui-owner"),
            None,
            Some(("gh-owner", "gh-branch")),
            Some(("default-owner", "default-branch")),
        );
        assert_eq!(owner, "gui-owner");
        assert_eq!(branch, "gh-branch");

        let (owner, branch) = Registry::resolve_upstream_info(
            None,
            None,
            None,
            Some(("default-owner", "default-branch")),
        );
        assert_eq!(owner, "default-owner");
        assert_eq!(branch, "default-branch");
    }

    #[test]
    fn compatibility_platform_mismatch() {
        let inputs = CompatibilityInputs {
            raspberry_pi_only: true,
            platform_is_raspberry_pi: false,
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::Platform);
    }

    #[test]
    fn compatibility_version_range() {
        let inputs = CompatibilityInputs {
            first_compatible_version: Some("v2.0".to_string()),
            reference_version: Some("v1.0".to_string()),
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::Version);

        let inputs = CompatibilityInputs {
            obsolete_version: Some("v3.0".to_string()),
            reference_version: Some("v3.0".to_string()),
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::Version);
    }

    #[test]
    fn compatibility_needs_command_line_when_options_required_and_not_set() {
        // No platform check: the ground truth in original_source only
        // looks at `optionsRequired`/`optionsSet`, never the platform.
        let inputs = CompatibilityInputs {
            options_required: true,
            platform_is_raspberry_pi: false,
            ..Default::default()
        };
        assert_eq!(
            determine_incompatibility(&inputs),
            Incompatibility::NeedsCommandLine
        );

        let inputs = CompatibilityInputs {
            options_required: true,
            options_set: true,
            platform_is_raspberry_pi: false,
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::None);
    }

    #[test]
    fn compatibility_falls_back_to_default_minimum_version_when_file_absent() {
        let inputs = CompatibilityInputs {
            reference_version: Some("v1.0".to_string()),
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::Version);

        let inputs = CompatibilityInputs {
            reference_version: Some("v3.0".to_string()),
            ..Default::default()
        };
        assert_eq!(determine_incompatibility(&inputs), Incompatibility::None);
    }

    #[test]
    fn install_state_clears_on_stored_version_change_subset() {
        assert!(InstallState::FileSetError.clears_on_stored_version_change());
        assert!(InstallState::VersionIncompatible.clears_on_stored_version_change());
        assert!(InstallState::OptionsNotSet.clears_on_stored_version_change());
        assert!(InstallState::NoSetupFile.clears_on_stored_version_change());
        assert!(!InstallState::RunAgain.clears_on_stored_version_change());
        assert!(!InstallState::RebootRequired.clears_on_stored_version_change());
    }
}
