//! Generic access to the package entries persisted "on the bus" under a
//! settings base (spec.md §6's interfaces table), used for the one-shot
//! legacy-base migration: "A legacy base path's contents are migrated once
//! at startup into the current base." The object-bus wire transport itself
//! is out of scope for this crate (spec.md §1); [`SettingsPort`] is the
//! seam a real transport adapter plugs into, in the same shape as
//! [`crate::probe::PackageProbe`] and [`crate::fetch::ArchiveFetcher`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// Read/write/delete access to a `<base>/Count` + indexed
/// `<i>/PackageName|UpstreamOwner|UpstreamBranch` settings tree.
pub trait SettingsPort: Send + Sync {
    /// Read every `<base>/<i>/PackageName|UpstreamOwner|UpstreamBranch`
    /// entry, in index order.
    fn read_package_entries(&self, base: &str) -> Vec<(String, String, String)>;

    /// Write `<base>/Count` and the indexed entries, overwriting whatever
    /// was already there.
    fn write_package_entries(&self, base: &str, entries: &[(String, String, String)]);

    /// Delete every key under `base`.
    fn delete_base(&self, base: &str);
}

/// In-process settings port: the default backing until a real object-bus
/// transport adapter (out of scope here) is wired in.
#[derive(Debug, Default)]
pub struct InMemorySettingsPort {
    values: Mutex<BTreeMap<String, String>>,
}

impl InMemorySettingsPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed entries directly under `base`, as though a real transport had
    /// already read them off the bus before this process started.
    pub fn seed(&self, base: &str, entries: &[(String, String, String)]) {
        self.write_package_entries(base, entries);
    }

    fn key(base: &str, suffix: &str) -> String {
        format!("{}/{suffix}", base.trim_end_matches('/'))
    }
}

impl SettingsPort for InMemorySettingsPort {
    fn read_package_entries(&self, base: &str) -> Vec<(String, String, String)> {
        let values = self.values.lock().expect("settings lock poisoned");
        let count: usize = values
            .get(&Self::key(base, "Count"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        (0..count)
            .map(|i| {
                let name = values
                    .get(&Self::key(base, &format!("{i}/PackageName")))
                    .cloned()
                    .unwrap_or_default();
                let owner = values
                    .get(&Self::key(base, &format!("{i}/UpstreamOwner")))
                    .cloned()
                    .unwrap_or_default();
                let branch = values
                    .get(&Self::key(base, &format!("{i}/UpstreamBranch")))
                    .cloned()
                    .unwrap_or_default();
                (name, owner, branch)
            })
            .collect()
    }

    fn write_package_entries(&self, base: &str, entries: &[(String, String, String)]) {
        let mut values = self.values.lock().expect("settings lock poisoned");
        values.insert(Self::key(base, "Count"), entries.len().to_string());
        for (i, (name, owner, branch)) in entries.iter().enumerate() {
            values.insert(Self::key(base, &format!("{i}/PackageName")), name.clone());
            values.insert(Self::key(base, &format!("{i}/UpstreamOwner")), owner.clone());
            values.insert(Self::key(base, &format!("{i}/UpstreamBranch")), branch.clone());
        }
    }

    fn delete_base(&self, base: &str) {
        let mut values = self.values.lock().expect("settings lock poisoned");
        let prefix = format!("{}/", base.trim_end_matches('/'));
        values.retain(|k, _| !k.starts_with(&prefix) && k != base);
    }
}

/// One-shot migration of a legacy settings base into the current one
/// (spec.md §6): entry-by-entry copy of names not already present in the
/// current base, then delete the legacy tree entirely. A no-op if the
/// legacy base has nothing to migrate — so calling this on every startup
/// only ever does real work once, matching original_source's behavior of
/// migrating once and never re-running.
pub fn migrate_legacy_settings(port: &dyn SettingsPort, legacy_base: &str, current_base: &str) {
    let legacy_entries = port.read_package_entries(legacy_base);
    if legacy_entries.is_empty() {
        return;
    }

    let mut current_entries = port.read_package_entries(current_base);
    let existing: HashSet<String> = current_entries.iter().map(|(name, _, _)| name.clone()).collect();
    for entry in legacy_entries {
        if !existing.contains(&entry.0) {
            current_entries.push(entry);
        }
    }
    port.write_package_entries(current_base, &current_entries);
    port.delete_base(legacy_base);
}
