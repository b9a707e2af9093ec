//! The bus facade: owns the registry lock and the per-region status cells
//! the UI reads (spec.md §4.2).
//!
//! spec.md §9 offers two ways to satisfy the "status setters are reachable
//! from already-locked sections" requirement: a single reentrant mutex, or
//! splitting the surface into a blocking registry layer and a non-blocking
//! publish layer of independent cells. This crate takes the split: `registry`
//! is a plain `Mutex<Registry>` guarding every length-sensitive or
//! multi-field operation, while every other published attribute below is its
//! own `Mutex`/`AtomicBool` cell that can be written from inside an
//! already-held registry lock without any risk of self-deadlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::AutoDownloadMode;
use crate::registry::Registry;

/// `/GuiEditAction`'s completion signal (spec.md §4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionResult {
    /// Work completed without error (idle).
    #[default]
    None,
    /// An error occurred; detail is in the relevant status string.
    Error,
    /// A reboot is needed to finish applying the change.
    RebootNeeded,
}

impl ActionResult {
    /// The bus-facing string for this value.
    pub fn as_bus_str(self) -> &'static str {
        match self {
            ActionResult::None => "",
            ActionResult::Error => "ERROR",
            ActionResult::RebootNeeded => "RebootNeeded",
        }
    }
}

/// Owns the registry lock and every other attribute the UI reads or
/// writes. One instance is shared (via `Arc`) across the main loop and all
/// four workers.
#[derive(Debug)]
pub struct Bus {
    registry: Mutex<Registry>,
    edit_status: Mutex<String>,
    install_status: Mutex<String>,
    download_status: Mutex<String>,
    media_status: Mutex<String>,
    action_result: Mutex<ActionResult>,
    auto_download_mode: Mutex<AutoDownloadMode>,
    auto_install_enabled: AtomicBool,
    /// spec.md §3 invariant 5: latched, never cleared by any worker; only
    /// the main-loop reboot gate observes it.
    reboot_requested: AtomicBool,
    /// `/Settings/.../Edit/PackageName|Owner|Branch` scratchpad the UI
    /// fills in before issuing `add` (spec.md §4.3 "Upstream-info
    /// resolution", priority (a)).
    edit_scratchpad: Mutex<(String, String, String)>,
    /// Set when a tracked package's owner/branch changes, so the upstream
    /// & download worker refreshes it before advancing its cursor
    /// (spec.md §4.6 step 1).
    priority_refresh: Mutex<Option<String>>,
    /// The default package list, parsed once at startup: the lowest-
    /// priority source for upstream-info resolution on `add` (spec.md
    /// §4.3 "Upstream-info resolution", priority (c)).
    default_list: Mutex<Vec<(String, String, String)>>,
}

impl Bus {
    /// Construct a bus with an empty registry and the given initial
    /// settings (spec.md §4.2 configuration table).
    pub fn new(registry: Registry, auto_download_mode: AutoDownloadMode, auto_install_enabled: bool) -> Self {
        Self {
            registry: Mutex::new(registry),
            edit_status: Mutex::new(String::new()),
            install_status: Mutex::new(String::new()),
            download_status: Mutex::new(String::new()),
            media_status: Mutex::new(String::new()),
            action_result: Mutex::new(ActionResult::None),
            auto_download_mode: Mutex::new(auto_download_mode),
            auto_install_enabled: AtomicBool::new(auto_install_enabled),
            reboot_requested: AtomicBool::new(false),
            edit_scratchpad: Mutex::new((String::new(), String::new(), String::new())),
            priority_refresh: Mutex::new(None),
            default_list: Mutex::new(Vec::new()),
        }
    }

    /// Record the parsed default package list for later upstream-info
    /// resolution. Called once at startup.
    pub fn set_default_list(&self, entries: Vec<(String, String, String)>) {
        *self.default_list.lock().expect("default list lock poisoned") = entries;
    }

    /// Look up `name`'s `(owner, branch)` entry in the default package
    /// list, if any.
    pub fn default_list_entry(&self, name: &str) -> Option<(String, String)> {
        self.default_list
            .lock()
            .expect("default list lock poisoned")
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, owner, branch)| (owner.clone(), branch.clone()))
    }

    /// Set the `Edit/PackageName|Owner|Branch` scratchpad ahead of an
    /// `add` command.
    pub fn set_edit_scratchpad(&self, name: impl Into<String>, owner: impl Into<String>, branch: impl Into<String>) {
        *self.edit_scratchpad.lock().expect("scratchpad lock poisoned") = (name.into(), owner.into(), branch.into());
    }

    /// Read the current `Edit/...` scratchpad.
    pub fn edit_scratchpad(&self) -> (String, String, String) {
        self.edit_scratchpad.lock().expect("scratchpad lock poisoned").clone()
    }

    /// Mark `name` for priority upstream-version refresh on the download
    /// worker's next iteration.
    pub fn set_priority_refresh(&self, name: impl Into<String>) {
        *self.priority_refresh.lock().expect("priority lock poisoned") = Some(name.into());
    }

    /// Take (and clear) the pending priority-refresh name, if any.
    pub fn take_priority_refresh(&self) -> Option<String> {
        self.priority_refresh.lock().expect("priority lock poisoned").take()
    }

    /// Run a closure with exclusive access to the registry. This is the
    /// only way to touch the registry; every caller that needs to iterate,
    /// look up by name, or mutate more than one field must go through here,
    /// per spec.md §5's locking discipline (acquire, snapshot, release, do
    /// I/O, reacquire, publish — never across a sleep, subprocess, or
    /// network call).
    pub fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut guard = self.registry.lock().expect("registry lock poisoned");
        f(&mut guard)
    }

    /// `/Package/.../PackageCount` mirrors the registry length after every
    /// add/remove (spec.md §4.2).
    pub fn package_count(&self) -> usize {
        self.with_registry(|registry| registry.len())
    }

    /// Publish `/GuiEditStatus`.
    pub fn set_edit_status(&self, message: impl Into<String>) {
        *self.edit_status.lock().expect("status lock poisoned") = message.into();
    }

    /// Read `/GuiEditStatus`.
    pub fn edit_status(&self) -> String {
        self.edit_status.lock().expect("status lock poisoned").clone()
    }

    /// Publish `/GitHubUpdateStatus`/`DownloadStatus`.
    pub fn set_download_status(&self, message: impl Into<String>) {
        *self.download_status.lock().expect("status lock poisoned") = message.into();
    }

    /// Read the download status string.
    pub fn download_status(&self) -> String {
        self.download_status.lock().expect("status lock poisoned").clone()
    }

    /// Publish `/InstallStatus`.
    pub fn set_install_status(&self, message: impl Into<String>) {
        *self.install_status.lock().expect("status lock poisoned") = message.into();
    }

    /// Read `/InstallStatus`.
    pub fn install_status(&self) -> String {
        self.install_status.lock().expect("status lock poisoned").clone()
    }

    /// Publish `/MediaUpdateStatus`.
    pub fn set_media_status(&self, message: impl Into<String>) {
        *self.media_status.lock().expect("status lock poisoned") = message.into();
    }

    /// Read `/MediaUpdateStatus`.
    pub fn media_status(&self) -> String {
        self.media_status.lock().expect("status lock poisoned").clone()
    }

    /// Publish `/GuiEditAction`'s completion signal.
    pub fn set_action_result(&self, result: ActionResult) {
        *self.action_result.lock().expect("action result lock poisoned") = result;
    }

    /// Read the current action result.
    pub fn action_result(&self) -> ActionResult {
        *self.action_result.lock().expect("action result lock poisoned")
    }

    /// Current `AutoDownloadMode` setting.
    pub fn auto_download_mode(&self) -> AutoDownloadMode {
        *self.auto_download_mode.lock().expect("mode lock poisoned")
    }

    /// Update the `AutoDownloadMode` setting (e.g. from the UI).
    pub fn set_auto_download_mode(&self, mode: AutoDownloadMode) {
        *self.auto_download_mode.lock().expect("mode lock poisoned") = mode;
    }

    /// Current `AutoInstallEnabled` setting.
    pub fn auto_install_enabled(&self) -> bool {
        self.auto_install_enabled.load(Ordering::Relaxed)
    }

    /// Update the `AutoInstallEnabled` setting.
    pub fn set_auto_install_enabled(&self, enabled: bool) {
        self.auto_install_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Set the global reboot flag. Once set it is never cleared
    /// (spec.md §3 invariant 5).
    pub fn request_reboot(&self) {
        self.reboot_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a reboot has been requested by any worker or the UI.
    pub fn reboot_requested(&self) -> bool {
        self.reboot_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reboot_flag_latches() {
        let bus = Bus::new(Registry::new(), AutoDownloadMode::Off, false);
        assert!(!bus.reboot_requested());
        bus.request_reboot();
        assert!(bus.reboot_requested());
        // Nothing clears it; re-requesting is a no-op observation.
        assert!(bus.reboot_requested());
    }

    #[test]
    fn package_count_mirrors_registry() {
        let bus = Bus::new(Registry::new(), AutoDownloadMode::Off, false);
        assert_eq!(bus.package_count(), 0);
        bus.with_registry(|registry| {
            registry
                .insert(crate::registry::PackageRecord::new("A", "o", "b"))
                .unwrap();
        });
        assert_eq!(bus.package_count(), 1);
    }

    #[test]
    fn status_cells_round_trip() {
        let bus = Bus::new(Registry::new(), AutoDownloadMode::Off, false);
        bus.set_edit_status("installing A");
        assert_eq!(bus.edit_status(), "installing A");
        bus.set_action_result(ActionResult::RebootNeeded);
        assert_eq!(bus.action_result(), ActionResult::RebootNeeded);
    }
}
