//! Main loop / reboot gate (spec.md §4.9): periodic store re-scan,
//! file-derived version refresh, and the reboot gate that defers shutdown
//! until no download is in flight.

use std::sync::Arc;
use std::time::Duration;

use crate::bus::Bus;
use crate::probe::PackageProbe;
use crate::registry::{determine_incompatibility, CompatibilityInputs};
use crate::workers::install::clear_stale_install_state;
use crate::workers::Cancellation;

const TICK: Duration = Duration::from_secs(5);

/// Run the main loop until either the reboot gate fires or `cancel` is
/// raised externally. Returns `true` if it stopped because the reboot
/// gate fired — the caller should proceed to shut down and reboot.
pub fn run(bus: Arc<Bus>, probe: Arc<dyn PackageProbe>, platform_is_raspberry_pi: bool, cancel: Cancellation) -> bool {
    while !cancel.is_cancelled() {
        rescan_store(&bus, probe.as_ref(), platform_is_raspberry_pi);
        refresh_file_derived_state(&bus, probe.as_ref(), platform_is_raspberry_pi);

        if bus.reboot_requested() && !any_download_pending(&bus) {
            bus.set_download_status("REBOOTING...");
            bus.set_edit_status("REBOOTING...");
            return true;
        }

        std::thread::sleep(TICK);
    }
    false
}

/// Store-scan phase 3, re-run every tick so directories dropped by the
/// media-scan worker (or that appeared manually) become packages
/// (spec.md §4.9 step 1).
fn rescan_store(bus: &Bus, probe: &dyn PackageProbe, platform_is_raspberry_pi: bool) {
    let admitted = bus.with_registry(|registry| registry.discover_from_store(probe, platform_is_raspberry_pi));
    if !admitted.is_empty() {
        tracing::info!(?admitted, "store scan admitted new packages");
    }
}

/// Refresh `InstalledVersion`, `StoredVersion`, and `Incompatibility` for
/// every package from the filesystem (spec.md §4.9 step 2).
fn refresh_file_derived_state(bus: &Bus, probe: &dyn PackageProbe, platform_is_raspberry_pi: bool) {
    let names: Vec<String> = bus.with_registry(|registry| registry.records().iter().map(|r| r.name.clone()).collect());

    for name in names {
        refresh_one_package(bus, probe, platform_is_raspberry_pi, &name);
    }
}

/// Refresh one package's file-derived state: `InstalledVersion`,
/// `StoredVersion`, and `Incompatibility` (spec.md §4.9 step 2), clearing
/// stale `InstallState` errors on a `StoredVersion` change. Also used by
/// the install worker (spec.md §4.7.1 step 1) to refresh a single package
/// synchronously right before it reads `InstallState`, instead of relying
/// on whatever this main loop last observed up to a tick ago.
pub(crate) fn refresh_one_package(bus: &Bus, probe: &dyn PackageProbe, platform_is_raspberry_pi: bool, name: &str) {
    let stored_version = probe.stored_version(name);
    let installed_version = probe.installed_version(name);
    let inputs = CompatibilityInputs {
        raspberry_pi_only: probe.is_raspberry_pi_only(name),
        options_required: probe.options_required(name),
        options_set: probe.options_set(name),
        first_compatible_version: probe.first_compatible_version(name),
        obsolete_version: probe.obsolete_version(name),
        platform_is_raspberry_pi,
        reference_version: stored_version.clone(),
    };
    let incompatibility = determine_incompatibility(&inputs);

    let stored_changed = bus.with_registry(|registry| {
        let Some(record) = registry.get_mut(name) else {
            return false;
        };
        let changed = record.stored_version != stored_version;
        record.stored_version = stored_version.clone();
        record.installed_version = installed_version.clone();
        record.incompatibility = incompatibility;
        changed
    });

    // A StoredVersion change plausibly clears a subset of prior
    // setup-script errors (spec.md §4.7.1's last paragraph).
    if stored_changed {
        clear_stale_install_state(bus, name);
    }
}

fn any_download_pending(bus: &Bus) -> bool {
    bus.with_registry(|registry| registry.records().iter().any(|r| r.download_pending))
}
