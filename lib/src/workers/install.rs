//! Install worker (spec.md §4.7): single consumer of its queue, plus a
//! periodic auto-install sweep when no manual command is pending.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{ActionResult, Bus};
use crate::command::InstallCommand;
use crate::mainloop::refresh_one_package;
use crate::probe::PackageProbe;
use crate::registry::InstallState;
use crate::setup::{self, Direction};
use crate::workers::Cancellation;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the install worker until `cancel` is raised or the queue's sender
/// is dropped.
pub fn run(
    bus: Arc<Bus>,
    probe: Arc<dyn PackageProbe>,
    platform_is_raspberry_pi: bool,
    rx: Receiver<InstallCommand>,
    cancel: Cancellation,
) {
    while !cancel.is_cancelled() {
        match rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(InstallCommand::Install(name)) => {
                install_or_uninstall(&bus, probe.as_ref(), platform_is_raspberry_pi, &name, Direction::Install, true);
            }
            Ok(InstallCommand::Uninstall(name)) => {
                install_or_uninstall(&bus, probe.as_ref(), platform_is_raspberry_pi, &name, Direction::Uninstall, true);
            }
            Err(RecvTimeoutError::Timeout) => {
                if bus.auto_install_enabled() {
                    if let Some(name) = next_auto_install_candidate(&bus, probe.as_ref()) {
                        install_or_uninstall(&bus, probe.as_ref(), platform_is_raspberry_pi, &name, Direction::Install, false);
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// First package eligible for auto-install (spec.md §4.7 step 2):
/// compatible, `StoredVersion != InstalledVersion`, `InstallState = Ok`,
/// and no `DO_NOT_AUTO_INSTALL` marker.
fn next_auto_install_candidate(bus: &Bus, probe: &dyn PackageProbe) -> Option<String> {
    bus.with_registry(|registry| {
        registry
            .records()
            .iter()
            .find(|record| {
                record.is_compatible()
                    && record.stored_version != record.installed_version
                    && record.install_state.is_ok()
                    && !probe.has_do_not_auto_install_marker(&record.name)
            })
            .map(|record| record.name.clone())
    })
}

/// Install or uninstall one package (spec.md §4.7.1). Step 1 refreshes
/// file-derived versions/incompatibility for `name` under the registry
/// lock before reading `InstallState`, rather than trusting whatever the
/// main loop last published — which can be up to one tick stale.
fn install_or_uninstall(
    bus: &Bus,
    probe: &dyn PackageProbe,
    platform_is_raspberry_pi: bool,
    name: &str,
    direction: Direction,
    manual: bool,
) {
    refresh_one_package(bus, probe, platform_is_raspberry_pi, name);

    let Some(install_state) = bus.with_registry(|registry| registry.get(name).map(|r| r.install_state)) else {
        tracing::warn!(name, "install/uninstall requested for unknown package");
        if manual {
            bus.set_action_result(ActionResult::Error);
        }
        return;
    };
    if !install_state.is_ok() {
        tracing::info!(name, ?install_state, "skipping install/uninstall: not in Ok state");
        if manual {
            bus.set_install_status(format!("{name} is not in a runnable state"));
            bus.set_action_result(ActionResult::Error);
        }
        return;
    }

    if manual {
        match direction {
            Direction::Uninstall => {
                if let Err(err) = probe.write_do_not_auto_install_marker(name) {
                    tracing::warn!(name, %err, "failed to write DO_NOT_AUTO_INSTALL marker");
                }
            }
            Direction::Install => {
                if let Err(err) = probe.clear_do_not_auto_install_marker(name) {
                    tracing::warn!(name, %err, "failed to clear DO_NOT_AUTO_INSTALL marker");
                }
            }
        }
    }

    if !probe.setup_is_executable(name) {
        bus.with_registry(|registry| {
            if let Some(record) = registry.get_mut(name) {
                record.install_state = InstallState::NoSetupFile;
            }
        });
        bus.set_install_status(format!("{name}: no setup script found"));
        if manual {
            bus.set_action_result(ActionResult::Error);
        }
        return;
    }

    bus.set_install_status(format!("{} {name}", manager_verb(direction)));
    bus.with_registry(|registry| {
        if let Some(record) = registry.get_mut(name) {
            record.install_state = InstallState::Pending;
        }
    });

    let setup_path = probe.package_dir(name).join("setup");
    match setup::run(&setup_path, direction) {
        Ok(code) => apply_exit_code(bus, name, code, manual),
        Err(err) => {
            tracing::error!(name, %err, "failed to spawn setup script");
            bus.set_install_status(format!("failed to run setup for {name}"));
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
    }
}

fn manager_verb(direction: Direction) -> &'static str {
    match direction {
        Direction::Install => "installing",
        Direction::Uninstall => "uninstalling",
    }
}

/// Apply the side effects of a setup-script exit code (spec.md §4.7.1's
/// table).
fn apply_exit_code(bus: &Bus, name: &str, code: i32, manual: bool) {
    let state = InstallState::from_exit_code(code);
    bus.with_registry(|registry| {
        if let Some(record) = registry.get_mut(name) {
            record.install_state = state;
        }
    });

    match state {
        InstallState::Ok => {
            bus.with_registry(|registry| {
                if let Some(record) = registry.get_mut(name) {
                    record.incompatibility = crate::registry::Incompatibility::None;
                }
            });
            bus.set_install_status("");
            if manual {
                bus.set_action_result(ActionResult::None);
            }
        }
        InstallState::RebootRequired => {
            bus.with_registry(|registry| {
                if let Some(record) = registry.get_mut(name) {
                    record.reboot_needed = true;
                }
            });
            if manual {
                bus.set_action_result(ActionResult::RebootNeeded);
            } else {
                bus.request_reboot();
            }
        }
        InstallState::RunAgain | InstallState::OptionsNotSet => {
            bus.set_install_status(format!("{name}: must be configured and run from the command line"));
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
        InstallState::FileSetError => {
            bus.set_install_status(format!("{name}: file set error"));
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
        InstallState::PlatformIncompatible => {
            bus.with_registry(|registry| {
                if let Some(record) = registry.get_mut(name) {
                    record.incompatibility = crate::registry::Incompatibility::Platform;
                }
            });
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
        InstallState::VersionIncompatible => {
            bus.with_registry(|registry| {
                if let Some(record) = registry.get_mut(name) {
                    record.incompatibility = crate::registry::Incompatibility::Version;
                }
            });
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
        InstallState::GenericError(code) => {
            tracing::error!(name, code, "setup exited with a generic error");
            if manual {
                bus.set_action_result(ActionResult::Error);
            }
        }
        InstallState::NoSetupFile | InstallState::Pending => unreachable!("not produced by from_exit_code"),
    }
}

/// Clear per-package `InstallState` errors that a `StoredVersion` change
/// plausibly resolves (spec.md §4.7.1's last paragraph, §4.9).
pub fn clear_stale_install_state(bus: &Bus, name: &str) {
    bus.with_registry(|registry| {
        if let Some(record) = registry.get_mut(name) {
            if record.install_state.clears_on_stored_version_change() {
                record.install_state = InstallState::Ok;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::config::AutoDownloadMode;
    use crate::probe::tests_support::FakeProbe;
    use crate::registry::{PackageRecord, Registry};
    use std::os::unix::fs::PermissionsExt;
    use std::sync::mpsc;

    fn new_bus_with_package(name: &str) -> Arc<Bus> {
        let mut registry = Registry::new();
        registry.insert(PackageRecord::new(name, "o", "b")).unwrap();
        Arc::new(Bus::new(registry, AutoDownloadMode::Off, false))
    }

    fn write_setup(dir: &std::path::Path, exit_code: i32) {
        let path = dir.join("setup");
        std::fs::write(&path, format!("#!/bin/sh\nexit {exit_code}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    struct RealProbe(tempfile::TempDir);

    impl PackageProbe for RealProbe {
        fn stored_version(&self, _name: &str) -> Option<String> {
            None
        }
        fn installed_version(&self, _name: &str) -> Option<String> {
            None
        }
        fn github_info(&self, _name: &str) -> Option<(String, String)> {
            None
        }
        fn has_removed_marker(&self, _name: &str) -> bool {
            false
        }
        fn has_do_not_auto_install_marker(&self, _name: &str) -> bool {
            false
        }
        fn is_raspberry_pi_only(&self, _name: &str) -> bool {
            false
        }
        fn options_required(&self, _name: &str) -> bool {
            false
        }
        fn options_set(&self, _name: &str) -> bool {
            false
        }
        fn first_compatible_version(&self, _name: &str) -> Option<String> {
            None
        }
        fn obsolete_version(&self, _name: &str) -> Option<String> {
            None
        }
        fn setup_is_executable(&self, name: &str) -> bool {
            let path = self.package_dir(name).join("setup");
            std::fs::metadata(&path)
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        }
        fn package_dir(&self, name: &str) -> std::path::PathBuf {
            self.0.path().join(name)
        }
        fn store_children(&self) -> Vec<String> {
            Vec::new()
        }
        fn write_removed_marker(&self, _name: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn write_do_not_auto_install_marker(&self, _name: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn clear_do_not_auto_install_marker(&self, _name: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn success_exit_clears_status_and_incompatibility() {
        let bus = new_bus_with_package("A");
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("A")).unwrap();
        write_setup(&tmp.path().join("A"), 0);
        let probe = RealProbe(tmp);

        install_or_uninstall(&bus, &probe, false, "A", Direction::Install, true);

        assert_eq!(bus.action_result(), ActionResult::None);
        assert!(bus.with_registry(|r| r.get("A").unwrap().install_state.is_ok()));
    }

    #[test]
    fn reboot_required_manual_sets_action_result_not_global_flag() {
        let bus = new_bus_with_package("A");
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("A")).unwrap();
        write_setup(&tmp.path().join("A"), 123);
        let probe = RealProbe(tmp);

        install_or_uninstall(&bus, &probe, false, "A", Direction::Install, true);

        assert_eq!(bus.action_result(), ActionResult::RebootNeeded);
        assert!(bus.with_registry(|r| r.get("A").unwrap().reboot_needed));
        assert!(!bus.reboot_requested());
    }

    #[test]
    fn reboot_required_auto_sets_global_flag_not_action_result() {
        let bus = new_bus_with_package("A");
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("A")).unwrap();
        write_setup(&tmp.path().join("A"), 123);
        let probe = RealProbe(tmp);

        install_or_uninstall(&bus, &probe, false, "A", Direction::Install, false);

        assert_eq!(bus.action_result(), ActionResult::None);
        assert!(bus.reboot_requested());
    }

    #[test]
    fn missing_setup_script_sets_no_setup_file_state() {
        let bus = new_bus_with_package("A");
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());

        install_or_uninstall(&bus, probe.as_ref(), false, "A", Direction::Install, true);

        assert!(matches!(
            bus.with_registry(|r| r.get("A").unwrap().install_state),
            InstallState::NoSetupFile
        ));
        assert_eq!(bus.action_result(), ActionResult::Error);
    }

    #[test]
    fn non_ok_install_state_blocks_further_attempts() {
        let bus = new_bus_with_package("A");
        bus.with_registry(|r| r.get_mut("A").unwrap().install_state = InstallState::FileSetError);
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());

        install_or_uninstall(&bus, probe.as_ref(), false, "A", Direction::Install, true);

        assert_eq!(bus.action_result(), ActionResult::Error);
    }

    #[test]
    fn auto_candidate_respects_do_not_auto_install_marker() {
        let bus = new_bus_with_package("A");
        bus.with_registry(|r| {
            let record = r.get_mut("A").unwrap();
            record.stored_version = Some("v2.0".to_string());
            record.installed_version = Some("v1.0".to_string());
        });
        let probe = FakeProbe::default();
        probe.do_not_auto_install.lock().unwrap().insert("A".to_string());
        assert_eq!(next_auto_install_candidate(&bus, &probe), None);

        probe.do_not_auto_install.lock().unwrap().clear();
        assert_eq!(next_auto_install_candidate(&bus, &probe), Some("A".to_string()));
    }

    #[test]
    fn worker_loop_processes_queued_command_then_exits_on_disconnect() {
        let bus = new_bus_with_package("A");
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("A")).unwrap();
        write_setup(&tmp.path().join("A"), 0);
        let probe: Arc<dyn PackageProbe> = Arc::new(RealProbe(tmp));

        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(InstallCommand::Install("A".to_string())).unwrap();
        drop(tx);
        run(bus.clone(), probe, false, rx, Cancellation::new());

        assert_eq!(bus.action_result(), ActionResult::None);
    }
}
