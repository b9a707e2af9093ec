//! Add/Remove worker (spec.md §4.5): a single consumer of its queue,
//! blocking with a 5-second timeout so the cancellation flag is polled
//! regularly.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{ActionResult, Bus};
use crate::command::AddRemoveCommand;
use crate::probe::PackageProbe;
use crate::registry::{PackageRecord, Registry};
use crate::workers::Cancellation;

const QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the add/remove worker until `cancel` is raised or the queue's
/// sender is dropped.
pub fn run(bus: Arc<Bus>, probe: Arc<dyn PackageProbe>, rx: Receiver<AddRemoveCommand>, cancel: Cancellation) {
    while !cancel.is_cancelled() {
        match rx.recv_timeout(QUEUE_TIMEOUT) {
            Ok(AddRemoveCommand::Add(name)) => handle_add(&bus, probe.as_ref(), &name),
            Ok(AddRemoveCommand::Remove(name)) => handle_remove(&bus, probe.as_ref(), &name),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// `add:<name>` (spec.md §4.3 "Upstream-info resolution", §4.5).
fn handle_add(bus: &Bus, probe: &dyn PackageProbe, name: &str) {
    bus.set_edit_status(format!("adding {name}"));

    let (scratch_name, scratch_owner, scratch_branch) = bus.edit_scratchpad();
    let gui_owner = (scratch_name == name && !scratch_owner.is_empty()).then_some(scratch_owner.as_str());
    let gui_branch = (scratch_name == name && !scratch_branch.is_empty()).then_some(scratch_branch.as_str());

    let github_info = probe.github_info(name);
    let github_info = github_info.as_ref().map(|(o, b)| (o.as_str(), b.as_str()));

    let default_entry = bus.default_list_entry(name);
    let default_entry = default_entry.as_ref().map(|(o, b)| (o.as_str(), b.as_str()));

    let (owner, branch) = Registry::resolve_upstream_info(gui_owner, gui_branch, github_info, default_entry);

    let outcome = bus.with_registry(|registry| registry.insert(PackageRecord::new(name, owner, branch)));
    match outcome {
        Ok(_) => {
            tracing::info!(name, "package added");
            bus.set_edit_status("");
            bus.set_action_result(ActionResult::None);
        }
        Err(err) => {
            tracing::warn!(name, %err, "add rejected");
            bus.set_edit_status(err.to_string());
            bus.set_action_result(ActionResult::Error);
        }
    }
}

/// `remove:<name>` (spec.md §4.3 "Removal", §4.5).
fn handle_remove(bus: &Bus, probe: &dyn PackageProbe, name: &str) {
    bus.set_edit_status(format!("removing {name}"));

    let outcome = bus.with_registry(|registry| registry.remove(name));
    match outcome {
        Ok(_) => {
            if let Err(err) = probe.write_removed_marker(name) {
                tracing::warn!(name, %err, "failed to write REMOVED marker");
            }
            tracing::info!(name, "package removed");
            bus.set_edit_status("");
            bus.set_action_result(ActionResult::None);
        }
        Err(err) => {
            tracing::warn!(name, %err, "remove rejected");
            bus.set_edit_status(err.to_string());
            bus.set_action_result(ActionResult::Error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoDownloadMode;
    use crate::probe::tests_support::FakeProbe;
    use std::sync::mpsc;

    fn new_bus() -> Arc<Bus> {
        Arc::new(Bus::new(Registry::new(), AutoDownloadMode::Off, false))
    }

    #[test]
    fn add_inserts_record_and_clears_status_on_success() {
        let bus = new_bus();
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());
        handle_add(&bus, probe.as_ref(), "A");
        assert_eq!(bus.package_count(), 1);
        assert_eq!(bus.edit_status(), "");
        assert_eq!(bus.action_result(), ActionResult::None);
    }

    #[test]
    fn duplicate_add_sets_error_and_leaves_count_unchanged() {
        let bus = new_bus();
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());
        handle_add(&bus, probe.as_ref(), "A");
        handle_add(&bus, probe.as_ref(), "A");
        assert_eq!(bus.package_count(), 1);
        assert_eq!(bus.action_result(), ActionResult::Error);
    }

    #[test]
    fn add_prefers_scratchpad_over_github_info() {
        let bus = new_bus();
        bus.set_edit_scratchpad("A", "gui-owner", "gui-branch");
        let probe = FakeProbe::default();
        probe
            .github_info
            .lock()
            .unwrap()
            .insert("A".to_string(), ("gh-owner".to_string(), "gh-branch".to_string()));
        let probe: Arc<dyn PackageProbe> = Arc::new(probe);
        handle_add(&bus, probe.as_ref(), "A");
        let record = bus.with_registry(|registry| registry.get("A").unwrap().clone());
        assert_eq!(record.upstream_owner, "gui-owner");
        assert_eq!(record.upstream_branch, "gui-branch");
    }

    #[test]
    fn remove_writes_marker_and_drops_record() {
        let bus = new_bus();
        let probe = FakeProbe::default();
        bus.with_registry(|registry| registry.insert(PackageRecord::new("B", "o", "b")).unwrap());
        let probe: Arc<dyn PackageProbe> = Arc::new(probe);
        handle_remove(&bus, probe.as_ref(), "B");
        assert_eq!(bus.package_count(), 0);
        assert!(probe.has_removed_marker("B"));
    }

    #[test]
    fn remove_missing_sets_error_result() {
        let bus = new_bus();
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());
        handle_remove(&bus, probe.as_ref(), "nope");
        assert_eq!(bus.action_result(), ActionResult::Error);
    }

    #[test]
    fn removed_marker_blocks_readmission_on_next_store_scan() {
        let bus = new_bus();
        let probe = FakeProbe::default();
        bus.with_registry(|registry| registry.insert(PackageRecord::new("B", "o", "b")).unwrap());
        probe.children.lock().unwrap().push("B".to_string());
        probe.stored.lock().unwrap().insert("B".to_string(), "v1.0".to_string());

        handle_remove(&bus, &probe, "B");
        assert_eq!(bus.package_count(), 0);

        let admitted = bus.with_registry(|registry| registry.discover_from_store(&probe, false));
        assert!(admitted.is_empty());
        assert_eq!(bus.package_count(), 0);
    }

    #[test]
    fn worker_loop_drains_queue_then_exits_on_disconnect() {
        let bus = new_bus();
        let probe: Arc<dyn PackageProbe> = Arc::new(FakeProbe::default());
        let (tx, rx) = mpsc::sync_channel(4);
        tx.send(AddRemoveCommand::Add("A".to_string())).unwrap();
        drop(tx);
        run(bus.clone(), probe, rx, Cancellation::new());
        assert_eq!(bus.package_count(), 1);
    }
}
