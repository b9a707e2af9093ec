//! Upstream & download worker (spec.md §4.6): refreshes one upstream
//! version and performs at most one download per tick, on one cooperative
//! loop.
//!
//! spec.md §9 open question (b): the source detects `endOfList` *after*
//! resetting `cursor = 0`, double-refreshing index 0 per cycle under some
//! modes. Here the cursor is only reset at the *start* of the tick that
//! reads past the end, and `cycle_complete` is derived from the index that
//! was just read — so index 0 is refreshed exactly once per full pass.

use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::bus::{ActionResult, Bus};
use crate::command::DownloadCommand;
use crate::config::AutoDownloadMode;
use crate::fetch::{find_package_dir, ArchiveFetcher, ArchiveUnpacker};
use crate::registry::Registry;
use crate::swap::swap_into_store;
use crate::version;
use crate::workers::Cancellation;

const TICK: Duration = Duration::from_secs(5);
const SHORT_REFRESH: Duration = Duration::from_secs(10);
const SHORT_DOWNLOAD: Duration = Duration::from_secs(10);
const LONG_REFRESH: Duration = Duration::from_secs(60);
const LONG_DOWNLOAD: Duration = Duration::from_secs(600);

/// Run the upstream & download worker until `cancel` is raised.
#[allow(clippy::too_many_arguments)]
pub fn run(
    bus: Arc<Bus>,
    fetcher: Arc<dyn ArchiveFetcher>,
    unpacker: Arc<dyn ArchiveUnpacker>,
    store_dir: PathBuf,
    rx: Receiver<DownloadCommand>,
    cancel: Cancellation,
) {
    let mut cursor = 0usize;
    let mut last_refresh_at: Option<Instant> = None;
    let mut last_download_at: Option<Instant> = None;
    // The first pass after startup always uses the short cadence
    // (spec.md §4.6 step 5), regardless of the configured mode.
    let mut first_pass = true;

    while !cancel.is_cancelled() {
        if let Some(name) = bus.take_priority_refresh() {
            refresh_upstream_version(&bus, fetcher.as_ref(), &name);
            last_refresh_at = Some(Instant::now());
            std::thread::sleep(TICK);
            continue;
        }

        let mode = bus.auto_download_mode();
        let refresh_cadence = if first_pass || mode.is_short_cadence() {
            SHORT_REFRESH
        } else {
            LONG_REFRESH
        };
        let refresh_due = last_refresh_at
            .map(|at| at.elapsed() >= refresh_cadence)
            .unwrap_or(true);

        let mut cycle_complete = false;
        if refresh_due {
            let len = bus.package_count();
            if len > 0 {
                if cursor >= len {
                    cursor = 0;
                }
                let name = bus.with_registry(|registry| registry.records()[cursor].name.clone());
                cycle_complete = cursor + 1 >= len;
                cursor += 1;
                refresh_upstream_version(&bus, fetcher.as_ref(), &name);
                last_refresh_at = Some(Instant::now());
            }
        }

        if let Ok(DownloadCommand::Download(target)) = rx.try_recv() {
            fetch_unpack_swap(&bus, fetcher.as_ref(), unpacker.as_ref(), &store_dir, &target, true);
            std::thread::sleep(TICK);
            continue;
        }

        let mode = if cycle_complete {
            let next = bus.auto_download_mode().on_cycle_complete();
            bus.set_auto_download_mode(next);
            first_pass = false;
            next
        } else {
            mode
        };

        if mode == AutoDownloadMode::Off {
            bus.set_download_status("");
            std::thread::sleep(TICK);
            continue;
        }

        let download_cadence = if first_pass || mode.is_short_cadence() {
            SHORT_DOWNLOAD
        } else {
            LONG_DOWNLOAD
        };

        match bus.with_registry(|registry| first_download_candidate(registry)) {
            Some(candidate) => {
                let due = last_download_at
                    .map(|at| at.elapsed() >= download_cadence)
                    .unwrap_or(true);
                if due {
                    fetch_unpack_swap(&bus, fetcher.as_ref(), unpacker.as_ref(), &store_dir, &candidate, false);
                    last_download_at = Some(Instant::now());
                } else {
                    let remaining = download_cadence.saturating_sub(last_download_at.unwrap().elapsed());
                    bus.set_download_status(format!("next download check in {}s", remaining.as_secs()));
                }
            }
            None => bus.set_download_status(""),
        }

        std::thread::sleep(TICK);
    }
}

/// Refresh one package's upstream version (spec.md §4.6 step 3). Both a
/// transport failure and a well-formed "not found" response collapse to
/// the empty string (spec.md §7, "Network fetch failure").
fn refresh_upstream_version(bus: &Bus, fetcher: &dyn ArchiveFetcher, name: &str) {
    let Some((owner, branch)) = bus.with_registry(|registry| {
        registry
            .get(name)
            .map(|record| (record.upstream_owner.clone(), record.upstream_branch.clone()))
    }) else {
        return;
    };

    let fetched = fetcher.fetch_version(&owner, name, &branch).unwrap_or(None);
    bus.with_registry(|registry| {
        if let Some(record) = registry.get_mut(name) {
            record.upstream_version = fetched;
        }
    });
}

/// First package eligible for auto-download, per spec.md §4.6 step 7 /
/// testable property 6. A prior package with `DownloadPending = true`
/// aborts the entire scan, since everything after it has a pending
/// predecessor.
fn first_download_candidate(registry: &Registry) -> Option<String> {
    for record in registry.records() {
        if record.download_pending {
            return None;
        }
        let upstream_is_version = record.upstream_version.as_deref().is_some_and(|v| v.starts_with('v'));
        if !upstream_is_version || record.stored_version.is_none() {
            continue;
        }
        let eligible = if record.upstream_branch.starts_with('v') {
            record.upstream_version != record.stored_version
        } else {
            version::compare(record.upstream_version.as_deref(), record.stored_version.as_deref())
                == std::cmp::Ordering::Greater
        };
        if eligible {
            return Some(record.name.clone());
        }
    }
    None
}

/// Fetch-unpack-swap one package (spec.md §4.6.1).
fn fetch_unpack_swap(
    bus: &Bus,
    fetcher: &dyn ArchiveFetcher,
    unpacker: &dyn ArchiveUnpacker,
    store_dir: &Path,
    name: &str,
    manual: bool,
) {
    let snapshot = bus.with_registry(|registry| {
        registry.get_mut(name).map(|record| {
            record.download_pending = true;
            (record.upstream_owner.clone(), record.upstream_branch.clone())
        })
    });
    let Some((owner, branch)) = snapshot else {
        return;
    };

    let result = run_fetch(fetcher, unpacker, store_dir, &owner, name, &branch, bus);

    bus.with_registry(|registry| {
        if let Some(record) = registry.get_mut(name) {
            record.download_pending = false;
        }
    });

    match result {
        Ok(()) => {
            tracing::info!(name, "download complete");
            if manual {
                bus.set_edit_status("");
                bus.set_action_result(ActionResult::None);
            } else {
                bus.set_download_status("");
            }
        }
        Err(err) => {
            tracing::warn!(name, %err, "download failed");
            let message = format!("could not download {name}");
            if manual {
                bus.set_edit_status(message);
                bus.set_action_result(ActionResult::Error);
            } else {
                bus.set_download_status(message);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_fetch(
    fetcher: &dyn ArchiveFetcher,
    unpacker: &dyn ArchiveUnpacker,
    store_dir: &Path,
    owner: &str,
    name: &str,
    branch: &str,
    bus: &Bus,
) -> Result<()> {
    let temp_dir = tempfile::Builder::new()
        .prefix(&format!("pkgsuper-{name}-{}-", std::process::id()))
        .tempdir()?;
    let archive = fetcher.fetch_archive(owner, name, branch)?;
    unpacker.unpack(&archive, temp_dir.path())?;
    let found = find_package_dir(temp_dir.path())?;
    bus.with_registry(|_registry| swap_into_store(store_dir, name, &found))?;
    Ok(())
}
