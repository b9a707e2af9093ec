//! Package supervisor daemon core: the package registry, the four
//! cooperating worker loops, the command router, and the main loop's
//! reboot gate (spec.md §1-§2).
//!
//! The object-bus transport, the per-package `setup` helper scripts, the
//! network fetch of archives, the archive unpacker, and the final
//! `reboot` system call are all external collaborators; this crate only
//! defines the seams they plug into ([`probe::PackageProbe`],
//! [`fetch::ArchiveFetcher`], [`fetch::ArchiveUnpacker`],
//! [`shutdown::SystemController`]) and drives them from
//! [`Supervisor::run`].

pub mod bus;
pub mod command;
pub mod config;
pub mod error;
pub mod fetch;
pub mod mainloop;
pub mod platform;
pub mod probe;
pub mod registry;
pub mod settings;
pub mod setup;
pub mod shutdown;
pub mod swap;
pub mod version;
pub mod workers;

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use bus::Bus;
use command::{AddRemoveCommand, CommandRouter, DownloadCommand, InstallCommand};
use config::Config;
use fetch::{ArchiveFetcher, ArchiveUnpacker, HttpArchiveFetcher, TarGzUnpacker};
use probe::{FilesystemProbe, PackageProbe};
use registry::Registry;
use settings::SettingsPort;
use shutdown::{OsSystemController, SystemController};
use workers::Cancellation;

const DOWNLOAD_JOIN_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const ADDREMOVE_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const MEDIA_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns every long-lived value the daemon needs: the bus façade and the
/// collaborator implementations each worker is driven through (spec.md
/// §9, "Globals as singletons" — expressed here as fields on one
/// top-level value rather than module statics).
pub struct Supervisor {
    bus: Arc<Bus>,
    probe: Arc<dyn PackageProbe>,
    fetcher: Arc<dyn ArchiveFetcher>,
    unpacker: Arc<dyn ArchiveUnpacker>,
    system: Arc<dyn SystemController>,
    store_dir: std::path::PathBuf,
    media_root: std::path::PathBuf,
    platform_is_raspberry_pi: bool,
    install_rx: Mutex<Option<Receiver<InstallCommand>>>,
    download_rx: Mutex<Option<Receiver<DownloadCommand>>>,
    addremove_rx: Mutex<Option<Receiver<AddRemoveCommand>>>,
}

impl std::fmt::Debug for Supervisor {
    // Manual impl: `probe`/`fetcher`/`unpacker`/`system` are `Arc<dyn Trait>`
    // and none of those seam traits require `Debug`, so `#[derive(Debug)]`
    // isn't available here.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("bus", &self.bus)
            .field("store_dir", &self.store_dir)
            .field("media_root", &self.media_root)
            .field("platform_is_raspberry_pi", &self.platform_is_raspberry_pi)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Build a supervisor from startup configuration and the settings
    /// persisted on the bus (spec.md §4.3 phase 1), returning it together
    /// with the [`CommandRouter`] a real bus-transport adapter drives
    /// from `ActionCommand` writes (spec.md §4.4).
    ///
    /// If `config.legacy_settings_base` is set, its entries are migrated
    /// into `config.settings_base` once before it is read (spec.md §6).
    pub fn new(config: &Config, settings: Arc<dyn SettingsPort>) -> Result<(Arc<Self>, CommandRouter)> {
        let probe = FilesystemProbe::new(
            config.store_dir.clone(),
            config.install_marker_dir.clone(),
            config.store_dir.join("setupOptions"),
        );
        let platform_is_raspberry_pi = platform::is_raspberry_pi(&config.machine);

        if let Some(legacy_base) = &config.legacy_settings_base {
            settings::migrate_legacy_settings(settings.as_ref(), legacy_base, &config.settings_base);
        }
        let persisted_settings = settings.read_package_entries(&config.settings_base);

        let mut registry = Registry::new();
        registry.discover_from_settings(persisted_settings);

        let mut default_list_entries = Vec::new();
        if let Some(path) = &config.default_package_list_path {
            default_list_entries = registry
                .discover_from_default_list(path)
                .with_context(|| format!("reading default package list at {}", path.display()))?;
        }
        registry.discover_from_store(&probe, platform_is_raspberry_pi);

        let bus = Arc::new(Bus::new(registry, config.auto_download_mode, config.auto_install_enabled));
        bus.set_default_list(default_list_entries);

        let fetcher: Arc<dyn ArchiveFetcher> =
            Arc::new(HttpArchiveFetcher::new("https://github.com").context("building HTTP fetcher")?);

        let (router, install_rx, download_rx, addremove_rx) = CommandRouter::new(bus.clone());

        let supervisor = Arc::new(Self {
            bus,
            probe: Arc::new(probe),
            fetcher,
            unpacker: Arc::new(TarGzUnpacker),
            system: Arc::new(OsSystemController::new(config.restart_sentinel_path.clone())),
            store_dir: config.store_dir.clone(),
            media_root: config.media_root.clone(),
            platform_is_raspberry_pi,
            install_rx: Mutex::new(Some(install_rx)),
            download_rx: Mutex::new(Some(download_rx)),
            addremove_rx: Mutex::new(Some(addremove_rx)),
        });

        Ok((supervisor, router))
    }

    /// Shared access to the bus façade, e.g. for a bus-transport adapter
    /// to publish settings or read attributes directly.
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Run every worker and the main loop until the reboot gate fires or
    /// `external_cancel` is raised (e.g. by the `--once` CLI flag or a
    /// test harness). Returns whether the reboot gate fired.
    ///
    /// May only be called once per `Supervisor` — the worker queue
    /// receivers are consumed on the first call.
    pub fn run(&self, external_cancel: Cancellation) -> Result<bool> {
        let install_rx = self
            .install_rx
            .lock()
            .expect("install_rx lock poisoned")
            .take()
            .context("Supervisor::run called more than once")?;
        let download_rx = self
            .download_rx
            .lock()
            .expect("download_rx lock poisoned")
            .take()
            .context("Supervisor::run called more than once")?;
        let addremove_rx = self
            .addremove_rx
            .lock()
            .expect("addremove_rx lock poisoned")
            .take()
            .context("Supervisor::run called more than once")?;

        let worker_cancel = Cancellation::new();

        let install_handle = {
            let bus = self.bus.clone();
            let probe = self.probe.clone();
            let platform_is_raspberry_pi = self.platform_is_raspberry_pi;
            let cancel = worker_cancel.clone();
            std::thread::spawn(move || workers::install::run(bus, probe, platform_is_raspberry_pi, install_rx, cancel))
        };
        let addremove_handle = {
            let bus = self.bus.clone();
            let probe = self.probe.clone();
            let cancel = worker_cancel.clone();
            std::thread::spawn(move || workers::addremove::run(bus, probe, addremove_rx, cancel))
        };
        let download_handle = {
            let bus = self.bus.clone();
            let fetcher = self.fetcher.clone();
            let unpacker = self.unpacker.clone();
            let store_dir = self.store_dir.clone();
            let cancel = worker_cancel.clone();
            std::thread::spawn(move || workers::download::run(bus, fetcher, unpacker, store_dir, download_rx, cancel))
        };
        let media_handle = {
            let bus = self.bus.clone();
            let unpacker = self.unpacker.clone();
            let mount_root = self.media_root.clone();
            let store_dir = self.store_dir.clone();
            let cancel = worker_cancel.clone();
            std::thread::spawn(move || workers::media::run(bus, unpacker, mount_root, store_dir, cancel))
        };

        let reboot_fired = mainloop::run(
            self.bus.clone(),
            self.probe.clone(),
            self.platform_is_raspberry_pi,
            external_cancel,
        );

        worker_cancel.cancel();
        join_with_timeout(download_handle, DOWNLOAD_JOIN_TIMEOUT, "download");
        join_with_timeout(install_handle, INSTALL_JOIN_TIMEOUT, "install");
        join_with_timeout(addremove_handle, ADDREMOVE_JOIN_TIMEOUT, "add/remove");
        join_with_timeout(media_handle, MEDIA_JOIN_TIMEOUT, "media-scan");

        if reboot_fired {
            self.system.remove_bus_service().context("removing bus service")?;
            self.system.disable_restart().context("disabling process-supervisor restart")?;
            self.system.reboot().context("issuing system reboot")?;
        }

        Ok(reboot_fired)
    }
}

/// Join `handle` within `timeout`; logs and gives up (without killing the
/// thread) if it doesn't exit in time (spec.md §5 "Cancellation /
/// timeouts", §7 "Thread failed to join on shutdown").
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, label: &'static str) {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    match rx.recv_timeout(timeout) {
        Ok(()) => tracing::debug!(worker = label, "worker exited cleanly"),
        Err(_) => tracing::warn!(worker = label, "worker did not exit within shutdown timeout"),
    }
}
