//! Command router: the single entry point for UI commands (spec.md §4.4).
//!
//! The UI writes `ActionCommand` as a `"verb:name"` string; this module
//! parses it once and demultiplexes onto one of three bounded worker
//! queues, or acts on it inline (`reboot`). Queues are capacity 10 with
//! non-blocking produce (`try_send`, dropping and logging on overflow) and
//! blocking consume-with-timeout on the worker side (spec.md §9's design
//! notes on queues).

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use crate::bus::Bus;

/// Bounded queue capacity for every worker command queue (spec.md §4.4).
pub const QUEUE_CAPACITY: usize = 10;

/// Commands accepted by the install worker's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallCommand {
    /// `install:<name>`
    Install(String),
    /// `uninstall:<name>`
    Uninstall(String),
}

/// Commands accepted by the upstream & download worker's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadCommand {
    /// `download:<name>`
    Download(String),
}

/// Commands accepted by the add/remove worker's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddRemoveCommand {
    /// `add:<name>`
    Add(String),
    /// `remove:<name>`
    Remove(String),
}

/// Parse a `"verb:name"` command string: single colon split, both halves
/// trimmed (spec.md §9, "Command strings").
pub fn parse(command: &str) -> Option<(&str, &str)> {
    let (verb, name) = command.split_once(':')?;
    Some((verb.trim(), name.trim()))
}

/// Demultiplexes `ActionCommand` writes onto the three worker queues, and
/// handles the one command with no worker (`reboot`) inline.
#[derive(Debug)]
pub struct CommandRouter {
    bus: Arc<Bus>,
    install_tx: SyncSender<InstallCommand>,
    download_tx: SyncSender<DownloadCommand>,
    addremove_tx: SyncSender<AddRemoveCommand>,
}

impl CommandRouter {
    /// Build a router and the three receivers its workers should own.
    pub fn new(
        bus: Arc<Bus>,
    ) -> (
        Self,
        Receiver<InstallCommand>,
        Receiver<DownloadCommand>,
        Receiver<AddRemoveCommand>,
    ) {
        let (install_tx, install_rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let (download_tx, download_rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let (addremove_tx, addremove_rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        (
            Self {
                bus,
                install_tx,
                download_tx,
                addremove_tx,
            },
            install_rx,
            download_rx,
            addremove_rx,
        )
    }

    /// Dispatch one `ActionCommand` write. Must return quickly: all real
    /// work happens in the workers (spec.md §4.4).
    pub fn dispatch(&self, command: &str) {
        if command.is_empty() {
            // Acknowledged; no-op.
            return;
        }
        let Some((verb, name)) = parse(command) else {
            tracing::error!(command, "malformed action command, dropping");
            return;
        };
        match verb {
            "install" => self.send_install(InstallCommand::Install(name.to_string())),
            "uninstall" => self.send_install(InstallCommand::Uninstall(name.to_string())),
            "download" => self.send_download(DownloadCommand::Download(name.to_string())),
            "add" => self.send_addremove(AddRemoveCommand::Add(name.to_string())),
            "remove" => self.send_addremove(AddRemoveCommand::Remove(name.to_string())),
            "reboot" => self.bus.request_reboot(),
            other => tracing::error!(verb = other, "unrecognised action command verb, dropping"),
        }
    }

    fn send_install(&self, command: InstallCommand) {
        if let Err(TrySendError::Full(_)) = self.install_tx.try_send(command) {
            tracing::error!("install worker queue full, dropping command");
        }
    }

    fn send_download(&self, command: DownloadCommand) {
        if let Err(TrySendError::Full(_)) = self.download_tx.try_send(command) {
            tracing::error!("download worker queue full, dropping command");
        }
    }

    fn send_addremove(&self, command: AddRemoveCommand) {
        if let Err(TrySendError::Full(_)) = self.addremove_tx.try_send(command) {
            tracing::error!("add/remove worker queue full, dropping command");
        }
    }
}
