// Good defaults
#![forbid(unused_must_use)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pkgsuper_core::config::Config;
use pkgsuper_core::settings::InMemorySettingsPort;
use pkgsuper_core::workers::Cancellation;
use pkgsuper_core::Supervisor;

/// Package supervisor daemon. No subcommands: runs until the reboot gate
/// fires or it is asked to stop, exiting 0 on an orderly stop and non-zero
/// only on initialization failure.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Opt {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/pkgsuper/config.toml")]
    config: PathBuf,

    /// Run one pass of each worker loop, then exit. A test/ops affordance;
    /// does not change runtime policy.
    #[arg(long)]
    once: bool,
}

/// Long enough for the main loop and every worker to complete at least one
/// tick under `--once` (workers/mainloop tick every 5s; see lib/src).
const ONCE_GRACE_PERIOD: Duration = Duration::from_secs(6);

fn run() -> Result<()> {
    pkgsuper_utils::initialize_tracing();
    let opt = Opt::parse();
    tracing::info!(config = %opt.config.display(), once = opt.once, "starting");

    let config = Config::load(&opt.config)?;
    // A real bus-transport adapter would supply a `SettingsPort` backed by
    // the live object bus; none exists here (spec.md §1), so this process
    // always starts with no prior persisted settings or legacy entries to
    // migrate.
    let settings = std::sync::Arc::new(InMemorySettingsPort::new());
    let (supervisor, _router) = Supervisor::new(&config, settings).context("initializing supervisor")?;

    let cancel = Cancellation::new();
    if opt.once {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(ONCE_GRACE_PERIOD);
            cancel.cancel();
        });
    }

    let reboot_fired = supervisor.run(cancel)?;
    tracing::info!(reboot_fired, "stopped");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
