//! System-level actions taken once the reboot gate fires (spec.md §4.9).
//! Both the object-bus transport and the `reboot` system call are
//! out-of-scope external collaborators (spec.md §1); this module only
//! defines the seam the supervisor drives them through.

use anyhow::{Context, Result};

/// Final actions taken after every worker has been asked to stop: remove
/// the daemon's bus service registration, issue the system reboot, and
/// disable the process supervisor's restart-on-exit behavior.
pub trait SystemController: Send + Sync {
    /// Unregister this daemon's presence on the object bus.
    fn remove_bus_service(&self) -> Result<()>;

    /// Issue the system reboot.
    fn reboot(&self) -> Result<()>;

    /// Prevent the process supervisor from restarting this process after
    /// it exits.
    fn disable_restart(&self) -> Result<()>;
}

/// Production implementation. Reboots by invoking the `reboot` binary
/// (no direct syscall, so no `unsafe` is needed) and disables restart by
/// writing a sentinel file the process supervisor is configured to check.
#[derive(Debug, Clone)]
pub struct OsSystemController {
    restart_sentinel_path: std::path::PathBuf,
}

impl OsSystemController {
    /// Build a controller that writes its restart sentinel to
    /// `restart_sentinel_path`.
    pub fn new(restart_sentinel_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            restart_sentinel_path: restart_sentinel_path.into(),
        }
    }
}

impl SystemController for OsSystemController {
    fn remove_bus_service(&self) -> Result<()> {
        // The bus transport itself is out of scope (spec.md §1); nothing
        // further to do here beyond the transport's own teardown.
        Ok(())
    }

    fn reboot(&self) -> Result<()> {
        std::process::Command::new("reboot")
            .status()
            .context("invoking system reboot")?;
        Ok(())
    }

    fn disable_restart(&self) -> Result<()> {
        std::fs::write(&self.restart_sentinel_path, b"")
            .with_context(|| format!("writing restart sentinel at {}", self.restart_sentinel_path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory double recording which actions were invoked, without
    /// touching the real system.
    #[derive(Debug, Default)]
    pub struct FakeSystemController {
        pub bus_removed: AtomicBool,
        pub rebooted: AtomicBool,
        pub restart_disabled: AtomicBool,
    }

    impl SystemController for FakeSystemController {
        fn remove_bus_service(&self) -> Result<()> {
            self.bus_removed.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn reboot(&self) -> Result<()> {
            self.rebooted.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn disable_restart(&self) -> Result<()> {
            self.restart_disabled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::FakeSystemController;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn fake_controller_records_each_action() {
        let controller = FakeSystemController::default();
        controller.remove_bus_service().unwrap();
        controller.reboot().unwrap();
        controller.disable_restart().unwrap();
        assert!(controller.bus_removed.load(Ordering::SeqCst));
        assert!(controller.rebooted.load(Ordering::SeqCst));
        assert!(controller.restart_disabled.load(Ordering::SeqCst));
    }
}
