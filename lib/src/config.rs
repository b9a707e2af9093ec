//! Startup configuration.
//!
//! Recognised at startup (spec.md §4.2): `AutoDownloadMode`,
//! `AutoInstallEnabled`, and `DefaultPackageListPath`, plus the filesystem
//! roots a real deployment of this daemon needs to be told about.

use std::path::PathBuf;

use anyhow::{Context, Result};
use fn_error_context::context;
use serde::Deserialize;

use crate::error::StartupError;

/// Gates the upstream & download worker's automatic-download pass and the
/// pacing of upstream-version refresh (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum AutoDownloadMode {
    /// No automatic downloads; version checks still occur.
    #[default]
    Off,
    /// One download every 600s, after the first pass.
    Normal,
    /// One download every 10s, until the first full cycle completes.
    Fast,
    /// Like `Fast`, but reverts to `Off` once a full cycle completes.
    OneShot,
}

impl AutoDownloadMode {
    /// The mode this transitions to when a scan cycle completes
    /// (spec.md §4.6 step 5).
    pub fn on_cycle_complete(self) -> Self {
        match self {
            AutoDownloadMode::OneShot => AutoDownloadMode::Off,
            AutoDownloadMode::Fast => AutoDownloadMode::Normal,
            other => other,
        }
    }

    /// True for the modes that use the short (10s/10s) cadence.
    pub fn is_short_cadence(self) -> bool {
        matches!(self, AutoDownloadMode::Fast | AutoDownloadMode::OneShot)
    }
}

/// Top-level daemon configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Initial automatic-download mode; also persisted back to the bus
    /// and editable by the UI afterwards.
    #[serde(default)]
    pub auto_download_mode: AutoDownloadMode,

    /// Whether the install worker's auto-install sweep is enabled.
    #[serde(default)]
    pub auto_install_enabled: bool,

    /// Path to the plain-text default package list (spec.md §4.3 phase 2).
    pub default_package_list_path: Option<PathBuf>,

    /// The local package store root; each child directory is a package.
    pub store_dir: PathBuf,

    /// Directory containing `installedVersion-<name>` marker files.
    pub install_marker_dir: PathBuf,

    /// Mount root watched by the media-scan worker (spec.md §4.8).
    pub media_root: PathBuf,

    /// Current settings base path on the bus.
    #[serde(default = "default_settings_base")]
    pub settings_base: String,

    /// Legacy settings base path, migrated once at startup if present
    /// (spec.md §6, "A legacy base path's contents are migrated once").
    pub legacy_settings_base: Option<String>,

    /// Raw machine type string (e.g. read from `/etc/venus/machine`),
    /// translated via [`crate::platform::translate`] for `/Platform`.
    #[serde(default = "default_machine")]
    pub machine: String,

    /// Sentinel file the process supervisor is configured to check
    /// before restarting this process (spec.md §4.9 shutdown sequence).
    #[serde(default = "default_restart_sentinel_path")]
    pub restart_sentinel_path: PathBuf,
}

fn default_settings_base() -> String {
    "/Settings/PackageManager".to_string()
}

fn default_machine() -> String {
    "unknown".to_string()
}

fn default_restart_sentinel_path() -> PathBuf {
    PathBuf::from("/var/run/pkgsuper-no-restart")
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    #[context("Loading configuration from {path:?}")]
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = toml::from_str(&text).map_err(|source| StartupError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config)
    }
}
