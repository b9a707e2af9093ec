//! The network fetch of archives/versions and the archive unpacker are
//! both out-of-scope external collaborators (spec.md §1): this module only
//! defines the narrow traits the workers drive them through — "a
//! byte-stream producer" and "a verified directory producer" — plus a
//! default HTTP + tar.gz implementation of each.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fn_error_context::context;

/// Produces the raw `version` file contents and archive bytes for a given
/// `owner/name/branch` triple. The real network transport is out of scope
/// for this crate; this trait is the seam a real implementation plugs into.
pub trait ArchiveFetcher: Send + Sync {
    /// Fetch the raw `version` file published at `owner/name/branch`.
    /// Returns `Ok(None)` for a well-formed "not found" response; any
    /// transport-level failure is an `Err`, which callers treat the same
    /// way spec.md §4.6 step 3 does (upstream version becomes empty).
    fn fetch_version(&self, owner: &str, name: &str, branch: &str) -> Result<Option<String>>;

    /// Fetch the tarball archive for `owner/name/branch`.
    fn fetch_archive(&self, owner: &str, name: &str, branch: &str) -> Result<Vec<u8>>;
}

/// Unpacks archive bytes into a destination directory, producing a
/// verified directory tree. The real unpacker is out of scope for this
/// crate; this trait is the seam.
pub trait ArchiveUnpacker: Send + Sync {
    /// Unpack `archive` into `dest`, which must already exist.
    fn unpack(&self, archive: &[u8], dest: &Path) -> Result<()>;
}

/// Default HTTP-backed fetcher. Versions and archives are retrieved from
/// `{base_url}/{owner}/{name}/{branch}/version` and
/// `{base_url}/{owner}/{name}/{branch}.tar.gz` respectively.
#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpArchiveFetcher {
    /// Build a fetcher rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    #[context("Fetching upstream version for {owner}/{name}/{branch}")]
    fn fetch_version(&self, owner: &str, name: &str, branch: &str) -> Result<Option<String>> {
        let url = format!("{}/{owner}/{name}/{branch}/version", self.base_url);
        let response = self.client.get(&url).send()?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let text = response.text()?;
        Ok(Some(text.lines().next().unwrap_or("").trim().to_string()))
    }

    #[context("Fetching archive for {owner}/{name}/{branch}")]
    fn fetch_archive(&self, owner: &str, name: &str, branch: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{owner}/{name}/{branch}.tar.gz", self.base_url);
        let response = self.client.get(&url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Default `tar.gz` unpacker.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzUnpacker;

impl ArchiveUnpacker for TarGzUnpacker {
    #[context("Unpacking archive")]
    fn unpack(&self, archive: &[u8], dest: &Path) -> Result<()> {
        let decoder = flate2::read::GzDecoder::new(archive);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(dest)?;
        Ok(())
    }
}

/// Walk `root` looking for the first directory that contains a
/// `version` file whose first character is `v` (spec.md §4.6.1 step 4,
/// §4.8). Unlike the original implementation this never logs a spurious
/// failure on the success path (spec.md §9(c)).
pub fn find_package_dir(root: &Path) -> Result<PathBuf> {
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_dir() {
            continue;
        }
        let version_path = entry.path().join("version");
        if let Ok(contents) = std::fs::read_to_string(&version_path) {
            if contents.trim_start().starts_with('v') {
                return Ok(entry.path().to_path_buf());
            }
        }
    }
    bail!("no directory under {} contains a valid version file", root.display());
}

/// Read just enough of a stream to decide whether it looks like a gzip
/// tarball; used by callers that want to fail fast on an obviously bad
/// response before spending time unpacking it.
pub fn looks_like_gzip(mut reader: impl Read) -> bool {
    let mut magic = [0u8; 2];
    matches!(reader.read_exact(&mut magic), Ok(())) && magic == [0x1f, 0x8b]
}
