//! Media-scan worker (spec.md §4.8): watches a mount root for removable
//! volumes and one-shot extracts qualifying archives into the local store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::bus::Bus;
use crate::fetch::{find_package_dir, ArchiveUnpacker};
use crate::registry::MEDIA_ACCEPT_TOKENS;
use crate::swap::swap_into_store;
use crate::workers::Cancellation;

const TICK: Duration = Duration::from_secs(5);

/// Run the media-scan worker until `cancel` is raised.
pub fn run(bus: Arc<Bus>, unpacker: Arc<dyn ArchiveUnpacker>, mount_root: PathBuf, store_dir: PathBuf, cancel: Cancellation) {
    let mut scanned: HashSet<String> = HashSet::new();

    while !cancel.is_cancelled() {
        let volumes = list_volumes(&mount_root);
        // A volume that disappeared is forgotten, so reinsertion is
        // rescanned (spec.md §4.8).
        scanned.retain(|name| volumes.contains(name));

        for volume in &volumes {
            if scanned.contains(volume) {
                continue;
            }
            scan_volume(&bus, unpacker.as_ref(), &mount_root.join(volume), &store_dir);
            scanned.insert(volume.clone());
        }

        std::thread::sleep(TICK);
    }
}

fn list_volumes(mount_root: &Path) -> HashSet<String> {
    let Ok(entries) = std::fs::read_dir(mount_root) else {
        return HashSet::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}

fn scan_volume(bus: &Bus, unpacker: &dyn ArchiveUnpacker, volume_dir: &Path, store_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(volume_dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        if !is_accepted_archive(filename) {
            continue;
        }
        if let Err(err) = extract_archive(bus, unpacker, &path, filename, store_dir) {
            tracing::warn!(archive = filename, %err, "media extraction failed");
            bus.set_media_status(format!("could not extract {filename}"));
        }
    }
}

/// Whether `filename` ends in `.tar.gz` and contains an accept-list token
/// (spec.md §4.8).
fn is_accepted_archive(filename: &str) -> bool {
    filename.ends_with(".tar.gz") && MEDIA_ACCEPT_TOKENS.iter().any(|token| filename.contains(*token))
}

/// Recover the package name from `<name>-<token>.tar.gz` (spec.md §6,
/// "Archive naming (media)").
fn package_name_from_filename(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".tar.gz")?;
    MEDIA_ACCEPT_TOKENS
        .iter()
        .copied()
        .filter(|token| stem.ends_with(*token))
        .max_by_key(|token| token.len())
        .map(|token| stem.trim_end_matches(token).to_string())
}

fn extract_archive(bus: &Bus, unpacker: &dyn ArchiveUnpacker, archive_path: &Path, filename: &str, store_dir: &Path) -> Result<()> {
    let name = package_name_from_filename(filename)
        .ok_or_else(|| anyhow::anyhow!("could not derive package name from {filename}"))?;
    let bytes = std::fs::read(archive_path).with_context(|| format!("reading {}", archive_path.display()))?;
    let temp_dir = tempfile::Builder::new()
        .prefix(&format!("pkgsuper-media-{}-", std::process::id()))
        .tempdir()?;
    unpacker.unpack(&bytes, temp_dir.path())?;
    let found = find_package_dir(temp_dir.path())?;

    // No registry entry is created here; the next main-loop store scan
    // admits it (spec.md §4.8).
    bus.with_registry(|_registry| swap_into_store(store_dir, &name, &found))?;
    bus.set_media_status(format!("installed {name} from media"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutoDownloadMode;
    use crate::registry::Registry;

    #[derive(Default)]
    struct FakeUnpacker;

    impl ArchiveUnpacker for FakeUnpacker {
        fn unpack(&self, _archive: &[u8], dest: &Path) -> Result<()> {
            let pkg = dest.join("extracted");
            std::fs::create_dir_all(&pkg)?;
            std::fs::write(pkg.join("version"), "v1.0")?;
            Ok(())
        }
    }

    #[test]
    fn accepts_matching_suffix_and_rejects_plain_tarball() {
        assert!(is_accepted_archive("mypkg-current.tar.gz"));
        assert!(is_accepted_archive("mypkg-3.tar.gz"));
        assert!(!is_accepted_archive("mypkg.tar.gz"));
        assert!(!is_accepted_archive("mypkg-current.zip"));
    }

    #[test]
    fn derives_package_name_from_filename() {
        assert_eq!(
            package_name_from_filename("mypkg-current.tar.gz"),
            Some("mypkg".to_string())
        );
        assert_eq!(package_name_from_filename("other-5.tar.gz"), Some("other".to_string()));
        assert_eq!(package_name_from_filename("nope.tar.gz"), None);
    }

    #[test]
    fn extract_archive_swaps_into_store_without_registry_entry() {
        let bus = Bus::new(Registry::new(), AutoDownloadMode::Off, false);
        let store = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let archive_path = media.path().join("mypkg-current.tar.gz");
        std::fs::write(&archive_path, b"fake-bytes").unwrap();

        extract_archive(&bus, &FakeUnpacker, &archive_path, "mypkg-current.tar.gz", store.path()).unwrap();

        assert!(store.path().join("mypkg").join("version").exists());
        assert_eq!(bus.package_count(), 0);
    }

    #[test]
    fn scanned_volumes_are_forgotten_once_they_disappear() {
        let mount_root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(mount_root.path().join("usb1")).unwrap();
        let present = list_volumes(mount_root.path());
        assert!(present.contains("usb1"));

        std::fs::remove_dir_all(mount_root.path().join("usb1")).unwrap();
        let present = list_volumes(mount_root.path());
        assert!(!present.contains("usb1"));
    }
}
