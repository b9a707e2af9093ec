//! The temp-rename swap dance shared by the fetch-unpack-swap sequence
//! (spec.md §4.6.1 step 5) and the media-scan worker's swap-in-place
//! (spec.md §4.8). This is one of the two places spec.md §5 says the
//! registry lock is deliberately held across a filesystem rename, to
//! exclude readers from observing a half-renamed `<store>/<name>`.

use std::path::Path;

use anyhow::{Context, Result};
use fn_error_context::context;

/// Swap `source` (a freshly-unpacked package tree) into
/// `<store_dir>/<name>`, displacing whatever was there via a sibling
/// `<name>-temp` directory that is always removed afterwards, including on
/// error paths.
///
/// Callers must hold the registry lock across this call (spec.md §5).
#[context("Swapping {name} into the package store")]
pub fn swap_into_store(store_dir: &Path, name: &str, source: &Path) -> Result<()> {
    let target = store_dir.join(name);
    let staging = store_dir.join(format!("{name}-temp"));

    // Clean up any stale staging directory from a previous failed attempt.
    if staging.exists() {
        std::fs::remove_dir_all(&staging).context("removing stale -temp staging directory")?;
    }

    if target.exists() {
        std::fs::rename(&target, &staging)
            .with_context(|| format!("renaming {} aside", target.display()))?;
    }

    let move_result = move_tree(source, &target);
    if move_result.is_err() && staging.exists() {
        // Best-effort restore of the previous tree so a failed swap
        // doesn't leave the package store without that package at all.
        let _ = std::fs::rename(&staging, &target);
    }
    move_result?;

    if staging.exists() {
        std::fs::remove_dir_all(&staging).context("removing -temp staging directory")?;
    }
    Ok(())
}

fn move_tree(source: &Path, target: &Path) -> Result<()> {
    match std::fs::rename(source, target) {
        Ok(()) => Ok(()),
        // Cross-device (EXDEV): fall back to a recursive copy + remove.
        Err(_) => {
            copy_dir_recursive(source, target)
                .with_context(|| format!("copying {} to {}", source.display(), target.display()))?;
            std::fs::remove_dir_all(source).ok();
            Ok(())
        }
    }
}

fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_replaces_existing_package_directory() {
        let store = tempfile::tempdir().unwrap();
        let old = store.path().join("pkg-a");
        std::fs::create_dir_all(&old).unwrap();
        std::fs::write(old.join("version"), "v1.0").unwrap();

        let source = tempfile::tempdir().unwrap();
        let new_tree = source.path().join("unpacked");
        std::fs::create_dir_all(&new_tree).unwrap();
        std::fs::write(new_tree.join("version"), "v2.0").unwrap();

        swap_into_store(store.path(), "pkg-a", &new_tree).unwrap();

        let version = std::fs::read_to_string(store.path().join("pkg-a").join("version")).unwrap();
        assert_eq!(version, "v2.0");
        assert!(!store.path().join("pkg-a-temp").exists());
    }

    #[test]
    fn swap_handles_brand_new_package() {
        let store = tempfile::tempdir().unwrap();
        let source = tempfile::tempdir().unwrap();
        let new_tree = source.path().join("unpacked");
        std::fs::create_dir_all(&new_tree).unwrap();
        std::fs::write(new_tree.join("version"), "v1.0").unwrap();

        swap_into_store(store.path(), "brand-new", &new_tree).unwrap();
        assert!(store.path().join("brand-new").join("version").exists());
    }
}
