// tb-core/src/uninstall/common.rs

use std::path::Path;

use tb_common::error::{Result, TbError};
use tb_common::keg::{InstalledKeg, KegRegistry};
use tracing::{debug, error};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// Remove every installed version instead of only the active one.
    pub force: bool,
}

/// Removes a keg directory. A keg that is still there afterwards is an error.
pub(crate) fn remove_keg_dir(keg: &InstalledKeg) -> Result<()> {
    debug!("[{}] Removing keg directory {}", keg.name, keg.path.display());
    if let Err(e) = tb_io::remove_path(&keg.path) {
        if tb_io::check_symlink_exists(&keg.path) {
            error!("Failed to remove keg {}: {}", keg.path.display(), e);
            return Err(e);
        }
        debug!("Keg directory {} is already gone", keg.path.display());
    }
    if keg.path.exists() {
        return Err(TbError::Generic(format!(
            "Failed to remove keg directory: {}",
            keg.path.display()
        )));
    }
    Ok(())
}

/// Removes the rack of `name` if no kegs are left in it.
pub(crate) fn prune_rack(registry: &KegRegistry, name: &str) -> Result<bool> {
    let rack = registry.rack_path(name);
    let removed = tb_io::remove_dir_if_empty(&rack)?;
    if removed {
        debug!("[{}] Removed empty rack {}", name, rack.display());
    }
    Ok(removed)
}

/// Apparent size of everything below `path`, symlinks not followed.
pub(crate) fn disk_usage(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
